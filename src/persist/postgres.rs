/// PostgreSQL sink for batch output.
///
/// One row per grid cell per event in `whenwx.event_timing`. A run replaces
/// the rows of every event it processed inside a single transaction; events
/// that failed keep their previous rows. "No breach" is stored as SQL NULL.

use ::postgres::{Client, NoTls};

use super::{BatchOutput, PersistError};
use crate::format::{ConfidenceBand, MODEL_CONSISTENCY_STUB, TimingView};
use crate::logging::Component;

pub const SCHEMA_SQL: &str = "
    CREATE SCHEMA IF NOT EXISTS whenwx;
    CREATE TABLE IF NOT EXISTS whenwx.event_timing (
        event_id            TEXT             NOT NULL,
        latitude            DOUBLE PRECISION NOT NULL,
        longitude           DOUBLE PRECISION NOT NULL,
        forecast_init_time  TIMESTAMPTZ,
        first_breach_time   TEXT,
        duration_hours      DOUBLE PRECISION,
        next_breach_time    TEXT,
        next_duration_hours DOUBLE PRECISION,
        processing_time     TIMESTAMPTZ      NOT NULL,
        PRIMARY KEY (event_id, latitude, longitude)
    );
";

pub fn connect(database_url: &str) -> Result<Client, PersistError> {
    Ok(Client::connect(database_url, NoTls)?)
}

pub fn ensure_schema(client: &mut Client) -> Result<(), PersistError> {
    client.batch_execute(SCHEMA_SQL)?;
    Ok(())
}

/// Replaces the stored rows of every processed event. Returns rows written.
pub fn write_output(client: &mut Client, output: &BatchOutput) -> Result<u64, PersistError> {
    output.validate()?;
    let mut tx = client.transaction()?;
    let insert = tx.prepare(
        "INSERT INTO whenwx.event_timing
         (event_id, latitude, longitude, forecast_init_time, first_breach_time,
          duration_hours, next_breach_time, next_duration_hours, processing_time)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
    )?;

    let mut written = 0;
    for event_id in &output.events_processed {
        tx.execute(
            "DELETE FROM whenwx.event_timing WHERE event_id = $1",
            &[event_id],
        )?;
        for lat_idx in 0..output.latitude.len() {
            for lon_idx in 0..output.longitude.len() {
                let timing = output.timing_at(event_id, lat_idx, lon_idx)?;
                written += tx.execute(
                    &insert,
                    &[
                        event_id,
                        &output.latitude[lat_idx],
                        &output.longitude[lon_idx],
                        &output.forecast_init_time,
                        &timing.first_breach_time,
                        &timing.duration_hours,
                        &timing.next_breach_time,
                        &timing.next_duration_hours,
                        &output.processing_time,
                    ],
                )?;
            }
        }
    }
    tx.commit()?;

    tracing::info!(
        component = %Component::Persist,
        rows = written,
        events = ?output.events_processed,
        "wrote batch output to whenwx.event_timing"
    );
    Ok(written)
}

/// Stored timing of one event at one grid point, if a row exists.
pub fn fetch_timing(
    client: &mut Client,
    event_id: &str,
    latitude: f64,
    longitude: f64,
) -> Result<Option<TimingView>, PersistError> {
    let row = client.query_opt(
        "SELECT first_breach_time, duration_hours, next_breach_time, next_duration_hours
         FROM whenwx.event_timing
         WHERE event_id = $1 AND latitude = $2 AND longitude = $3",
        &[&event_id, &latitude, &longitude],
    )?;
    Ok(row.map(|row| TimingView {
        first_breach_time: row.get(0),
        duration_hours: row.get(1),
        next_breach_time: row.get(2),
        next_duration_hours: row.get(3),
        model_consistency: MODEL_CONSISTENCY_STUB,
        confidence_band: ConfidenceBand::default(),
    }))
}
