/// WhenWX event timing service.
///
/// For a gridded weather forecast, answers "when will this condition first
/// hold here, for how long, and when does it come back?". The batch run
/// answers it for every grid cell and persists the result; the query server
/// answers it for one location on demand. Both go through the same
/// extraction, evaluation and timing code.
///
/// Data flow:
///   ingest (grid → series) → analysis (mask → timing) → format → query / batch

pub mod analysis;
pub mod batch;
pub mod config;
pub mod dev_mode;
pub mod events;
pub mod format;
pub mod freshness;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod persist;
pub mod query;
pub mod server;
pub mod variables;
