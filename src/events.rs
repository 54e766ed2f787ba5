/// Weather event catalog.
///
/// An event is a named threshold condition on one weather variable, e.g.
/// "temperature below -10 °C". This is the single source of truth for event
/// ids: the query surface resolves `event_id` here, and the batch run
/// processes every event in the catalog.
///
/// Thresholds are stored in the variable's native storage units (Kelvin for
/// temperature). Operators are validated when an event is constructed or
/// deserialized, so an event in the catalog can always be evaluated.

use crate::model::{Condition, Operator};
use crate::persist;
use crate::variables;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Event definitions
// ---------------------------------------------------------------------------

/// One threshold event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDefinition {
    pub event_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Variable id, see `variables::VARIABLE_REGISTRY`.
    pub variable: String,
    /// Threshold in storage units.
    pub threshold: f64,
    pub operator: Operator,
    /// Display unit for the threshold and the charted series.
    pub unit: String,
}

impl EventDefinition {
    pub fn condition(&self) -> Condition {
        Condition::new(self.threshold, self.operator)
    }

    /// Threshold converted to display units, rounded to 2 decimals.
    pub fn threshold_display(&self) -> f64 {
        let display = variables::conversion_for(&self.variable).to_display(self.threshold);
        (display * 100.0).round() / 100.0
    }
}

/// Temperature below `threshold_celsius`.
pub fn freezing_below(threshold_celsius: f64) -> EventDefinition {
    let conversion = variables::conversion_for("2t");
    EventDefinition {
        event_id: "freezing".to_string(),
        name: "Freezing Temperatures".to_string(),
        description: format!("Temperature drops below {}°C", threshold_celsius),
        variable: "2t".to_string(),
        threshold: conversion.to_storage(threshold_celsius),
        operator: Operator::Lt,
        unit: "°C".to_string(),
    }
}

/// Temperature above `threshold_celsius`.
pub fn heat_above(threshold_celsius: f64) -> EventDefinition {
    let conversion = variables::conversion_for("2t");
    EventDefinition {
        event_id: "heat".to_string(),
        name: "Extreme Heat".to_string(),
        description: format!("Temperature rises above {}°C", threshold_celsius),
        variable: "2t".to_string(),
        threshold: conversion.to_storage(threshold_celsius),
        operator: Operator::Gt,
        unit: "°C".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CatalogError {
    #[error("duplicate event id '{0}'")]
    DuplicateEvent(String),
    #[error("event '{event_id}' has an empty variable name")]
    MissingVariable { event_id: String },
    #[error("event '{event_id}' has a non-finite threshold")]
    InvalidThreshold { event_id: String },
    #[error("event '{event_id}' collides with event '{other}' on output column '{key}'")]
    FieldKeyCollision {
        event_id: String,
        other: String,
        key: String,
    },
}

/// The set of events this service answers for.
#[derive(Debug, Clone, PartialEq)]
pub struct EventCatalog {
    events: Vec<EventDefinition>,
}

impl EventCatalog {
    /// Events built into the service: freezing (-10 °C) and heat (35 °C).
    pub fn builtin() -> Self {
        Self {
            events: vec![freezing_below(-10.0), heat_above(35.0)],
        }
    }

    /// Catalog from explicit definitions; rejects duplicate ids and
    /// unusable thresholds.
    pub fn from_events(events: Vec<EventDefinition>) -> Result<Self, CatalogError> {
        let mut catalog = Self { events: Vec::new() };
        for event in events {
            catalog.insert(event)?;
        }
        Ok(catalog)
    }

    /// Built-in events plus `extra`. An extra event may not reuse a built-in id.
    pub fn with_extra(extra: Vec<EventDefinition>) -> Result<Self, CatalogError> {
        let mut catalog = Self::builtin();
        for event in extra {
            catalog.insert(event)?;
        }
        Ok(catalog)
    }

    fn insert(&mut self, event: EventDefinition) -> Result<(), CatalogError> {
        if self.find(&event.event_id).is_some() {
            return Err(CatalogError::DuplicateEvent(event.event_id));
        }
        if event.variable.trim().is_empty() {
            return Err(CatalogError::MissingVariable { event_id: event.event_id });
        }
        if !event.threshold.is_finite() {
            return Err(CatalogError::InvalidThreshold { event_id: event.event_id });
        }
        if let Some((other, key)) = self.column_collision(&event.event_id) {
            return Err(CatalogError::FieldKeyCollision {
                event_id: event.event_id,
                other,
                key,
            });
        }
        self.events.push(event);
        Ok(())
    }

    /// First existing event whose persisted column keys overlap `event_id`'s.
    fn column_collision(&self, event_id: &str) -> Option<(String, String)> {
        let keys: Vec<String> = persist::FIELDS
            .iter()
            .map(|f| persist::field_key(event_id, f))
            .collect();
        self.events.iter().find_map(|existing| {
            persist::FIELDS
                .iter()
                .map(|f| persist::field_key(&existing.event_id, f))
                .find(|k| keys.contains(k))
                .map(|k| (existing.event_id.clone(), k))
        })
    }

    /// Looks up an event by id. Returns `None` if not found.
    pub fn find(&self, event_id: &str) -> Option<&EventDefinition> {
        self.events.iter().find(|e| e.event_id == event_id)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.events.iter().map(|e| e.event_id.as_str()).collect()
    }

    pub fn events(&self) -> &[EventDefinition] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl Default for EventCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
