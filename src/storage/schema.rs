//! Primary-key schemas and their enforcement on vertex creation.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ShardError};
use crate::types::{LabelId, PropertyId};
use crate::value::{PropertyValue, TemporalKind};

/// Value types a schema property may declare.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub enum SchemaType {
    Bool,
    Int,
    Double,
    String,
    Date,
    LocalTime,
    LocalDateTime,
    Duration,
}

impl SchemaType {
    pub fn matches(self, value: &PropertyValue) -> bool {
        match (self, value) {
            (SchemaType::Bool, PropertyValue::Bool(_)) => true,
            (SchemaType::Int, PropertyValue::Int(_)) => true,
            (SchemaType::Double, PropertyValue::Double(_)) => true,
            (SchemaType::String, PropertyValue::String(_)) => true,
            (SchemaType::Date, PropertyValue::Temporal(t)) => t.kind == TemporalKind::Date,
            (SchemaType::LocalTime, PropertyValue::Temporal(t)) => {
                t.kind == TemporalKind::LocalTime
            }
            (SchemaType::LocalDateTime, PropertyValue::Temporal(t)) => {
                t.kind == TemporalKind::LocalDateTime
            }
            (SchemaType::Duration, PropertyValue::Temporal(t)) => t.kind == TemporalKind::Duration,
            _ => false,
        }
    }
}

/// One declared primary-key property.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct SchemaProperty {
    pub property_id: PropertyId,
    pub kind: SchemaType,
}

/// Listing of the schemas defined on a shard.
pub type SchemasInfo = Vec<(LabelId, Vec<SchemaProperty>)>;

/// Primary-key schemas keyed by label, with the create-time validation.
#[derive(Debug, Default)]
pub struct Schemas {
    map: RwLock<HashMap<LabelId, Vec<SchemaProperty>>>,
}

impl Schemas {
    pub fn new() -> Self {
        Schemas::default()
    }

    pub fn create(&self, label: LabelId, properties: Vec<SchemaProperty>) -> bool {
        let mut map = self.map.write();
        if map.contains_key(&label) {
            return false;
        }
        map.insert(label, properties);
        true
    }

    pub fn drop_schema(&self, label: LabelId) -> bool {
        self.map.write().remove(&label).is_some()
    }

    pub fn get(&self, label: LabelId) -> Option<Vec<SchemaProperty>> {
        self.map.read().get(&label).cloned()
    }

    pub fn list(&self) -> SchemasInfo {
        let mut all: SchemasInfo = self
            .map
            .read()
            .iter()
            .map(|(label, props)| (*label, props.clone()))
            .collect();
        all.sort_by_key(|(label, _)| *label);
        all
    }

    /// Validates a vertex creation against the schema of `primary_label`:
    /// the schema must exist, `pk_values` must match its arity and types,
    /// and `properties` must not shadow a primary-key property.
    pub fn validate_create(
        &self,
        primary_label: LabelId,
        pk_values: &[PropertyValue],
        properties: &[(PropertyId, PropertyValue)],
    ) -> Result<()> {
        let map = self.map.read();
        let schema = map.get(&primary_label).ok_or_else(|| {
            ShardError::SchemaViolation(format!("no schema defined for label {primary_label}"))
        })?;
        if pk_values.len() != schema.len() {
            return Err(ShardError::SchemaViolation(format!(
                "primary key has {} values, schema declares {}",
                pk_values.len(),
                schema.len()
            )));
        }
        for (declared, value) in schema.iter().zip(pk_values) {
            if value.is_null() {
                return Err(ShardError::SchemaViolation(format!(
                    "primary key property {} must not be null",
                    declared.property_id
                )));
            }
            if !declared.kind.matches(value) {
                return Err(ShardError::SchemaViolation(format!(
                    "primary key property {} has mismatched type",
                    declared.property_id
                )));
            }
        }
        for (property, _) in properties {
            if schema.iter().any(|declared| declared.property_id == *property) {
                return Err(ShardError::SchemaViolation(format!(
                    "property {property} is part of the primary key"
                )));
            }
        }
        Ok(())
    }
}
