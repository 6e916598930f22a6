use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::TenancyError;
use crate::tenant::TenantId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub Uuid);

impl EntityId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntityId {
    type Err = TenancyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(EntityId)
            .map_err(|_| TenancyError::InvalidIdentifier(format!("invalid entity id '{}'", s)))
    }
}

/// A dynamic entity row. `tenant_id` is the ownership column; everything
/// else lives in `fields`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub entity_type: String,
    #[serde(default)]
    pub id: EntityId,
    #[serde(default)]
    pub tenant_id: Option<TenantId>,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl Record {
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: EntityId::new(),
            tenant_id: None,
            fields: Map::new(),
        }
    }

    pub fn with_id(mut self, id: EntityId) -> Self {
        self.id = id;
        self
    }

    pub fn with_tenant(mut self, tenant_id: TenantId) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Value of a column as a predicate sees it. `id` and `tenant_id` are
    /// the record's own columns; other names read from `fields`.
    pub fn field(&self, name: &str) -> Value {
        match name {
            "id" => Value::String(self.id.to_string()),
            "tenant_id" => self
                .tenant_id
                .map(|id| Value::String(id.to_string()))
                .unwrap_or(Value::Null),
            other => self.fields.get(other).cloned().unwrap_or(Value::Null),
        }
    }
}

/// Whether an entity type carries the tenant ownership column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tenancy {
    TenantOwned,
    Unscoped,
}

/// Declared tenancy per entity type. Types nobody declared are `Unscoped`:
/// they pass through the engine untouched.
#[derive(Debug, Clone, Default)]
pub struct EntityCatalog {
    types: HashMap<String, Tenancy>,
}

impl EntityCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tenant_owned(mut self, entity_type: impl Into<String>) -> Self {
        self.types.insert(entity_type.into(), Tenancy::TenantOwned);
        self
    }

    pub fn unscoped(mut self, entity_type: impl Into<String>) -> Self {
        self.types.insert(entity_type.into(), Tenancy::Unscoped);
        self
    }

    pub fn tenancy(&self, entity_type: &str) -> Tenancy {
        self.types
            .get(entity_type)
            .copied()
            .unwrap_or(Tenancy::Unscoped)
    }

    pub fn is_tenant_owned(&self, entity_type: &str) -> bool {
        self.tenancy(entity_type) == Tenancy::TenantOwned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn undeclared_types_are_unscoped() {
        let catalog = EntityCatalog::new().tenant_owned("tickets").unscoped("countries");
        assert_eq!(catalog.tenancy("tickets"), Tenancy::TenantOwned);
        assert_eq!(catalog.tenancy("countries"), Tenancy::Unscoped);
        assert_eq!(catalog.tenancy("assets"), Tenancy::Unscoped);
        assert!(catalog.is_tenant_owned("tickets"));
        assert!(!catalog.is_tenant_owned("countries"));
    }

    #[test]
    fn record_columns_and_fields() {
        let tenant = TenantId::new();
        let record = Record::new("tickets")
            .with_tenant(tenant)
            .with_field("title", "printer on fire");

        assert_eq!(record.field("tenant_id"), json!(tenant.to_string()));
        assert_eq!(record.field("title"), json!("printer on fire"));
        assert_eq!(record.field("missing"), Value::Null);
        assert_eq!(Record::new("tickets").field("tenant_id"), Value::Null);
    }

    #[test]
    fn record_deserializes_with_defaults() {
        let record: Record =
            serde_json::from_value(json!({ "entity_type": "tickets", "fields": { "n": 1 } })).unwrap();
        assert!(record.tenant_id.is_none());
        assert_eq!(record.field("n"), json!(1));
    }
}
