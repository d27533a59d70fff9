//! Entity types, typed payloads, and the store-level record representation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::{TillError, TillResult};

/// Bookkeeping fields that never take part in conflict comparison.
const BOOKKEEPING_FIELDS: &[&str] = &["modified_at", "created_at", "synced_at", "version"];

/// A synchronized table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Product,
    Category,
    Stock,
    Sale,
}

impl EntityType {
    /// Every synchronized table, in sync order.
    pub const ALL: [EntityType; 4] = [
        EntityType::Category,
        EntityType::Product,
        EntityType::Stock,
        EntityType::Sale,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Product => "product",
            EntityType::Category => "category",
            EntityType::Stock => "stock",
            EntityType::Sale => "sale",
        }
    }

    /// Fixed base path of this table on the central store.
    pub fn base_path(&self) -> &'static str {
        match self {
            EntityType::Product => "/products",
            EntityType::Category => "/categories",
            EntityType::Stock => "/stock",
            EntityType::Sale => "/sales",
        }
    }

    /// Fields declared as system bookkeeping for this table.
    pub fn system_fields(&self) -> &'static [&'static str] {
        match self {
            EntityType::Product | EntityType::Category | EntityType::Stock | EntityType::Sale => {
                BOOKKEEPING_FIELDS
            }
        }
    }

    pub fn is_system_field(&self, field: &str) -> bool {
        self.system_fields().contains(&field)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = TillError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "product" | "products" => Ok(EntityType::Product),
            "category" | "categories" => Ok(EntityType::Category),
            "stock" => Ok(EntityType::Stock),
            "sale" | "sales" => Ok(EntityType::Sale),
            other => Err(TillError::UnknownEntity(other.to_string())),
        }
    }
}

/// Kind of mutation captured by the operation queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        })
    }
}

// ── Record ────────────────────────────────────────────────────────────────────

/// One row as seen by a record store: id, modification timestamp, and the
/// remaining fields flattened alongside them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    pub fn new(id: impl Into<String>, modified_at: Option<DateTime<Utc>>) -> Self {
        Self {
            id: id.into(),
            modified_at,
            fields: Map::new(),
        }
    }

    /// Builder-style field setter.
    pub fn with_field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

// ── Typed entities ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub sku: String,
    pub name: String,
    #[serde(default)]
    pub category_id: Option<String>,
    /// Unit price in minor currency units
    pub price: i64,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
}

/// On-hand quantity of one product at one location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockLevel {
    pub id: String,
    pub product_id: String,
    pub location: String,
    pub quantity: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleLine {
    pub product_id: String,
    pub quantity: i64,
    pub unit_price: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sale {
    pub id: String,
    pub receipt_number: String,
    pub lines: Vec<SaleLine>,
    pub total: i64,
    pub tendered_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

// ── EntityPayload ─────────────────────────────────────────────────────────────

/// Strongly typed payload of a queued mutation, tagged by entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity", content = "data", rename_all = "snake_case")]
pub enum EntityPayload {
    Product(Product),
    Category(Category),
    Stock(StockLevel),
    Sale(Sale),
}

impl EntityPayload {
    pub fn entity_type(&self) -> EntityType {
        match self {
            EntityPayload::Product(_) => EntityType::Product,
            EntityPayload::Category(_) => EntityType::Category,
            EntityPayload::Stock(_) => EntityType::Stock,
            EntityPayload::Sale(_) => EntityType::Sale,
        }
    }

    pub fn record_id(&self) -> &str {
        match self {
            EntityPayload::Product(p) => &p.id,
            EntityPayload::Category(c) => &c.id,
            EntityPayload::Stock(s) => &s.id,
            EntityPayload::Sale(s) => &s.id,
        }
    }

    /// Serialize the typed payload into the wire record understood by stores.
    pub fn to_record(&self) -> TillResult<Record> {
        let value = match self {
            EntityPayload::Product(p) => serde_json::to_value(p)?,
            EntityPayload::Category(c) => serde_json::to_value(c)?,
            EntityPayload::Stock(s) => serde_json::to_value(s)?,
            EntityPayload::Sale(s) => serde_json::to_value(s)?,
        };
        Ok(serde_json::from_value(value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn product() -> Product {
        Product {
            id: "p1".into(),
            sku: "SKU-001".into(),
            name: "Espresso beans 1kg".into(),
            category_id: Some("coffee".into()),
            price: 1899,
            active: true,
            modified_at: Some(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()),
        }
    }

    #[test]
    fn entity_type_parse() {
        assert_eq!("product".parse::<EntityType>().unwrap(), EntityType::Product);
        assert_eq!("sales".parse::<EntityType>().unwrap(), EntityType::Sale);
        match "customer".parse::<EntityType>() {
            Err(TillError::UnknownEntity(name)) => assert_eq!(name, "customer"),
            other => panic!("expected UnknownEntity, got {other:?}"),
        }
    }

    #[test]
    fn entity_type_display_roundtrip() {
        for entity in EntityType::ALL {
            assert_eq!(entity.to_string().parse::<EntityType>().unwrap(), entity);
        }
    }

    #[test]
    fn system_fields_include_timestamps() {
        assert!(EntityType::Product.is_system_field("modified_at"));
        assert!(EntityType::Stock.is_system_field("version"));
        assert!(!EntityType::Product.is_system_field("price"));
    }

    #[test]
    fn payload_is_tagged_by_entity() {
        let payload = EntityPayload::Product(product());
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["entity"], "product");
        assert_eq!(json["data"]["sku"], "SKU-001");

        let parsed: EntityPayload = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, payload);
        assert_eq!(parsed.entity_type(), EntityType::Product);
        assert_eq!(parsed.record_id(), "p1");
    }

    #[test]
    fn mismatched_payload_shape_is_rejected() {
        // A stock payload without product_id must not deserialize
        let bad = serde_json::json!({
            "entity": "stock",
            "data": { "id": "s1", "location": "front", "quantity": 3 }
        });
        assert!(serde_json::from_value::<EntityPayload>(bad).is_err());
    }

    #[test]
    fn payload_to_record_flattens_fields() {
        let record = EntityPayload::Product(product()).to_record().unwrap();
        assert_eq!(record.id, "p1");
        assert_eq!(record.modified_at, product().modified_at);
        assert_eq!(record.field("price"), Some(&Value::from(1899)));
        assert!(record.field("id").is_none());
        assert!(record.field("modified_at").is_none());
    }

    #[test]
    fn record_without_timestamp_omits_field() {
        let record = Record::new("c1", None).with_field("name", "Coffee");
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("modified_at").is_none());
        assert_eq!(json["name"], "Coffee");
    }
}
