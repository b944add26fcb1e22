//! Database models
//!
//! One canonical record type per entity. Wire encodings are derived from these
//! with serde at the HTTP/SSE boundary; there is no second "compact" form.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// What kind of value a live item carries
///
/// Stored as a small integer; the numbering is part of the stored data and
/// must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum DataType {
    Number = 0,
    String = 1,
    Color = 2,
    LineWidth = 3,
    LineStyle = 4,
    GroupPtr = 5,
}

impl DataType {
    /// Integer stored in the `data_type` column
    pub fn as_i64(self) -> i64 {
        self as i64
    }
}

impl TryFrom<i64> for DataType {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(DataType::Number),
            1 => Ok(DataType::String),
            2 => Ok(DataType::Color),
            3 => Ok(DataType::LineWidth),
            4 => Ok(DataType::LineStyle),
            5 => Ok(DataType::GroupPtr),
            other => Err(format!("unknown data type {}", other)),
        }
    }
}

impl From<DataType> for i64 {
    fn from(value: DataType) -> Self {
        value.as_i64()
    }
}

/// A named partition of the live key space
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ModelSet {
    pub id: i64,
    pub key: String,
    pub name: String,
    pub comment: Option<String>,
}

/// One live key as stored in `live_db_item`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ValueItem {
    pub id: i64,
    pub model_set_id: i64,
    pub key: String,
    pub raw_value: Option<String>,
    pub display_value: Option<String>,
    pub data_type: i64,
    pub import_hash: Option<String>,
}

/// One durable staging record in `live_db_raw_value_queue`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct QueueEntry {
    pub id: i64,
    pub model_set_id: i64,
    pub key: String,
    pub raw_value: Option<String>,
}

/// Candidate row submitted for import
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportItem {
    pub key: String,
    pub data_type: DataType,
    #[serde(default)]
    pub raw_value: Option<String>,
    #[serde(default)]
    pub display_value: Option<String>,
    #[serde(default)]
    pub import_hash: Option<String>,
}

/// A raw value observed at the source for one key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawValueUpdate {
    pub key: String,
    pub raw_value: Option<String>,
}

/// A translated display value for one key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayValueUpdate {
    pub key: String,
    pub display_value: Option<String>,
}

/// Read tuple served by bulk reads and "items added" notifications
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveDbValue {
    pub key: String,
    pub data_type: DataType,
    pub raw_value: Option<String>,
    pub display_value: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_type_integer_mapping_is_stable() {
        assert_eq!(DataType::Number.as_i64(), 0);
        assert_eq!(DataType::String.as_i64(), 1);
        assert_eq!(DataType::Color.as_i64(), 2);
        assert_eq!(DataType::LineWidth.as_i64(), 3);
        assert_eq!(DataType::LineStyle.as_i64(), 4);
        assert_eq!(DataType::GroupPtr.as_i64(), 5);
        assert!(DataType::try_from(6).is_err());
    }

    #[test]
    fn test_data_type_serializes_as_integer() {
        let value = LiveDbValue {
            key: "K1".to_string(),
            data_type: DataType::Color,
            raw_value: Some("5".to_string()),
            display_value: None,
        };
        let json = serde_json::to_string(&value).unwrap();
        assert!(json.contains("\"data_type\":2"), "got {}", json);

        let parsed: LiveDbValue = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, value);
    }

    #[test]
    fn test_import_item_optional_fields_default() {
        let item: ImportItem = serde_json::from_str(r#"{"key":"K1","data_type":0}"#).unwrap();
        assert_eq!(item.key, "K1");
        assert_eq!(item.data_type, DataType::Number);
        assert!(item.raw_value.is_none());
        assert!(item.import_hash.is_none());
    }

    #[test]
    fn test_unknown_data_type_rejected() {
        let result: Result<ImportItem, _> = serde_json::from_str(r#"{"key":"K1","data_type":9}"#);
        assert!(result.is_err());
    }
}
