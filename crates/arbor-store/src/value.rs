//! Property values

use crate::node::NodeId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The type of a property value, as named in type definitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    String,
    Long,
    Double,
    Boolean,
    Date,
    Name,
    Path,
    Reference,
    Binary,
    /// Accepts any value type
    Undefined,
}

impl FromStr for PropertyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "string" => Ok(PropertyType::String),
            "long" => Ok(PropertyType::Long),
            "double" => Ok(PropertyType::Double),
            "boolean" => Ok(PropertyType::Boolean),
            "date" => Ok(PropertyType::Date),
            "name" => Ok(PropertyType::Name),
            "path" => Ok(PropertyType::Path),
            "reference" => Ok(PropertyType::Reference),
            "binary" => Ok(PropertyType::Binary),
            "undefined" | "*" => Ok(PropertyType::Undefined),
            other => Err(format!("unknown property type '{}'", other)),
        }
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PropertyType::String => "string",
            PropertyType::Long => "long",
            PropertyType::Double => "double",
            PropertyType::Boolean => "boolean",
            PropertyType::Date => "date",
            PropertyType::Name => "name",
            PropertyType::Path => "path",
            PropertyType::Reference => "reference",
            PropertyType::Binary => "binary",
            PropertyType::Undefined => "undefined",
        };
        f.write_str(name)
    }
}

/// A single typed value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    String(String),
    Long(i64),
    Double(f64),
    Boolean(bool),
    Date(DateTime<Utc>),
    Name(String),
    Path(String),
    Reference(NodeId),
    Binary(Vec<u8>),
}

impl Value {
    pub fn property_type(&self) -> PropertyType {
        match self {
            Value::String(_) => PropertyType::String,
            Value::Long(_) => PropertyType::Long,
            Value::Double(_) => PropertyType::Double,
            Value::Boolean(_) => PropertyType::Boolean,
            Value::Date(_) => PropertyType::Date,
            Value::Name(_) => PropertyType::Name,
            Value::Path(_) => PropertyType::Path,
            Value::Reference(_) => PropertyType::Reference,
            Value::Binary(_) => PropertyType::Binary,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Name(s) | Value::Path(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Date(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) | Value::Name(s) | Value::Path(s) => f.write_str(s),
            Value::Long(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Boolean(v) => write!(f, "{}", v),
            Value::Date(v) => write!(f, "{}", v.to_rfc3339()),
            Value::Reference(id) => write!(f, "{}", id),
            Value::Binary(bytes) => write!(f, "<{} bytes>", bytes.len()),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Long(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::Date(value)
    }
}

/// A single- or multi-valued property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    values: Vec<Value>,
    multiple: bool,
}

impl Property {
    pub fn single(value: impl Into<Value>) -> Self {
        Self {
            values: vec![value.into()],
            multiple: false,
        }
    }

    pub fn multiple(values: Vec<Value>) -> Self {
        Self {
            values,
            multiple: true,
        }
    }

    pub fn is_multiple(&self) -> bool {
        self.multiple
    }

    /// The value of a single-valued property
    pub fn value(&self) -> Option<&Value> {
        if self.multiple {
            None
        } else {
            self.values.first()
        }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// String rendering of all values, for multi-valued text properties
    pub fn strings(&self) -> Vec<String> {
        self.values.iter().map(|v| v.to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_and_multiple_access() {
        let single = Property::single("hello");
        assert!(!single.is_multiple());
        assert_eq!(single.value(), Some(&Value::String("hello".to_string())));

        let multi = Property::multiple(vec![Value::from(1), Value::from(2)]);
        assert!(multi.is_multiple());
        assert_eq!(multi.value(), None);
        assert_eq!(multi.strings(), vec!["1", "2"]);
    }

    #[test]
    fn test_property_type_names() {
        assert_eq!("Reference".parse::<PropertyType>().unwrap(), PropertyType::Reference);
        assert_eq!("*".parse::<PropertyType>().unwrap(), PropertyType::Undefined);
        assert!("decimal".parse::<PropertyType>().is_err());
    }

    #[test]
    fn test_value_json_shape() {
        let json = serde_json::to_string(&Value::Long(7)).unwrap();
        assert_eq!(json, r#"{"type":"long","value":7}"#);
    }
}
