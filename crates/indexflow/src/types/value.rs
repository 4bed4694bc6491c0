//! Enriched value types attached to graph nodes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The shape of a value flowing through the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", tag = "kind")]
#[non_exhaustive]
pub enum ValueType {
    Bytes,
    Str,
    Bool,
    Int64,
    Float64,
    Json,
    Vector {
        element_type: Box<ValueType>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dimension: Option<usize>,
    },
    Struct {
        fields: Vec<FieldSchema>,
    },
    /// A collection of rows sharing one struct schema.
    Table {
        row: Vec<FieldSchema>,
    },
}

/// A named, typed field of a struct or table row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct FieldSchema {
    pub name: String,
    pub value_type: EnrichedValueType,
}

/// A [`ValueType`] plus nullability and free-form attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EnrichedValueType {
    #[serde(rename = "type")]
    pub typ: ValueType,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, Value>,
}

impl EnrichedValueType {
    /// A non-nullable value of `typ`.
    pub fn new(typ: ValueType) -> Self {
        Self {
            typ,
            nullable: false,
            attrs: BTreeMap::new(),
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Derive the type of a literal lifted into the graph.
    ///
    /// Numeric arrays become vectors with a fixed dimension; arrays of
    /// objects become tables typed by their first row. Anything else that
    /// has no direct counterpart is `Json`.
    pub fn of_literal(value: &Value) -> Self {
        match value {
            Value::Null => Self::new(ValueType::Json).nullable(),
            Value::Bool(_) => Self::new(ValueType::Bool),
            Value::Number(n) if n.is_i64() || n.is_u64() => Self::new(ValueType::Int64),
            Value::Number(_) => Self::new(ValueType::Float64),
            Value::String(_) => Self::new(ValueType::Str),
            Value::Array(items) => Self::new(array_type(items)),
            Value::Object(map) => Self::new(ValueType::Struct {
                fields: struct_fields(map),
            }),
        }
    }

    /// Type of the struct field `name`, if this is a struct that has it.
    pub fn field(&self, name: &str) -> Option<&EnrichedValueType> {
        match &self.typ {
            ValueType::Struct { fields } => fields
                .iter()
                .find(|f| f.name == name)
                .map(|f| &f.value_type),
            _ => None,
        }
    }

    /// Row schema, if this is a table.
    pub fn row(&self) -> Option<&[FieldSchema]> {
        match &self.typ {
            ValueType::Table { row } => Some(row),
            _ => None,
        }
    }
}

fn struct_fields(map: &serde_json::Map<String, Value>) -> Vec<FieldSchema> {
    map.iter()
        .map(|(name, v)| FieldSchema {
            name: name.clone(),
            value_type: EnrichedValueType::of_literal(v),
        })
        .collect()
}

fn array_type(items: &[Value]) -> ValueType {
    if items.is_empty() {
        return ValueType::Json;
    }
    if items.iter().all(|v| v.is_i64() || v.is_u64()) {
        return ValueType::Vector {
            element_type: Box::new(ValueType::Int64),
            dimension: Some(items.len()),
        };
    }
    if items.iter().all(Value::is_number) {
        return ValueType::Vector {
            element_type: Box::new(ValueType::Float64),
            dimension: Some(items.len()),
        };
    }
    match items.first() {
        Some(Value::Object(first)) if items.iter().all(Value::is_object) => ValueType::Table {
            row: struct_fields(first),
        },
        _ => ValueType::Json,
    }
}
