//! Attribute schema descriptors.
//!
//! A schema lists the named, typed fields of an attribute record. Projections
//! use it to derive one column per field and to read cell values out of the
//! attribute JSON document.

use crate::{error::Result, Error};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Field types supported in projections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Integer,
    String,
    /// Arbitrary nested JSON
    Object,
}

impl FieldType {
    /// Lower-case name used for columns.
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Integer => "integer",
            FieldType::String => "string",
            FieldType::Object => "object",
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match self {
            FieldType::Integer => value.is_i64() || value.is_u64() || value.is_null(),
            FieldType::String => value.is_string() || value.is_null(),
            FieldType::Object => true,
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Definition of one attribute field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    /// Field name, as it appears in the attribute document
    pub name: String,
    /// Field type
    pub field_type: FieldType,
}

impl FieldDef {
    /// Create a new field definition.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Integer)
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::String)
    }

    pub fn object(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Object)
    }

    /// Read and type-check this field from an attribute document.
    ///
    /// A missing field reads as `null`.
    pub fn read(&self, attributes: &Value) -> Result<Value> {
        let value = attributes.get(&self.name).cloned().unwrap_or(Value::Null);
        if self.field_type.accepts(&value) {
            Ok(value)
        } else {
            Err(Error::TypeMismatch {
                field: self.name.clone(),
                expected: self.field_type.to_string(),
                got: json_type_name(&value).to_string(),
            })
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "float",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Statically known attribute layout.
///
/// Implemented by attribute record types that are projected to tables.
pub trait AttributeSchema {
    fn fields() -> Vec<FieldDef>;
}

/// Runtime attribute layout, resolved once per projection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    pub fields: Vec<FieldDef>,
}

impl Schema {
    /// Create a schema from an explicit field list.
    ///
    /// Used for free-form `serde_json::Value` attributes.
    pub fn new(fields: Vec<FieldDef>) -> Result<Self> {
        for (i, field) in fields.iter().enumerate() {
            if field.name.is_empty() {
                return Err(Error::InvalidArgument("field name must not be empty".into()));
            }
            if fields[..i].iter().any(|f| f.name == field.name) {
                return Err(Error::InvalidArgument(format!(
                    "field '{}' declared twice",
                    field.name
                )));
            }
        }
        Ok(Self { fields })
    }

    /// Resolve the schema of a typed attribute record.
    pub fn of<A: AttributeSchema>() -> Self {
        Self {
            fields: A::fields(),
        }
    }

    /// Read every declared field out of a serializable attribute record,
    /// in declaration order.
    pub fn read<A: Serialize>(&self, attributes: &A) -> Result<Vec<(&FieldDef, Value)>> {
        let document = serde_json::to_value(attributes)?;
        self.fields
            .iter()
            .map(|field| Ok((field, field.read(&document)?)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Serialize)]
    struct Road {
        id: i64,
        name: String,
        surface: Option<Value>,
    }

    impl AttributeSchema for Road {
        fn fields() -> Vec<FieldDef> {
            vec![
                FieldDef::integer("id"),
                FieldDef::string("name"),
                FieldDef::object("surface"),
            ]
        }
    }

    #[test]
    fn typed_schema_reads_in_declaration_order() {
        let schema = Schema::of::<Road>();
        let road = Road {
            id: 7,
            name: "Ring".into(),
            surface: Some(json!({"kind": "asphalt"})),
        };

        let cells = schema.read(&road).unwrap();
        let names: Vec<_> = cells.iter().map(|(f, _)| f.name.as_str()).collect();
        assert_eq!(names, vec!["id", "name", "surface"]);
        assert_eq!(cells[0].1, json!(7));
        assert_eq!(cells[2].1, json!({"kind": "asphalt"}));
    }

    #[test]
    fn missing_fields_read_as_null() {
        let schema = Schema::new(vec![FieldDef::string("name")]).unwrap();
        let cells = schema.read(&json!({"id": 1})).unwrap();
        assert_eq!(cells[0].1, Value::Null);
    }

    #[test]
    fn wrong_type_rejected() {
        let schema = Schema::new(vec![FieldDef::integer("lanes")]).unwrap();
        let result = schema.read(&json!({"lanes": "two"}));
        assert!(matches!(result, Err(Error::TypeMismatch { field, .. }) if field == "lanes"));

        let result = schema.read(&json!({"lanes": 2.5}));
        assert!(matches!(result, Err(Error::TypeMismatch { got, .. }) if got == "float"));
    }

    #[test]
    fn object_accepts_anything() {
        let schema = Schema::new(vec![FieldDef::object("data")]).unwrap();
        for value in [json!("s"), json!(1), json!([1, 2]), json!({"n": true})] {
            assert!(schema.read(&json!({ "data": value })).is_ok());
        }
    }

    #[test]
    fn invalid_field_lists_rejected() {
        assert!(Schema::new(vec![FieldDef::string("")]).is_err());
        assert!(Schema::new(vec![FieldDef::string("a"), FieldDef::integer("a")]).is_err());
    }

    #[test]
    fn serialization_format() {
        let schema = Schema::new(vec![FieldDef::integer("id")]).unwrap();
        let json = serde_json::to_string(&schema).unwrap();
        assert_eq!(json, r#"{"fields":[{"name":"id","fieldType":"integer"}]}"#);
        assert_eq!(serde_json::from_str::<Schema>(&json).unwrap(), schema);
    }
}
