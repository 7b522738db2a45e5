//! Declarative value shapes and their validation.
//!
//! A [`Shape`] describes a JSON object: field name to [`FieldSpec`].  Shapes
//! are used for tool parameters and for agent result schemas.  A shape is
//! compiled once into a [`CompiledShape`], which carries both the JSON Schema
//! advertised to the model and a `jsonschema` validator built from it.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use jsonschema::{Draft, JSONSchema};
use serde_json::{Map, Value, json};

use crate::error::SchemaError;

// ---------------------------------------------------------------------------
// Kinds
// ---------------------------------------------------------------------------

/// Primitive kind of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    Null,
}

impl FieldKind {
    /// JSON Schema type name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
            Self::Null => "null",
        }
    }

    fn parse(name: &str) -> Result<Self, SchemaError> {
        match name {
            "string" => Ok(Self::String),
            "integer" => Ok(Self::Integer),
            "number" => Ok(Self::Number),
            "boolean" => Ok(Self::Boolean),
            "array" => Ok(Self::Array),
            "object" => Ok(Self::Object),
            "null" => Ok(Self::Null),
            other => Err(SchemaError::Invalid {
                reason: format!("unknown field type `{other}`"),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// FieldSpec
// ---------------------------------------------------------------------------

/// Specification of one field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub kind: FieldKind,
    pub required: bool,
    pub description: Option<String>,
    /// Nested shape for `object` fields.
    pub shape: Option<Shape>,
    /// Element spec for `array` fields.
    pub items: Option<Box<FieldSpec>>,
}

impl FieldSpec {
    /// A required field of the given kind.
    pub fn new(kind: FieldKind) -> Self {
        Self {
            kind,
            required: true,
            description: None,
            shape: None,
            items: None,
        }
    }

    pub fn string() -> Self {
        Self::new(FieldKind::String)
    }

    pub fn integer() -> Self {
        Self::new(FieldKind::Integer)
    }

    pub fn number() -> Self {
        Self::new(FieldKind::Number)
    }

    pub fn boolean() -> Self {
        Self::new(FieldKind::Boolean)
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_shape(mut self, shape: Shape) -> Self {
        self.shape = Some(shape);
        self
    }

    pub fn with_items(mut self, items: FieldSpec) -> Self {
        self.items = Some(Box::new(items));
        self
    }

    fn from_value(name: &str, value: &Value) -> Result<Self, SchemaError> {
        let map = match value {
            Value::String(kind) => return Ok(Self::new(FieldKind::parse(kind)?)),
            Value::Object(map) => map,
            other => {
                return Err(SchemaError::Invalid {
                    reason: format!("field `{name}` must be an object or type name, got {other}"),
                });
            }
        };

        let kind = map
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| SchemaError::Invalid {
                reason: format!("field `{name}` has no `type`"),
            })
            .and_then(FieldKind::parse)?;

        let mut spec = Self::new(kind);
        if let Some(required) = map.get("required").and_then(Value::as_bool) {
            spec.required = required;
        }
        spec.description = map
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_owned);

        if kind == FieldKind::Object {
            if map.contains_key("properties") {
                spec.shape = Some(Shape::from_value(value)?);
            } else if let Some(nested) = map.get("shape").or_else(|| map.get("fields")) {
                spec.shape = Some(Shape::from_value(nested)?);
            }
        }
        if kind == FieldKind::Array
            && let Some(items) = map.get("items")
        {
            spec.items = Some(Box::new(Self::from_value(&format!("{name}[]"), items)?));
        }
        Ok(spec)
    }

    fn to_json_schema(&self) -> Value {
        let mut schema = match (&self.kind, &self.shape, &self.items) {
            (FieldKind::Object, Some(shape), _) => shape.to_json_schema(),
            (FieldKind::Array, _, Some(items)) => json!({
                "type": "array",
                "items": items.to_json_schema(),
            }),
            (kind, _, _) => json!({ "type": kind.as_str() }),
        };
        if let (Some(description), Some(obj)) = (&self.description, schema.as_object_mut()) {
            obj.insert("description".into(), Value::String(description.clone()));
        }
        schema
    }
}

// ---------------------------------------------------------------------------
// Shape
// ---------------------------------------------------------------------------

/// Mapping of field name to [`FieldSpec`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Shape {
    fields: BTreeMap<String, FieldSpec>,
}

impl Shape {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field, builder style.
    pub fn field(mut self, name: impl Into<String>, spec: FieldSpec) -> Self {
        self.fields.insert(name.into(), spec);
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldSpec)> {
        self.fields.iter().map(|(name, spec)| (name.as_str(), spec))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Parse a shape from its wire form.
    ///
    /// Two forms are accepted: the field map itself
    /// (`{"response": {"type": "string"}}`) and a JSON-Schema-like object
    /// (`{"type": "object", "properties": {...}, "required": [...]}`).
    ///
    /// The JSON Schema form needs `"type": "object"` together with
    /// `properties` or `$schema`.  Anything else is a field map, so
    /// `{"type": "object"}` declares one object field named `type`.
    pub fn from_value(value: &Value) -> Result<Self, SchemaError> {
        let map = value.as_object().ok_or_else(|| SchemaError::Invalid {
            reason: format!("shape must be a JSON object, got {value}"),
        })?;

        let object_typed = map.get("type").and_then(Value::as_str) == Some("object");
        if object_typed && (map.contains_key("properties") || map.contains_key("$schema")) {
            return Self::from_json_schema(map);
        }

        let mut shape = Self::new();
        for (name, field) in map {
            shape
                .fields
                .insert(name.clone(), FieldSpec::from_value(name, field)?);
        }
        Ok(shape)
    }

    fn from_json_schema(map: &Map<String, Value>) -> Result<Self, SchemaError> {
        let properties = match map.get("properties") {
            None => return Ok(Self::new()),
            Some(Value::Object(props)) => props,
            Some(other) => {
                return Err(SchemaError::Invalid {
                    reason: format!("`properties` must be an object, got {other}"),
                });
            }
        };

        let required: Option<Vec<&str>> = match map.get("required") {
            None => None,
            Some(Value::Array(names)) => Some(names.iter().filter_map(Value::as_str).collect()),
            Some(other) => {
                return Err(SchemaError::Invalid {
                    reason: format!("`required` must be an array, got {other}"),
                });
            }
        };

        let mut shape = Self::new();
        for (name, field) in properties {
            let mut spec = FieldSpec::from_value(name, field)?;
            if let Some(required) = &required {
                spec.required = required.contains(&name.as_str());
            }
            shape.fields.insert(name.clone(), spec);
        }
        Ok(shape)
    }

    /// Render as a JSON Schema object.
    pub fn to_json_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .fields
            .iter()
            .map(|(name, spec)| (name.clone(), spec.to_json_schema()))
            .collect();
        let required: Vec<Value> = self
            .fields
            .iter()
            .filter(|(_, spec)| spec.required)
            .map(|(name, _)| Value::String(name.clone()))
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

// ---------------------------------------------------------------------------
// CompiledShape
// ---------------------------------------------------------------------------

/// A shape together with its JSON Schema and compiled validator.
#[derive(Clone)]
pub struct CompiledShape {
    shape: Shape,
    schema: Value,
    validator: Arc<JSONSchema>,
}

impl fmt::Debug for CompiledShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledShape")
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

impl CompiledShape {
    pub fn compile(shape: Shape) -> Result<Self, SchemaError> {
        let schema = shape.to_json_schema();
        let validator = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(&schema)
            .map_err(|e| SchemaError::Invalid {
                reason: format!("failed to compile schema: {e}"),
            })?;
        Ok(Self {
            shape,
            schema,
            validator: Arc::new(validator),
        })
    }

    /// Parse the wire form and compile it.
    pub fn from_value(value: &Value) -> Result<Self, SchemaError> {
        Self::compile(Shape::from_value(value)?)
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// JSON Schema advertised to the model.
    pub fn json_schema(&self) -> &Value {
        &self.schema
    }

    /// Check `value` against the shape.  Extra fields are allowed.
    pub fn validate(&self, value: &Value) -> Result<(), SchemaError> {
        if let Err(errors) = self.validator.validate(value) {
            let messages: Vec<String> = errors
                .map(|e| {
                    let path = e.instance_path.to_string();
                    if path.is_empty() {
                        e.to_string()
                    } else {
                        format!("{path}: {e}")
                    }
                })
                .collect();
            return Err(SchemaError::Mismatch {
                reason: messages.join("; "),
            });
        }
        Ok(())
    }
}
