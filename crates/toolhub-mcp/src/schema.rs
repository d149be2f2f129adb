//! Structural input schemas and argument validation.
//!
//! Servers declare tool inputs as JSON Schema objects. At handshake time the
//! gateway reduces each one to an [`InputSchema`]: a flat list of named
//! parameters with a type tag, an optional enum constraint and a required
//! flag. Calls are checked against it before anything reaches the transport.

use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};

/// Runtime type tag of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
    Null,
    /// No type declared; any value is accepted.
    Any,
}

impl ParamType {
    fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "string" => Self::String,
            "number" => Self::Number,
            "integer" => Self::Integer,
            "boolean" => Self::Boolean,
            "array" => Self::Array,
            "object" => Self::Object,
            "null" => Self::Null,
            _ => return None,
        })
    }

    /// Does `value` have this runtime type?
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => match value {
                Value::Number(n) => {
                    n.is_i64() || n.is_u64() || n.as_f64().map_or(false, |f| f.fract() == 0.0)
                }
                _ => false,
            },
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
            Self::Null => value.is_null(),
            Self::Any => true,
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
            Self::Null => "null",
            Self::Any => "any",
        };
        f.write_str(name)
    }
}

/// Name of the runtime type of a JSON value.
pub fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// One declared parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamSpec {
    pub name: String,
    /// Accepted types; a value matching any of them passes.
    pub types: Vec<ParamType>,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, ty: ParamType) -> Self {
        Self {
            name: name.into(),
            types: vec![ty],
            required: false,
            enum_values: None,
            description: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_enum(mut self, values: Vec<Value>) -> Self {
        self.enum_values = Some(values);
        self
    }

    fn accepts_type(&self, value: &Value) -> bool {
        self.types.iter().any(|t| t.matches(value))
    }

    fn type_label(&self) -> String {
        self.types
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("|")
    }
}

/// Structural schema of a tool's input.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InputSchema {
    pub params: Vec<ParamSpec>,
}

/// What is wrong with one argument field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViolationKind {
    /// A required field is absent.
    Missing,
    /// The field is present with the wrong runtime type.
    TypeMismatch { expected: String, actual: String },
    /// The value is not one of the declared enum members.
    NotInEnum,
    /// The schema does not declare this field.
    Unknown,
    /// The arguments as a whole are not an object.
    NotAnObject,
}

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaViolation {
    pub field: String,
    #[serde(flatten)]
    pub kind: ViolationKind,
}

impl SchemaViolation {
    pub fn new(field: impl Into<String>, kind: ViolationKind) -> Self {
        Self {
            field: field.into(),
            kind,
        }
    }
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ViolationKind::Missing => write!(f, "missing required field '{}'", self.field),
            ViolationKind::TypeMismatch { expected, actual } => write!(
                f,
                "field '{}' expected {}, got {}",
                self.field, expected, actual
            ),
            ViolationKind::NotInEnum => {
                write!(f, "field '{}' is not one of the allowed values", self.field)
            }
            ViolationKind::Unknown => write!(f, "unknown field '{}'", self.field),
            ViolationKind::NotAnObject => write!(f, "arguments must be a JSON object"),
        }
    }
}

impl InputSchema {
    pub fn new(params: Vec<ParamSpec>) -> Self {
        Self { params }
    }

    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Reduce a JSON Schema object to its structural form.
    ///
    /// Fails when the schema is not an object, declares a non-object root
    /// type, or has a malformed `properties`/`required` member.
    pub fn from_json_schema(schema: &Value) -> Result<Self, String> {
        let obj = schema
            .as_object()
            .ok_or_else(|| "input schema must be a JSON object".to_string())?;

        if let Some(root) = obj.get("type") {
            if root.as_str() != Some("object") {
                return Err(format!("input schema root type must be \"object\", got {}", root));
            }
        }

        let required: Vec<&str> = match obj.get("required") {
            None => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| v.as_str().ok_or_else(|| "\"required\" entries must be strings".to_string()))
                .collect::<Result<_, _>>()?,
            Some(_) => return Err("\"required\" must be an array".to_string()),
        };

        let empty = Map::new();
        let properties = match obj.get("properties") {
            None => &empty,
            Some(Value::Object(props)) => props,
            Some(_) => return Err("\"properties\" must be an object".to_string()),
        };

        let mut params = Vec::with_capacity(properties.len());
        for (name, prop) in properties {
            params.push(ParamSpec {
                name: name.clone(),
                types: prop_types(prop),
                required: required.contains(&name.as_str()),
                enum_values: prop.get("enum").and_then(Value::as_array).cloned(),
                description: prop
                    .get("description")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            });
        }

        for name in &required {
            if !properties.contains_key(*name) {
                params.push(ParamSpec::new(*name, ParamType::Any).required());
            }
        }

        Ok(Self { params })
    }

    /// Check `args` against the schema, collecting every violation.
    ///
    /// `null` is treated as an empty argument object.
    pub fn validate(&self, args: &Value) -> Result<(), Vec<SchemaViolation>> {
        let empty = Map::new();
        let map = match args {
            Value::Object(map) => map,
            Value::Null => &empty,
            _ => {
                return Err(vec![SchemaViolation::new("", ViolationKind::NotAnObject)]);
            }
        };

        let mut violations = Vec::new();

        for param in &self.params {
            match map.get(&param.name) {
                None => {
                    if param.required {
                        violations.push(SchemaViolation::new(&param.name, ViolationKind::Missing));
                    }
                }
                Some(value) => {
                    if !param.accepts_type(value) {
                        violations.push(SchemaViolation::new(
                            &param.name,
                            ViolationKind::TypeMismatch {
                                expected: param.type_label(),
                                actual: value_type_name(value).to_string(),
                            },
                        ));
                    } else if let Some(allowed) = &param.enum_values {
                        if !allowed.contains(value) {
                            violations.push(SchemaViolation::new(&param.name, ViolationKind::NotInEnum));
                        }
                    }
                }
            }
        }

        for key in map.keys() {
            if self.param(key).is_none() {
                violations.push(SchemaViolation::new(key, ViolationKind::Unknown));
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }
}

fn prop_types(prop: &Value) -> Vec<ParamType> {
    let types: Vec<ParamType> = match prop.get("type") {
        Some(Value::String(tag)) => ParamType::from_tag(tag).into_iter().collect(),
        Some(Value::Array(tags)) => tags
            .iter()
            .filter_map(Value::as_str)
            .filter_map(ParamType::from_tag)
            .collect(),
        _ => Vec::new(),
    };

    if types.is_empty() {
        vec![ParamType::Any]
    } else {
        types
    }
}
