use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

use crate::error::VariableError;

/// How a field's raw value is coerced on ingestion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Flag,
}

/// The fixed set of fields a CI/CD variable carries, in wire order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    VariableType,
    Key,
    Value,
    Protected,
    Masked,
    Raw,
    EnvironmentScope,
    Description,
}

impl Field {
    pub const ALL: [Field; 8] = [
        Field::VariableType,
        Field::Key,
        Field::Value,
        Field::Protected,
        Field::Masked,
        Field::Raw,
        Field::EnvironmentScope,
        Field::Description,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Field::VariableType => "variable_type",
            Field::Key => "key",
            Field::Value => "value",
            Field::Protected => "protected",
            Field::Masked => "masked",
            Field::Raw => "raw",
            Field::EnvironmentScope => "environment_scope",
            Field::Description => "description",
        }
    }

    pub fn kind(self) -> FieldKind {
        match self {
            Field::Protected | Field::Masked | Field::Raw => FieldKind::Flag,
            _ => FieldKind::Text,
        }
    }

    pub fn from_name(name: &str) -> Option<Field> {
        Field::ALL.into_iter().find(|f| f.name() == name)
    }
}

pub const DEFAULT_VARIABLE_TYPE: &str = "env_var";
pub const DEFAULT_ENVIRONMENT_SCOPE: &str = "*";

const TRUTHY: [&str; 3] = ["true", "True", "TRUE"];
const FALSY: [&str; 3] = ["false", "False", "FALSE"];

/// One CI/CD variable scoped to an environment.
///
/// Values are immutable once built: the `with_*` helpers return a new
/// variable rather than editing this one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Variable {
    variable_type: String,
    key: String,
    value: String,
    protected: bool,
    masked: bool,
    raw: bool,
    environment_scope: String,
    description: String,
}

impl Default for Variable {
    fn default() -> Self {
        Self {
            variable_type: DEFAULT_VARIABLE_TYPE.to_string(),
            key: String::new(),
            value: String::new(),
            protected: false,
            masked: false,
            raw: false,
            environment_scope: DEFAULT_ENVIRONMENT_SCOPE.to_string(),
            description: String::new(),
        }
    }
}

impl Variable {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            ..Self::default()
        }
    }

    /// Normalize an arbitrary raw record into a variable.
    ///
    /// Never fails. Anything that isn't an object yields the default record,
    /// unknown keys are ignored and missing keys keep their default. Flags are
    /// true only for `true`, `"true"`, `"True"` and `"TRUE"`; `null` text
    /// becomes the empty string.
    pub fn from_value(raw: &Value) -> Self {
        let mut var = Self::default();
        let Some(obj) = raw.as_object() else {
            return var;
        };

        for field in Field::ALL {
            if let Some(value) = obj.get(field.name()) {
                match field.kind() {
                    FieldKind::Flag => var.set_flag(field, is_truthy(value)),
                    FieldKind::Text => var.set_text(field, text_of(value)),
                }
            }
        }
        var
    }

    /// Like [`Variable::from_value`], but rejects input the lenient path would
    /// silently paper over.
    pub fn strict_from_value(raw: &Value) -> Result<Self, VariableError> {
        let obj = raw.as_object().ok_or(VariableError::NotAnObject)?;

        if let Some(unknown) = obj.keys().find(|k| Field::from_name(k).is_none()) {
            return Err(VariableError::UnknownField(unknown.clone()));
        }

        let mut var = Self::default();
        for field in Field::ALL {
            let Some(value) = obj.get(field.name()) else {
                continue;
            };
            match field.kind() {
                FieldKind::Flag => {
                    let flag = strict_flag(value).ok_or_else(|| VariableError::InvalidFlag {
                        field: field.name(),
                        value: value.to_string(),
                    })?;
                    var.set_flag(field, flag);
                }
                FieldKind::Text => match value {
                    Value::String(s) => var.set_text(field, s.clone()),
                    Value::Null => var.set_text(field, String::new()),
                    other => {
                        return Err(VariableError::InvalidText {
                            field: field.name(),
                            value: other.to_string(),
                        })
                    }
                },
            }
        }
        Ok(var)
    }

    /// Identity within a collection: `<environment_scope> // <key>`
    pub fn uid(&self) -> String {
        format!("{} // {}", self.environment_scope, self.key)
    }

    pub fn variable_type(&self) -> &str {
        &self.variable_type
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn protected(&self) -> bool {
        self.protected
    }

    pub fn masked(&self) -> bool {
        self.masked
    }

    pub fn raw(&self) -> bool {
        self.raw
    }

    pub fn environment_scope(&self) -> &str {
        &self.environment_scope
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn with_variable_type(mut self, variable_type: impl Into<String>) -> Self {
        self.variable_type = variable_type.into();
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.environment_scope = scope.into();
        self
    }

    pub fn with_protected(mut self, protected: bool) -> Self {
        self.protected = protected;
        self
    }

    pub fn with_masked(mut self, masked: bool) -> Self {
        self.masked = masked;
        self
    }

    pub fn with_raw(mut self, raw: bool) -> Self {
        self.raw = raw;
        self
    }

    /// Every field with its current value, in wire order
    pub fn fields(&self) -> Vec<(Field, Value)> {
        Field::ALL
            .into_iter()
            .map(|field| {
                let value = match field {
                    Field::VariableType => Value::from(self.variable_type.as_str()),
                    Field::Key => Value::from(self.key.as_str()),
                    Field::Value => Value::from(self.value.as_str()),
                    Field::Protected => Value::Bool(self.protected),
                    Field::Masked => Value::Bool(self.masked),
                    Field::Raw => Value::Bool(self.raw),
                    Field::EnvironmentScope => Value::from(self.environment_scope.as_str()),
                    Field::Description => Value::from(self.description.as_str()),
                };
                (field, value)
            })
            .collect()
    }

    /// The record sent to the remote API: exactly the eight fields, booleans
    /// left as booleans.
    pub fn raw_record(&self) -> Map<String, Value> {
        self.fields()
            .into_iter()
            .map(|(field, value)| (field.name().to_string(), value))
            .collect()
    }

    fn set_text(&mut self, field: Field, value: String) {
        match field {
            Field::VariableType => self.variable_type = value,
            Field::Key => self.key = value,
            Field::Value => self.value = value,
            Field::EnvironmentScope => self.environment_scope = value,
            Field::Description => self.description = value,
            Field::Protected | Field::Masked | Field::Raw => {}
        }
    }

    fn set_flag(&mut self, field: Field, value: bool) {
        match field {
            Field::Protected => self.protected = value,
            Field::Masked => self.masked = value,
            Field::Raw => self.raw = value,
            _ => {}
        }
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Value::Object(self.raw_record()))
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => TRUTHY.contains(&s.as_str()),
        _ => false,
    }
}

fn strict_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) if TRUTHY.contains(&s.as_str()) => Some(true),
        Value::String(s) if FALSY.contains(&s.as_str()) => Some(false),
        _ => None,
    }
}

// Scalars other than strings keep their JSON text so nothing is lost on the way through
fn text_of(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
