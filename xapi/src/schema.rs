//! Declarative schemas and the generic `clean` evaluator.
//!
//! A [`Schema`] is a list of [`Field`]s. Cleaning an object walks the
//! declared fields in order:
//!
//! 1. a required field that is absent is a fatal error;
//! 2. a present field runs its validators in order; fatal failures stop the
//!    clean, advisory failures are logged and collected as warnings;
//! 3. a nested schema (fixed, or selected by the value's `objectType`) is
//!    applied recursively, mapping over arrays, and nested errors are
//!    wrapped with the field name;
//! 4. a post-processor runs on the present value;
//! 5. an absent field with a default gets one synthesized.
//!
//! Fields the schema does not declare pass through untouched.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::ValidationError;
use crate::rules::{Rule, Severity, Validator};

/// Every schema the xAPI data model is assembled from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaKind {
    Statement,
    SubStatement,
    Agent,
    Group,
    Account,
    Verb,
    Activity,
    ActivityDefinition,
    InteractionComponent,
    StatementRef,
    Result,
    Score,
    Context,
    ContextActivities,
    Attachment,
}

impl SchemaKind {
    /// The registered schema for this kind.
    pub fn schema(self) -> &'static Schema {
        crate::definitions::registry().get(self)
    }

    /// Clean a value against this kind's schema.
    pub fn clean(self, value: Value) -> Result<Value, ValidationError> {
        self.schema().clean(value)
    }

    /// Clean a value and keep the advisory warnings.
    pub fn clean_with_warnings(self, value: Value) -> Result<Cleaned, ValidationError> {
        self.schema().clean_with_warnings(value)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Statement => "Statement",
            Self::SubStatement => "SubStatement",
            Self::Agent => "Agent",
            Self::Group => "Group",
            Self::Account => "Account",
            Self::Verb => "Verb",
            Self::Activity => "Activity",
            Self::ActivityDefinition => "ActivityDefinition",
            Self::InteractionComponent => "InteractionComponent",
            Self::StatementRef => "StatementRef",
            Self::Result => "Result",
            Self::Score => "Score",
            Self::Context => "Context",
            Self::ContextActivities => "ContextActivities",
            Self::Attachment => "Attachment",
        }
    }
}

/// When a field must be present.
#[derive(Debug, Clone, PartialEq)]
pub enum Required {
    /// Always required.
    Always,
    /// Never required.
    Optional,
    /// Required unless one of the listed siblings is present.
    UnlessAnyOf(&'static [&'static str]),
}

impl Required {
    /// Is the field required on this particular object?
    pub fn applies(&self, object: &Map<String, Value>) -> bool {
        match self {
            Required::Always => true,
            Required::Optional => false,
            Required::UnlessAnyOf(others) => !others.iter().any(|o| object.contains_key(*o)),
        }
    }
}

/// How the nested schema of a field is chosen.
#[derive(Debug, Clone, PartialEq)]
pub enum Nested {
    /// Always this schema.
    Fixed(SchemaKind),
    /// Chosen from the value's own `objectType`, falling back to `default`
    /// when the value has none.
    ByObjectType {
        default: SchemaKind,
        variants: &'static [(&'static str, SchemaKind)],
    },
}

impl Nested {
    fn select(&self, value: &Value) -> Result<SchemaKind, ValidationError> {
        match self {
            Nested::Fixed(kind) => Ok(*kind),
            Nested::ByObjectType { default, variants } => {
                match value.get("objectType").and_then(Value::as_str) {
                    None => Ok(*default),
                    Some(object_type) => variants
                        .iter()
                        .find(|(name, _)| *name == object_type)
                        .map(|(_, kind)| *kind)
                        .ok_or_else(|| {
                            let names: Vec<&str> = variants.iter().map(|(n, _)| *n).collect();
                            ValidationError::new(format!(
                                "objectType must be one of: {}",
                                names.join(", ")
                            ))
                        }),
                }
            }
        }
    }
}

/// Value synthesized for an absent field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultValue {
    /// A fresh v4 UUID.
    Uuid,
    /// The xAPI version this implementation speaks.
    Version,
}

/// The xAPI version stamped on statements that do not carry one.
pub const XAPI_VERSION: &str = "1.0.0";

impl DefaultValue {
    fn produce(self) -> Value {
        match self {
            DefaultValue::Uuid => Value::String(uuid::Uuid::new_v4().to_string()),
            DefaultValue::Version => Value::String(XAPI_VERSION.to_string()),
        }
    }
}

/// Transformation applied to a present, validated value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostProcess {
    /// Coerce a single object into a one-element array.
    WrapInArray,
}

impl PostProcess {
    fn apply(self, value: Value) -> Value {
        match self {
            PostProcess::WrapInArray => match value {
                Value::Array(_) => value,
                other => Value::Array(vec![other]),
            },
        }
    }
}

/// Specification of one field of a schema.
#[derive(Debug, Clone)]
pub struct Field {
    pub name: &'static str,
    pub required: Required,
    pub validators: Vec<Validator>,
    pub nested: Option<Nested>,
    pub post: Option<PostProcess>,
    pub default: Option<DefaultValue>,
}

impl Field {
    fn with_requirement(name: &'static str, required: Required) -> Self {
        Self {
            name,
            required,
            validators: Vec::new(),
            nested: None,
            post: None,
            default: None,
        }
    }

    /// A field that may be absent.
    pub fn optional(name: &'static str) -> Self {
        Self::with_requirement(name, Required::Optional)
    }

    /// A field that must be present.
    pub fn required(name: &'static str) -> Self {
        Self::with_requirement(name, Required::Always)
    }

    /// A field required unless one of `others` is present.
    pub fn required_unless(name: &'static str, others: &'static [&'static str]) -> Self {
        Self::with_requirement(name, Required::UnlessAnyOf(others))
    }

    /// Add a fatal rule.
    pub fn check(mut self, rule: Rule) -> Self {
        self.validators.push(Validator::fatal(rule));
        self
    }

    /// Add an advisory rule.
    pub fn advise(mut self, rule: Rule) -> Self {
        self.validators.push(Validator::warn(rule));
        self
    }

    /// Validate the value against a fixed nested schema.
    pub fn nested(mut self, kind: SchemaKind) -> Self {
        self.nested = Some(Nested::Fixed(kind));
        self
    }

    /// Validate the value against a schema chosen by its `objectType`.
    pub fn by_object_type(
        mut self,
        default: SchemaKind,
        variants: &'static [(&'static str, SchemaKind)],
    ) -> Self {
        self.nested = Some(Nested::ByObjectType { default, variants });
        self
    }

    /// Coerce a single object into a one-element array after validation.
    pub fn wrap_single(mut self) -> Self {
        self.post = Some(PostProcess::WrapInArray);
        self
    }

    /// Synthesize a value when absent.
    pub fn default_to(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }
}

/// Result of a successful clean.
#[derive(Debug, Clone, PartialEq)]
pub struct Cleaned {
    /// The cleaned, defaulted value
    pub value: Value,
    /// Advisory rule failures, with nested path context
    pub warnings: Vec<String>,
}

/// A named list of field specifications.
#[derive(Debug, Clone)]
pub struct Schema {
    kind: SchemaKind,
    fields: Vec<Field>,
}

impl Schema {
    /// Build a schema from its fields.
    pub fn new(kind: SchemaKind, fields: Vec<Field>) -> Self {
        Self { kind, fields }
    }

    pub fn kind(&self) -> SchemaKind {
        self.kind
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Look up a field specification by name.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Validate and normalize `value`, discarding warnings after logging them.
    pub fn clean(&self, value: Value) -> Result<Value, ValidationError> {
        self.clean_with_warnings(value).map(|cleaned| cleaned.value)
    }

    /// Validate and normalize `value`, returning advisory warnings too.
    pub fn clean_with_warnings(&self, value: Value) -> Result<Cleaned, ValidationError> {
        let mut warnings = Vec::new();
        let value = self.clean_value(value, &mut warnings)?;
        Ok(Cleaned { value, warnings })
    }

    fn clean_value(&self, value: Value, warnings: &mut Vec<String>) -> Result<Value, ValidationError> {
        let mut object = match value {
            Value::Object(map) => map,
            other => {
                return Err(ValidationError::new(format!(
                    "{} must be an object, got {}",
                    self.kind.as_str(),
                    json_type_name(&other)
                )))
            }
        };

        for field in &self.fields {
            match object.get(field.name) {
                None => {
                    if field.required.applies(&object) {
                        return Err(ValidationError::new(format!("{} is required", field.name)));
                    }
                    if let Some(default) = field.default {
                        object.insert(field.name.to_string(), default.produce());
                    }
                }
                Some(present) => {
                    run_validators(field, present, &object, warnings)?;

                    let mut value = object.remove(field.name).unwrap_or(Value::Null);
                    if let Some(nested) = &field.nested {
                        let mut nested_warnings = Vec::new();
                        value = clean_nested(nested, value, &mut nested_warnings)
                            .map_err(|e| e.within(field.name))?;
                        warnings.extend(
                            nested_warnings
                                .into_iter()
                                .map(|w| format!("in {}: {}", field.name, w)),
                        );
                    }
                    if let Some(post) = field.post {
                        value = post.apply(value);
                    }
                    object.insert(field.name.to_string(), value);
                }
            }
        }

        Ok(Value::Object(object))
    }
}

fn run_validators(
    field: &Field,
    value: &Value,
    object: &Map<String, Value>,
    warnings: &mut Vec<String>,
) -> Result<(), ValidationError> {
    for validator in &field.validators {
        if validator.rule.test(value, field.name, object) {
            continue;
        }
        let message = validator.rule.message(field.name, object);
        match validator.severity {
            Severity::Fatal => return Err(ValidationError::new(message)),
            Severity::Warn => {
                warn!(field = field.name, "{}", message);
                warnings.push(message);
            }
        }
    }
    Ok(())
}

fn clean_nested(
    nested: &Nested,
    value: Value,
    warnings: &mut Vec<String>,
) -> Result<Value, ValidationError> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .map(|item| clean_nested(nested, item, warnings))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        other => {
            let kind = nested.select(&other)?;
            debug!(schema = kind.as_str(), "Cleaning nested value");
            kind.schema().clean_value(other, warnings)
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
