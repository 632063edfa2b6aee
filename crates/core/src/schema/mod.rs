//! # Stage Output Schemas
//!
//! Two views of every stage's output contract:
//!
//! - typed structs (`listing`, `location`, `design`) deriving `JsonSchema`
//!   and radkit's `LLMOutput`, which is what the agents are asked to produce;
//! - a declarative [`StageSchema`] (field name, required flag, type) that
//!   renders the output-format instructions appended to task prompts and
//!   performs the presence/type check every guardrail runs first.
//!
//! Domain rules (counts, ranges, blocklists) are not expressed here; they
//! live in [`crate::guardrail`].

pub mod design;
pub mod listing;
pub mod location;

use serde_json::Value;

/// Primitive or nested type of a field
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldType {
    String,
    Number,
    Integer,
    Bool,
    /// A string or a number (prices come back as both)
    Scalar,
    /// Any JSON object, contents unchecked
    Object,
    Array(&'static FieldType),
    /// A JSON object with its own field contract
    Record(&'static [FieldSpec]),
}

impl FieldType {
    fn describe(&self) -> String {
        match self {
            FieldType::String => "string".to_string(),
            FieldType::Number => "number".to_string(),
            FieldType::Integer => "integer".to_string(),
            FieldType::Bool => "boolean".to_string(),
            FieldType::Scalar => "string or number".to_string(),
            FieldType::Object => "object".to_string(),
            FieldType::Array(inner) => format!("array of {}", inner.describe()),
            FieldType::Record(_) => "object".to_string(),
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Integer => {
                value.is_i64()
                    || value.is_u64()
                    || value.as_f64().map(|f| f.fract() == 0.0).unwrap_or(false)
            }
            FieldType::Bool => value.is_boolean(),
            FieldType::Scalar => value.is_string() || value.is_number(),
            FieldType::Object | FieldType::Record(_) => value.is_object(),
            FieldType::Array(_) => value.is_array(),
        }
    }
}

/// One field of a stage contract
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub ty: FieldType,
    pub required: bool,
    pub description: &'static str,
}

impl FieldSpec {
    pub const fn required(name: &'static str, ty: FieldType, description: &'static str) -> Self {
        Self {
            name,
            ty,
            required: true,
            description,
        }
    }

    pub const fn optional(name: &'static str, ty: FieldType, description: &'static str) -> Self {
        Self {
            name,
            ty,
            required: false,
            description,
        }
    }
}

/// The output contract of one stage
#[derive(Debug, Clone, Copy)]
pub struct StageSchema {
    pub stage: &'static str,
    pub fields: &'static [FieldSpec],
}

impl StageSchema {
    /// Presence and type check. Returns one message per problem, in field order.
    ///
    /// Required fields must be present and non-null; required strings must
    /// also be non-blank. Optional fields are only type-checked when non-null.
    pub fn check_shape(&self, value: &Value) -> Vec<String> {
        let mut problems = Vec::new();
        match value.as_object() {
            Some(_) => check_fields(self.fields, value, "", &mut problems),
            None => problems.push("Output must be a JSON object".to_string()),
        }
        problems
    }

    /// Output-format instructions for the agent prompt
    pub fn instructions(&self) -> String {
        let mut out = String::from(
            "Return ONLY a single JSON object (no prose, no markdown fences) with these fields:\n",
        );
        render_fields(self.fields, 0, &mut out);
        out
    }
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

fn check_fields(fields: &[FieldSpec], value: &Value, prefix: &str, problems: &mut Vec<String>) {
    for field in fields {
        let path = join_path(prefix, field.name);
        match value.get(field.name) {
            None | Some(Value::Null) => {
                if field.required {
                    problems.push(format!("Missing required field: {}", path));
                }
            }
            Some(v) => check_value(&field.ty, field.required, v, &path, problems),
        }
    }
}

fn check_value(
    ty: &FieldType,
    required: bool,
    value: &Value,
    path: &str,
    problems: &mut Vec<String>,
) {
    if !ty.matches(value) {
        problems.push(format!("Field '{}' must be {}", path, ty.describe()));
        return;
    }
    match ty {
        FieldType::String if required => {
            if value.as_str().map(|s| s.trim().is_empty()).unwrap_or(false) {
                problems.push(format!("Field '{}' must not be empty", path));
            }
        }
        FieldType::Record(fields) => check_fields(fields, value, path, problems),
        FieldType::Array(inner) => {
            if let Some(items) = value.as_array() {
                for (i, item) in items.iter().enumerate() {
                    let item_path = format!("{}[{}]", path, i);
                    check_value(inner, true, item, &item_path, problems);
                }
            }
        }
        _ => {}
    }
}

fn render_fields(fields: &[FieldSpec], depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);
    for field in fields {
        out.push_str(&format!(
            "{}- {} ({}, {}): {}\n",
            indent,
            field.name,
            if field.required { "required" } else { "optional" },
            field.ty.describe(),
            field.description
        ));
        let nested = match field.ty {
            FieldType::Record(inner) => Some(inner),
            FieldType::Array(FieldType::Record(inner)) => Some(*inner),
            _ => None,
        };
        if let Some(inner) = nested {
            render_fields(inner, depth + 1, out);
        }
    }
}

/// Pretty JSON Schema for a typed output, for prompt appendices
pub fn json_schema_for<T: schemars::JsonSchema>() -> String {
    let schema = schemars::schema_for!(T);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}
