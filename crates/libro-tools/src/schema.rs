//! Declared tool parameters and argument validation
//!
//! A `ParamSchema` is the single source of truth for a tool's arguments: it
//! renders the JSON Schema sent to the LLM and validates what comes back.

use libro_core::{FieldProblem, ValidationError};
use serde_json::{json, Map, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Integer,
}

impl ParamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
        }
    }
}

#[derive(Clone, Debug)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub description: &'static str,
    pub required: bool,
    pub default: Option<Value>,
    pub min: Option<i64>,
    pub max: Option<i64>,
}

impl ParamSpec {
    pub fn string(name: &'static str, description: &'static str) -> Self {
        Self::new(name, ParamKind::String, description)
    }

    pub fn integer(name: &'static str, description: &'static str) -> Self {
        Self::new(name, ParamKind::Integer, description)
    }

    fn new(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            description,
            required: false,
            default: None,
            min: None,
            max: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn range(mut self, min: Option<i64>, max: Option<i64>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    fn check(&self, value: &Value) -> Result<(), FieldProblem> {
        match self.kind {
            ParamKind::String if value.is_string() => Ok(()),
            ParamKind::Integer => {
                let n = value.as_i64().ok_or_else(|| self.wrong_type(value))?;
                let below = self.min.is_some_and(|lo| n < lo);
                let above = self.max.is_some_and(|hi| n > hi);
                if below || above {
                    return Err(FieldProblem::OutOfRange {
                        field: self.name.to_string(),
                        value: n,
                        min: self.min,
                        max: self.max,
                    });
                }
                Ok(())
            }
            _ => Err(self.wrong_type(value)),
        }
    }

    fn wrong_type(&self, value: &Value) -> FieldProblem {
        FieldProblem::WrongType {
            field: self.name.to_string(),
            expected: self.kind.as_str().to_string(),
            found: type_name(value).to_string(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ParamSchema {
    params: Vec<ParamSpec>,
}

impl ParamSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.params.push(spec);
        self
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    /// Check `args` against the declared parameters and return them
    /// normalized: defaults filled in, undeclared fields dropped.
    ///
    /// Every problem is reported, not just the first. `null` counts as absent.
    pub fn validate(&self, tool: &str, args: &Value) -> Result<Value, ValidationError> {
        let obj = match args {
            Value::Object(obj) => obj,
            other => {
                return Err(ValidationError::new(
                    tool,
                    vec![FieldProblem::NotAnObject {
                        found: type_name(other).to_string(),
                    }],
                ))
            }
        };

        let mut problems = Vec::new();
        let mut normalized = Map::new();

        for spec in &self.params {
            match obj.get(spec.name).filter(|v| !v.is_null()) {
                Some(value) => match spec.check(value) {
                    Ok(()) => {
                        normalized.insert(spec.name.to_string(), value.clone());
                    }
                    Err(problem) => problems.push(problem),
                },
                None if spec.required => problems.push(FieldProblem::Missing {
                    field: spec.name.to_string(),
                }),
                None => {
                    if let Some(default) = &spec.default {
                        normalized.insert(spec.name.to_string(), default.clone());
                    }
                }
            }
        }

        if problems.is_empty() {
            Ok(Value::Object(normalized))
        } else {
            Err(ValidationError::new(tool, problems))
        }
    }

    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for spec in &self.params {
            let mut prop = json!({
                "type": spec.kind.as_str(),
                "description": spec.description,
            });
            if let Some(default) = &spec.default {
                prop["default"] = default.clone();
            }
            if let Some(min) = spec.min {
                prop["minimum"] = json!(min);
            }
            if let Some(max) = spec.max {
                prop["maximum"] = json!(max);
            }
            properties.insert(spec.name.to_string(), prop);
        }
        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|s| s.required)
            .map(|s| s.name)
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

fn type_name(value: &Value) -> &'static str {
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

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> ParamSchema {
        ParamSchema::new()
            .param(ParamSpec::string("query", "Keywords").required())
            .param(
                ParamSpec::integer("limit", "Max results")
                    .default_value(json!(5))
                    .range(Some(1), Some(50)),
            )
    }

    #[test]
    fn fills_defaults_and_drops_extras() {
        let out = schema()
            .validate("t", &json!({"query": "dune", "extra": true}))
            .unwrap();
        assert_eq!(out, json!({"query": "dune", "limit": 5}));
    }

    #[test]
    fn reports_every_problem() {
        let err = schema().validate("t", &json!({"limit": "ten"})).unwrap_err();
        assert_eq!(err.problems.len(), 2);
        assert_eq!(err.fields(), vec!["query", "limit"]);
    }

    #[test]
    fn float_is_not_an_integer() {
        let err = schema()
            .validate("t", &json!({"query": "x", "limit": 2.5}))
            .unwrap_err();
        assert!(err.to_string().contains("must be integer, got number"));
    }

    #[test]
    fn raw_string_arguments_are_not_an_object() {
        let err = schema().validate("t", &json!("{\"query\":")).unwrap_err();
        assert!(matches!(err.problems[0], FieldProblem::NotAnObject { .. }));
    }

    #[test]
    fn json_schema_shape() {
        let s = schema().to_json_schema();
        assert_eq!(s["required"], json!(["query"]));
        assert_eq!(s["properties"]["limit"]["maximum"], json!(50));
        assert_eq!(s["properties"]["query"]["type"], json!("string"));
    }
}
