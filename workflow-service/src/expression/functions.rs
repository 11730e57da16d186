// Built-in Functions for Workflow Expressions
// String helpers, JSON conversion and job status checks

use crate::expression::evaluator::{loose_equals, EvalError, ExpressionContext};
use crate::expression::value::Value;

/// Registry of built-in functions
#[derive(Debug, Default)]
pub struct BuiltinFunctions;

impl BuiltinFunctions {
    pub fn new() -> Self {
        Self
    }

    /// Call a built-in function (names are case-insensitive)
    pub fn call(
        &self,
        name: &str,
        args: Vec<Value>,
        context: &ExpressionContext,
    ) -> Result<Value, EvalError> {
        match name.to_ascii_lowercase().as_str() {
            // String functions
            "contains" => self.fn_contains(args),
            "startswith" => self.fn_starts_with(args),
            "endswith" => self.fn_ends_with(args),
            "format" => self.fn_format(args),
            "join" => self.fn_join(args),

            // Conversion functions
            "tojson" => self.fn_to_json(args),
            "fromjson" => self.fn_from_json(args),

            // Status functions
            "success" => {
                self.require_args(&args, 0, name)?;
                Ok(Value::Bool(!context.job.failed && !context.job.cancelled))
            }
            "failure" => {
                self.require_args(&args, 0, name)?;
                Ok(Value::Bool(context.job.failed))
            }
            "cancelled" => {
                self.require_args(&args, 0, name)?;
                Ok(Value::Bool(context.job.cancelled))
            }
            "always" => {
                self.require_args(&args, 0, name)?;
                Ok(Value::Bool(true))
            }

            _ => Err(EvalError::new(format!("unknown function: {}", name))),
        }
    }

    fn fn_contains(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        self.require_args(&args, 2, "contains")?;
        let found = match &args[0] {
            Value::Array(items) => items.iter().any(|item| loose_equals(item, &args[1])),
            search => search
                .as_string()
                .to_lowercase()
                .contains(&args[1].as_string().to_lowercase()),
        };
        Ok(Value::Bool(found))
    }

    fn fn_starts_with(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        self.require_args(&args, 2, "startsWith")?;
        let haystack = args[0].as_string().to_lowercase();
        let needle = args[1].as_string().to_lowercase();
        Ok(Value::Bool(haystack.starts_with(&needle)))
    }

    fn fn_ends_with(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        self.require_args(&args, 2, "endsWith")?;
        let haystack = args[0].as_string().to_lowercase();
        let needle = args[1].as_string().to_lowercase();
        Ok(Value::Bool(haystack.ends_with(&needle)))
    }

    /// format('{0} on {1}', a, b) with `{{` / `}}` as literal braces
    fn fn_format(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        let Some((template, values)) = args.split_first() else {
            return Err(EvalError::new("format() requires at least 1 argument"));
        };
        let template = template.as_string();
        let mut result = String::with_capacity(template.len());
        let mut chars = template.chars().peekable();

        while let Some(ch) = chars.next() {
            match ch {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    result.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    result.push('}');
                }
                '{' => {
                    let mut index = String::new();
                    for c in chars.by_ref() {
                        if c == '}' {
                            break;
                        }
                        index.push(c);
                    }
                    let position: usize = index.trim().parse().map_err(|_| {
                        EvalError::new(format!("format(): invalid placeholder '{{{}}}'", index))
                    })?;
                    let value = values.get(position).ok_or_else(|| {
                        EvalError::new(format!(
                            "format(): placeholder {{{}}} has no argument",
                            position
                        ))
                    })?;
                    result.push_str(&value.as_string());
                }
                c => result.push(c),
            }
        }

        Ok(Value::String(result))
    }

    fn fn_join(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        if args.is_empty() || args.len() > 2 {
            return Err(EvalError::new("join() requires 1 or 2 arguments"));
        }
        let separator = args.get(1).map(Value::as_string).unwrap_or_else(|| ",".to_string());
        let joined = match &args[0] {
            Value::Array(items) => items
                .iter()
                .map(Value::as_string)
                .collect::<Vec<_>>()
                .join(&separator),
            other => other.as_string(),
        };
        Ok(Value::String(joined))
    }

    fn fn_to_json(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        self.require_args(&args, 1, "toJSON")?;
        Ok(Value::String(args[0].to_json_pretty()))
    }

    fn fn_from_json(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        self.require_args(&args, 1, "fromJSON")?;
        let text = args[0].as_string();
        let parsed: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| EvalError::new(format!("fromJSON(): {}", e)))?;
        Ok(Value::from(&parsed))
    }

    fn require_args(&self, args: &[Value], count: usize, name: &str) -> Result<(), EvalError> {
        if args.len() != count {
            return Err(EvalError::new(format!(
                "{}() requires {} argument{}, got {}",
                name,
                count,
                if count == 1 { "" } else { "s" },
                args.len()
            )));
        }
        Ok(())
    }
}
