// Expression Engine Evaluator
// Evaluates AST expressions against the github/env/matrix/steps contexts

use crate::expression::functions::BuiltinFunctions;
use crate::expression::lexer::{extract_expressions, strip_wrapper, Segment};
use crate::expression::parser::{BinaryOp, Expr, ExprParser, ParseExprError};
use crate::expression::value::Value;

use indexmap::IndexMap;
use std::cmp::Ordering;
use std::fmt;

/// Evaluation error
#[derive(Debug, Clone)]
pub struct EvalError {
    pub message: String,
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "evaluation error: {}", self.message)
    }
}

impl std::error::Error for EvalError {}

impl EvalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<ParseExprError> for EvalError {
    fn from(err: ParseExprError) -> Self {
        EvalError::new(err.to_string())
    }
}

/// Context for expression evaluation
#[derive(Debug, Clone, Default)]
pub struct ExpressionContext {
    /// Event and repository information (github.*)
    pub github: GithubContext,

    /// Effective environment of the current step (env.*)
    pub env: IndexMap<String, String>,

    /// Axis values of the current job instance (matrix.*)
    pub matrix: IndexMap<String, Value>,

    /// Completed steps that declared an id (steps.<id>.*)
    pub steps: IndexMap<String, StepContext>,

    /// Host information (runner.*)
    pub runner: RunnerContext,

    /// Aggregate status of the current job instance
    pub job: JobStatusContext,

    /// Matrix strategy position (strategy.*)
    pub strategy: Option<StrategyContext>,
}

#[derive(Debug, Clone, Default)]
pub struct GithubContext {
    pub event_name: String,
    pub ref_name: String,
    pub sha: Option<String>,
    pub workspace: String,
    pub repository: Option<String>,
    pub workflow: Option<String>,
    pub job: Option<String>,
    pub run_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct RunnerContext {
    pub os: String,
    pub arch: String,
    pub temp: String,
}

#[derive(Debug, Clone, Default)]
pub struct StepContext {
    pub outputs: IndexMap<String, String>,
    /// Result before continue-on-error is applied
    pub outcome: String,
    /// Result after continue-on-error is applied
    pub conclusion: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JobStatusContext {
    pub failed: bool,
    pub cancelled: bool,
}

impl JobStatusContext {
    pub fn as_str(&self) -> &'static str {
        if self.cancelled {
            "cancelled"
        } else if self.failed {
            "failure"
        } else {
            "success"
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StrategyContext {
    pub fail_fast: bool,
    pub job_index: usize,
    pub job_total: usize,
    pub max_parallel: usize,
}

/// Tree-walking evaluator over a borrowed context
pub struct Evaluator<'a> {
    context: &'a ExpressionContext,
    functions: BuiltinFunctions,
}

impl<'a> Evaluator<'a> {
    pub fn new(context: &'a ExpressionContext) -> Self {
        Self {
            context,
            functions: BuiltinFunctions::new(),
        }
    }

    /// Evaluate an expression tree
    pub fn eval(&self, expr: &Expr) -> Result<Value, EvalError> {
        match expr {
            Expr::Null => Ok(Value::Null),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::String(s) => Ok(Value::String(s.clone())),
            Expr::Context(name) => self.lookup_context(name),
            Expr::FunctionCall { name, args } => {
                let values = args
                    .iter()
                    .map(|arg| self.eval(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                self.functions.call(name, values, self.context)
            }
            Expr::Member { object, property } => {
                let object = self.eval(object)?;
                Ok(member(&object, property))
            }
            Expr::Index { object, index } => {
                let object = self.eval(object)?;
                let index = self.eval(index)?;
                Ok(self.eval_index(&object, &index))
            }
            Expr::Not(inner) => Ok(Value::Bool(!self.eval(inner)?.is_truthy())),
            Expr::Binary { op, left, right } => self.eval_binary(*op, left, right),
        }
    }

    fn lookup_context(&self, name: &str) -> Result<Value, EvalError> {
        let ctx = self.context;
        match name.to_ascii_lowercase().as_str() {
            "github" => Ok(self.github_to_value()),
            "env" => Ok(Value::Object(
                ctx.env
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect(),
            )),
            "matrix" => Ok(Value::Object(ctx.matrix.clone())),
            "steps" => Ok(Value::Object(
                ctx.steps
                    .iter()
                    .map(|(id, step)| (id.clone(), step_to_value(step)))
                    .collect(),
            )),
            "runner" => {
                let mut map = IndexMap::new();
                map.insert("os".to_string(), Value::from(ctx.runner.os.as_str()));
                map.insert("arch".to_string(), Value::from(ctx.runner.arch.as_str()));
                map.insert("temp".to_string(), Value::from(ctx.runner.temp.as_str()));
                Ok(Value::Object(map))
            }
            "job" => {
                let mut map = IndexMap::new();
                map.insert("status".to_string(), Value::from(ctx.job.as_str()));
                Ok(Value::Object(map))
            }
            "strategy" => Ok(match &ctx.strategy {
                Some(strategy) => {
                    let mut map = IndexMap::new();
                    map.insert("fail-fast".to_string(), Value::Bool(strategy.fail_fast));
                    map.insert("job-index".to_string(), Value::from(strategy.job_index));
                    map.insert("job-total".to_string(), Value::from(strategy.job_total));
                    map.insert("max-parallel".to_string(), Value::from(strategy.max_parallel));
                    Value::Object(map)
                }
                None => Value::Null,
            }),
            _ => Err(EvalError::new(format!("unrecognized named-value: '{}'", name))),
        }
    }

    fn github_to_value(&self) -> Value {
        let github = &self.context.github;
        let optional = |v: &Option<String>| v.as_deref().map(Value::from).unwrap_or(Value::Null);

        let mut map = IndexMap::new();
        map.insert("event_name".to_string(), Value::from(github.event_name.as_str()));
        map.insert("ref".to_string(), Value::from(github.ref_name.as_str()));
        map.insert(
            "ref_name".to_string(),
            Value::from(short_ref(&github.ref_name)),
        );
        map.insert("sha".to_string(), optional(&github.sha));
        map.insert("workspace".to_string(), Value::from(github.workspace.as_str()));
        map.insert("repository".to_string(), optional(&github.repository));
        map.insert("workflow".to_string(), optional(&github.workflow));
        map.insert("job".to_string(), optional(&github.job));
        map.insert("run_id".to_string(), Value::from(github.run_id.as_str()));
        Value::Object(map)
    }

    fn eval_index(&self, object: &Value, index: &Value) -> Value {
        match (object, index) {
            (Value::Array(items), Value::Number(n)) if *n >= 0.0 && n.fract() == 0.0 => {
                items.get(*n as usize).cloned().unwrap_or(Value::Null)
            }
            (Value::Object(_), key) => member(object, &key.as_string()),
            _ => Value::Null,
        }
    }

    fn eval_binary(&self, op: BinaryOp, left: &Expr, right: &Expr) -> Result<Value, EvalError> {
        // && and || short-circuit and yield an operand, not a bool
        match op {
            BinaryOp::And => {
                let left = self.eval(left)?;
                if !left.is_truthy() {
                    return Ok(left);
                }
                return self.eval(right);
            }
            BinaryOp::Or => {
                let left = self.eval(left)?;
                if left.is_truthy() {
                    return Ok(left);
                }
                return self.eval(right);
            }
            _ => {}
        }

        let left = self.eval(left)?;
        let right = self.eval(right)?;

        let result = match op {
            BinaryOp::Eq => loose_equals(&left, &right),
            BinaryOp::Ne => !loose_equals(&left, &right),
            BinaryOp::Lt => compare(&left, &right) == Some(Ordering::Less),
            BinaryOp::Le => matches!(
                compare(&left, &right),
                Some(Ordering::Less | Ordering::Equal)
            ),
            BinaryOp::Gt => compare(&left, &right) == Some(Ordering::Greater),
            BinaryOp::Ge => matches!(
                compare(&left, &right),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
        };

        Ok(Value::Bool(result))
    }
}

/// Case-insensitive property access; missing properties are null.
pub(crate) fn member(object: &Value, property: &str) -> Value {
    let Value::Object(map) = object else {
        return Value::Null;
    };
    map.get(property)
        .or_else(|| {
            map.iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(property))
                .map(|(_, v)| v)
        })
        .cloned()
        .unwrap_or(Value::Null)
}

/// Equality with GitHub coercion rules: strings ignore case, mixed types compare as numbers.
pub(crate) fn loose_equals(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Number(a), Value::Number(b)) => a == b,
        (Value::String(a), Value::String(b)) => a.eq_ignore_ascii_case(b),
        (Value::Array(_), _) | (Value::Object(_), _) | (_, Value::Array(_)) | (_, Value::Object(_)) => {
            false
        }
        _ => left.to_number() == right.to_number(),
    }
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::String(a), Value::String(b)) => {
            Some(a.to_ascii_lowercase().cmp(&b.to_ascii_lowercase()))
        }
        _ => left.to_number().partial_cmp(&right.to_number()),
    }
}

fn step_to_value(step: &StepContext) -> Value {
    let mut map = IndexMap::new();
    map.insert(
        "outputs".to_string(),
        Value::Object(
            step.outputs
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect(),
        ),
    );
    map.insert("outcome".to_string(), Value::from(step.outcome.as_str()));
    map.insert("conclusion".to_string(), Value::from(step.conclusion.as_str()));
    Value::Object(map)
}

fn short_ref(full: &str) -> &str {
    full.strip_prefix("refs/heads/")
        .or_else(|| full.strip_prefix("refs/tags/"))
        .unwrap_or(full)
}

/// Status-check functions; a condition using none of them gets an implicit `success() &&`.
const STATUS_FUNCTIONS: [&str; 4] = ["success", "failure", "always", "cancelled"];

/// Owns an expression context and evaluates conditions and templates against it
#[derive(Debug, Clone, Default)]
pub struct ExpressionEngine {
    context: ExpressionContext,
}

impl ExpressionEngine {
    pub fn new(context: ExpressionContext) -> Self {
        Self { context }
    }

    /// Evaluate a bare expression (no `${{ }}` wrapper)
    pub fn evaluate(&self, expr: &str) -> Result<Value, EvalError> {
        let ast = ExprParser::parse_str(expr)?;
        Evaluator::new(&self.context).eval(&ast)
    }

    /// Evaluate an `if:` condition.
    ///
    /// An empty condition means `success()`. Conditions without a status
    /// function only run while the job is still succeeding.
    pub fn evaluate_condition(&self, condition: &str) -> Result<bool, EvalError> {
        let body = strip_wrapper(condition);
        if body.is_empty() {
            return self.evaluate("success()").map(|v| v.is_truthy());
        }

        let ast = ExprParser::parse_str(body)?;
        let evaluator = Evaluator::new(&self.context);

        let uses_status = ast.calls_any(&|name| {
            STATUS_FUNCTIONS
                .iter()
                .any(|status| status.eq_ignore_ascii_case(name))
        });
        if !uses_status && !self.job_succeeding() {
            return Ok(false);
        }

        Ok(evaluator.eval(&ast)?.is_truthy())
    }

    /// Replace every `${{ expr }}` in `text` with the expression's string form
    pub fn interpolate(&self, text: &str) -> Result<String, EvalError> {
        if !text.contains("${{") {
            return Ok(text.to_string());
        }

        let mut result = String::with_capacity(text.len());
        for segment in extract_expressions(text) {
            match segment {
                Segment::Text(s) => result.push_str(&s),
                Segment::Expression(expr) => {
                    result.push_str(&self.evaluate(&expr)?.as_string());
                }
            }
        }

        Ok(result)
    }

    /// Interpolate a YAML value, keeping the value's type when it is a single expression.
    pub fn interpolate_value(&self, value: &serde_yaml::Value) -> Result<Value, EvalError> {
        match value {
            serde_yaml::Value::String(s) => {
                let segments = extract_expressions(s);
                if let [Segment::Expression(expr)] = segments.as_slice() {
                    self.evaluate(expr)
                } else {
                    self.interpolate(s).map(Value::String)
                }
            }
            other => Ok(Value::from(other)),
        }
    }

    fn job_succeeding(&self) -> bool {
        !self.context.job.failed && !self.context.job.cancelled
    }

    pub fn context(&self) -> &ExpressionContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut ExpressionContext {
        &mut self.context
    }
}
