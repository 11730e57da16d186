// Expression Engine Module
// GitHub-style `${{ }}` expressions: lexer, parser, evaluator and built-ins

pub mod evaluator;
pub mod functions;
pub mod lexer;
pub mod parser;
pub mod value;

pub use evaluator::{
    EvalError, Evaluator, ExpressionContext, ExpressionEngine, GithubContext, JobStatusContext,
    RunnerContext, StepContext, StrategyContext,
};
pub use functions::BuiltinFunctions;
pub use lexer::{extract_expressions, strip_wrapper, LexError, Lexer, Segment, Token};
pub use parser::{BinaryOp, Expr, ExprParser, ParseExprError};
pub use value::Value;
