//! A small line oriented scripting language that can be debugged.
//!
//! Every line is either blank, a `#` comment, an assignment `name = value` or an output line.
//! `${name}` references are substituted in values and output. Assignment values that form an
//! integer expression are stored evaluated.
mod error;
mod expression;
mod interpreter;
mod script;

pub use error::{EvalError, InterpreterError};
pub use expression::evaluate;
pub use interpreter::{InterpreterOptions, Status, TextInterpreter};
