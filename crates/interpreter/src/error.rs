//! Error types for the text interpreter.

/// Errors raised while evaluating an arithmetic expression.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvalError {
    /// The expression contained nothing to evaluate.
    #[error("empty expression")]
    Empty,

    /// A character that starts no token.
    #[error("unexpected character {character:?} at offset {offset}")]
    UnexpectedCharacter { character: char, offset: usize },

    /// A token in a position where it is not allowed.
    #[error("unexpected {found} at offset {offset}")]
    UnexpectedToken { found: String, offset: usize },

    /// The expression ended while an operand or `)` was still expected.
    #[error("unexpected end of expression")]
    UnexpectedEnd,

    /// Parentheses nested deeper than the evaluator accepts.
    #[error("expression nested too deeply at offset {offset}")]
    TooDeep { offset: usize },

    /// An integer literal outside the `i64` range.
    #[error("invalid number literal {0:?}")]
    InvalidNumber(String),

    #[error("unknown variable {0:?}")]
    UnknownVariable(String),

    /// A variable whose value is not an integer.
    #[error("variable {name:?} is not a number: {value:?}")]
    NotANumber { name: String, value: String },

    #[error("division by zero")]
    DivisionByZero,

    #[error("arithmetic overflow")]
    Overflow,
}

/// Errors raised by the interpreter control operations.
#[derive(Debug, thiserror::Error)]
pub enum InterpreterError {
    #[error("interpreter already started")]
    AlreadyStarted,

    #[error("interpreter already terminated")]
    AlreadyTerminated,

    #[error("invalid variable name {0:?}")]
    InvalidVariableName(String),

    /// The script could not be read.
    #[error("reading script {path}: {source}")]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Eval(#[from] EvalError),
}
