//! Contract between the adapter and the interpreter it drives
use std::sync::Arc;

use crate::events::{Line, Variables};

/// Callbacks the interpreter makes into an attached debugger.
///
/// All of these are called synchronously on the interpreter thread and must return promptly.
pub trait DebugHooks: Send + Sync {
    /// The script has been loaded and is about to run
    fn loaded(&self);

    /// Execution stopped before `line`
    fn suspended(&self, line: Line);

    /// Execution continues after a suspension
    fn resumed(&self);

    /// The script finished or was terminated
    fn terminated(&self);

    /// Asked before every line: should the interpreter suspend before executing `line`?
    fn is_breakpoint(&self, line: Line) -> bool;
}

/// The operations the adapter needs from an interpreter.
///
/// `resume` and `terminate` are asynchronous: they only signal the interpreter thread and
/// return immediately.
pub trait Interpreter: Send + Sync {
    fn resume(&self) -> eyre::Result<()>;

    fn terminate(&self) -> eyre::Result<()>;

    /// Snapshot of the current variables
    fn variables(&self) -> eyre::Result<Variables>;

    /// Write a variable through to the interpreter, which may coerce `content`
    fn set_variable(&self, name: &str, content: &str) -> eyre::Result<()>;

    fn evaluate(&self, expression: &str) -> eyre::Result<String>;

    /// The interpreter memory as a byte-addressable sequence
    fn memory(&self) -> eyre::Result<Vec<u8>>;

    /// Attach a debugger, or detach the current one with `None`
    fn set_debugger(&self, debugger: Option<Arc<dyn DebugHooks>>);
}
