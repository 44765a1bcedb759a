//! Debugger adapter for the text interpreter
//!
//! The adapter sits between an in-process interpreter, which calls back into it on its own
//! thread before every line, and a debug user interface which submits requests
//! asynchronously. All traffic in both directions is serialised through a single
//! [`EventDispatcher`].
mod adapter;
mod dispatcher;
mod events;
mod interpreter;
pub mod marker;
mod memory;
mod session;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use adapter::TextDebugger;
pub use dispatcher::{EventDispatcher, EventProcessor, ProcessorId};
pub use events::{
    BreakpointChange, DebuggerEvent, EvaluateExpression, Event, Line, Request, RequestId,
    ResumeCause, ResumeType, Variables,
};
pub use interpreter::{DebugHooks, Interpreter};
pub use marker::{Marker, SourceMarker};
pub use memory::read_memory;
pub use session::{DebugSession, ProgramState, SessionOptions};
