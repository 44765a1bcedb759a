use std::{
    collections::BTreeMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use crate::marker::Marker;

/// 1-based source line number
pub type Line = usize;

/// Snapshot of the interpreter variables, ordered by name
pub type Variables = BTreeMap<String, String>;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier used to correlate a request with the event answering it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    /// Allocate a new process-unique request id
    pub fn next() -> Self {
        Self(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Why the interpreter resumed execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeCause {
    Continue,
    Stepping,
}

/// How the user asked the interpreter to resume
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeType {
    Continue,
    StepOver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakpointChange {
    Added,
    Removed,
}

/// Expression evaluation request, echoed back with its result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluateExpression {
    pub id: RequestId,
    pub expression: String,
}

impl EvaluateExpression {
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            id: RequestId::next(),
            expression: expression.into(),
        }
    }
}

/// Events emitted by the debugger towards the model
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebuggerEvent {
    DebuggerStarted,
    Suspended {
        line: Line,
    },
    Resumed {
        cause: ResumeCause,
    },
    Terminated,
    /// Detached copy of the interpreter variables
    Variables(Variables),
    EvaluateExpressionResult {
        result: String,
        request: EvaluateExpression,
    },
    /// Memory contents starting at `start_address`.
    ///
    /// `start_address` is always the requested address, even when fewer bytes than requested
    /// (or none at all) were available.
    Memory {
        start_address: i64,
        bytes: Vec<u8>,
    },
}

/// Requests submitted by the model towards the debugger
#[derive(Debug, Clone)]
pub enum Request {
    Resume(ResumeType),
    Terminate,
    Disconnect,
    Breakpoint {
        marker: Arc<dyn Marker>,
        change: BreakpointChange,
    },
    FetchVariables,
    ChangeVariable {
        name: String,
        content: String,
    },
    EvaluateExpression(EvaluateExpression),
    FetchMemory {
        start_address: i64,
        length: u64,
    },
}

/// Everything that travels through the dispatcher
#[derive(Debug, Clone)]
pub enum Event {
    Debugger(DebuggerEvent),
    Request(Request),
}

impl Event {
    pub fn is_terminated(&self) -> bool {
        matches!(self, Event::Debugger(DebuggerEvent::Terminated))
    }
}

impl From<DebuggerEvent> for Event {
    fn from(value: DebuggerEvent) -> Self {
        Self::Debugger(value)
    }
}

impl From<Request> for Event {
    fn from(value: Request) -> Self {
        Self::Request(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_ids_are_unique() {
        let a = EvaluateExpression::new("1+1");
        let b = EvaluateExpression::new("1+1");
        assert_ne!(a.id, b.id);
        assert_ne!(a, b);
    }

    #[test]
    fn only_terminated_is_terminal() {
        assert!(Event::from(DebuggerEvent::Terminated).is_terminated());
        assert!(!Event::from(DebuggerEvent::DebuggerStarted).is_terminated());
        assert!(!Event::from(Request::Terminate).is_terminated());
    }
}
