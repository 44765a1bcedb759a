use std::{
    collections::BTreeSet,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use eyre::WrapErr;

use crate::{
    dispatcher::{EventDispatcher, EventProcessor},
    events::{
        BreakpointChange, DebuggerEvent, EvaluateExpression, Event, Line, Request, ResumeCause,
        ResumeType,
    },
    interpreter::{DebugHooks, Interpreter},
    marker::Marker,
    memory::read_memory,
};

/// Translates between interpreter callbacks and dispatcher events.
///
/// The interpreter sees the adapter through [`DebugHooks`]; the dispatcher delivers
/// requests to it through [`EventProcessor`]. Requests are only ever handled on the
/// dispatcher worker, so handling is strictly sequential.
pub struct TextDebugger {
    interpreter: Arc<dyn Interpreter>,
    dispatcher: EventDispatcher,

    // read by the interpreter thread in `is_breakpoint`
    stepping: AtomicBool,
    breakpoints: Mutex<BTreeSet<Line>>,
}

impl TextDebugger {
    pub fn new(interpreter: Arc<dyn Interpreter>, dispatcher: EventDispatcher) -> Self {
        Self {
            interpreter,
            dispatcher,
            stepping: AtomicBool::new(false),
            breakpoints: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn is_stepping(&self) -> bool {
        self.stepping.load(Ordering::Acquire)
    }

    /// Currently active breakpoint lines, in ascending order
    pub fn breakpoints(&self) -> Vec<Line> {
        self.breakpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect()
    }

    /// Pass an event to the dispatcher, where it is handled asynchronously
    fn fire_event(&self, event: DebuggerEvent) {
        tracing::debug!(?event, "firing event");
        self.dispatcher.add_event(event);
    }

    #[tracing::instrument(skip(self), level = "debug")]
    fn handle_request(&self, request: &Request) -> eyre::Result<()> {
        tracing::debug!("processing request");

        match request {
            Request::Resume(resume_type) => self.resume(*resume_type),
            Request::Terminate => self
                .interpreter
                .terminate()
                .wrap_err("terminating interpreter"),
            Request::Disconnect => self.disconnect(),
            Request::Breakpoint { marker, change } => {
                self.update_breakpoint(marker.as_ref(), *change);
                Ok(())
            }
            Request::FetchVariables => self.fire_variables(),
            Request::ChangeVariable { name, content } => {
                self.interpreter
                    .set_variable(name, content)
                    .wrap_err_with(|| format!("changing variable {name}"))?;
                self.fire_variables()
            }
            Request::EvaluateExpression(request) => self.evaluate(request),
            Request::FetchMemory {
                start_address,
                length,
            } => self.fetch_memory(*start_address, *length),
        }
    }

    fn resume(&self, resume_type: ResumeType) -> eyre::Result<()> {
        let stepping = resume_type == ResumeType::StepOver;
        let previous = self.stepping.swap(stepping, Ordering::AcqRel);

        if let Err(e) = self.interpreter.resume() {
            self.stepping.store(previous, Ordering::Release);
            return Err(e).wrap_err("resuming interpreter");
        }
        Ok(())
    }

    fn disconnect(&self) -> eyre::Result<()> {
        tracing::debug!("detaching from interpreter");
        self.interpreter.set_debugger(None);
        // nothing is processed for this session once detached
        self.dispatcher.stop();
        self.interpreter
            .resume()
            .wrap_err("resuming detached interpreter")
    }

    fn update_breakpoint(&self, marker: &dyn Marker, change: BreakpointChange) {
        let Some(line) = marker.line() else {
            tracing::debug!(?marker, "ignoring breakpoint without a line number");
            return;
        };

        let mut breakpoints = self
            .breakpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match change {
            BreakpointChange::Added => {
                breakpoints.insert(line);
            }
            BreakpointChange::Removed => {
                breakpoints.remove(&line);
            }
        }
    }

    fn fire_variables(&self) -> eyre::Result<()> {
        let variables = self
            .interpreter
            .variables()
            .wrap_err("fetching variables")?;
        self.fire_event(DebuggerEvent::Variables(variables));
        Ok(())
    }

    fn evaluate(&self, request: &EvaluateExpression) -> eyre::Result<()> {
        let result = self
            .interpreter
            .evaluate(&request.expression)
            .wrap_err_with(|| format!("evaluating expression {:?}", request.expression))?;
        self.fire_event(DebuggerEvent::EvaluateExpressionResult {
            result,
            request: request.clone(),
        });
        Ok(())
    }

    fn fetch_memory(&self, start_address: i64, length: u64) -> eyre::Result<()> {
        let memory = self.interpreter.memory().wrap_err("fetching memory")?;
        let bytes = read_memory(&memory, start_address, length);
        if bytes.is_empty() && length > 0 {
            tracing::debug!(%start_address, size = memory.len(), "memory read out of range");
        }
        self.fire_event(DebuggerEvent::Memory {
            start_address,
            bytes: bytes.to_vec(),
        });
        Ok(())
    }
}

impl DebugHooks for TextDebugger {
    fn loaded(&self) {
        self.fire_event(DebuggerEvent::DebuggerStarted);
    }

    fn suspended(&self, line: Line) {
        self.fire_event(DebuggerEvent::Suspended { line });
    }

    fn resumed(&self) {
        let cause = if self.is_stepping() {
            ResumeCause::Stepping
        } else {
            ResumeCause::Continue
        };
        self.fire_event(DebuggerEvent::Resumed { cause });
    }

    fn terminated(&self) {
        self.fire_event(DebuggerEvent::Terminated);
    }

    fn is_breakpoint(&self, line: Line) -> bool {
        let hit = self
            .breakpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&line);
        hit || self.is_stepping()
    }
}

impl EventProcessor for TextDebugger {
    fn handle_event(&self, event: &Event) -> eyre::Result<()> {
        match event {
            Event::Request(request) => self.handle_request(request),
            // our own events come back through the queue
            Event::Debugger(_) => Ok(()),
        }
    }
}
