use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use eyre::WrapErr;

use crate::{
    adapter::TextDebugger,
    dispatcher::{EventDispatcher, EventProcessor},
    events::{
        BreakpointChange, DebuggerEvent, EvaluateExpression, Event, Line, Request, RequestId,
        ResumeType,
    },
    interpreter::Interpreter,
    marker::SourceMarker,
};

/// How long session setup waits for the dispatcher to apply initial requests
const SETUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Observable state of the debugged program
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramState {
    /// The interpreter has not reported being loaded yet
    NotStarted,
    Running,
    Suspended { line: Line },
    Terminated,
    /// The debugger detached; the program carries on without it
    Disconnected,
}

/// Configuration of a debugging session
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Breakpoints installed before the interpreter starts
    pub breakpoints: Vec<Line>,
}

/// Model side of the session: tracks the program state and republishes debugger events
struct SessionModel {
    state: Arc<Mutex<ProgramState>>,
    publisher: crossbeam_channel::Sender<DebuggerEvent>,
}

impl SessionModel {
    fn set_state(&self, new_state: ProgramState) {
        tracing::debug!(state = ?new_state, "setting program state");
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = new_state;
    }
}

impl EventProcessor for SessionModel {
    fn handle_event(&self, event: &Event) -> eyre::Result<()> {
        let event = match event {
            Event::Debugger(event) => event,
            Event::Request(Request::Disconnect) => {
                self.set_state(ProgramState::Disconnected);
                return Ok(());
            }
            Event::Request(_) => return Ok(()),
        };

        match event {
            DebuggerEvent::DebuggerStarted | DebuggerEvent::Resumed { .. } => {
                self.set_state(ProgramState::Running)
            }
            DebuggerEvent::Suspended { line } => {
                self.set_state(ProgramState::Suspended { line: *line })
            }
            DebuggerEvent::Terminated => self.set_state(ProgramState::Terminated),
            _ => {}
        }

        self.publisher
            .send(event.clone())
            .wrap_err("publishing debugger event")
    }
}

/// A debugging session: interpreter, dispatcher and adapter wired together.
///
/// The session is the model side of the adapter. Requests are submitted asynchronously and
/// their results arrive as [`DebuggerEvent`]s on [`DebugSession::events`].
pub struct DebugSession {
    dispatcher: EventDispatcher,
    adapter: Arc<TextDebugger>,
    interpreter: Arc<dyn Interpreter>,
    rx: crossbeam_channel::Receiver<DebuggerEvent>,
    state: Arc<Mutex<ProgramState>>,
    breakpoints: Mutex<BTreeSet<Line>>,
}

impl DebugSession {
    /// Attach a new session to `interpreter`.
    ///
    /// The interpreter must not be running yet: it is started by the caller once this returns,
    /// at which point the initial breakpoints are in place.
    #[tracing::instrument(skip(interpreter))]
    pub fn new(interpreter: Arc<dyn Interpreter>, options: SessionOptions) -> eyre::Result<Self> {
        tracing::debug!("creating debug session");
        let dispatcher = EventDispatcher::new();
        let adapter = Arc::new(TextDebugger::new(
            Arc::clone(&interpreter),
            dispatcher.clone(),
        ));
        dispatcher.add_processor(Arc::clone(&adapter) as Arc<dyn EventProcessor>);

        let state = Arc::new(Mutex::new(ProgramState::NotStarted));
        let (tx, rx) = crossbeam_channel::unbounded();
        dispatcher.add_processor(Arc::new(SessionModel {
            state: Arc::clone(&state),
            publisher: tx,
        }));
        dispatcher.start().context("starting event dispatcher")?;

        let session = Self {
            dispatcher,
            adapter,
            interpreter,
            rx,
            state,
            breakpoints: Mutex::new(BTreeSet::new()),
        };

        for line in options.breakpoints {
            session.add_breakpoint(line);
        }
        session
            .dispatcher
            .flush(SETUP_TIMEOUT)
            .context("installing initial breakpoints")?;

        session
            .interpreter
            .set_debugger(Some(Arc::clone(&session.adapter) as _));
        tracing::debug!("debug session ready");
        Ok(session)
    }

    /// Stream of debugger events, in the order they were dispatched
    pub fn events(&self) -> crossbeam_channel::Receiver<DebuggerEvent> {
        self.rx.clone()
    }

    pub fn state(&self) -> ProgramState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Breakpoint lines requested through this session
    pub fn breakpoints(&self) -> Vec<Line> {
        self.breakpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect()
    }

    /// The adapter driving the interpreter
    pub fn adapter(&self) -> &Arc<TextDebugger> {
        &self.adapter
    }

    /// Submit any request to the adapter
    pub fn submit(&self, request: Request) {
        tracing::debug!(?request, "submitting request");
        self.dispatcher.add_event(request);
    }

    #[tracing::instrument(skip(self))]
    pub fn add_breakpoint(&self, line: Line) {
        self.breakpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(line);
        self.submit(Request::Breakpoint {
            marker: Arc::new(SourceMarker::at_line(line)),
            change: BreakpointChange::Added,
        });
    }

    #[tracing::instrument(skip(self))]
    pub fn remove_breakpoint(&self, line: Line) {
        self.breakpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&line);
        self.submit(Request::Breakpoint {
            marker: Arc::new(SourceMarker::at_line(line)),
            change: BreakpointChange::Removed,
        });
    }

    /// Resume execution of the program
    pub fn r#continue(&self) {
        self.submit(Request::Resume(ResumeType::Continue));
    }

    /// Execute a single line, then suspend again
    pub fn step_over(&self) {
        self.submit(Request::Resume(ResumeType::StepOver));
    }

    pub fn terminate(&self) {
        self.submit(Request::Terminate);
    }

    /// Detach from the program and let it run to completion
    pub fn disconnect(&self) {
        self.submit(Request::Disconnect);
    }

    pub fn fetch_variables(&self) {
        self.submit(Request::FetchVariables);
    }

    pub fn change_variable(&self, name: impl Into<String>, content: impl Into<String>) {
        self.submit(Request::ChangeVariable {
            name: name.into(),
            content: content.into(),
        });
    }

    /// Evaluate an expression; the result carries the returned id
    pub fn evaluate(&self, expression: impl Into<String>) -> RequestId {
        let request = EvaluateExpression::new(expression);
        let id = request.id;
        self.submit(Request::EvaluateExpression(request));
        id
    }

    pub fn fetch_memory(&self, start_address: i64, length: u64) {
        self.submit(Request::FetchMemory {
            start_address,
            length,
        });
    }

    /// Wait for an event matching `pred`, skipping the ones that do not match
    pub fn wait_for_event<F>(&self, timeout: Duration, pred: F) -> eyre::Result<DebuggerEvent>
    where
        F: Fn(&DebuggerEvent) -> bool,
    {
        let deadline = crossbeam_channel::at(std::time::Instant::now() + timeout);
        loop {
            crossbeam_channel::select! {
                recv(self.rx) -> event => {
                    let event = event.wrap_err("debugger event channel closed")?;
                    if pred(&event) {
                        tracing::debug!(?event, "received expected event");
                        return Ok(event);
                    }
                    tracing::trace!(?event, "non-matching event");
                }
                recv(deadline) -> _ => eyre::bail!("timed out after {timeout:?} waiting for event"),
            }
        }
    }

    /// Wait until every request submitted so far has been handled
    pub fn flush(&self, timeout: Duration) -> eyre::Result<()> {
        self.dispatcher.flush(timeout)
    }

    /// Stop dispatching and wait for the dispatcher to exit
    pub fn shutdown(&self) -> eyre::Result<()> {
        self.dispatcher.stop();
        self.dispatcher.join().wrap_err("joining event dispatcher")
    }
}

impl Drop for DebugSession {
    fn drop(&mut self) {
        tracing::debug!("dropping debug session");
        self.dispatcher.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Mutex},
        time::Duration,
    };

    use super::{DebugSession, ProgramState, SessionModel, SessionOptions};
    use crate::{DebuggerEvent, EventProcessor, ResumeCause, events::Event, testing::FakeInterpreter};

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn session(
        interpreter: FakeInterpreter,
        breakpoints: Vec<usize>,
    ) -> (Arc<FakeInterpreter>, DebugSession) {
        let interpreter = Arc::new(interpreter);
        let session = DebugSession::new(
            Arc::clone(&interpreter) as _,
            SessionOptions { breakpoints },
        )
        .unwrap();
        (interpreter, session)
    }

    #[test]
    fn initial_breakpoints_are_installed() {
        let (interpreter, session) = session(FakeInterpreter::default(), vec![3, 7]);
        assert!(interpreter.is_attached());
        assert_eq!(session.adapter().breakpoints(), vec![3, 7]);
        assert_eq!(session.breakpoints(), vec![3, 7]);
        assert_eq!(session.state(), ProgramState::NotStarted);
    }

    #[test]
    fn tracks_program_state() {
        let (interpreter, session) = session(FakeInterpreter::default(), vec![]);
        let hooks = interpreter.debugger().unwrap();

        hooks.loaded();
        session
            .wait_for_event(TIMEOUT, |e| matches!(e, DebuggerEvent::DebuggerStarted))
            .unwrap();
        assert_eq!(session.state(), ProgramState::Running);

        hooks.suspended(2);
        session
            .wait_for_event(TIMEOUT, |e| matches!(e, DebuggerEvent::Suspended { .. }))
            .unwrap();
        assert_eq!(session.state(), ProgramState::Suspended { line: 2 });

        session.step_over();
        session.flush(TIMEOUT).unwrap();
        assert_eq!(interpreter.resume_count(), 1);
        hooks.resumed();
        let event = session
            .wait_for_event(TIMEOUT, |e| matches!(e, DebuggerEvent::Resumed { .. }))
            .unwrap();
        assert_eq!(
            event,
            DebuggerEvent::Resumed {
                cause: ResumeCause::Stepping
            }
        );

        hooks.terminated();
        session
            .wait_for_event(TIMEOUT, |e| matches!(e, DebuggerEvent::Terminated))
            .unwrap();
        assert_eq!(session.state(), ProgramState::Terminated);
    }

    #[test]
    fn removing_breakpoint_updates_adapter() {
        let (_interpreter, session) = session(FakeInterpreter::default(), vec![4]);
        session.remove_breakpoint(4);
        session.flush(TIMEOUT).unwrap();
        assert!(session.adapter().breakpoints().is_empty());
        assert!(session.breakpoints().is_empty());
    }

    #[test]
    fn evaluate_result_correlates_by_id() {
        let (_interpreter, session) =
            session(FakeInterpreter::default().with_evaluation("1+1", "2"), vec![]);
        let id = session.evaluate("1+1");
        let event = session
            .wait_for_event(TIMEOUT, |e| {
                matches!(e, DebuggerEvent::EvaluateExpressionResult { .. })
            })
            .unwrap();
        let DebuggerEvent::EvaluateExpressionResult { result, request } = event else {
            unreachable!()
        };
        assert_eq!(result, "2");
        assert_eq!(request.id, id);
    }

    #[test]
    fn wait_for_event_times_out() {
        let (_interpreter, session) = session(FakeInterpreter::default(), vec![]);
        assert!(
            session
                .wait_for_event(Duration::from_millis(50), |_| true)
                .is_err()
        );
    }

    #[test]
    fn disconnect_marks_session_disconnected() {
        let (interpreter, session) = session(FakeInterpreter::default(), vec![]);
        session.disconnect();
        session.dispatcher.join().unwrap();
        assert_eq!(session.state(), ProgramState::Disconnected);
        assert!(!interpreter.is_attached());
        assert_eq!(interpreter.resume_count(), 1);
    }

    #[test]
    fn disconnect_applies_after_queued_events() {
        let (interpreter, session) = session(FakeInterpreter::default(), vec![]);
        let hooks = interpreter.debugger().unwrap();
        hooks.loaded();
        hooks.suspended(2);
        session.disconnect();
        session.dispatcher.join().unwrap();

        assert_eq!(session.state(), ProgramState::Disconnected);
        let events: Vec<_> = session.events().try_iter().collect();
        assert_eq!(
            events,
            vec![
                DebuggerEvent::DebuggerStarted,
                DebuggerEvent::Suspended { line: 2 }
            ]
        );
    }

    #[test]
    fn model_reports_closed_subscriber() {
        let state = Arc::new(Mutex::new(ProgramState::NotStarted));
        let (tx, rx) = crossbeam_channel::unbounded();
        drop(rx);
        let model = SessionModel {
            state: Arc::clone(&state),
            publisher: tx,
        };

        let event = Event::from(DebuggerEvent::Suspended { line: 4 });
        assert!(model.handle_event(&event).is_err());
        assert_eq!(*state.lock().unwrap(), ProgramState::Suspended { line: 4 });
    }
}
