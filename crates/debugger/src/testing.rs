//! Testing utilities for code built on the debugger adapter.
//!
//! [`FakeInterpreter`] is a scripted stand-in for a real interpreter that records the control
//! calls it receives, and [`EventRecorder`] is a processor that captures every dispatched
//! event so tests can search through them rather than expecting an exact interleaving.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, PoisonError, RwLock,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use crate::{
    dispatcher::EventProcessor,
    events::{DebuggerEvent, Event, Variables},
    interpreter::{DebugHooks, Interpreter},
};

type Coercion = Box<dyn Fn(&str) -> String + Send + Sync>;

/// Interpreter double with canned variables, memory and evaluation results
#[derive(Default)]
pub struct FakeInterpreter {
    variables: Mutex<Variables>,
    memory: Vec<u8>,
    evaluations: HashMap<String, String>,
    coercion: Option<Coercion>,
    debugger: RwLock<Option<Arc<dyn DebugHooks>>>,

    resume_count: AtomicUsize,
    terminate_count: AtomicUsize,
    fail_next: AtomicBool,
}

impl FakeInterpreter {
    pub fn with_variable(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), value.into());
        self
    }

    pub fn with_memory(mut self, memory: impl Into<Vec<u8>>) -> Self {
        self.memory = memory.into();
        self
    }

    pub fn with_evaluation(
        mut self,
        expression: impl Into<String>,
        result: impl Into<String>,
    ) -> Self {
        self.evaluations.insert(expression.into(), result.into());
        self
    }

    /// Transform every written variable value, like an interpreter coercing input
    pub fn with_coercion(mut self, coercion: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        self.coercion = Some(Box::new(coercion));
        self
    }

    /// Make the next port call fail
    pub fn fail_next_call(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn resume_count(&self) -> usize {
        self.resume_count.load(Ordering::SeqCst)
    }

    pub fn terminate_count(&self) -> usize {
        self.terminate_count.load(Ordering::SeqCst)
    }

    pub fn is_attached(&self) -> bool {
        self.debugger
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// The currently attached debugger, for driving hooks by hand
    pub fn debugger(&self) -> Option<Arc<dyn DebugHooks>> {
        self.debugger
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn check_failure(&self, operation: &str) -> eyre::Result<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            eyre::bail!("injected failure in {operation}");
        }
        Ok(())
    }
}

impl Interpreter for FakeInterpreter {
    fn resume(&self) -> eyre::Result<()> {
        self.check_failure("resume")?;
        self.resume_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn terminate(&self) -> eyre::Result<()> {
        self.check_failure("terminate")?;
        self.terminate_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn variables(&self) -> eyre::Result<Variables> {
        self.check_failure("variables")?;
        Ok(self
            .variables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn set_variable(&self, name: &str, content: &str) -> eyre::Result<()> {
        self.check_failure("set_variable")?;
        let value = match &self.coercion {
            Some(coerce) => coerce(content),
            None => content.to_string(),
        };
        self.variables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), value);
        Ok(())
    }

    fn evaluate(&self, expression: &str) -> eyre::Result<String> {
        self.check_failure("evaluate")?;
        self.evaluations
            .get(expression)
            .cloned()
            .ok_or_else(|| eyre::eyre!("cannot evaluate {expression:?}"))
    }

    fn memory(&self) -> eyre::Result<Vec<u8>> {
        self.check_failure("memory")?;
        Ok(self.memory.clone())
    }

    fn set_debugger(&self, debugger: Option<Arc<dyn DebugHooks>>) {
        *self
            .debugger
            .write()
            .unwrap_or_else(PoisonError::into_inner) = debugger;
    }
}

/// Processor capturing every dispatched event
#[derive(Default)]
pub struct EventRecorder {
    events: Mutex<Vec<Event>>,
}

impl EventRecorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// All captured events, requests included
    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Only the events emitted by the debugger
    pub fn debugger_events(&self) -> Vec<DebuggerEvent> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Debugger(event) => Some(event),
                Event::Request(_) => None,
            })
            .collect()
    }

    /// Poll until `count` debugger events were captured, returning them
    pub fn wait_for_debugger_events(
        &self,
        count: usize,
        timeout: Duration,
    ) -> eyre::Result<Vec<DebuggerEvent>> {
        let deadline = Instant::now() + timeout;
        loop {
            let events = self.debugger_events();
            if events.len() >= count {
                return Ok(events);
            }
            if Instant::now() >= deadline {
                eyre::bail!(
                    "timed out after {timeout:?} waiting for {count} events, got {events:?}"
                );
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}

impl EventProcessor for EventRecorder {
    fn handle_event(&self, event: &Event) -> eyre::Result<()> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        Ok(())
    }
}
