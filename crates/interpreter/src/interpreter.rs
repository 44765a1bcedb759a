use std::{
    path::Path,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock},
    thread::{self, JoinHandle},
};

use debugger::{DebugHooks, Interpreter, Line, Variables};
use eyre::WrapErr;

use crate::{
    error::InterpreterError,
    expression,
    script::{self, Statement},
};

/// Interpreter configuration
#[derive(Debug, Clone, Default)]
pub struct InterpreterOptions {
    /// Wait for the first resume after reporting the program as loaded
    pub suspend_on_load: bool,
    /// Receives every output line as it is produced
    pub output: Option<crossbeam_channel::Sender<String>>,
}

/// Execution status of the script
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    NotStarted,
    Running,
    /// Waiting for a resume; `line` is `None` while waiting on load
    Suspended { line: Option<Line> },
    Terminated,
}

struct RunState {
    status: Status,
    variables: Variables,
    output: Vec<String>,
    resume_requested: bool,
    terminate_requested: bool,
}

struct Inner {
    lines: Vec<String>,
    options: InterpreterOptions,
    state: Mutex<RunState>,
    wake: Condvar,
    debugger: RwLock<Option<Arc<dyn DebugHooks>>>,
}

/// Line oriented interpreter for text scripts.
///
/// The script runs on the thread calling [`TextInterpreter::run`]; every other method may be
/// called from any thread. Clones share the same program.
#[derive(Clone)]
pub struct TextInterpreter {
    inner: Arc<Inner>,
}

impl TextInterpreter {
    pub fn new(source: &str, options: InterpreterOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                lines: source.lines().map(ToString::to_string).collect(),
                options,
                state: Mutex::new(RunState {
                    status: Status::NotStarted,
                    variables: Variables::new(),
                    output: Vec::new(),
                    resume_requested: false,
                    terminate_requested: false,
                }),
                wake: Condvar::new(),
                debugger: RwLock::new(None),
            }),
        }
    }

    pub fn from_path(
        path: impl AsRef<Path>,
        options: InterpreterOptions,
    ) -> Result<Self, InterpreterError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| InterpreterError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(&source, options))
    }

    pub fn line_count(&self) -> usize {
        self.inner.lines.len()
    }

    /// Source text of a 1-based line
    pub fn line(&self, line: Line) -> Option<&str> {
        line.checked_sub(1)
            .and_then(|index| self.inner.lines.get(index))
            .map(String::as_str)
    }

    pub fn status(&self) -> Status {
        self.lock().status
    }

    /// Output produced so far
    pub fn output(&self) -> Vec<String> {
        self.lock().output.clone()
    }

    /// Run the script to completion on a background thread
    pub fn spawn(&self) -> eyre::Result<JoinHandle<Result<(), InterpreterError>>> {
        let interpreter = self.clone();
        thread::Builder::new()
            .name("interpreter".to_string())
            .spawn(move || interpreter.run())
            .wrap_err("spawning interpreter thread")
    }

    /// Run the script to completion on the current thread
    #[tracing::instrument(skip(self))]
    pub fn run(&self) -> Result<(), InterpreterError> {
        {
            let mut state = self.lock();
            match state.status {
                Status::NotStarted => state.status = Status::Running,
                Status::Terminated => return Err(InterpreterError::AlreadyTerminated),
                _ => return Err(InterpreterError::AlreadyStarted),
            }
        }
        tracing::debug!(lines = self.inner.lines.len(), "starting program");

        if let Some(debugger) = self.debugger() {
            if self.inner.options.suspend_on_load {
                self.suspend(None, || debugger.loaded());
            } else {
                debugger.loaded();
            }
        }

        for (index, text) in self.inner.lines.iter().enumerate() {
            let line = index + 1;
            if self.lock().terminate_requested {
                break;
            }

            if let Some(debugger) = self.debugger()
                && debugger.is_breakpoint(line)
            {
                tracing::debug!(%line, "suspending");
                if !self.suspend(Some(line), || debugger.suspended(line)) {
                    break;
                }
            }

            self.execute(line, text);
        }

        self.lock().status = Status::Terminated;
        tracing::debug!("program finished");

        let debugger = self
            .inner
            .debugger
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(debugger) = debugger {
            debugger.terminated();
        }
        Ok(())
    }

    /// Enter the suspended state, announce it with `notify` and block until resumed.
    ///
    /// Returns `false` if the program should stop instead. The state is suspended before
    /// `notify` runs so a resume reacting to the announcement cannot be lost.
    fn suspend(&self, line: Option<Line>, notify: impl FnOnce()) -> bool {
        {
            let mut state = self.lock();
            state.status = Status::Suspended { line };
            state.resume_requested = false;
        }
        notify();

        let mut state = self
            .inner
            .wake
            .wait_while(self.lock(), |state| {
                !state.resume_requested && !state.terminate_requested
            })
            .unwrap_or_else(PoisonError::into_inner);
        if state.terminate_requested {
            return false;
        }
        state.status = Status::Running;
        state.resume_requested = false;
        drop(state);

        // may have been detached while suspended
        if let Some(debugger) = self.debugger() {
            debugger.resumed();
        }
        true
    }

    fn execute(&self, line: Line, text: &str) {
        let mut state = self.lock();
        match script::parse_line(text) {
            Statement::Nop => {}
            Statement::Assign { name, value } => {
                let value = script::coerce(value, &state.variables);
                tracing::trace!(%line, %name, %value, "assignment");
                state.variables.insert(name.to_string(), value);
            }
            Statement::Output(text) => {
                let text = script::substitute(text, &state.variables);
                if let Some(output) = &self.inner.options.output {
                    let _ = output.send(text.clone());
                }
                state.output.push(text);
            }
        }
    }

    fn debugger(&self) -> Option<Arc<dyn DebugHooks>> {
        self.inner
            .debugger
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn lock(&self) -> MutexGuard<'_, RunState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Interpreter for TextInterpreter {
    fn resume(&self) -> eyre::Result<()> {
        let mut state = self.lock();
        if !matches!(state.status, Status::Suspended { .. }) {
            tracing::debug!(status = ?state.status, "not suspended, ignoring resume");
            return Ok(());
        }
        state.resume_requested = true;
        self.inner.wake.notify_all();
        Ok(())
    }

    fn terminate(&self) -> eyre::Result<()> {
        let mut state = self.lock();
        if state.status == Status::Terminated {
            return Err(InterpreterError::AlreadyTerminated.into());
        }
        state.terminate_requested = true;
        self.inner.wake.notify_all();
        Ok(())
    }

    fn variables(&self) -> eyre::Result<Variables> {
        Ok(self.lock().variables.clone())
    }

    fn set_variable(&self, name: &str, content: &str) -> eyre::Result<()> {
        if !script::is_identifier(name) {
            return Err(InterpreterError::InvalidVariableName(name.to_string()).into());
        }
        let mut state = self.lock();
        let value = script::coerce(content, &state.variables);
        state.variables.insert(name.to_string(), value);
        Ok(())
    }

    fn evaluate(&self, expression: &str) -> eyre::Result<String> {
        let state = self.lock();
        let substituted = script::substitute(expression, &state.variables);
        let value = expression::evaluate(&substituted, &state.variables)
            .map_err(InterpreterError::from)?;
        Ok(value.to_string())
    }

    fn memory(&self) -> eyre::Result<Vec<u8>> {
        let state = self.lock();
        let mut memory = Vec::new();
        for line in &state.output {
            memory.extend_from_slice(line.as_bytes());
            memory.push(b'\n');
        }
        Ok(memory)
    }

    fn set_debugger(&self, debugger: Option<Arc<dyn DebugHooks>>) {
        tracing::debug!(attached = debugger.is_some(), "setting debugger");
        *self
            .inner
            .debugger
            .write()
            .unwrap_or_else(PoisonError::into_inner) = debugger;
    }
}
