use std::{
    io::Write,
    path::PathBuf,
    sync::{Arc, Mutex},
    thread::JoinHandle,
};

use clap::Parser;
use color_eyre::eyre::{self, Context};
use crossbeam_channel::{Receiver, RecvError};
use debugger::{DebugSession, DebuggerEvent, Line, ProgramState, ResumeCause, SessionOptions};
use interpreter::{InterpreterError, InterpreterOptions, TextInterpreter};
use launch_configuration::ChosenLaunchConfiguration;
use tracing_subscriber::filter::EnvFilter;

use crate::command::{Command, HELP, hex_dump};

mod command;

struct App {
    session: DebugSession,
    interpreter: TextInterpreter,
    debugger_events: Receiver<DebuggerEvent>,
    output_rx: Receiver<String>,
    input_rx: Receiver<String>,

    #[allow(dead_code)]
    input_thread: JoinHandle<()>,
}

impl App {
    fn new(
        session: DebugSession,
        interpreter: TextInterpreter,
        output_rx: Receiver<String>,
    ) -> Self {
        let debugger_events = session.events();

        // handle input
        let (input_tx, input_rx) = crossbeam_channel::unbounded();
        let input_thread = std::thread::spawn(move || {
            let mut buffer = String::new();
            loop {
                match std::io::stdin().read_line(&mut buffer) {
                    // end of input closes the channel
                    Ok(0) => break,
                    Ok(_) => {
                        let input = buffer.trim().to_owned();
                        if input_tx.send(input).is_err() {
                            break;
                        }
                        buffer.clear();
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "reading from stdin");
                        break;
                    }
                }
            }
        });

        Self {
            session,
            interpreter,
            debugger_events,
            output_rx,
            input_thread,
            input_rx,
        }
    }

    fn loop_step(&mut self) -> eyre::Result<ShouldQuit> {
        tracing::trace!("locking stdout");
        print!("> ");
        tracing::trace!("prompt written, flushing stdout");
        std::io::stdout().flush()?;
        tracing::trace!("stdout flushed");

        let ready = crossbeam_channel::select! {
            recv(self.input_rx) -> input => Ready::Input(input),
            recv(self.debugger_events) -> event => Ready::Event(event),
            recv(self.output_rx) -> line => Ready::Output(line),
        };

        match ready {
            Ready::Input(Ok(input)) => match self.handle_input(&input) {
                Ok(should_quit) => Ok(should_quit),
                Err(e) => {
                    println!("error: {e:#}");
                    Ok(ShouldQuit::False)
                }
            },
            Ready::Input(Err(_)) => {
                tracing::debug!("input closed");
                Ok(ShouldQuit::True)
            }
            Ready::Event(Ok(event)) => self
                .handle_debugger_event(event)
                .context("handling debugger event"),
            Ready::Event(Err(_)) => {
                // the dispatcher has stopped
                self.debugger_events = crossbeam_channel::never();
                Ok(ShouldQuit::False)
            }
            Ready::Output(Ok(line)) => {
                println!("| {line}");
                Ok(ShouldQuit::False)
            }
            Ready::Output(Err(_)) => {
                self.output_rx = crossbeam_channel::never();
                Ok(ShouldQuit::False)
            }
        }
    }

    #[tracing::instrument(skip(self))]
    fn handle_debugger_event(&mut self, event: DebuggerEvent) -> eyre::Result<ShouldQuit> {
        match event {
            DebuggerEvent::DebuggerStarted => println!("program started"),
            DebuggerEvent::Suspended { line } => {
                println!("program paused at {}", self.describe_line(line));
            }
            DebuggerEvent::Resumed { cause } => match cause {
                ResumeCause::Continue => println!("program running"),
                ResumeCause::Stepping => println!("program stepping"),
            },
            DebuggerEvent::Terminated => {
                println!("program completed");
                return Ok(ShouldQuit::True);
            }
            DebuggerEvent::Variables(variables) => {
                if variables.is_empty() {
                    println!("no variables");
                }
                for (name, value) in variables {
                    println!("{name} = {value}");
                }
            }
            DebuggerEvent::EvaluateExpressionResult { result, request } => {
                println!("{} {} = {result}", request.id, request.expression);
            }
            DebuggerEvent::Memory {
                start_address,
                bytes,
            } => {
                if bytes.is_empty() {
                    println!("no memory at {start_address}");
                } else {
                    println!("{}", hex_dump(start_address, &bytes));
                }
            }
        }
        Ok(ShouldQuit::False)
    }

    fn handle_input(&mut self, input: &str) -> eyre::Result<ShouldQuit> {
        let command: Command = input.parse()?;
        tracing::debug!(?command, "executing command");

        match command {
            Command::Empty => {}
            Command::Quit => return Ok(ShouldQuit::True),
            Command::Help => println!("{HELP}"),
            Command::Continue => self.session.r#continue(),
            Command::StepOver => self.session.step_over(),
            Command::Variables => self.session.fetch_variables(),
            Command::SetVariable { name, content } => self.session.change_variable(name, content),
            Command::Evaluate(expression) => {
                let id = self.session.evaluate(expression);
                tracing::debug!(%id, "evaluation requested");
            }
            Command::Memory {
                start_address,
                length,
            } => self.session.fetch_memory(start_address, length),
            Command::AddBreakpoint(line) => {
                let line_count = self.interpreter.line_count();
                eyre::ensure!(
                    (1..=line_count).contains(&line),
                    "line {line} is outside the program (1-{line_count})"
                );
                self.session.add_breakpoint(line);
            }
            Command::RemoveBreakpoint(line) => self.session.remove_breakpoint(line),
            Command::ListBreakpoints => {
                let breakpoints = self.session.breakpoints();
                if breakpoints.is_empty() {
                    println!("no breakpoints");
                }
                for line in breakpoints {
                    println!("{}", self.describe_line(line));
                }
            }
            Command::Where => match self.session.state() {
                ProgramState::Suspended { line } => println!("{}", self.describe_line(line)),
                state => println!("{state:?}"),
            },
            Command::Terminate => self.session.terminate(),
            Command::Disconnect => {
                self.session.disconnect();
                println!("detached, program continues without the debugger");
            }
        }
        Ok(ShouldQuit::False)
    }

    fn describe_line(&self, line: Line) -> String {
        match self.interpreter.line(line) {
            Some(text) => format!("line {line}: {text}"),
            None => format!("line {line}"),
        }
    }
}

#[derive(Debug, Parser)]
struct Args {
    /// Script to run
    program: Option<PathBuf>,

    /// Launch configuration file (launch.json or .code-workspace)
    #[clap(short, long, conflicts_with = "program")]
    config: Option<PathBuf>,

    /// Name of the launch configuration to use
    #[clap(short, long, requires = "config")]
    name: Option<String>,

    /// Line to break on, may be repeated
    #[clap(short, long = "breakpoint")]
    breakpoints: Vec<Line>,

    /// Suspend before the first line runs
    #[clap(long)]
    stop_on_entry: bool,

    #[clap(long, default_value = "textdbg.log")]
    log_file: PathBuf,
}

/// What to run, merged from the command line and any launch configuration
struct Launch {
    program: PathBuf,
    breakpoints: Vec<Line>,
    stop_on_entry: bool,
    cwd: Option<PathBuf>,
}

fn launch_from_args(args: Args) -> eyre::Result<Option<Launch>> {
    let Some(config_path) = args.config else {
        let program = args
            .program
            .ok_or_else(|| eyre::eyre!("either a program or --config is required"))?;
        return Ok(Some(Launch {
            program,
            breakpoints: args.breakpoints,
            stop_on_entry: args.stop_on_entry,
            cwd: None,
        }));
    };

    match launch_configuration::load_from_path(args.name.as_deref(), &config_path)
        .context("loading launch configuration")?
    {
        ChosenLaunchConfiguration::Specific(config) => {
            tracing::debug!(?config, "using launch configuration");
            let mut breakpoints = config.breakpoints;
            breakpoints.extend(args.breakpoints);
            Ok(Some(Launch {
                program: config.program,
                breakpoints,
                stop_on_entry: config.stop_on_entry || args.stop_on_entry,
                cwd: config.cwd,
            }))
        }
        ChosenLaunchConfiguration::NotFound => {
            eyre::bail!("no matching launch configuration found")
        }
        ChosenLaunchConfiguration::ToBeChosen(names) => {
            println!("choose a configuration with --name:");
            for name in names {
                println!("  {name}");
            }
            Ok(None)
        }
    }
}

fn main() -> eyre::Result<()> {
    color_eyre::install().context("installing color_eyre")?;
    let args = Args::parse();

    let log_file = std::fs::File::create(&args.log_file).context("creating log file")?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(Mutex::new(log_file))
        .init();

    let Some(launch) = launch_from_args(args)? else {
        return Ok(());
    };
    if let Some(cwd) = &launch.cwd {
        std::env::set_current_dir(cwd)
            .wrap_err_with(|| format!("changing directory to {}", cwd.display()))?;
    }

    let (output_tx, output_rx) = crossbeam_channel::unbounded();
    let interpreter = TextInterpreter::from_path(
        &launch.program,
        InterpreterOptions {
            suspend_on_load: launch.stop_on_entry,
            output: Some(output_tx),
        },
    )
    .context("loading program")?;

    let session = DebugSession::new(
        Arc::new(interpreter.clone()),
        SessionOptions {
            breakpoints: launch.breakpoints,
        },
    )
    .context("creating debug session")?;
    tracing::debug!("breakpoints added");

    let handle = interpreter.spawn().context("starting program")?;
    tracing::debug!("program started");

    let mut app = App::new(session, interpreter, output_rx);
    tracing::debug!("debugger set up");
    loop {
        match app.loop_step() {
            Ok(ShouldQuit::True) => break,
            Ok(ShouldQuit::False) => {}
            Err(e) => eyre::bail!("Error running command: {e}"),
        }
    }

    if !matches!(
        app.session.state(),
        ProgramState::Terminated | ProgramState::Disconnected
    ) {
        app.session.terminate();
    }
    finish(handle)?;
    for line in app.output_rx.try_iter() {
        println!("| {line}");
    }
    Ok(())
}

fn finish(handle: JoinHandle<Result<(), InterpreterError>>) -> eyre::Result<()> {
    handle
        .join()
        .map_err(|_| eyre::eyre!("interpreter thread panicked"))?
        .context("running program")
}

/// Whichever channel became ready first
enum Ready {
    Input(Result<String, RecvError>),
    Event(Result<DebuggerEvent, RecvError>),
    Output(Result<String, RecvError>),
}

enum ShouldQuit {
    True,
    False,
}
