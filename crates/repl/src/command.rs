use std::str::FromStr;

use color_eyre::eyre::{self, Context};
use debugger::Line;

/// A command typed at the prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Continue,
    StepOver,
    Variables,
    SetVariable { name: String, content: String },
    Evaluate(String),
    Memory { start_address: i64, length: u64 },
    AddBreakpoint(Line),
    RemoveBreakpoint(Line),
    ListBreakpoints,
    Where,
    Terminate,
    Disconnect,
    Quit,
    Help,
    Empty,
}

pub const HELP: &str = "\
commands:
  c                 continue
  n                 step over
  v                 show variables
  set NAME=VALUE    change a variable
  e EXPR            evaluate an expression
  m START LEN       dump program memory
  b LINE            add a breakpoint
  rb LINE           remove a breakpoint
  bl                list breakpoints
  w                 show where the program is
  t                 terminate the program
  d                 detach and let the program finish
  q                 quit";

fn parse_arg<T>(arg: Option<&str>, what: &str) -> eyre::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let arg = arg.ok_or_else(|| eyre::eyre!("missing {what}"))?;
    arg.parse().wrap_err_with(|| format!("invalid {what} {arg:?}"))
}

impl FromStr for Command {
    type Err = eyre::Report;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let input = input.trim();
        let (command, rest) = match input.split_once(char::is_whitespace) {
            Some((command, rest)) => (command, Some(rest.trim())),
            None => (input, None),
        };

        let command = match command {
            "" => Command::Empty,
            "c" => Command::Continue,
            "n" => Command::StepOver,
            "v" => Command::Variables,
            "set" => {
                let (name, content) = rest
                    .and_then(|rest| rest.split_once('='))
                    .ok_or_else(|| eyre::eyre!("usage: set NAME=VALUE"))?;
                Command::SetVariable {
                    name: name.trim().to_string(),
                    content: content.to_string(),
                }
            }
            "e" => match rest {
                Some(expression) if !expression.is_empty() => {
                    Command::Evaluate(expression.to_string())
                }
                _ => eyre::bail!("usage: e EXPR"),
            },
            "m" => {
                let mut args = rest.unwrap_or_default().split_whitespace();
                Command::Memory {
                    start_address: parse_arg(args.next(), "start address")?,
                    length: parse_arg(args.next(), "length")?,
                }
            }
            "b" => Command::AddBreakpoint(parse_arg(rest, "line")?),
            "rb" => Command::RemoveBreakpoint(parse_arg(rest, "line")?),
            "bl" => Command::ListBreakpoints,
            "w" => Command::Where,
            "t" => Command::Terminate,
            "d" => Command::Disconnect,
            "q" => Command::Quit,
            "h" | "help" | "?" => Command::Help,
            other => eyre::bail!("unhandled command: '{other}'"),
        };
        Ok(command)
    }
}

/// Format bytes as a hex dump, 16 bytes per row, addresses starting at `start_address`
pub fn hex_dump(start_address: i64, bytes: &[u8]) -> String {
    let mut out = String::new();
    for (row, chunk) in bytes.chunks(16).enumerate() {
        let address = start_address + (row * 16) as i64;
        let hex: Vec<_> = chunk.iter().map(|b| format!("{b:02x}")).collect();
        let ascii: String = chunk
            .iter()
            .map(|&b| {
                if b.is_ascii_graphic() || b == b' ' {
                    b as char
                } else {
                    '.'
                }
            })
            .collect();
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&format!("{address:08x}  {:<47}  |{ascii}|", hex.join(" ")));
    }
    out
}
