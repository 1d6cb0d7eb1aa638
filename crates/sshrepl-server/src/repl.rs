//! Built-in line REPL.
//!
//! Values are JSON. A session understands:
//! - `let name = <json>` to bind a value
//! - `name` or `name.field` to look a value up
//! - any JSON literal, echoed back
//! - dot commands (`.help`, `.exit`, `.vars`, `.columns`, `.history`)
//!
//! In terminal mode the client sends raw keystrokes, so the REPL does its own
//! echo and minimal line editing.

use std::collections::VecDeque;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use sshrepl_core::constants::CHANNEL_READ_BUF;
use sshrepl_core::engine::{
    Context, EngineConfig, EngineInput, EngineOutput, EvalEngine, RunningEngine,
};
use sshrepl_core::error::Result;

const CTRL_C: u8 = 0x03;
const CTRL_D: u8 = 0x04;
const BACKSPACE: u8 = 0x08;
const DELETE: u8 = 0x7f;
const ESC: u8 = 0x1b;

const HELP: &str = "\
.columns  Show the terminal width
.exit     Close this session
.help     Show this help
.history  Show previous input
.vars     List bound names

let NAME = VALUE  Bind a JSON value
NAME              Show a bound value (NAME.field for members)
VALUE             Echo a JSON value
";

/// The built-in evaluation engine.
#[derive(Debug, Default, Clone, Copy)]
pub struct LineRepl;

#[async_trait]
impl EvalEngine for LineRepl {
    async fn start(&self, config: EngineConfig) -> Result<RunningEngine> {
        let context = Context::new();
        let repl = Repl::new(config, context.clone());
        let exit = tokio::spawn(repl.run());
        Ok(RunningEngine::new(context, exit))
    }
}

/// Result of evaluating one line.
#[derive(Debug, PartialEq)]
enum Outcome {
    Print(String),
    Silent,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Escape {
    None,
    Start,
    Csi,
}

struct Repl {
    input: EngineInput,
    output: EngineOutput,
    context: Context,
    terminal: bool,
    prompt: String,
    use_colors: bool,
    banner: Option<String>,
    history: VecDeque<String>,
    history_size: usize,
    line: Vec<u8>,
    escape: Escape,
}

impl Repl {
    fn new(config: EngineConfig, context: Context) -> Self {
        Self {
            input: config.input,
            output: config.output,
            context,
            terminal: config.terminal,
            prompt: config.prompt,
            use_colors: config.use_colors,
            banner: config.banner,
            history: VecDeque::new(),
            history_size: config.history_size,
            line: Vec::new(),
            escape: Escape::None,
        }
    }

    async fn run(mut self) -> Result<()> {
        if let Some(banner) = self.banner.take() {
            self.write(&format!("{banner}\n")).await?;
        }
        self.write_prompt().await?;

        let mut buf = vec![0u8; CHANNEL_READ_BUF];
        loop {
            let n = self.input.read(&mut buf).await?;
            if n == 0 {
                debug!("repl input closed");
                break;
            }
            let keep_going = if self.terminal {
                self.feed_terminal(&buf[..n]).await?
            } else {
                self.feed_lines(&buf[..n]).await?
            };
            if !keep_going {
                break;
            }
        }
        self.output.flush().await?;
        Ok(())
    }

    /// Line mode: input arrives already edited, one line per `\n`.
    async fn feed_lines(&mut self, data: &[u8]) -> Result<bool> {
        for &byte in data {
            if byte != b'\n' {
                self.line.push(byte);
                continue;
            }
            if self.line.last() == Some(&b'\r') {
                self.line.pop();
            }
            if !self.submit().await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Terminal mode: raw keystrokes.
    async fn feed_terminal(&mut self, data: &[u8]) -> Result<bool> {
        let mut echo = Vec::new();
        for &byte in data {
            match (self.escape, byte) {
                (Escape::Start, b'[') => self.escape = Escape::Csi,
                (Escape::Start, _) => self.escape = Escape::None,
                (Escape::Csi, 0x40..=0x7e) => self.escape = Escape::None,
                (Escape::Csi, _) => {}
                (Escape::None, ESC) => self.escape = Escape::Start,
                (Escape::None, b'\r' | b'\n') => {
                    echo.push(b'\n');
                    self.output.write_all(&echo).await?;
                    echo.clear();
                    if !self.submit().await? {
                        return Ok(false);
                    }
                }
                (Escape::None, BACKSPACE | DELETE) => {
                    if pop_char(&mut self.line) {
                        echo.extend_from_slice(b"\x08 \x08");
                    }
                }
                (Escape::None, CTRL_C) => {
                    self.line.clear();
                    echo.extend_from_slice(b"^C\n");
                    echo.extend_from_slice(self.prompt.as_bytes());
                }
                (Escape::None, CTRL_D) => {
                    if self.line.is_empty() {
                        self.output.write_all(&echo).await?;
                        return Ok(false);
                    }
                }
                (Escape::None, b) if b < 0x20 => {}
                (Escape::None, b) => {
                    self.line.push(b);
                    echo.push(b);
                }
            }
        }
        self.output.write_all(&echo).await?;
        self.output.flush().await?;
        Ok(true)
    }

    /// Evaluate the buffered line. Returns false when the session should end.
    async fn submit(&mut self) -> Result<bool> {
        let line = String::from_utf8_lossy(&self.line).into_owned();
        self.line.clear();

        match self.evaluate(&line).await {
            Outcome::Exit => return Ok(false),
            Outcome::Print(text) => self.write(&format!("{text}\n")).await?,
            Outcome::Silent => {}
        }
        self.remember(line);
        self.write_prompt().await?;
        Ok(true)
    }

    fn remember(&mut self, line: String) {
        if self.history_size == 0 || line.trim().is_empty() {
            return;
        }
        if self.history.len() == self.history_size {
            self.history.pop_front();
        }
        self.history.push_back(line);
    }

    async fn evaluate(&mut self, line: &str) -> Outcome {
        let line = line.trim();
        if line.is_empty() {
            return Outcome::Silent;
        }

        if let Some(command) = line.strip_prefix('.') {
            return self.command(command).await;
        }

        if let Some(binding) = line.strip_prefix("let ") {
            return self.bind(binding).await;
        }

        if is_path(line) {
            return match self.lookup(line).await {
                Some(value) => Outcome::Print(self.render(&value)),
                None => Outcome::Print(format!("Uncaught ReferenceError: {line} is not defined")),
            };
        }

        match serde_json::from_str::<Value>(line) {
            Ok(value) => Outcome::Print(self.render(&value)),
            Err(e) => Outcome::Print(format!("Uncaught SyntaxError: {e}")),
        }
    }

    async fn command(&self, command: &str) -> Outcome {
        match command.trim() {
            "exit" => Outcome::Exit,
            "help" => Outcome::Print(HELP.trim_end().to_string()),
            "columns" => Outcome::Print(self.output.columns().to_string()),
            "history" => Outcome::Print(
                self.history
                    .iter()
                    .enumerate()
                    .map(|(i, line)| format!("{:>4}  {}", i + 1, line))
                    .collect::<Vec<_>>()
                    .join("\n"),
            ),
            "vars" => {
                let bindings = self.context.snapshot().await;
                let mut names: Vec<_> = bindings.keys().cloned().collect();
                names.sort();
                Outcome::Print(names.join("\n"))
            }
            other => Outcome::Print(format!(
                "Invalid REPL keyword .{other}, type .help for a list"
            )),
        }
    }

    async fn bind(&self, binding: &str) -> Outcome {
        let Some((name, value)) = binding.split_once('=') else {
            return Outcome::Print("Uncaught SyntaxError: expected `let NAME = VALUE`".to_string());
        };
        let name = name.trim();
        if !is_identifier(name) {
            return Outcome::Print(format!("Uncaught SyntaxError: invalid name {name:?}"));
        }
        match serde_json::from_str::<Value>(value.trim()) {
            Ok(value) => {
                self.context.set(name, value).await;
                Outcome::Silent
            }
            Err(e) => Outcome::Print(format!("Uncaught SyntaxError: {e}")),
        }
    }

    async fn lookup(&self, path: &str) -> Option<Value> {
        let mut parts = path.split('.');
        let mut value = self.context.get(parts.next()?).await?;
        for part in parts {
            value = match value {
                Value::Object(mut map) => map.remove(part)?,
                Value::Array(mut items) => {
                    let index: usize = part.parse().ok()?;
                    if index >= items.len() {
                        return None;
                    }
                    items.swap_remove(index)
                }
                _ => return None,
            };
        }
        Some(value)
    }

    /// Format a value, breaking it over lines when it would not fit the terminal.
    fn render(&self, value: &Value) -> String {
        let compact = value.to_string();
        let columns = usize::from(self.output.columns());
        let text = if self.terminal && columns > 0 && compact.len() > columns {
            serde_json::to_string_pretty(value).unwrap_or(compact)
        } else {
            compact
        };

        if !self.use_colors {
            return text;
        }
        let color = match value {
            Value::String(_) => "32",
            Value::Number(_) => "33",
            Value::Bool(_) => "33",
            Value::Null => "1",
            _ => return text,
        };
        format!("\x1b[{color}m{text}\x1b[39m")
    }

    async fn write_prompt(&mut self) -> Result<()> {
        let prompt = self.prompt.clone();
        self.output.write_all(prompt.as_bytes()).await?;
        self.output.flush().await?;
        Ok(())
    }

    async fn write(&mut self, text: &str) -> Result<()> {
        self.output.write_all(text.as_bytes()).await?;
        Ok(())
    }
}

/// Remove the last UTF-8 character. Returns false if the line was empty.
fn pop_char(line: &mut Vec<u8>) -> bool {
    if line.is_empty() {
        return false;
    }
    while let Some(byte) = line.pop() {
        if byte & 0xc0 != 0x80 {
            break;
        }
    }
    true
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

fn is_path(s: &str) -> bool {
    !matches!(s, "true" | "false" | "null") && s.split('.').enumerate().all(|(i, part)| {
        is_identifier(part) || (i > 0 && !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()))
    })
}
