//! Evaluation engine contract.
//!
//! An engine reads lines from the channel, evaluates them and writes results
//! back. The bridge hands it an [`EngineConfig`] and only observes when it
//! exits; what "evaluate" means is up to the implementation.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::constants::{DEFAULT_HISTORY_SIZE, DEFAULT_PROMPT};
use crate::error::Result;
use crate::newline::NewlineWriter;

/// Per-identity engine options carried on a credential record.
pub type SessionOptions = serde_json::Map<String, Value>;

/// Named values shared into every session's evaluation context.
pub type Bindings = serde_json::Map<String, Value>;

/// Raw channel reader handed to the engine.
pub type EngineInput = Box<dyn AsyncRead + Send + Sync + Unpin>;

/// Channel writer with line-ending conversion applied.
pub type EngineOutput = NewlineWriter<Box<dyn AsyncWrite + Send + Sync + Unpin>>;

/// Everything an engine needs to run one session.
pub struct EngineConfig {
    pub input: EngineInput,
    pub output: EngineOutput,
    /// Whether a pty was negotiated.
    pub terminal: bool,
    pub prompt: String,
    pub use_colors: bool,
    /// Text written once before the first prompt.
    pub banner: Option<String>,
    pub history_size: usize,
}

impl EngineConfig {
    pub fn new(input: EngineInput, output: EngineOutput, terminal: bool) -> Self {
        Self {
            input,
            output,
            terminal,
            prompt: DEFAULT_PROMPT.to_string(),
            use_colors: false,
            banner: None,
            history_size: DEFAULT_HISTORY_SIZE,
        }
    }

    /// Apply options from a credential record.
    ///
    /// Only known keys with the right value type are honoured. The channel
    /// streams can never be replaced this way.
    pub fn apply_options(&mut self, options: &SessionOptions) {
        for (key, value) in options {
            match (key.as_str(), value) {
                ("input" | "output", _) => {
                    warn!(option = %key, "ignoring session option that would replace a channel stream");
                }
                ("prompt", Value::String(prompt)) => self.prompt = prompt.clone(),
                ("terminal", Value::Bool(terminal)) => self.terminal = *terminal,
                ("use_colors" | "useColors", Value::Bool(colors)) => self.use_colors = *colors,
                ("banner", Value::String(banner)) => self.banner = Some(banner.clone()),
                ("history_size" | "historySize", Value::Number(n)) => match n.as_u64() {
                    Some(size) => self.history_size = size as usize,
                    None => debug!(option = %key, "ignoring non-integer history size"),
                },
                _ => debug!(option = %key, "ignoring unsupported session option"),
            }
        }
    }

    /// Current terminal width, 0 without a terminal.
    pub fn columns(&self) -> u16 {
        self.output.columns()
    }
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("terminal", &self.terminal)
            .field("prompt", &self.prompt)
            .field("use_colors", &self.use_colors)
            .field("banner", &self.banner)
            .field("history_size", &self.history_size)
            .finish_non_exhaustive()
    }
}

/// Mutable evaluation context of one running engine.
///
/// Clones share the same bindings.
#[derive(Debug, Clone, Default)]
pub struct Context {
    bindings: Arc<RwLock<Bindings>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, name: &str) -> Option<Value> {
        self.bindings.read().await.get(name).cloned()
    }

    pub async fn set(&self, name: impl Into<String>, value: Value) {
        self.bindings.write().await.insert(name.into(), value);
    }

    /// Copy every entry of `bindings` in, overwriting same-named entries.
    pub async fn merge(&self, bindings: &Bindings) {
        let mut guard = self.bindings.write().await;
        for (name, value) in bindings {
            guard.insert(name.clone(), value.clone());
        }
    }

    pub async fn snapshot(&self) -> Bindings {
        self.bindings.read().await.clone()
    }
}

/// A started engine.
pub struct RunningEngine {
    context: Context,
    exit: JoinHandle<Result<()>>,
}

impl RunningEngine {
    /// `exit` completes when the engine stops, for any reason.
    pub fn new(context: Context, exit: JoinHandle<Result<()>>) -> Self {
        Self { context, exit }
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn into_parts(self) -> (Context, JoinHandle<Result<()>>) {
        (self.context, self.exit)
    }
}

/// An evaluation engine that can be attached to a shell channel.
#[async_trait]
pub trait EvalEngine: Send + Sync {
    /// Start a session. The engine owns the channel streams from here on.
    async fn start(&self, config: EngineConfig) -> Result<RunningEngine>;
}

/// Shared engine reference.
pub type SharedEngine = Arc<dyn EvalEngine>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::watch;

    fn config() -> EngineConfig {
        let (_tx, rx) = watch::channel(0);
        let input: EngineInput = Box::new(tokio::io::empty());
        let sink: Box<dyn AsyncWrite + Send + Sync + Unpin> = Box::new(tokio::io::sink());
        EngineConfig::new(input, NewlineWriter::new(sink, rx), false)
    }

    fn options(value: Value) -> SessionOptions {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn defaults() {
        let cfg = config();
        assert_eq!(cfg.prompt, DEFAULT_PROMPT);
        assert_eq!(cfg.history_size, DEFAULT_HISTORY_SIZE);
        assert!(!cfg.terminal);
        assert!(!cfg.use_colors);
        assert!(cfg.banner.is_none());
    }

    #[test]
    fn allowed_options_applied() {
        let mut cfg = config();
        cfg.apply_options(&options(json!({
            "prompt": "repl> ",
            "terminal": true,
            "useColors": true,
            "banner": "welcome",
            "history_size": 5,
        })));
        assert_eq!(cfg.prompt, "repl> ");
        assert!(cfg.terminal);
        assert!(cfg.use_colors);
        assert_eq!(cfg.banner.as_deref(), Some("welcome"));
        assert_eq!(cfg.history_size, 5);
    }

    #[test]
    fn stream_options_never_honoured() {
        let mut cfg = config();
        cfg.apply_options(&options(json!({
            "input": "/dev/null",
            "output": 3,
            "prompt": "ok> ",
        })));
        assert_eq!(cfg.prompt, "ok> ");
    }

    #[test]
    fn wrong_types_and_unknown_keys_ignored() {
        let mut cfg = config();
        cfg.apply_options(&options(json!({
            "prompt": 42,
            "terminal": "yes",
            "history_size": -1,
            "eval": "rm -rf /",
        })));
        assert_eq!(cfg.prompt, DEFAULT_PROMPT);
        assert!(!cfg.terminal);
        assert_eq!(cfg.history_size, DEFAULT_HISTORY_SIZE);
    }

    #[tokio::test]
    async fn context_merge_overwrites() {
        let ctx = Context::new();
        ctx.set("a", json!(1)).await;
        ctx.set("b", json!(2)).await;

        ctx.merge(&options(json!({ "b": "two", "c": [3] }))).await;

        assert_eq!(ctx.get("a").await, Some(json!(1)));
        assert_eq!(ctx.get("b").await, Some(json!("two")));
        assert_eq!(ctx.get("c").await, Some(json!([3])));
        assert_eq!(ctx.snapshot().await.len(), 3);
    }

    #[tokio::test]
    async fn context_clones_share_bindings() {
        let ctx = Context::new();
        let other = ctx.clone();
        other.set("x", json!(true)).await;
        assert_eq!(ctx.get("x").await, Some(json!(true)));
    }
}
