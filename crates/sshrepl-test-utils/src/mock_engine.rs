//! Mock evaluation engine.
//!
//! Echoes each input line back as `=> line`, exits on `exit` or end of input,
//! and records the configuration every session was started with.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use sshrepl_core::engine::{Context, EngineConfig, EvalEngine, RunningEngine};
use sshrepl_core::error::{Error, Result};

/// Settings observed when a session started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartRecord {
    pub terminal: bool,
    pub columns: u16,
    pub prompt: String,
    pub use_colors: bool,
    pub banner: Option<String>,
    pub history_size: usize,
}

/// An engine that echoes lines.
#[derive(Debug, Default)]
pub struct MockEngine {
    starts: Mutex<Vec<StartRecord>>,
    contexts: Mutex<Vec<Context>>,
    /// Whether `start` should fail.
    fail_start: bool,
}

impl MockEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// An engine that refuses to start.
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail_start: true,
            ..Default::default()
        })
    }

    /// All sessions started so far.
    pub fn starts(&self) -> Vec<StartRecord> {
        self.starts.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Context of the most recent session.
    pub fn last_context(&self) -> Option<Context> {
        self.contexts.lock().ok().and_then(|c| c.last().cloned())
    }
}

#[async_trait]
impl EvalEngine for MockEngine {
    async fn start(&self, config: EngineConfig) -> Result<RunningEngine> {
        if self.fail_start {
            return Err(Error::Engine {
                message: "mock engine refused to start".to_string(),
            });
        }

        let record = StartRecord {
            terminal: config.terminal,
            columns: config.columns(),
            prompt: config.prompt.clone(),
            use_colors: config.use_colors,
            banner: config.banner.clone(),
            history_size: config.history_size,
        };
        let context = Context::new();
        if let Ok(mut starts) = self.starts.lock() {
            starts.push(record);
        }
        if let Ok(mut contexts) = self.contexts.lock() {
            contexts.push(context.clone());
        }

        let exit = tokio::spawn(echo_loop(config));
        Ok(RunningEngine::new(context, exit))
    }
}

async fn echo_loop(mut config: EngineConfig) -> Result<()> {
    if let Some(banner) = &config.banner {
        config.output.write_all(format!("{banner}\n").as_bytes()).await?;
    }
    config.output.write_all(config.prompt.as_bytes()).await?;
    config.output.flush().await?;

    let mut line = Vec::new();
    let mut buf = [0u8; 256];
    loop {
        let n = config.input.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        for &byte in &buf[..n] {
            if byte != b'\n' && byte != b'\r' {
                line.push(byte);
                continue;
            }
            let text = String::from_utf8_lossy(&line).into_owned();
            line.clear();
            if text == "exit" {
                config.output.flush().await?;
                return Ok(());
            }
            config.output.write_all(format!("=> {text}\n").as_bytes()).await?;
            config.output.write_all(config.prompt.as_bytes()).await?;
            config.output.flush().await?;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
