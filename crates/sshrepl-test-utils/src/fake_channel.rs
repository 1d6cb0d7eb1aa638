//! In-memory shell channel for testing without a transport.
//!
//! [`fake_channel`] returns the client's end, which tests drive like a user
//! at a terminal, and the server's end, which goes to the bridge.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

/// Buffer size of each direction.
const PIPE_CAPACITY: usize = 64 * 1024;

/// Server side of a fake channel: what the bridge reads and writes.
#[derive(Debug)]
pub struct ServerChannel {
    pub input: DuplexStream,
    pub output: DuplexStream,
}

impl ServerChannel {
    pub fn into_parts(self) -> (DuplexStream, DuplexStream) {
        (self.input, self.output)
    }
}

/// Client side of a fake channel.
#[derive(Debug)]
pub struct FakeChannel {
    /// Writes reach the server's input. `None` after [`FakeChannel::close_input`].
    input: Option<DuplexStream>,
    output: DuplexStream,
    received: Vec<u8>,
}

/// Create a connected client/server channel pair.
pub fn fake_channel() -> (FakeChannel, ServerChannel) {
    let (client_in, server_in) = tokio::io::duplex(PIPE_CAPACITY);
    let (server_out, client_out) = tokio::io::duplex(PIPE_CAPACITY);
    (
        FakeChannel {
            input: Some(client_in),
            output: client_out,
            received: Vec::new(),
        },
        ServerChannel {
            input: server_in,
            output: server_out,
        },
    )
}

impl FakeChannel {
    /// Write raw bytes as if typed by the user.
    pub async fn send(&mut self, data: &[u8]) -> std::io::Result<()> {
        match self.input.as_mut() {
            Some(input) => input.write_all(data).await,
            None => Err(std::io::ErrorKind::BrokenPipe.into()),
        }
    }

    /// Send a line terminated by `\n`.
    pub async fn send_line(&mut self, line: &str) -> std::io::Result<()> {
        self.send(format!("{line}\n").as_bytes()).await
    }

    /// Send text followed by a terminal Enter (`\r`).
    pub async fn type_line(&mut self, line: &str) -> std::io::Result<()> {
        self.send(format!("{line}\r").as_bytes()).await
    }

    /// Simulate Ctrl+C.
    pub async fn press_ctrl_c(&mut self) -> std::io::Result<()> {
        self.send(&[0x03]).await
    }

    /// Simulate Ctrl+D.
    pub async fn press_ctrl_d(&mut self) -> std::io::Result<()> {
        self.send(&[0x04]).await
    }

    /// Signal end of input to the server.
    pub fn close_input(&mut self) {
        self.input = None;
    }

    /// Read until `pattern` appears in the output received so far.
    ///
    /// Returns everything received up to and including the pattern, or
    /// `None` on timeout or end of stream.
    pub async fn read_until(&mut self, pattern: &[u8], timeout: Duration) -> Option<Vec<u8>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(pos) = find(&self.received, pattern) {
                let end = pos + pattern.len();
                return Some(self.received.drain(..end).collect());
            }
            let mut buf = [0u8; 1024];
            match tokio::time::timeout_at(deadline, self.output.read(&mut buf)).await {
                Ok(Ok(0)) | Ok(Err(_)) | Err(_) => return None,
                Ok(Ok(n)) => self.received.extend_from_slice(&buf[..n]),
            }
        }
    }

    /// Read until the server closes its output.
    pub async fn read_to_end(&mut self, timeout: Duration) -> Option<Vec<u8>> {
        let mut rest = Vec::new();
        match tokio::time::timeout(timeout, self.output.read_to_end(&mut rest)).await {
            Ok(Ok(_)) => {
                let mut all = std::mem::take(&mut self.received);
                all.extend_from_slice(&rest);
                Some(all)
            }
            _ => None,
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn client_input_reaches_server() {
        let (mut client, server) = fake_channel();
        let (mut input, _output) = server.into_parts();

        client.send_line("hello").await.unwrap();
        client.close_input();

        let mut got = Vec::new();
        input.read_to_end(&mut got).await.unwrap();
        assert_eq!(got, b"hello\n");
    }

    #[tokio::test]
    async fn read_until_keeps_remainder() {
        let (mut client, server) = fake_channel();
        let (_input, mut output) = server.into_parts();

        output.write_all(b"> 1\r\n> ").await.unwrap();

        let first = client.read_until(b"\r\n", Duration::from_secs(1)).await.unwrap();
        assert_eq!(first, b"> 1\r\n");

        drop(output);
        let rest = client.read_to_end(Duration::from_secs(1)).await.unwrap();
        assert_eq!(rest, b"> ");
    }

    #[tokio::test]
    async fn read_until_times_out() {
        let (mut client, _server) = fake_channel();
        assert!(client.read_until(b"x", Duration::from_millis(20)).await.is_none());
    }

    #[tokio::test]
    async fn send_after_close_fails() {
        let (mut client, _server) = fake_channel();
        client.close_input();
        assert!(client.press_ctrl_d().await.is_err());
    }
}
