//! Transport layer for talking to a child process
//!
//! A transport moves raw text in both directions and knows nothing about the
//! framing used on top of it. The stdio implementation hands out stdout one
//! line at a time, which is the unit every CMake server frame is built from.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, ChildStdout};
use tokio::sync::mpsc;
use tracing::{error, trace};

/// Core transport trait for bidirectional message exchange
#[async_trait]
pub trait Transport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Send raw text
    async fn send(&mut self, message: &str) -> Result<(), Self::Error>;

    /// Receive the next chunk of raw text
    async fn receive(&mut self) -> Result<String, Self::Error>;

    /// Close the transport
    async fn close(&mut self) -> Result<(), Self::Error>;

    /// Check if transport is still active
    fn is_connected(&self) -> bool;
}

// ============================================================================
// Stdio Transport Implementation
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StdioTransportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Transport is disconnected")]
    Disconnected,

    #[error("Channel error: {0}")]
    Channel(String),
}

/// Transport over a child's stdin/stdout
///
/// Writes and reads run on background tasks so that a child blocked on a full
/// pipe never stalls the caller.
#[derive(Debug)]
pub struct StdioTransport {
    stdin_sender: Option<mpsc::UnboundedSender<String>>,
    stdout_receiver: Option<mpsc::UnboundedReceiver<String>>,
    connected: bool,
}

impl StdioTransport {
    pub fn new(stdin: ChildStdin, stdout: ChildStdout) -> Self {
        let (stdin_sender, stdin_receiver) = mpsc::unbounded_channel();
        let (stdout_sender, stdout_receiver) = mpsc::unbounded_channel();

        tokio::spawn(Self::stdin_writer_task(stdin, stdin_receiver));
        tokio::spawn(Self::stdout_reader_task(stdout, stdout_sender));

        Self {
            stdin_sender: Some(stdin_sender),
            stdout_receiver: Some(stdout_receiver),
            connected: true,
        }
    }

    async fn stdin_writer_task(
        mut stdin: ChildStdin,
        mut receiver: mpsc::UnboundedReceiver<String>,
    ) {
        while let Some(message) = receiver.recv().await {
            trace!("StdioTransport: writing {} bytes", message.len());

            if let Err(e) = stdin.write_all(message.as_bytes()).await {
                error!("Failed to write to stdin: {}", e);
                break;
            }

            if let Err(e) = stdin.flush().await {
                error!("Failed to flush stdin: {}", e);
                break;
            }
        }

        // Dropping stdin here closes the pipe, which is how the server is told to exit
        trace!("StdioTransport: stdin writer task finished");
    }

    /// Forward stdout line by line, newline included
    async fn stdout_reader_task(stdout: ChildStdout, sender: mpsc::UnboundedSender<String>) {
        let mut reader = BufReader::new(stdout);
        let mut line = Vec::new();

        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line).await {
                Ok(0) => {
                    trace!("StdioTransport: stdout EOF reached");
                    break;
                }
                Ok(_) => {
                    let text = String::from_utf8_lossy(&line).into_owned();
                    if sender.send(text).is_err() {
                        trace!("StdioTransport: stdout receiver dropped, stopping reader");
                        return;
                    }
                }
                Err(e) => {
                    error!("Failed to read from stdout: {}", e);
                    break;
                }
            }
        }

        trace!("StdioTransport: stdout reader task finished");
    }
}

#[async_trait]
impl Transport for StdioTransport {
    type Error = StdioTransportError;

    async fn send(&mut self, message: &str) -> Result<(), Self::Error> {
        if !self.connected {
            return Err(StdioTransportError::Disconnected);
        }

        let sender = self
            .stdin_sender
            .as_ref()
            .ok_or(StdioTransportError::Disconnected)?;

        sender
            .send(message.to_string())
            .map_err(|e| StdioTransportError::Channel(e.to_string()))
    }

    async fn receive(&mut self) -> Result<String, Self::Error> {
        if !self.connected {
            return Err(StdioTransportError::Disconnected);
        }

        let receiver = self
            .stdout_receiver
            .as_mut()
            .ok_or(StdioTransportError::Disconnected)?;

        match receiver.recv().await {
            Some(line) => Ok(line),
            None => {
                // The reader task is gone, the child closed stdout
                self.connected = false;
                Err(StdioTransportError::Disconnected)
            }
        }
    }

    async fn close(&mut self) -> Result<(), Self::Error> {
        self.connected = false;
        self.stdin_sender.take();
        self.stdout_receiver.take();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

// ============================================================================
// Mock Transport Implementation
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum MockTransportError {
    #[error("Transport is disconnected")]
    Disconnected,
    #[error("No more responses available")]
    NoMoreResponses,
}

/// Scripted transport for tests
///
/// Every `receive()` pops the next canned response, every `send()` is
/// recorded and can be inspected through a shared handle even after the
/// transport was moved into a client.
#[derive(Clone)]
pub struct MockTransport {
    sent_messages: Arc<Mutex<Vec<String>>>,
    responses: Arc<Mutex<VecDeque<String>>>,
    connected: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            sent_messages: Arc::new(Mutex::new(Vec::new())),
            responses: Arc::new(Mutex::new(VecDeque::new())),
            connected: true,
        }
    }

    pub fn with_responses(responses: Vec<String>) -> Self {
        let transport = Self::new();
        for response in responses {
            transport.add_response(response);
        }
        transport
    }

    pub fn add_response(&self, response: String) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.push_back(response);
        }
    }

    pub fn sent_messages(&self) -> Vec<String> {
        self.sent_messages
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }

    pub fn has_responses(&self) -> bool {
        self.responses
            .lock()
            .map(|responses| !responses.is_empty())
            .unwrap_or(false)
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Error = MockTransportError;

    async fn send(&mut self, message: &str) -> Result<(), Self::Error> {
        if !self.connected {
            return Err(MockTransportError::Disconnected);
        }

        if let Ok(mut sent) = self.sent_messages.lock() {
            sent.push(message.to_string());
        }
        Ok(())
    }

    async fn receive(&mut self) -> Result<String, Self::Error> {
        if !self.connected {
            return Err(MockTransportError::Disconnected);
        }

        self.responses
            .lock()
            .ok()
            .and_then(|mut responses| responses.pop_front())
            .ok_or(MockTransportError::NoMoreResponses)
    }

    async fn close(&mut self) -> Result<(), Self::Error> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Stdio;
    use tokio::process::Command;

    #[tokio::test]
    async fn test_stdio_transport_reads_lines() {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg("printf 'first\\nsecond\\n'")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .expect("Failed to spawn sh");

        let stdin = child.stdin.take().unwrap();
        let stdout = child.stdout.take().unwrap();
        let mut transport = StdioTransport::new(stdin, stdout);

        assert_eq!(transport.receive().await.unwrap(), "first\n");
        assert_eq!(transport.receive().await.unwrap(), "second\n");

        // EOF disconnects the transport
        assert!(transport.receive().await.is_err());
        assert!(!transport.is_connected());

        let _ = child.wait().await;
    }

    #[tokio::test]
    async fn test_stdio_transport_round_trip() {
        let mut child = Command::new("cat")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .expect("Failed to spawn cat");

        let stdin = child.stdin.take().unwrap();
        let stdout = child.stdout.take().unwrap();
        let mut transport = StdioTransport::new(stdin, stdout);

        transport.send("ping\n").await.unwrap();
        assert_eq!(transport.receive().await.unwrap(), "ping\n");

        transport.close().await.unwrap();
        assert!(transport.send("late\n").await.is_err());
        let _ = child.wait().await;
    }

    #[tokio::test]
    async fn test_mock_transport_send_receive() {
        let mut transport =
            MockTransport::with_responses(vec!["response1".to_string(), "response2".to_string()]);
        let handle = transport.clone();

        transport.send("message1").await.unwrap();
        transport.send("message2").await.unwrap();

        assert_eq!(transport.receive().await.unwrap(), "response1");
        assert_eq!(transport.receive().await.unwrap(), "response2");
        assert!(!handle.has_responses());

        assert_eq!(handle.sent_messages(), vec!["message1", "message2"]);
        assert!(matches!(
            transport.receive().await,
            Err(MockTransportError::NoMoreResponses)
        ));
    }

    #[tokio::test]
    async fn test_mock_transport_disconnect() {
        let mut transport = MockTransport::new();
        assert!(transport.is_connected());

        transport.close().await.unwrap();

        assert!(!transport.is_connected());
        assert!(transport.send("test").await.is_err());
        assert!(transport.receive().await.is_err());
    }
}
