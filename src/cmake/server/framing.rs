//! CMake server message framing
//!
//! Every message exchanged with `cmake -E server` is a JSON document wrapped
//! in two sentinel lines:
//!
//! ```text
//! [== "CMake Server" ==[
//! {"type": "hello", ...}
//! ]== "CMake Server" ==]
//! ```
//!
//! Lines outside a frame, and stray end sentinels, are ignored.

use crate::io::transport::Transport;
use async_trait::async_trait;
use std::collections::VecDeque;
use tracing::trace;

pub const SERVER_BEGIN: &str = "[== \"CMake Server\" ==[";
pub const SERVER_END: &str = "]== \"CMake Server\" ==]";

#[derive(Debug, thiserror::Error)]
pub enum ServerFramingError<T: std::error::Error + Send + Sync + 'static> {
    #[error("Transport error: {0}")]
    Transport(T),

    #[error("CMake server closed the connection inside a message frame")]
    IncompleteFrame,

    #[error("Unexpected \"{0}\" line while reading a message frame")]
    UnexpectedSentinel(String),
}

/// Sentinel framing wrapper around a line based transport
pub struct ServerFraming<T: Transport> {
    transport: T,

    /// Text received but not yet split into lines
    receive_buffer: String,

    /// Lines of the frame currently being read, `None` outside a frame
    current_frame: Option<Vec<String>>,

    message_queue: VecDeque<String>,
}

impl<T: Transport> ServerFraming<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            receive_buffer: String::new(),
            current_frame: None,
            message_queue: VecDeque::new(),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn push_line(&mut self, line: &str) -> Result<(), ServerFramingError<T::Error>> {
        let line = line.trim();

        if line == SERVER_BEGIN {
            if self.current_frame.is_some() {
                return Err(ServerFramingError::UnexpectedSentinel(line.to_string()));
            }
            self.current_frame = Some(Vec::new());
            return Ok(());
        }

        if line == SERVER_END {
            if let Some(lines) = self.current_frame.take() {
                let message = lines.join("\n");
                trace!("ServerFraming: complete frame ({} bytes)", message.len());
                self.message_queue.push_back(message);
            }
            return Ok(());
        }

        match self.current_frame.as_mut() {
            Some(frame) => frame.push(line.to_string()),
            None if !line.is_empty() => {
                trace!("ServerFraming: skipping line outside frame: {}", line)
            }
            None => {}
        }
        Ok(())
    }

    /// Split everything buffered into lines and feed them to the frame state
    fn drain_lines(&mut self) -> Result<(), ServerFramingError<T::Error>> {
        while let Some(pos) = self.receive_buffer.find('\n') {
            let line: String = self.receive_buffer.drain(..=pos).collect();
            self.push_line(&line)?;
        }
        Ok(())
    }

    async fn process_transport_data(&mut self) -> Result<(), ServerFramingError<T::Error>> {
        match self.transport.receive().await {
            Ok(data) => {
                self.receive_buffer.push_str(&data);
                self.drain_lines()
            }
            Err(e) => {
                // Flush a trailing line without newline before giving up
                if !self.receive_buffer.is_empty() {
                    let rest = std::mem::take(&mut self.receive_buffer);
                    self.push_line(&rest)?;
                    if !self.message_queue.is_empty() {
                        return Ok(());
                    }
                }
                if self.current_frame.is_some() {
                    return Err(ServerFramingError::IncompleteFrame);
                }
                Err(ServerFramingError::Transport(e))
            }
        }
    }
}

#[async_trait]
impl<T: Transport> Transport for ServerFraming<T> {
    type Error = ServerFramingError<T::Error>;

    async fn send(&mut self, message: &str) -> Result<(), Self::Error> {
        let framed = format!("\n{SERVER_BEGIN}\n{message}\n{SERVER_END}\n");
        trace!("ServerFraming: sending frame ({} bytes)", message.len());

        self.transport
            .send(&framed)
            .await
            .map_err(ServerFramingError::Transport)
    }

    async fn receive(&mut self) -> Result<String, Self::Error> {
        loop {
            if let Some(message) = self.message_queue.pop_front() {
                return Ok(message);
            }
            self.process_transport_data().await?;
        }
    }

    async fn close(&mut self) -> Result<(), Self::Error> {
        self.transport
            .close()
            .await
            .map_err(ServerFramingError::Transport)
    }

    fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::transport::MockTransport;

    fn frame(json: &str) -> String {
        format!("{SERVER_BEGIN}\n{json}\n{SERVER_END}\n")
    }

    #[tokio::test]
    async fn test_send_wraps_payload() {
        let mock = MockTransport::new();
        let handle = mock.clone();
        let mut framing = ServerFraming::new(mock);

        framing.send(r#"{"type":"compute"}"#).await.unwrap();

        assert_eq!(
            handle.sent_messages(),
            vec![format!(
                "\n{SERVER_BEGIN}\n{{\"type\":\"compute\"}}\n{SERVER_END}\n"
            )]
        );
    }

    #[tokio::test]
    async fn test_receive_frame_split_across_lines() {
        let mock = MockTransport::with_responses(vec![
            "cmake noise before the first frame\n".to_string(),
            format!("  {SERVER_BEGIN}  \n"),
            "{\"type\":\n".to_string(),
            "\"hello\"}\n".to_string(),
            format!("{SERVER_END}\n"),
        ]);
        let mut framing = ServerFraming::new(mock);

        let message = framing.receive().await.unwrap();
        assert_eq!(message, "{\"type\":\n\"hello\"}");
    }

    #[tokio::test]
    async fn test_receive_multiple_frames_in_one_chunk() {
        let chunk = format!("{}{}", frame(r#"{"a":1}"#), frame(r#"{"b":2}"#));
        let mut framing = ServerFraming::new(MockTransport::with_responses(vec![chunk]));

        assert_eq!(framing.receive().await.unwrap(), r#"{"a":1}"#);
        assert_eq!(framing.receive().await.unwrap(), r#"{"b":2}"#);
        assert!(matches!(
            framing.receive().await,
            Err(ServerFramingError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_unterminated_frame_is_an_error() {
        let mock = MockTransport::with_responses(vec![format!("{SERVER_BEGIN}\n{{}}\n")]);
        let mut framing = ServerFraming::new(mock);

        assert!(matches!(
            framing.receive().await,
            Err(ServerFramingError::IncompleteFrame)
        ));
    }

    #[tokio::test]
    async fn test_nested_begin_is_rejected() {
        let mock =
            MockTransport::with_responses(vec![format!("{SERVER_BEGIN}\n{SERVER_BEGIN}\n")]);
        let mut framing = ServerFraming::new(mock);

        assert!(matches!(
            framing.receive().await,
            Err(ServerFramingError::UnexpectedSentinel(_))
        ));
    }
}
