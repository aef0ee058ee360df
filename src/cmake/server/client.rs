//! CMake server client
//!
//! Strictly one outstanding request at a time: a request is sent with a fresh
//! cookie and frames are read until the matching reply (or error) arrives.
//! Everything else the server emits in between is only logged.

use crate::cmake::error::{CMakeError, CMakeResult};
use crate::cmake::server::framing::ServerFraming;
use crate::cmake::server::messages::{ProtocolVersion, ReplyData, ServerMessage, ServerRequest};
use crate::io::process::{ChildProcessManager, StderrMonitor};
use crate::io::transport::{StdioTransport, Transport};
use crate::log_server_message;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{Level, debug, error, info};

/// How long the server gets to exit after its pipes were closed
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

pub struct CMakeClient<T: Transport> {
    framing: ServerFraming<T>,
    cookie_counter: u64,
}

impl<T: Transport> CMakeClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            framing: ServerFraming::new(transport),
            cookie_counter: 0,
        }
    }

    fn next_cookie(&mut self) -> String {
        self.cookie_counter += 1;
        format!("meson_{}", self.cookie_counter)
    }

    async fn write_request(&mut self, request: &ServerRequest) -> CMakeResult<String> {
        let cookie = self.next_cookie();
        let data = request.to_json(&cookie);
        log_server_message!(Level::DEBUG, "outgoing", request.type_name(), &data);

        let payload = serde_json::to_string_pretty(&data)?;
        self.framing
            .send(&payload)
            .await
            .map_err(|e| CMakeError::Transport(e.to_string()))?;
        Ok(cookie)
    }

    async fn read_message(&mut self) -> CMakeResult<ServerMessage> {
        let raw = self
            .framing
            .receive()
            .await
            .map_err(|e| CMakeError::Transport(e.to_string()))?;
        let message = ServerMessage::parse(&raw)?;
        log_server_message!(Level::TRACE, "incoming", message.type_name(), &raw);
        Ok(message)
    }

    /// Send `request` and wait for the reply or error carrying its cookie
    pub async fn query(&mut self, request: &ServerRequest) -> CMakeResult<ServerMessage> {
        let cookie = self.write_request(request).await?;

        loop {
            let message = self.read_message().await?;
            let answers = matches!(
                message,
                ServerMessage::Reply { .. } | ServerMessage::Error { .. }
            ) && message.cookie() == Some(cookie.as_str());

            if answers {
                return Ok(message);
            }
            message.log();
        }
    }

    /// Like [`query`](Self::query), but an `error` answer fails the call
    pub async fn query_checked(
        &mut self,
        request: &ServerRequest,
        description: &str,
    ) -> CMakeResult<ReplyData> {
        match self.query(request).await? {
            ServerMessage::Reply { data, .. } => {
                info!("{}: SUCCEEDED", description);
                Ok(data)
            }
            other => {
                error!("{}: FAILED", description);
                other.log();
                let detail = match other {
                    ServerMessage::Error { message, .. } => message,
                    _ => String::new(),
                };
                Err(CMakeError::QueryFailed(format!("{description}: {detail}")))
            }
        }
    }

    /// Wait for the server's hello, then negotiate directories and generator
    pub async fn do_handshake(
        &mut self,
        src_dir: &Path,
        build_dir: &Path,
        generator: &str,
        version: ProtocolVersion,
    ) -> CMakeResult<()> {
        let hello = self.read_message().await?;
        let ServerMessage::Hello { supported_versions } = &hello else {
            return Err(CMakeError::Protocol(format!(
                "the first message of the CMake server was {:?}, expected hello",
                hello.type_name()
            )));
        };
        debug!("CMake server supports protocols {:?}", supported_versions);

        let request = ServerRequest::Handshake {
            src_dir: std::path::absolute(src_dir)?,
            build_dir: std::path::absolute(build_dir)?,
            generator: generator.to_string(),
            version,
        };
        self.query_checked(&request, "CMake server handshake").await?;
        Ok(())
    }

    pub async fn close(&mut self) {
        let _ = self.framing.close().await;
    }
}

// ============================================================================
// Server process
// ============================================================================

/// Owner of a running `cmake -E server` process
pub struct CMakeServer {
    cmake_path: PathBuf,
    process: Option<ChildProcessManager>,
}

impl CMakeServer {
    pub fn new(cmake_path: impl Into<PathBuf>) -> Self {
        Self {
            cmake_path: cmake_path.into(),
            process: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.process
            .as_ref()
            .is_some_and(ChildProcessManager::is_running)
    }

    /// Spawn the server and return a client talking to its stdio
    pub async fn startup(
        &mut self,
        working_dir: Option<PathBuf>,
    ) -> CMakeResult<CMakeClient<StdioTransport>> {
        if self.process.is_some() {
            return Err(CMakeError::ServerAlreadyStarted);
        }

        let args = ["-E", "server", "--experimental", "--debug"]
            .iter()
            .map(|arg| arg.to_string())
            .collect();
        let mut process = ChildProcessManager::new(
            self.cmake_path.to_string_lossy().into_owned(),
            args,
            working_dir,
        )
        .with_env("LC_ALL", "C");
        process.on_stderr_line(|line| debug!("CMake server stderr: {}", line));
        process.start().await?;

        let transport = process.create_stdio_transport()?;
        self.process = Some(process);
        info!("Started CMake server {}", self.cmake_path.display());

        Ok(CMakeClient::new(transport))
    }

    /// Close the pipes and give the server a short grace period to exit
    pub async fn shutdown(&mut self, client: Option<CMakeClient<StdioTransport>>) {
        if let Some(mut client) = client {
            client.close().await;
        }
        if let Some(mut process) = self.process.take() {
            process.shutdown(SHUTDOWN_TIMEOUT).await;
            debug!("CMake server stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmake::server::framing::{SERVER_BEGIN, SERVER_END};
    use crate::io::transport::MockTransport;
    use serde_json::Value;

    fn frame(json: &str) -> String {
        format!("{SERVER_BEGIN}\n{json}\n{SERVER_END}\n")
    }

    fn sent_payloads(handle: &MockTransport) -> Vec<Value> {
        handle
            .sent_messages()
            .iter()
            .map(|sent| {
                let body = sent
                    .trim()
                    .strip_prefix(SERVER_BEGIN)
                    .and_then(|rest| rest.strip_suffix(SERVER_END))
                    .unwrap();
                serde_json::from_str(body).unwrap()
            })
            .collect()
    }

    #[tokio::test]
    async fn test_query_skips_unrelated_frames() {
        let mock = MockTransport::with_responses(vec![
            frame(r#"{"type":"progress","cookie":"meson_1"}"#),
            frame(r#"{"type":"message","cookie":"meson_1","message":"Configuring"}"#),
            frame(r#"{"type":"signal","cookie":"","name":"dirty"}"#),
            frame(r#"{"type":"reply","cookie":"other","inReplyTo":"compute"}"#),
            frame(r#"{"type":"reply","cookie":"meson_1","inReplyTo":"compute"}"#),
        ]);
        let handle = mock.clone();
        let mut client = CMakeClient::new(mock);

        let reply = client.query(&ServerRequest::Compute).await.unwrap();
        assert!(matches!(
            reply,
            ServerMessage::Reply { data: ReplyData::Compute, ref cookie } if cookie == "meson_1"
        ));
        assert!(!handle.has_responses());
        assert_eq!(sent_payloads(&handle)[0]["type"], "compute");
    }

    #[tokio::test]
    async fn test_cookies_increase_per_client() {
        let mock = MockTransport::with_responses(vec![
            frame(r#"{"type":"reply","cookie":"meson_1","inReplyTo":"configure"}"#),
            frame(r#"{"type":"reply","cookie":"meson_2","inReplyTo":"compute"}"#),
        ]);
        let handle = mock.clone();
        let mut client = CMakeClient::new(mock);

        client
            .query_checked(&ServerRequest::Configure { args: Vec::new() }, "configure")
            .await
            .unwrap();
        client
            .query_checked(&ServerRequest::Compute, "compute")
            .await
            .unwrap();

        let cookies: Vec<Value> = sent_payloads(&handle)
            .into_iter()
            .map(|payload| payload["cookie"].clone())
            .collect();
        assert_eq!(cookies, vec!["meson_1", "meson_2"]);

        // A fresh client starts counting again
        let other = CMakeClient::new(MockTransport::new());
        assert_eq!(other.cookie_counter, 0);
    }

    #[tokio::test]
    async fn test_query_checked_fails_on_error() {
        let mock = MockTransport::with_responses(vec![frame(
            r#"{"type":"error","cookie":"meson_1","errorMessage":"no build dir"}"#,
        )]);
        let mut client = CMakeClient::new(mock);

        let err = client
            .query_checked(&ServerRequest::CodeModel, "CMake code model")
            .await
            .unwrap_err();
        assert!(matches!(err, CMakeError::QueryFailed(ref msg) if msg.contains("no build dir")));
    }

    #[tokio::test]
    async fn test_handshake() {
        let mock = MockTransport::with_responses(vec![
            frame(r#"{"type":"hello","supportedProtocolVersions":[{"major":1,"minor":2}]}"#),
            frame(r#"{"type":"reply","cookie":"meson_1","inReplyTo":"handshake"}"#),
        ]);
        let handle = mock.clone();
        let mut client = CMakeClient::new(mock);

        client
            .do_handshake(
                Path::new("/src"),
                Path::new("/build"),
                "Ninja",
                ProtocolVersion { major: 1, minor: None },
            )
            .await
            .unwrap();

        let payload = &sent_payloads(&handle)[0];
        assert_eq!(payload["type"], "handshake");
        assert_eq!(payload["sourceDirectory"], "/src");
        assert_eq!(payload["buildDirectory"], "/build");
        assert_eq!(payload["protocolVersion"]["major"], 1);
    }

    #[tokio::test]
    async fn test_handshake_requires_hello() {
        let mock = MockTransport::with_responses(vec![frame(
            r#"{"type":"message","cookie":"","message":"hi"}"#,
        )]);
        let mut client = CMakeClient::new(mock);

        let err = client
            .do_handshake(
                Path::new("/src"),
                Path::new("/build"),
                "Ninja",
                ProtocolVersion { major: 1, minor: None },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CMakeError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_transport_end_is_an_error() {
        let mut client = CMakeClient::new(MockTransport::new());
        assert!(matches!(
            client.query(&ServerRequest::Compute).await,
            Err(CMakeError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_server_cannot_start_twice() {
        // cat stands in for cmake, only process handling is exercised here
        let mut server = CMakeServer::new("cat");
        server.process = Some(ChildProcessManager::new("cat".to_string(), Vec::new(), None));

        assert!(matches!(
            server.startup(None).await,
            Err(CMakeError::ServerAlreadyStarted)
        ));
        server.shutdown(None).await;
        assert!(!server.is_running());
    }
}
