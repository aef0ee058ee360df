//! Typed CMake server messages
//!
//! Incoming frames are validated against the keys each message (and each
//! reply) kind requires before the typed value is built. Outgoing requests
//! are rendered to JSON with the cookie supplied by the client.

use crate::cmake::common::{CMakeBuildFile, CMakeConfiguration};
use crate::cmake::error::{CMakeError, CMakeResult};
use crate::cmake::pathutil::to_posix;
use serde_json::{Value, json};
use std::path::PathBuf;
use tracing::{debug, error, info};

fn check_keys(data: &Value, keys: &[&str], kind: &str) -> CMakeResult<()> {
    for key in keys {
        if data.get(*key).is_none() {
            return Err(CMakeError::missing_key(key, kind));
        }
    }
    Ok(())
}

fn str_field(data: &Value, key: &str) -> String {
    match data.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolVersion {
    pub major: u32,
    pub minor: Option<u32>,
}

impl ProtocolVersion {
    fn from_json(data: &Value) -> Option<Self> {
        let major = data.get("major")?.as_u64()?;
        let minor = data.get("minor").and_then(Value::as_u64);
        Some(Self {
            major: u32::try_from(major).ok()?,
            minor: minor.and_then(|minor| u32::try_from(minor).ok()),
        })
    }

    fn to_json(&self) -> Value {
        match self.minor {
            Some(minor) => json!({"major": self.major, "minor": minor}),
            None => json!({"major": self.major}),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ServerRequest {
    Handshake {
        src_dir: PathBuf,
        build_dir: PathBuf,
        generator: String,
        version: ProtocolVersion,
    },
    Configure {
        args: Vec<String>,
    },
    Compute,
    CMakeInputs,
    CodeModel,
}

impl ServerRequest {
    pub fn type_name(&self) -> &'static str {
        match self {
            ServerRequest::Handshake { .. } => "handshake",
            ServerRequest::Configure { .. } => "configure",
            ServerRequest::Compute => "compute",
            ServerRequest::CMakeInputs => "cmakeInputs",
            ServerRequest::CodeModel => "codemodel",
        }
    }

    pub fn to_json(&self, cookie: &str) -> Value {
        let mut data = json!({"type": self.type_name(), "cookie": cookie});

        match self {
            ServerRequest::Handshake {
                src_dir,
                build_dir,
                generator,
                version,
            } => {
                // Old CMake versions choke on backslashes, even on Windows
                data["sourceDirectory"] = json!(to_posix(src_dir));
                data["buildDirectory"] = json!(to_posix(build_dir));
                data["generator"] = json!(generator);
                data["protocolVersion"] = version.to_json();
            }
            ServerRequest::Configure { args } => data["cacheArguments"] = json!(args),
            ServerRequest::Compute | ServerRequest::CMakeInputs | ServerRequest::CodeModel => {}
        }

        data
    }
}

// ============================================================================
// Replies
// ============================================================================

#[derive(Debug, Clone)]
pub enum ReplyData {
    Handshake,
    Configure,
    Compute,
    CMakeInputs {
        build_files: Vec<CMakeBuildFile>,
        cmake_root: PathBuf,
        src_dir: PathBuf,
    },
    CodeModel {
        configs: Vec<CMakeConfiguration>,
    },
}

impl ReplyData {
    fn from_json(data: &Value) -> CMakeResult<Self> {
        let in_reply_to = str_field(data, "inReplyTo");

        let reply = match in_reply_to.as_str() {
            "handshake" => ReplyData::Handshake,
            "configure" => ReplyData::Configure,
            "compute" => ReplyData::Compute,
            "cmakeInputs" => {
                check_keys(
                    data,
                    &["buildFiles", "cmakeRootDirectory", "sourceDirectory"],
                    "cmakeInputs",
                )?;
                let build_files = data["buildFiles"]
                    .as_array()
                    .map(|groups| {
                        groups
                            .iter()
                            .flat_map(|group| {
                                let is_cmake = group["isCMake"].as_bool().unwrap_or(false);
                                let is_temp = group["isTemporary"].as_bool().unwrap_or(false);
                                group["sources"]
                                    .as_array()
                                    .into_iter()
                                    .flatten()
                                    .filter_map(Value::as_str)
                                    .map(move |file| CMakeBuildFile::new(file, is_cmake, is_temp))
                            })
                            .collect()
                    })
                    .unwrap_or_default();

                ReplyData::CMakeInputs {
                    build_files,
                    cmake_root: PathBuf::from(str_field(data, "cmakeRootDirectory")),
                    src_dir: PathBuf::from(str_field(data, "sourceDirectory")),
                }
            }
            "codemodel" => {
                check_keys(data, &["configurations"], "codemodel")?;
                let configs = data["configurations"]
                    .as_array()
                    .map(|configs| configs.iter().map(CMakeConfiguration::from_json).collect())
                    .unwrap_or_default();
                ReplyData::CodeModel { configs }
            }
            other => return Err(CMakeError::UnknownReplyType(other.to_string())),
        };

        Ok(reply)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ReplyData::Handshake => "handshake",
            ReplyData::Configure => "configure",
            ReplyData::Compute => "compute",
            ReplyData::CMakeInputs { .. } => "cmakeInputs",
            ReplyData::CodeModel { .. } => "codemodel",
        }
    }

    pub fn log(&self) {
        match self {
            ReplyData::CMakeInputs {
                build_files,
                cmake_root,
                src_dir,
            } => {
                debug!(
                    cmake_root = %cmake_root.display(),
                    src_dir = %src_dir.display(),
                    build_files = build_files.len(),
                    "CMake inputs"
                );
                for file in build_files {
                    debug!(
                        "  -- {} (cmake: {}, temp: {})",
                        file.file, file.is_cmake, file.is_temp
                    );
                }
            }
            ReplyData::CodeModel { configs } => {
                for config in configs {
                    config.log();
                }
            }
            other => debug!("Reply to {}", other.type_name()),
        }
    }
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug, Clone)]
pub enum ServerMessage {
    Error {
        cookie: String,
        message: String,
    },
    Hello {
        supported_versions: Vec<ProtocolVersion>,
    },
    Message {
        cookie: String,
        message: String,
    },
    Progress {
        cookie: String,
    },
    Reply {
        cookie: String,
        data: ReplyData,
    },
    Signal {
        cookie: String,
        name: String,
    },
}

impl ServerMessage {
    /// Decode one framed JSON payload
    pub fn parse(raw: &str) -> CMakeResult<Self> {
        let data: Value = serde_json::from_str(raw)?;

        let Some(msg_type) = data.get("type") else {
            return Err(CMakeError::missing_key("type", "Server"));
        };
        let msg_type = msg_type.as_str().unwrap_or_default().to_string();

        let message = match msg_type.as_str() {
            "error" => {
                check_keys(&data, &["cookie", "errorMessage"], "error")?;
                ServerMessage::Error {
                    cookie: str_field(&data, "cookie"),
                    message: str_field(&data, "errorMessage"),
                }
            }
            "hello" => {
                check_keys(&data, &["supportedProtocolVersions"], "hello")?;
                let supported_versions = data["supportedProtocolVersions"]
                    .as_array()
                    .map(|versions| {
                        versions
                            .iter()
                            .filter_map(ProtocolVersion::from_json)
                            .collect()
                    })
                    .unwrap_or_default();
                ServerMessage::Hello { supported_versions }
            }
            "message" => {
                check_keys(&data, &["cookie", "message"], "message")?;
                ServerMessage::Message {
                    cookie: str_field(&data, "cookie"),
                    message: str_field(&data, "message"),
                }
            }
            "progress" => {
                check_keys(&data, &["cookie"], "progress")?;
                ServerMessage::Progress {
                    cookie: str_field(&data, "cookie"),
                }
            }
            "reply" => {
                check_keys(&data, &["cookie", "inReplyTo"], "reply")?;
                ServerMessage::Reply {
                    cookie: str_field(&data, "cookie"),
                    data: ReplyData::from_json(&data)?,
                }
            }
            "signal" => {
                check_keys(&data, &["cookie", "name"], "signal")?;
                ServerMessage::Signal {
                    cookie: str_field(&data, "cookie"),
                    name: str_field(&data, "name"),
                }
            }
            other => return Err(CMakeError::UnknownMessageType(other.to_string())),
        };

        Ok(message)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ServerMessage::Error { .. } => "error",
            ServerMessage::Hello { .. } => "hello",
            ServerMessage::Message { .. } => "message",
            ServerMessage::Progress { .. } => "progress",
            ServerMessage::Reply { .. } => "reply",
            ServerMessage::Signal { .. } => "signal",
        }
    }

    pub fn cookie(&self) -> Option<&str> {
        match self {
            ServerMessage::Hello { .. } => None,
            ServerMessage::Error { cookie, .. }
            | ServerMessage::Message { cookie, .. }
            | ServerMessage::Progress { cookie }
            | ServerMessage::Reply { cookie, .. }
            | ServerMessage::Signal { cookie, .. } => Some(cookie),
        }
    }

    pub fn log(&self) {
        match self {
            ServerMessage::Error { message, .. } => error!("CMake server error: {}", message),
            ServerMessage::Hello { supported_versions } => {
                debug!("CMake server hello, protocols: {:?}", supported_versions)
            }
            ServerMessage::Message { message, .. } => info!("CMake: {}", message),
            ServerMessage::Progress { .. } => {}
            ServerMessage::Reply { data, .. } => data.log(),
            ServerMessage::Signal { name, .. } => debug!("CMake signal: {}", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hello() {
        let msg = ServerMessage::parse(
            r#"{"type":"hello","supportedProtocolVersions":[{"major":1,"minor":1},{"major":2}]}"#,
        )
        .unwrap();

        let ServerMessage::Hello { supported_versions } = msg else {
            panic!("expected hello");
        };
        assert_eq!(
            supported_versions,
            vec![
                ProtocolVersion { major: 1, minor: Some(1) },
                ProtocolVersion { major: 2, minor: None },
            ]
        );
    }

    #[test]
    fn test_missing_keys_are_fatal() {
        let err = ServerMessage::parse(r#"{"cookie":"meson_1"}"#).unwrap_err();
        assert!(matches!(err, CMakeError::MissingKey { ref key, .. } if key == "type"));

        let err = ServerMessage::parse(r#"{"type":"error","cookie":"meson_1"}"#).unwrap_err();
        assert!(matches!(err, CMakeError::MissingKey { ref key, .. } if key == "errorMessage"));

        let err = ServerMessage::parse(
            r#"{"type":"reply","cookie":"meson_1","inReplyTo":"codemodel"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, CMakeError::MissingKey { ref key, ref kind } if key == "configurations" && kind == "codemodel"));
    }

    #[test]
    fn test_unknown_types() {
        assert!(matches!(
            ServerMessage::parse(r#"{"type":"bogus"}"#),
            Err(CMakeError::UnknownMessageType(_))
        ));
        assert!(matches!(
            ServerMessage::parse(r#"{"type":"reply","cookie":"c","inReplyTo":"globalSettings"}"#),
            Err(CMakeError::UnknownReplyType(_))
        ));
    }

    #[test]
    fn test_parse_cmake_inputs_reply() {
        let msg = ServerMessage::parse(
            r#"{
                "type": "reply", "cookie": "meson_4", "inReplyTo": "cmakeInputs",
                "cmakeRootDirectory": "/usr/share/cmake-3.10",
                "sourceDirectory": "/src",
                "buildFiles": [
                    {"isCMake": true, "isTemporary": false, "sources": ["/usr/share/cmake-3.10/Modules/A.cmake"]},
                    {"isCMake": false, "isTemporary": false, "sources": ["CMakeLists.txt", "sub/CMakeLists.txt"]}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(msg.cookie(), Some("meson_4"));
        let ServerMessage::Reply {
            data: ReplyData::CMakeInputs { build_files, src_dir, .. },
            ..
        } = msg
        else {
            panic!("expected cmakeInputs reply");
        };
        assert_eq!(src_dir, PathBuf::from("/src"));
        assert_eq!(build_files.len(), 3);
        assert!(build_files[0].is_cmake);
        assert_eq!(build_files[2].file, "sub/CMakeLists.txt");
    }

    #[test]
    fn test_parse_codemodel_reply() {
        let msg = ServerMessage::parse(
            r#"{
                "type": "reply", "cookie": "meson_5", "inReplyTo": "codemodel",
                "configurations": [{"name": "Debug", "projects": [
                    {"name": "proj", "sourceDirectory": "/src", "buildDirectory": "/build",
                     "targets": [{"name": "foo", "type": "STATIC_LIBRARY", "fileGroups": [
                        {"language": "CXX", "sources": ["foo.cpp"], "compileFlags": "-O2"}
                     ]}]}
                ]}]
            }"#,
        )
        .unwrap();

        let ServerMessage::Reply {
            data: ReplyData::CodeModel { configs },
            ..
        } = msg
        else {
            panic!("expected codemodel reply");
        };
        let target = &configs[0].projects[0].targets[0];
        assert_eq!(target.name, "foo");
        assert_eq!(target.files[0].sources, vec!["foo.cpp"]);
    }

    #[test]
    fn test_handshake_request_uses_posix_paths() {
        let request = ServerRequest::Handshake {
            src_dir: PathBuf::from(r"C:\src\proj"),
            build_dir: PathBuf::from("/build"),
            generator: "Ninja".to_string(),
            version: ProtocolVersion { major: 1, minor: None },
        };

        let data = request.to_json("meson_1");
        assert_eq!(data["type"], "handshake");
        assert_eq!(data["cookie"], "meson_1");
        assert_eq!(data["sourceDirectory"], "C:/src/proj");
        assert_eq!(data["generator"], "Ninja");
        assert_eq!(data["protocolVersion"], json!({"major": 1}));
    }

    #[test]
    fn test_configure_request_arguments() {
        let request = ServerRequest::Configure {
            args: vec!["-DFOO=1".to_string()],
        };
        assert_eq!(
            request.to_json("meson_2"),
            json!({"type": "configure", "cookie": "meson_2", "cacheArguments": ["-DFOO=1"]})
        );
    }
}
