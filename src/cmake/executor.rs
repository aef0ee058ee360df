//! One-shot CMake invocations
//!
//! Locates the CMake binary, checks its version and runs it to completion
//! with captured output. The long running server mode lives in
//! [`crate::cmake::server`].

use crate::cmake::error::{CMakeError, CMakeResult};
use crate::cmake::version::CMakeVersion;
use crate::log_timing;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tracing::{Level, debug, info};

pub const MIN_CMAKE_VERSION: &str = ">=3.7";

/// Exit code and decoded output of one CMake run
#[derive(Debug, Clone)]
pub struct CallResult {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CallResult {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

pub struct CMakeExecutor {
    cmake_path: PathBuf,
    version: CMakeVersion,
}

impl CMakeExecutor {
    /// Probe `cmake_path` and make sure it satisfies `min_version`
    pub async fn new(cmake_path: impl Into<PathBuf>, min_version: &str) -> CMakeResult<Self> {
        let cmake_path = cmake_path.into();
        let version = CMakeVersion::detect(&cmake_path).await?;

        if !version.satisfies(min_version) {
            return Err(CMakeError::VersionTooOld {
                found: version.as_str().to_string(),
                required: min_version.to_string(),
            });
        }

        info!("Found CMake: {} ({})", cmake_path.display(), version);
        Ok(Self {
            cmake_path,
            version,
        })
    }

    pub fn version(&self) -> &CMakeVersion {
        &self.version
    }

    pub fn executable_path(&self) -> &Path {
        &self.cmake_path
    }

    /// Run CMake in `build_dir` (created if missing) with extra environment
    pub async fn call(
        &self,
        args: &[String],
        build_dir: &Path,
        env: &[(String, String)],
    ) -> CMakeResult<CallResult> {
        tokio::fs::create_dir_all(build_dir).await?;

        let start = Instant::now();
        let output = Command::new(&self.cmake_path)
            .args(args)
            .envs(env.iter().map(|(key, val)| (key.as_str(), val.as_str())))
            .current_dir(build_dir)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| CMakeError::NotFound(format!("{}: {e}", self.cmake_path.display())))?;

        let result = CallResult {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        debug!(
            "Called `{} {}` in {} -> {:?}",
            self.cmake_path.display(),
            args.join(" "),
            build_dir.display(),
            result.code
        );
        log_timing!(Level::DEBUG, "cmake_call", start.elapsed());

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    /// Shell script pretending to be cmake
    fn fake_cmake(dir: &Path, version: &str) -> PathBuf {
        let path = dir.join("cmake");
        std::fs::write(
            &path,
            format!(
                "#!/bin/sh\n\
                 if [ \"$1\" = \"--version\" ]; then echo 'cmake version {version}'; exit 0; fi\n\
                 echo \"args: $*\"\n\
                 echo \"lang: $LC_ALL\" >&2\n\
                 pwd >&2\n\
                 exit 3\n"
            ),
        )
        .unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn test_version_gate() {
        let temp = TempDir::new().unwrap();
        let cmake = fake_cmake(temp.path(), "3.5.1");

        assert!(matches!(
            CMakeExecutor::new(&cmake, MIN_CMAKE_VERSION).await,
            Err(CMakeError::VersionTooOld { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_binary() {
        assert!(matches!(
            CMakeExecutor::new("/nonexistent/cmake", MIN_CMAKE_VERSION).await,
            Err(CMakeError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_call_captures_output() {
        let temp = TempDir::new().unwrap();
        let cmake = fake_cmake(temp.path(), "3.16.3");
        let executor = CMakeExecutor::new(&cmake, MIN_CMAKE_VERSION).await.unwrap();
        assert!(executor.version().supports_file_api());

        let build_dir = temp.path().join("build/sub");
        let result = executor
            .call(
                &["-G".to_string(), "Ninja".to_string()],
                &build_dir,
                &[("LC_ALL".to_string(), "C".to_string())],
            )
            .await
            .unwrap();

        assert!(build_dir.is_dir());
        assert_eq!(result.code, Some(3));
        assert!(!result.success());
        assert_eq!(result.stdout.trim(), "args: -G Ninja");
        assert!(result.stderr.contains("lang: C"));
        assert!(result.stderr.contains("build/sub"));
    }
}
