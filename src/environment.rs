//! Host build configuration
//!
//! Describes the build that embeds the CMake subproject: directories,
//! backend, target machine and the compilers CMake has to agree with.
//! Loaded from a JSON file and refined by command line overrides.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read host configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid host configuration JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid host configuration: {0}")]
    Invalid(String),
}

/// When CMake's own compiler sanity checks are skipped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipCompilerTest {
    Always,
    Never,
    #[default]
    DepOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineInfo {
    pub system: String,
    pub cpu_family: String,
    pub is_64_bit: bool,
}

impl Default for MachineInfo {
    fn default() -> Self {
        Self {
            system: env::consts::OS.to_string(),
            cpu_family: env::consts::ARCH.to_string(),
            is_64_bit: cfg!(target_pointer_width = "64"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineProperties {
    pub sys_root: Option<String>,
    /// User toolchain file included at the end of the generated one
    pub cmake_toolchain_file: Option<PathBuf>,
    /// Generate compiler and machine defaults in the toolchain file
    pub cmake_defaults: bool,
    pub cmake_skip_compiler_test: SkipCompilerTest,
}

impl Default for MachineProperties {
    fn default() -> Self {
        Self {
            sys_root: None,
            cmake_toolchain_file: None,
            cmake_defaults: true,
            cmake_skip_compiler_test: SkipCompilerTest::default(),
        }
    }
}

/// One configured compiler of the host build
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerInfo {
    pub id: String,
    pub version: String,
    pub exelist: Vec<String>,
    pub linker_exelist: Vec<String>,
    pub linker_id: String,
    /// Values accepted for the `<lang>_std` option
    pub std_options: Vec<String>,
    /// `msvc` for cl-style argument syntax
    pub argument_syntax: String,
}

impl CompilerInfo {
    pub fn is_cmdline_option(&self, arg: &str) -> bool {
        if self.argument_syntax == "msvc" {
            arg.starts_with('/')
        } else {
            arg.starts_with('-')
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostEnvironment {
    pub source_dir: PathBuf,
    pub build_dir: PathBuf,
    /// Subproject directory relative to `source_dir`
    pub subdir: PathBuf,
    pub prefix: PathBuf,
    pub backend: String,
    pub debug: bool,
    pub cross_build: bool,
    pub machine: MachineInfo,
    pub properties: MachineProperties,
    /// Extra CMake variables from the machine file
    pub cmake_variables: IndexMap<String, Vec<String>>,
    /// Compilers keyed by language (`c`, `cpp`, ...)
    pub compilers: IndexMap<String, CompilerInfo>,
    pub cmake_path: Option<PathBuf>,
    /// Helper that runs custom target commands
    pub run_script: PathBuf,
}

impl Default for HostEnvironment {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("."),
            build_dir: PathBuf::from("build"),
            subdir: PathBuf::new(),
            prefix: PathBuf::from("/usr/local"),
            backend: "ninja".to_string(),
            debug: true,
            cross_build: false,
            machine: MachineInfo::default(),
            properties: MachineProperties::default(),
            cmake_variables: IndexMap::new(),
            compilers: IndexMap::new(),
            cmake_path: None,
            run_script: PathBuf::from("cmake_run_ctgt.py"),
        }
    }
}

impl HostEnvironment {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        debug!("Loaded host configuration from {}", path.display());
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.subdir.is_absolute() {
            return Err(ConfigError::Invalid(format!(
                "subdir must be relative, got {}",
                self.subdir.display()
            )));
        }
        if self.backend.is_empty() {
            return Err(ConfigError::Invalid("backend must not be empty".to_string()));
        }
        for (lang, compiler) in &self.compilers {
            if compiler.exelist.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "compiler for {lang} has an empty exelist"
                )));
            }
        }
        Ok(())
    }

    /// Override values from CLI arguments
    pub fn with_overrides(
        mut self,
        source_dir: Option<PathBuf>,
        build_dir: Option<PathBuf>,
        subdir: Option<PathBuf>,
        cmake_path: Option<PathBuf>,
    ) -> Self {
        if let Some(source_dir) = source_dir {
            self.source_dir = source_dir;
        }
        if let Some(build_dir) = build_dir {
            self.build_dir = build_dir;
        }
        if let Some(subdir) = subdir {
            self.subdir = subdir;
        }
        if let Some(cmake_path) = cmake_path {
            self.cmake_path = Some(cmake_path);
        }
        self
    }

    /// CMake binary: explicit setting, then `$CMAKE`, then `cmake` from PATH
    pub fn resolve_cmake_path(&self) -> PathBuf {
        self.cmake_path
            .clone()
            .or_else(|| env::var_os("CMAKE").map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("cmake"))
    }

    pub fn get_compiler(&self, lang: &str) -> Option<&CompilerInfo> {
        self.compilers.get(lang)
    }
}

/// Absolute path of `exe` found on PATH, or `exe` unchanged
pub fn make_abs(exe: &str) -> String {
    if Path::new(exe).is_absolute() {
        return exe.to_string();
    }

    env::var_os("PATH")
        .and_then(|paths| {
            env::split_paths(&paths)
                .map(|dir| dir.join(exe))
                .find(|candidate| candidate.is_file())
        })
        .map(|found| found.to_string_lossy().into_owned())
        .unwrap_or_else(|| exe.to_string())
}
