//! Test utilities and global setup
//!
//! Provides centralized test logging configuration and CMake project fixtures.

/// Test logging utilities
#[cfg(all(test, feature = "test-logging"))]
pub mod logging {
    use std::sync::Once;
    use tracing_subscriber::{EnvFilter, fmt};

    static INIT: Once = Once::new();

    /// Initialize test logging globally - safe to call multiple times
    ///
    /// For automatic initialization in a test module:
    /// ```rust
    /// #[cfg(feature = "test-logging")]
    /// #[ctor::ctor]
    /// fn init_test_logging() {
    ///     crate::test_utils::logging::init();
    /// }
    /// ```
    ///
    /// `RUST_LOG` controls the level, e.g.
    /// `RUST_LOG=cmake_interop::cmake::traceparser=trace cargo test --features test-logging`
    pub fn init() {
        INIT.call_once(|| {
            let env_filter = EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("debug,tokio=info"));

            fmt()
                .with_env_filter(env_filter)
                .with_test_writer()
                .with_target(true)
                .with_thread_ids(true)
                .compact()
                .try_init()
                .ok(); // Another test may have installed a subscriber already
        });
    }
}

/// Global test logging setup for one test module
#[cfg(all(test, feature = "test-logging"))]
#[macro_export]
macro_rules! setup_test_logging {
    () => {
        #[ctor::ctor]
        fn init_test_logging() {
            $crate::test_utils::logging::init();
        }
    };
}

/// CMake binary for integration tests
///
/// Checks the CMAKE environment variable and falls back to "cmake" if not set.
#[cfg(all(test, feature = "cmake-integration-tests"))]
pub fn get_test_cmake_path() -> std::path::PathBuf {
    std::env::var_os("CMAKE")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| std::path::PathBuf::from("cmake"))
}

/// Integration test helpers: small CMake projects in temporary host trees
#[cfg(test)]
pub mod integration {
    use crate::environment::{CompilerInfo, HostEnvironment};
    use std::fs;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;
    use walkdir::WalkDir;

    pub const SUBPROJECT_DIR: &str = "subprojects/cmlib";

    const CMAKE_LISTS: &str = r##"cmake_minimum_required(VERSION 3.7)
project(cmlib C)

add_custom_command(
  OUTPUT ${CMAKE_CURRENT_BINARY_DIR}/version.h
  COMMAND ${CMAKE_COMMAND} -E echo "#define CMLIB_VERSION 1" > ${CMAKE_CURRENT_BINARY_DIR}/version.h
)

add_library(cmlib_iface INTERFACE)
target_compile_definitions(cmlib_iface INTERFACE CMLIB_IFACE=1)

add_library(cmlib STATIC src/cmlib.c ${CMAKE_CURRENT_BINARY_DIR}/version.h)
target_include_directories(cmlib PUBLIC include ${CMAKE_CURRENT_BINARY_DIR})
target_link_libraries(cmlib PUBLIC cmlib_iface)

add_executable(cmtool src/main.c)
target_link_libraries(cmtool PRIVATE cmlib)
install(TARGETS cmtool DESTINATION bin)
"##;

    const SOURCES: &[(&str, &str)] = &[
        ("include/cmlib.h", "int cmlib_answer(void);\n"),
        (
            "src/cmlib.c",
            "#include \"cmlib.h\"\n#include \"version.h\"\nint cmlib_answer(void) { return 42; }\n",
        ),
        (
            "src/main.c",
            "#include \"cmlib.h\"\nint main(void) { return cmlib_answer() == 42 ? 0 : 1; }\n",
        ),
    ];

    /// Host source and build trees with one CMake subproject
    pub struct TestProject {
        _temp_dir: TempDir, // Underscore prefix keeps it alive until drop
        pub root: PathBuf,
        pub source_dir: PathBuf,
        pub build_dir: PathBuf,
    }

    impl TestProject {
        pub fn new() -> Result<Self, std::io::Error> {
            let temp_dir = TempDir::new()?;
            let root = temp_dir.path().to_path_buf();
            let source_dir = root.join("src");
            let build_dir = root.join("build");

            let project_dir = source_dir.join(SUBPROJECT_DIR);
            write_file(&project_dir.join("CMakeLists.txt"), CMAKE_LISTS)?;
            for (path, content) in SOURCES {
                write_file(&project_dir.join(path), content)?;
            }
            fs::create_dir_all(&build_dir)?;

            Ok(Self {
                _temp_dir: temp_dir,
                root,
                source_dir,
                build_dir,
            })
        }

        /// Host environment for the subproject, with `cc` as C compiler
        pub fn environment(&self) -> HostEnvironment {
            let mut env = HostEnvironment {
                source_dir: self.source_dir.clone(),
                build_dir: self.build_dir.clone(),
                subdir: PathBuf::from(SUBPROJECT_DIR),
                prefix: self.root.join("install"),
                ..HostEnvironment::default()
            };
            env.compilers.insert(
                "c".to_string(),
                CompilerInfo {
                    exelist: vec!["cc".to_string()],
                    ..CompilerInfo::default()
                },
            );
            env
        }

        /// Files below the source tree, relative to it
        pub fn source_files(&self) -> Vec<String> {
            WalkDir::new(&self.source_dir)
                .into_iter()
                .filter_map(Result::ok)
                .filter(|entry| entry.file_type().is_file())
                .filter_map(|entry| {
                    entry
                        .path()
                        .strip_prefix(&self.source_dir)
                        .ok()
                        .map(|rel| rel.to_string_lossy().into_owned())
                })
                .collect()
        }
    }

    fn write_file(path: &Path, content: &str) -> Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_test_project_creation() {
            let project = TestProject::new().unwrap();

            let mut files = project.source_files();
            files.sort();
            assert_eq!(
                files,
                vec![
                    format!("{SUBPROJECT_DIR}/CMakeLists.txt"),
                    format!("{SUBPROJECT_DIR}/include/cmlib.h"),
                    format!("{SUBPROJECT_DIR}/src/cmlib.c"),
                    format!("{SUBPROJECT_DIR}/src/main.c"),
                ]
            );
            assert!(project.build_dir.exists());
            assert_eq!(project.environment().subdir, PathBuf::from(SUBPROJECT_DIR));
        }

        #[cfg(feature = "cmake-integration-tests")]
        #[tokio::test]
        async fn test_convert_real_cmake_project() {
            use crate::cmake::common::MesonFunc;
            use crate::cmake::{CMakeInterpreter, InterpreterState, TargetOptions};

            let project = TestProject::new().unwrap();
            let mut env = project.environment();
            env.cmake_path = Some(crate::test_utils::get_test_cmake_path());

            let mut interpreter = CMakeInterpreter::new(env, false).unwrap();
            interpreter.initialise(&[]).await.unwrap();
            assert!(
                interpreter
                    .bs_files()
                    .contains(&format!("{SUBPROJECT_DIR}/CMakeLists.txt"))
            );

            interpreter.analyse().unwrap();
            assert_eq!(interpreter.project_name(), "cmlib");

            let code = interpreter
                .pretend_to_be_meson(&TargetOptions::default())
                .unwrap()
                .to_string();
            assert_eq!(interpreter.state(), InterpreterState::Synthesized);
            assert!(code.contains("static_library('cm_cmlib'"), "{code}");
            assert!(code.contains("executable('cm_cmtool'"), "{code}");
            assert!(code.contains("custom_target("), "{code}");

            assert_eq!(
                interpreter.target_info("cmlib").map(|info| info.func),
                Some(MesonFunc::StaticLibrary)
            );
            assert_eq!(
                interpreter.target_info("cmlib_iface").map(|info| info.func),
                Some(MesonFunc::HeaderOnly)
            );
        }
    }
}
