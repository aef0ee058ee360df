//! Toolchain file generation
//!
//! The generated `CMakeMesonToolchainFile.cmake` makes the CMake configure
//! run use the host build's compilers and machine description. The preload
//! script shipped next to it hooks the commands the trace parser needs extra
//! context for.

use crate::cmake::common::cmake_language;
use crate::cmake::error::CMakeResult;
use crate::cmake::pathutil::to_posix;
use crate::environment::{CompilerInfo, HostEnvironment, SkipCompilerTest, make_abs};
use indexmap::IndexMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const TOOLCHAIN_FILE_NAME: &str = "CMakeMesonToolchainFile.cmake";
pub const PRELOAD_FILE_NAME: &str = "CMakeMesonPreload.cmake";

const PRELOAD_SCRIPT: &str = include_str!("data/preload.cmake");

const COMPILER_ID_MAP: &[(&str, &str)] = &[
    ("arm", "ARMCC"),
    ("armclang", "ARMClang"),
    ("apple-clang", "AppleClang"),
    ("clang", "Clang"),
    ("clang-cl", "MSVC"),
    ("flang", "Flang"),
    ("g95", "G95"),
    ("gcc", "GNU"),
    ("intel", "Intel"),
    ("intel-cl", "MSVC"),
    ("msvc", "MSVC"),
    ("pathscale", "PathScale"),
    ("pgi", "PGI"),
    ("sun", "SunPro"),
];

/// Best effort mapping to `CMAKE_SYSTEM_NAME`
const SYSTEM_MAP: &[(&str, &str)] = &[
    ("android", "Android"),
    ("linux", "Linux"),
    ("windows", "Windows"),
    ("freebsd", "FreeBSD"),
    ("darwin", "Darwin"),
];

/// Why CMake is being run, decides whether compiler checks may be skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecScope {
    Subproject,
    Dependency,
}

/// CMake compiler id for a host compiler, GNU when unknown
pub fn compiler_to_cmake_id(compiler: &CompilerInfo) -> &'static str {
    COMPILER_ID_MAP
        .iter()
        .find(|(id, _)| *id == compiler.id)
        .map(|(_, cmake_id)| *cmake_id)
        .unwrap_or("GNU")
}

/// Write the preload script into `dir` and return its path
pub fn write_preload_file(dir: &Path) -> CMakeResult<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(PRELOAD_FILE_NAME);
    fs::write(&path, PRELOAD_SCRIPT)?;
    Ok(path)
}

pub struct CMakeToolchain {
    toolchain_file: PathBuf,
    preload_file: Option<PathBuf>,
    user_toolchain_file: Option<PathBuf>,
    variables: IndexMap<String, Vec<String>>,
}

impl CMakeToolchain {
    pub fn new(
        env: &HostEnvironment,
        exec_scope: ExecScope,
        out_dir: &Path,
        preload_file: Option<PathBuf>,
    ) -> CMakeResult<Self> {
        let toolchain_file = std::path::absolute(out_dir.join(TOOLCHAIN_FILE_NAME))?;

        let mut variables = Self::get_defaults(env, exec_scope);
        for (key, value) in &env.cmake_variables {
            variables.insert(key.clone(), value.clone());
        }

        Ok(Self {
            toolchain_file,
            preload_file,
            user_toolchain_file: env.properties.cmake_toolchain_file.clone(),
            variables,
        })
    }

    pub fn toolchain_file(&self) -> &Path {
        &self.toolchain_file
    }

    pub fn variables(&self) -> &IndexMap<String, Vec<String>> {
        &self.variables
    }

    /// Regenerate the toolchain file from scratch
    pub fn write(&self) -> CMakeResult<PathBuf> {
        if let Some(parent) = self.toolchain_file.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.toolchain_file, self.generate())?;
        debug!("Wrote CMake toolchain file {}", self.toolchain_file.display());
        Ok(self.toolchain_file.clone())
    }

    pub fn get_cmake_args(&self) -> Vec<String> {
        let mut args = vec![format!(
            "-DCMAKE_TOOLCHAIN_FILE={}",
            to_posix(&self.toolchain_file)
        )];
        if let Some(preload) = &self.preload_file {
            args.push(format!("-DMESON_PRELOAD_FILE={}", to_posix(preload)));
        }
        args
    }

    pub fn generate(&self) -> String {
        let mut res = String::from(
            "######################################\n\
             ###  AUTOMATICALLY GENERATED FILE  ###\n\
             ######################################\n\
             \n\
             # This file was generated from the configuration of the host build.\n\
             \n\
             if(DEFINED MESON_PRELOAD_FILE)\n    \
             include(\"${MESON_PRELOAD_FILE}\")\n\
             endif()\n\
             \n",
        );

        res.push_str("# Variables from meson\n");
        for (key, values) in &self.variables {
            res.push_str("set(");
            res.push_str(key);
            for value in values {
                // CMake treats backslashes as escapes
                res.push_str(&format!(" \"{}\"", value.replace('\\', "/")));
            }
            res.push_str(")\n");
        }
        res.push('\n');

        if let Some(user_file) = &self.user_toolchain_file {
            res.push_str(&format!(
                "\n# Load the CMake toolchain file specified by the user\ninclude(\"{}\")\n\n",
                to_posix(user_file)
            ));
        }

        res
    }

    fn get_defaults(env: &HostEnvironment, exec_scope: ExecScope) -> IndexMap<String, Vec<String>> {
        let mut defaults = IndexMap::new();
        let properties = &env.properties;
        if !properties.cmake_defaults {
            return defaults;
        }

        // Setting these in a native build makes CMake believe it cross compiles
        if env.cross_build {
            let system = SYSTEM_MAP
                .iter()
                .find(|(name, _)| *name == env.machine.system)
                .map_or(env.machine.system.as_str(), |(_, cmake_name)| *cmake_name);
            defaults.insert("CMAKE_SYSTEM_NAME".to_string(), vec![system.to_string()]);
            defaults.insert(
                "CMAKE_SYSTEM_PROCESSOR".to_string(),
                vec![env.machine.cpu_family.clone()],
            );
        }

        let void_p = if env.machine.is_64_bit { "8" } else { "4" };
        defaults.insert("CMAKE_SIZEOF_VOID_P".to_string(), vec![void_p.to_string()]);

        if let Some(sys_root) = properties.sys_root.as_ref().filter(|root| !root.is_empty()) {
            defaults.insert("CMAKE_SYSROOT".to_string(), vec![sys_root.clone()]);
        }

        let skip_check = match properties.cmake_skip_compiler_test {
            SkipCompilerTest::Always => true,
            SkipCompilerTest::Never => false,
            SkipCompilerTest::DepOnly => exec_scope == ExecScope::Dependency,
        };

        for (lang, compiler) in &env.compilers {
            let exe_list: Vec<String> = compiler.exelist.iter().map(|exe| make_abs(exe)).collect();
            if exe_list.is_empty() {
                continue;
            }

            let cmake_lang = cmake_language(lang)
                .map(str::to_string)
                .unwrap_or_else(|| lang.to_uppercase());
            let prefix = format!("CMAKE_{cmake_lang}_");

            if exe_list.len() == 2 {
                defaults.insert(format!("{prefix}COMPILER"), vec![exe_list[1].clone()]);
                defaults.insert(format!("{prefix}COMPILER_LAUNCHER"), vec![exe_list[0].clone()]);
            } else {
                defaults.insert(format!("{prefix}COMPILER"), exe_list);
            }
            if compiler.id == "clang-cl" {
                defaults.insert("CMAKE_LINKER".to_string(), compiler.linker_exelist.clone());
            }

            // With these set CMake skips validating the compiler
            if !skip_check {
                continue;
            }
            defaults.insert(
                format!("{prefix}COMPILER_ID"),
                vec![compiler_to_cmake_id(compiler).to_string()],
            );
            defaults.insert(
                format!("{prefix}COMPILER_VERSION"),
                vec![compiler.version.to_uppercase()],
            );
            defaults.insert(format!("{prefix}COMPILER_FORCED"), vec!["1".to_string()]);
            defaults.insert(format!("{prefix}COMPILER_WORKS"), vec!["TRUE".to_string()]);
        }

        defaults
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::{CompilerInfo, MachineInfo};
    use tempfile::TempDir;

    fn host_env() -> HostEnvironment {
        let mut env = HostEnvironment {
            machine: MachineInfo {
                system: "windows".to_string(),
                cpu_family: "x86_64".to_string(),
                is_64_bit: true,
            },
            ..HostEnvironment::default()
        };
        env.compilers.insert(
            "c".to_string(),
            CompilerInfo {
                id: "gcc".to_string(),
                version: "9.3.0".to_string(),
                exelist: vec!["/usr/bin/ccache".to_string(), "/usr/bin/gcc".to_string()],
                ..CompilerInfo::default()
            },
        );
        env.compilers.insert(
            "cpp".to_string(),
            CompilerInfo {
                id: "clang-cl".to_string(),
                version: "10.0".to_string(),
                exelist: vec![r"C:\LLVM\bin\clang-cl.exe".to_string()],
                linker_exelist: vec!["lld-link".to_string()],
                ..CompilerInfo::default()
            },
        );
        env
    }

    #[test]
    fn test_native_defaults() {
        let temp = TempDir::new().unwrap();
        let toolchain =
            CMakeToolchain::new(&host_env(), ExecScope::Subproject, temp.path(), None).unwrap();
        let vars = toolchain.variables();

        assert!(!vars.contains_key("CMAKE_SYSTEM_NAME"));
        assert_eq!(vars["CMAKE_SIZEOF_VOID_P"], vec!["8"]);
        assert_eq!(vars["CMAKE_C_COMPILER"], vec!["/usr/bin/gcc"]);
        assert_eq!(vars["CMAKE_C_COMPILER_LAUNCHER"], vec!["/usr/bin/ccache"]);
        assert_eq!(vars["CMAKE_LINKER"], vec!["lld-link"]);
        // dep_only does not skip the checks of a subproject
        assert!(!vars.contains_key("CMAKE_C_COMPILER_ID"));
    }

    #[test]
    fn test_cross_and_forced_compiler_state() {
        let temp = TempDir::new().unwrap();
        let mut env = host_env();
        env.cross_build = true;
        env.properties.sys_root = Some("/sysroot".to_string());

        let toolchain = CMakeToolchain::new(&env, ExecScope::Dependency, temp.path(), None).unwrap();
        let vars = toolchain.variables();

        assert_eq!(vars["CMAKE_SYSTEM_NAME"], vec!["Windows"]);
        assert_eq!(vars["CMAKE_SYSTEM_PROCESSOR"], vec!["x86_64"]);
        assert_eq!(vars["CMAKE_SYSROOT"], vec!["/sysroot"]);
        assert_eq!(vars["CMAKE_C_COMPILER_ID"], vec!["GNU"]);
        assert_eq!(vars["CMAKE_CXX_COMPILER_ID"], vec!["MSVC"]);
        assert_eq!(vars["CMAKE_C_COMPILER_VERSION"], vec!["9.3.0"]);
        assert_eq!(vars["CMAKE_C_COMPILER_FORCED"], vec!["1"]);
        assert_eq!(vars["CMAKE_C_COMPILER_WORKS"], vec!["TRUE"]);
    }

    #[test]
    fn test_defaults_can_be_disabled() {
        let temp = TempDir::new().unwrap();
        let mut env = host_env();
        env.properties.cmake_defaults = false;
        env.cmake_variables
            .insert("MY_VAR".to_string(), vec!["a".to_string(), "b".to_string()]);

        let toolchain = CMakeToolchain::new(&env, ExecScope::Subproject, temp.path(), None).unwrap();
        assert_eq!(toolchain.variables().len(), 1);
        assert_eq!(toolchain.variables()["MY_VAR"], vec!["a", "b"]);
    }

    #[test]
    fn test_generate_and_write() {
        let temp = TempDir::new().unwrap();
        let mut env = host_env();
        env.properties.cmake_toolchain_file = Some(PathBuf::from("/home/user/tc.cmake"));
        let preload = temp.path().join(PRELOAD_FILE_NAME);

        let out_dir = temp.path().join("nested/dir");
        let toolchain =
            CMakeToolchain::new(&env, ExecScope::Subproject, &out_dir, Some(preload.clone()))
                .unwrap();
        let written = toolchain.write().unwrap();
        let content = fs::read_to_string(&written).unwrap();

        assert!(content.contains("if(DEFINED MESON_PRELOAD_FILE)"));
        assert!(content.contains("set(CMAKE_CXX_COMPILER \"C:/LLVM/bin/clang-cl.exe\")"));
        assert!(content.contains("include(\"/home/user/tc.cmake\")"));
        assert!(!content.contains('\\'));

        // Writing again regenerates instead of appending
        toolchain.write().unwrap();
        assert_eq!(fs::read_to_string(&written).unwrap(), content);

        let args = toolchain.get_cmake_args();
        assert_eq!(args.len(), 2);
        assert!(args[0].starts_with("-DCMAKE_TOOLCHAIN_FILE="));
        assert!(args[0].ends_with(TOOLCHAIN_FILE_NAME));
        assert_eq!(args[1], format!("-DMESON_PRELOAD_FILE={}", to_posix(&preload)));
    }

    #[test]
    fn test_write_preload_file() {
        let temp = TempDir::new().unwrap();
        let path = write_preload_file(temp.path()).unwrap();
        let content = fs::read_to_string(path).unwrap();
        assert!(content.contains("macro(meson_ps_execute_delayed_calls)"));
        assert!(content.contains("set(MESON_PS_DELAYED_CALLS add_custom_command;add_custom_target;set_property)"));
    }
}
