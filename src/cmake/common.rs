//! Shared CMake data model and lookup tables
//!
//! Holds the codemodel tree (configuration → project → target → file group)
//! produced by either the server protocol or the file API, the build-system
//! file records, the fixed translation tables between CMake and the native
//! build description, and the per-target option overrides used during
//! synthesis.

use crate::cmake::error::{CMakeError, CMakeResult};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::{debug, warn};

// ============================================================================
// Translation tables
// ============================================================================

/// Native language name to CMake language name
pub const LANGUAGE_MAP: &[(&str, &str)] = &[
    ("c", "C"),
    ("cpp", "CXX"),
    ("cuda", "CUDA"),
    ("objc", "OBJC"),
    ("objcpp", "OBJCXX"),
    ("cs", "CSharp"),
    ("java", "Java"),
    ("fortran", "Fortran"),
    ("swift", "Swift"),
];

/// Backend name to CMake generator name
pub const BACKEND_GENERATOR_MAP: &[(&str, &str)] = &[
    ("ninja", "Ninja"),
    ("xcode", "Xcode"),
    ("vs2010", "Visual Studio 10 2010"),
    ("vs2015", "Visual Studio 14 2015"),
    ("vs2017", "Visual Studio 15 2017"),
    ("vs2019", "Visual Studio 16 2019"),
];

pub const HEADER_SUFFIXES: &[&str] = &["h", "hh", "hpp", "hxx", "H", "ipp", "moc", "vapi", "di"];
pub const OBJ_SUFFIXES: &[&str] = &["o", "obj", "res"];
pub const LIB_SUFFIXES: &[&str] = &["a", "lib", "dll", "dll.a", "dylib", "so"];

/// Source suffixes registered for each native language
pub const LANG_SUFFIXES: &[(&str, &[&str])] = &[
    ("c", &["c", "h"]),
    (
        "cpp",
        &["cpp", "cc", "cxx", "c++", "hh", "hpp", "ipp", "hxx", "ino"],
    ),
    ("cuda", &["cu"]),
    ("objc", &["m"]),
    ("objcpp", &["mm"]),
    ("cs", &["cs"]),
    ("java", &["java"]),
    (
        "fortran",
        &["f", "f90", "f95", "f03", "f08", "for", "ftn", "fpp"],
    ),
    ("swift", &["swift"]),
];

pub const BLACKLIST_COMPILER_FLAGS: &[&str] = &[
    "-Wall", "-Wextra", "-Weverything", "-Werror", "-Wpedantic", "-pedantic", "-w", "/W1", "/W2",
    "/W3", "/W4", "/Wall", "/WX", "/w", "/O1", "/O2", "/Ob", "/Od", "/Og", "/Oi", "/Os", "/Ot",
    "/Ox", "/Oy", "/Ob0", "/RTC1", "/RTCc", "/RTCs", "/RTCu", "/Z7", "/Zi", "/ZI",
];

pub const BLACKLIST_LINK_FLAGS: &[&str] = &[
    "/machine:x64",
    "/machine:x86",
    "/machine:arm",
    "/machine:ebc",
    "/debug",
    "/debug:fastlink",
    "/debug:full",
    "/debug:none",
    "/incremental",
];

pub const BLACKLIST_CLANG_CL_LINK_FLAGS: &[&str] = &["/GR", "/EHsc", "/MDd", "/Zi", "/RTC1"];

pub const BLACKLIST_LINK_LIBS: &[&str] = &[
    "kernel32.lib",
    "user32.lib",
    "gdi32.lib",
    "winspool.lib",
    "shell32.lib",
    "ole32.lib",
    "oleaut32.lib",
    "uuid.lib",
    "comdlg32.lib",
    "advapi32.lib",
];

/// CMake variables reserved for the toolchain and preload machinery
pub const BLACKLIST_CMAKE_DEFS: &[&str] = &[
    "CMAKE_TOOLCHAIN_FILE",
    "CMAKE_PROJECT_INCLUDE",
    "CMAKE_PROJECT_INCLUDE_BEFORE",
    "MESON_PRELOAD_FILE",
    "MESON_PS_CMAKE_CURRENT_BINARY_DIR",
    "MESON_PS_CMAKE_CURRENT_SOURCE_DIR",
    "MESON_PS_DELAYED_CALLS",
    "MESON_PS_LOADED",
    "MESON_FIND_ROOT_PATH",
    "MESON_CMAKE_SYSROOT",
    "MESON_PATHS_LIST",
    "MESON_CMAKE_ROOT",
];

/// Policies whose warnings are silenced during configure
pub const DISABLE_POLICY_WARNINGS: &[&str] = &[
    "CMP0025", "CMP0047", "CMP0056", "CMP0060", "CMP0065", "CMP0066", "CMP0067", "CMP0082",
    "CMP0089", "CMP0102",
];

pub fn cmake_language(lang: &str) -> Option<&'static str> {
    LANGUAGE_MAP
        .iter()
        .find(|(native, _)| *native == lang)
        .map(|(_, cmake)| *cmake)
}

/// Reverse lookup of [`LANGUAGE_MAP`], case-insensitive on the CMake side
pub fn native_language(cmake_lang: &str) -> Option<&'static str> {
    LANGUAGE_MAP
        .iter()
        .find(|(_, cmake)| cmake.eq_ignore_ascii_case(cmake_lang))
        .map(|(native, _)| *native)
}

pub fn backend_generator(backend: &str) -> Option<&'static str> {
    BACKEND_GENERATOR_MAP
        .iter()
        .find(|(name, _)| *name == backend)
        .map(|(_, generator)| *generator)
}

pub fn lang_suffixes(lang: &str) -> &'static [&'static str] {
    LANG_SUFFIXES
        .iter()
        .find(|(name, _)| *name == lang)
        .map(|(_, suffixes)| *suffixes)
        .unwrap_or(&[])
}

pub fn all_source_suffixes() -> impl Iterator<Item = &'static str> {
    LANG_SUFFIXES
        .iter()
        .flat_map(|(_, suffixes)| suffixes.iter().copied())
}

pub fn has_suffix(fname: &str, suffixes: &[&str]) -> bool {
    suffixes
        .iter()
        .any(|suffix| fname.ends_with(&format!(".{suffix}")))
}

pub fn is_header(fname: &str) -> bool {
    has_suffix(fname, HEADER_SUFFIXES)
}

// ============================================================================
// Target kinds
// ============================================================================

/// Codemodel target type as reported by CMake
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TargetType {
    Executable,
    StaticLibrary,
    SharedLibrary,
    ModuleLibrary,
    ObjectLibrary,
    InterfaceLibrary,
    Utility,
    Other(String),
}

impl TargetType {
    pub fn from_cmake(raw: &str) -> Self {
        match raw.to_ascii_uppercase().as_str() {
            "EXECUTABLE" => TargetType::Executable,
            "STATIC_LIBRARY" => TargetType::StaticLibrary,
            "SHARED_LIBRARY" => TargetType::SharedLibrary,
            "MODULE_LIBRARY" => TargetType::ModuleLibrary,
            "OBJECT_LIBRARY" => TargetType::ObjectLibrary,
            "INTERFACE_LIBRARY" => TargetType::InterfaceLibrary,
            "UTILITY" => TargetType::Utility,
            _ => TargetType::Other(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            TargetType::Executable => "EXECUTABLE",
            TargetType::StaticLibrary => "STATIC_LIBRARY",
            TargetType::SharedLibrary => "SHARED_LIBRARY",
            TargetType::ModuleLibrary => "MODULE_LIBRARY",
            TargetType::ObjectLibrary => "OBJECT_LIBRARY",
            TargetType::InterfaceLibrary => "INTERFACE_LIBRARY",
            TargetType::Utility => "UTILITY",
            TargetType::Other(raw) => raw,
        }
    }

    /// Dummy CMake-internal targets that never produce a build target
    pub fn is_skipped(&self) -> bool {
        matches!(self, TargetType::Utility)
    }

    pub fn meson_func(&self) -> Option<MesonFunc> {
        match self {
            TargetType::StaticLibrary | TargetType::ObjectLibrary => Some(MesonFunc::StaticLibrary),
            TargetType::ModuleLibrary => Some(MesonFunc::SharedModule),
            TargetType::SharedLibrary => Some(MesonFunc::SharedLibrary),
            TargetType::Executable => Some(MesonFunc::Executable),
            TargetType::InterfaceLibrary => Some(MesonFunc::HeaderOnly),
            TargetType::Utility | TargetType::Other(_) => None,
        }
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Native build function a converted target is emitted as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MesonFunc {
    Executable,
    StaticLibrary,
    SharedLibrary,
    SharedModule,
    HeaderOnly,
    CustomTarget,
}

impl MesonFunc {
    pub fn as_str(&self) -> &'static str {
        match self {
            MesonFunc::Executable => "executable",
            MesonFunc::StaticLibrary => "static_library",
            MesonFunc::SharedLibrary => "shared_library",
            MesonFunc::SharedModule => "shared_module",
            MesonFunc::HeaderOnly => "header_only",
            MesonFunc::CustomTarget => "custom_target",
        }
    }

    /// Kinds whose dependencies are handed down to their dependents
    pub fn transfers_dependencies(&self) -> bool {
        matches!(self, MesonFunc::HeaderOnly)
    }
}

impl fmt::Display for MesonFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Build-system files
// ============================================================================

/// One file CMake read while configuring
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CMakeBuildFile {
    pub file: String,
    pub is_cmake: bool,
    pub is_temp: bool,
}

impl CMakeBuildFile {
    pub fn new(file: impl Into<String>, is_cmake: bool, is_temp: bool) -> Self {
        Self {
            file: file.into(),
            is_cmake,
            is_temp,
        }
    }
}

/// Split a raw command line into arguments, honoring quotes and escapes
pub fn flags_to_list(raw: &str) -> Vec<String> {
    let mut res = Vec::new();
    let mut curr = String::new();
    let mut escape = false;
    let mut in_string = false;

    for c in raw.chars() {
        if escape {
            // A backslash before anything but a quote is kept verbatim
            if c != '"' && c != '\'' {
                curr.push('\\');
            }
            curr.push(c);
            escape = false;
        } else if c == '\\' {
            escape = true;
        } else if c == '"' || c == '\'' {
            in_string = !in_string;
        } else if c == ' ' || c == '\n' {
            if in_string {
                curr.push(c);
            } else {
                res.push(std::mem::take(&mut curr));
            }
        } else {
            curr.push(c);
        }
    }
    res.push(curr);

    res.into_iter().filter(|s| !s.is_empty()).collect()
}

// ============================================================================
// Codemodel
// ============================================================================

fn json_str(data: &Value, key: &str, default: &str) -> String {
    data.get(key)
        .and_then(Value::as_str)
        .unwrap_or(default)
        .to_string()
}

fn json_bool(data: &Value, key: &str) -> bool {
    data.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn json_str_list(data: &Value, key: &str) -> Vec<String> {
    data.get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IncludeDir {
    pub path: String,
    pub is_system: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CMakeFileGroup {
    pub defines: Vec<String>,
    pub flags: Vec<String>,
    pub includes: Vec<IncludeDir>,
    pub is_generated: bool,
    pub language: String,
    pub sources: Vec<String>,
}

impl CMakeFileGroup {
    pub fn from_json(data: &Value) -> Self {
        let defines = match data.get("defines") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            Some(Value::String(single)) if !single.is_empty() => vec![single.clone()],
            _ => Vec::new(),
        };

        // Include paths are either plain strings or {path, isSystem} objects
        let includes = data
            .get("includePath")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| match item {
                        Value::String(path) => Some(IncludeDir {
                            path: path.clone(),
                            is_system: false,
                        }),
                        Value::Object(_) => item.get("path").and_then(Value::as_str).map(|path| {
                            IncludeDir {
                                path: path.to_string(),
                                is_system: json_bool(item, "isSystem"),
                            }
                        }),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            defines,
            flags: flags_to_list(&json_str(data, "compileFlags", "")),
            includes,
            is_generated: json_bool(data, "isGenerated"),
            language: json_str(data, "language", "C"),
            sources: json_str_list(data, "sources"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CMakeTarget {
    pub artifacts: Vec<String>,
    pub src_dir: String,
    pub build_dir: String,
    pub name: String,
    pub full_name: String,
    pub install: bool,
    pub install_paths: Vec<String>,
    pub link_lang: String,
    pub link_libraries: Vec<String>,
    pub link_flags: Vec<String>,
    pub link_lang_flags: Vec<String>,
    #[serde(serialize_with = "serialize_target_type")]
    pub target_type: TargetType,
    pub files: Vec<CMakeFileGroup>,
}

fn serialize_target_type<S: serde::Serializer>(
    target_type: &TargetType,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(target_type.as_str())
}

impl CMakeTarget {
    pub fn from_json(data: &Value) -> Self {
        let install_paths: IndexSet<String> =
            json_str_list(data, "installPaths").into_iter().collect();

        Self {
            artifacts: json_str_list(data, "artifacts"),
            src_dir: json_str(data, "sourceDirectory", ""),
            build_dir: json_str(data, "buildDirectory", ""),
            name: json_str(data, "name", ""),
            full_name: json_str(data, "fullName", ""),
            install: json_bool(data, "hasInstallRule"),
            install_paths: install_paths.into_iter().collect(),
            link_lang: json_str(data, "linkerLanguage", ""),
            link_libraries: flags_to_list(&json_str(data, "linkLibraries", "")),
            link_flags: flags_to_list(&json_str(data, "linkFlags", "")),
            link_lang_flags: flags_to_list(&json_str(data, "linkLanguageFlags", "")),
            target_type: TargetType::from_cmake(&json_str(data, "type", "EXECUTABLE")),
            files: data
                .get("fileGroups")
                .and_then(Value::as_array)
                .map(|groups| groups.iter().map(CMakeFileGroup::from_json).collect())
                .unwrap_or_default(),
        }
    }

    /// Minimal target used for interface libraries missing from the codemodel
    pub fn interface_stub(name: &str, src_dir: &str, build_dir: &str) -> Self {
        Self {
            artifacts: Vec::new(),
            src_dir: src_dir.to_string(),
            build_dir: build_dir.to_string(),
            name: name.to_string(),
            full_name: String::new(),
            install: false,
            install_paths: Vec::new(),
            link_lang: String::new(),
            link_libraries: Vec::new(),
            link_flags: Vec::new(),
            link_lang_flags: Vec::new(),
            target_type: TargetType::InterfaceLibrary,
            files: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CMakeProject {
    pub src_dir: String,
    pub build_dir: String,
    pub name: String,
    pub targets: Vec<CMakeTarget>,
}

impl CMakeProject {
    pub fn from_json(data: &Value) -> Self {
        Self {
            src_dir: json_str(data, "sourceDirectory", ""),
            build_dir: json_str(data, "buildDirectory", ""),
            name: json_str(data, "name", ""),
            targets: data
                .get("targets")
                .and_then(Value::as_array)
                .map(|targets| targets.iter().map(CMakeTarget::from_json).collect())
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CMakeConfiguration {
    pub name: String,
    pub projects: Vec<CMakeProject>,
}

impl CMakeConfiguration {
    pub fn from_json(data: &Value) -> Self {
        Self {
            name: json_str(data, "name", ""),
            projects: data
                .get("projects")
                .and_then(Value::as_array)
                .map(|projects| projects.iter().map(CMakeProject::from_json).collect())
                .unwrap_or_default(),
        }
    }

    pub fn log(&self) {
        debug!(configuration = %self.name, projects = self.projects.len(), "CMake configuration");
        for project in &self.projects {
            debug!(
                project = %project.name,
                src_dir = %project.src_dir,
                build_dir = %project.build_dir,
                targets = project.targets.len(),
                "CMake project"
            );
        }
    }
}

// ============================================================================
// Target option overrides
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallMode {
    #[default]
    Preserve,
    True,
    False,
}

/// Overrides applied to one target (or globally to all targets)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SingleTargetOptions {
    pub opts: IndexMap<String, String>,
    pub lang_args: IndexMap<String, Vec<String>>,
    pub link_args: Vec<String>,
    pub install: InstallMode,
}

impl SingleTargetOptions {
    pub fn set_opt(&mut self, opt: &str, val: &str) {
        self.opts.insert(opt.to_string(), val.to_string());
    }

    pub fn append_args(&mut self, lang: &str, args: &[String]) {
        self.lang_args
            .entry(lang.to_string())
            .or_default()
            .extend_from_slice(args);
    }

    pub fn append_link_args(&mut self, args: &[String]) {
        self.link_args.extend_from_slice(args);
    }

    pub fn set_install(&mut self, install: bool) {
        self.install = if install {
            InstallMode::True
        } else {
            InstallMode::False
        };
    }

    pub fn get_override_options(&self, initial: &[String]) -> Vec<String> {
        let mut res: Vec<String> = initial
            .iter()
            .filter(|opt| {
                let key = opt.split_once('=').map_or(opt.as_str(), |(key, _)| key);
                !self.opts.contains_key(key)
            })
            .cloned()
            .collect();
        res.extend(self.opts.iter().map(|(key, val)| format!("{key}={val}")));
        res
    }

    pub fn get_compile_args(&self, lang: &str, initial: &[String]) -> Vec<String> {
        let mut res = initial.to_vec();
        if let Some(extra) = self.lang_args.get(lang) {
            res.extend_from_slice(extra);
        }
        res
    }

    pub fn get_link_args(&self, initial: &[String]) -> Vec<String> {
        let mut res = initial.to_vec();
        res.extend_from_slice(&self.link_args);
        res
    }

    pub fn get_install(&self, initial: bool) -> bool {
        match self.install {
            InstallMode::Preserve => initial,
            InstallMode::True => true,
            InstallMode::False => false,
        }
    }
}

/// Global overrides followed by per-target overrides keyed by CMake name
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetOptions {
    pub global_options: SingleTargetOptions,
    pub target_options: IndexMap<String, SingleTargetOptions>,
}

impl TargetOptions {
    /// Options for one target, created on first access
    pub fn target_mut(&mut self, tgt: &str) -> &mut SingleTargetOptions {
        self.target_options.entry(tgt.to_string()).or_default()
    }

    pub fn get_override_options(&self, tgt: &str, initial: &[String]) -> Vec<String> {
        let res = self.global_options.get_override_options(initial);
        match self.target_options.get(tgt) {
            Some(opts) => opts.get_override_options(&res),
            None => res,
        }
    }

    pub fn get_compile_args(&self, tgt: &str, lang: &str, initial: &[String]) -> Vec<String> {
        let res = self.global_options.get_compile_args(lang, initial);
        match self.target_options.get(tgt) {
            Some(opts) => opts.get_compile_args(lang, &res),
            None => res,
        }
    }

    pub fn get_link_args(&self, tgt: &str, initial: &[String]) -> Vec<String> {
        let res = self.global_options.get_link_args(initial);
        match self.target_options.get(tgt) {
            Some(opts) => opts.get_link_args(&res),
            None => res,
        }
    }

    pub fn get_install(&self, tgt: &str, initial: bool) -> bool {
        let res = self.global_options.get_install(initial);
        match self.target_options.get(tgt) {
            Some(opts) => opts.get_install(res),
            None => res,
        }
    }
}

/// Convert user supplied CMake defines into `-D` arguments
///
/// Accepts a single JSON object or a list of objects. Reserved variables are
/// skipped with a warning.
pub fn cmake_defines_to_args(raw: &Value) -> CMakeResult<Vec<String>> {
    let items: Vec<&Value> = match raw {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };

    let mut res = Vec::new();
    for item in items {
        let Value::Object(defines) = item else {
            return Err(CMakeError::InvalidDefine(format!(
                "expected an object, got {item}"
            )));
        };

        for (key, val) in defines {
            if BLACKLIST_CMAKE_DEFS.contains(&key.as_str()) {
                warn!(
                    "Setting {} is not supported, use the machine files for cross compilation. Ignoring this option",
                    key
                );
                continue;
            }

            match val {
                Value::String(s) => res.push(format!("-D{key}={s}")),
                Value::Number(n) => res.push(format!("-D{key}={n}")),
                Value::Bool(b) => res.push(format!("-D{key}={}", if *b { "ON" } else { "OFF" })),
                other => {
                    return Err(CMakeError::InvalidDefine(format!(
                        "value {other} of {key} is not supported"
                    )));
                }
            }
        }
    }

    Ok(res)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flags_to_list_quotes_and_escapes() {
        assert_eq!(
            flags_to_list(r#"-DFOO="a b" -I/x\ y  -O2"#),
            vec!["-DFOO=a b", r"-I/x\ y", "-O2"]
        );
        assert_eq!(flags_to_list("a\nb"), vec!["a", "b"]);
        assert_eq!(flags_to_list(r#"-D\"quoted\""#), vec![r#"-D"quoted""#]);
        assert!(flags_to_list("   ").is_empty());
    }

    #[test]
    fn test_language_tables() {
        assert_eq!(cmake_language("cpp"), Some("CXX"));
        assert_eq!(native_language("cxx"), Some("cpp"));
        assert_eq!(native_language("Fortran"), Some("fortran"));
        assert_eq!(native_language("ASM"), None);
        assert_eq!(backend_generator("vs2019"), Some("Visual Studio 16 2019"));
        assert_eq!(backend_generator("make"), None);
    }

    #[test]
    fn test_target_type_mapping() {
        assert_eq!(
            TargetType::from_cmake("OBJECT_LIBRARY").meson_func(),
            Some(MesonFunc::StaticLibrary)
        );
        assert_eq!(
            TargetType::from_cmake("INTERFACE_LIBRARY").meson_func(),
            Some(MesonFunc::HeaderOnly)
        );
        assert!(TargetType::from_cmake("UTILITY").is_skipped());
        assert_eq!(TargetType::from_cmake("GLOBAL_TARGET").meson_func(), None);
    }

    #[test]
    fn test_file_group_from_server_json() {
        let group = CMakeFileGroup::from_json(&json!({
            "compileFlags": "-O2 -fPIC",
            "defines": ["FOO=1"],
            "includePath": ["/a", {"path": "/b", "isSystem": true}, {"nopath": 1}],
            "language": "CXX",
            "sources": ["main.cpp"]
        }));
        assert_eq!(group.flags, vec!["-O2", "-fPIC"]);
        assert_eq!(group.defines, vec!["FOO=1"]);
        assert_eq!(group.includes.len(), 2);
        assert!(!group.includes[0].is_system);
        assert!(group.includes[1].is_system);
        assert!(!group.is_generated);
    }

    #[test]
    fn test_target_defaults() {
        let target = CMakeTarget::from_json(&json!({
            "name": "foo",
            "installPaths": ["/usr/lib", "/usr/lib"],
            "linkLibraries": "-lm -lpthread"
        }));
        assert_eq!(target.target_type, TargetType::Executable);
        assert_eq!(target.install_paths, vec!["/usr/lib"]);
        assert_eq!(target.link_libraries, vec!["-lm", "-lpthread"]);
        assert!(target.files.is_empty());
    }

    #[test]
    fn test_target_options_layering() {
        let mut options = TargetOptions::default();
        options.global_options.set_opt("cpp_std", "c++17");
        options.global_options.append_link_args(&["-lglobal".to_string()]);
        options.target_mut("foo").set_opt("b_lto", "true");
        options.target_mut("foo").set_install(false);
        options
            .target_mut("foo")
            .append_args("cpp", &["-DFOO".to_string()]);

        let initial = vec!["cpp_std=c++11".to_string(), "c_std=c99".to_string()];
        assert_eq!(
            options.get_override_options("foo", &initial),
            vec!["c_std=c99", "cpp_std=c++17", "b_lto=true"]
        );
        assert_eq!(
            options.get_override_options("bar", &initial),
            vec!["c_std=c99", "cpp_std=c++17"]
        );
        assert_eq!(options.get_compile_args("foo", "cpp", &[]), vec!["-DFOO"]);
        assert_eq!(options.get_link_args("bar", &[]), vec!["-lglobal"]);
        assert!(!options.get_install("foo", true));
        assert!(options.get_install("bar", true));
    }

    #[test]
    fn test_cmake_defines_to_args() {
        let args = cmake_defines_to_args(&json!([
            {"FOO": "bar", "NUM": 3},
            {"ENABLE": true, "DISABLE": false, "CMAKE_TOOLCHAIN_FILE": "x"}
        ]))
        .unwrap();
        // Declaration order, not key order
        assert_eq!(
            args,
            vec!["-DFOO=bar", "-DNUM=3", "-DENABLE=ON", "-DDISABLE=OFF"]
        );

        assert!(cmake_defines_to_args(&json!(["not a dict"])).is_err());
        assert!(cmake_defines_to_args(&json!({"LIST": [1, 2]})).is_err());
    }
}
