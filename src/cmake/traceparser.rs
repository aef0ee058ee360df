//! CMake trace lexer and interpreter
//!
//! `cmake --trace-expand` prints every command it executes as
//! `<file>(<line>):  <func>(<args>)`. The lexer turns that text into
//! [`CMakeTraceLine`] records and the parser replays a small subset of those
//! commands to rebuild the targets, properties and custom commands that the
//! codemodel does not expose.

use crate::cmake::error::{CMakeError, CMakeResult};
use crate::cmake::generator::parse_generator_expressions;
use indexmap::{IndexMap, IndexSet};
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

// ============================================================================
// Trace records
// ============================================================================

/// One command invocation recorded in the trace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CMakeTraceLine {
    pub file: String,
    pub line: usize,
    pub func: String,
    pub args: Vec<String>,
}

impl CMakeTraceLine {
    pub fn new(file: impl Into<String>, line: usize, func: &str, args: Vec<String>) -> Self {
        Self {
            file: file.into(),
            line,
            func: func.to_lowercase(),
            args,
        }
    }
}

impl fmt::Display for CMakeTraceLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({}): {}({})",
            self.file,
            self.line,
            self.func,
            self.args.join(" ")
        )
    }
}

/// Kind of a target declared in the trace
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TraceTargetType {
    Executable,
    Static,
    Shared,
    Module,
    Object,
    Interface,
    Alias,
    Normal,
    Custom,
    /// Any other type string passed to `add_library(... IMPORTED)`
    Other(String),
}

impl TraceTargetType {
    pub fn from_keyword(raw: &str) -> Self {
        match raw {
            "EXECUTABLE" => TraceTargetType::Executable,
            "STATIC" => TraceTargetType::Static,
            "SHARED" => TraceTargetType::Shared,
            "MODULE" => TraceTargetType::Module,
            "OBJECT" => TraceTargetType::Object,
            "INTERFACE" => TraceTargetType::Interface,
            "ALIAS" => TraceTargetType::Alias,
            "NORMAL" => TraceTargetType::Normal,
            "CUSTOM" => TraceTargetType::Custom,
            other => TraceTargetType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            TraceTargetType::Executable => "EXECUTABLE",
            TraceTargetType::Static => "STATIC",
            TraceTargetType::Shared => "SHARED",
            TraceTargetType::Module => "MODULE",
            TraceTargetType::Object => "OBJECT",
            TraceTargetType::Interface => "INTERFACE",
            TraceTargetType::Alias => "ALIAS",
            TraceTargetType::Normal => "NORMAL",
            TraceTargetType::Custom => "CUSTOM",
            TraceTargetType::Other(raw) => raw,
        }
    }
}

impl fmt::Display for TraceTargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A target as reconstructed from the trace
#[derive(Debug, Clone)]
pub struct TraceTarget {
    pub name: String,
    pub target_type: TraceTargetType,
    pub properties: IndexMap<String, Vec<String>>,
    pub imported: bool,
    pub depends: Vec<String>,
    pub tline: CMakeTraceLine,
    /// Index into [`CMakeTraceParser::custom_targets`] for `CUSTOM` targets
    pub generator: Option<usize>,
}

impl TraceTarget {
    fn new(name: &str, target_type: TraceTargetType, imported: bool, tline: &CMakeTraceLine) -> Self {
        Self {
            name: name.to_string(),
            target_type,
            properties: IndexMap::new(),
            imported,
            depends: Vec::new(),
            tline: tline.clone(),
            generator: None,
        }
    }

    pub fn property(&self, key: &str) -> &[String] {
        self.properties.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    fn strip_properties(&mut self) {
        for values in self.properties.values_mut() {
            for value in values.iter_mut() {
                let trimmed = value.trim();
                if trimmed.len() != value.len() {
                    *value = trimmed.to_string();
                }
            }
        }
    }

    pub fn log(&self) {
        debug!(
            name = %self.name,
            target_type = %self.target_type,
            imported = self.imported,
            depends = ?self.depends,
            "Trace target"
        );
        for (key, values) in &self.properties {
            debug!("  -- {}: {:?}", key, values);
        }
    }
}

/// A custom command or custom target recorded in the trace
#[derive(Debug, Clone)]
pub struct CMakeGeneratorTarget {
    /// `None` for anonymous `add_custom_command(OUTPUT ...)` calls
    pub name: Option<String>,
    pub outputs: Vec<String>,
    pub command: Vec<Vec<String>>,
    pub working_dir: Option<String>,
    pub depends: Vec<String>,
    pub current_bin_dir: Option<PathBuf>,
    pub current_src_dir: Option<PathBuf>,
    pub tline: CMakeTraceLine,
}

// ============================================================================
// Command dispatch
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TraceCommand {
    Set,
    Unset,
    AddExecutable,
    AddLibrary,
    AddCustomCommand,
    AddCustomTarget,
    SetProperty,
    SetTargetProperties,
    SetSourceFilesProperties,
    TargetCompileDefinitions,
    TargetCompileOptions,
    TargetIncludeDirectories,
    TargetLinkLibraries,
    TargetLinkOptions,
    AddDependencies,
    ExecuteDelayedCalls,
    ReloadVars,
}

impl TraceCommand {
    fn from_name(func: &str) -> Option<Self> {
        let cmd = match func {
            "set" => TraceCommand::Set,
            "unset" => TraceCommand::Unset,
            "add_executable" => TraceCommand::AddExecutable,
            "add_library" => TraceCommand::AddLibrary,
            "add_custom_command" => TraceCommand::AddCustomCommand,
            "add_custom_target" => TraceCommand::AddCustomTarget,
            "set_property" => TraceCommand::SetProperty,
            "set_target_properties" => TraceCommand::SetTargetProperties,
            "set_source_files_properties" => TraceCommand::SetSourceFilesProperties,
            "target_compile_definitions" => TraceCommand::TargetCompileDefinitions,
            "target_compile_options" => TraceCommand::TargetCompileOptions,
            "target_include_directories" => TraceCommand::TargetIncludeDirectories,
            "target_link_libraries" => TraceCommand::TargetLinkLibraries,
            "target_link_options" => TraceCommand::TargetLinkOptions,
            "add_dependencies" => TraceCommand::AddDependencies,
            "meson_ps_execute_delayed_calls" => TraceCommand::ExecuteDelayedCalls,
            "meson_ps_reload_vars" => TraceCommand::ReloadVars,
            _ => return None,
        };
        Some(cmd)
    }
}

const CUSTOM_COMMAND_KEYWORDS: &[&str] = &[
    "OUTPUT",
    "COMMAND",
    "MAIN_DEPENDENCY",
    "DEPENDS",
    "BYPRODUCTS",
    "IMPLICIT_DEPENDS",
    "WORKING_DIRECTORY",
    "COMMENT",
    "DEPFILE",
    "JOB_POOL",
    "VERBATIM",
    "APPEND",
    "USES_TERMINAL",
    "COMMAND_EXPAND_LISTS",
];

const TARGET_MODES: &[&str] = &[
    "INTERFACE",
    "LINK_INTERFACE_LIBRARIES",
    "PUBLIC",
    "PRIVATE",
    "LINK_PUBLIC",
    "LINK_PRIVATE",
];
const INTERFACE_MODES: &[&str] = &["INTERFACE", "LINK_INTERFACE_LIBRARIES", "PUBLIC", "LINK_PUBLIC"];
const PRIVATE_MODES: &[&str] = &["PUBLIC", "PRIVATE", "LINK_PRIVATE"];

/// Section of `add_custom_command` currently being accumulated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CustomCommandSection {
    Output,
    Command,
    Depends,
    WorkingDir,
}

fn flatten_args(args: &[String]) -> Vec<String> {
    args.iter()
        .flat_map(|arg| arg.split(';'))
        .map(str::to_string)
        .collect()
}

/// CMake's notion of a false constant
fn cmake_str_to_bool(value: &str) -> bool {
    let upper = value.to_uppercase();
    !(["", "0", "OFF", "NO", "FALSE", "N", "IGNORE"].contains(&upper.as_str())
        || upper.ends_with("NOTFOUND"))
}

// ============================================================================
// Parser
// ============================================================================

pub struct CMakeTraceParser {
    /// Flat variable namespace, scoping is not modelled
    pub vars: HashMap<String, Vec<String>>,
    pub targets: IndexMap<String, TraceTarget>,
    pub custom_targets: Vec<CMakeGeneratorTarget>,
    /// Sources flagged with `HEADER_FILE_ONLY`
    pub explicit_headers: IndexSet<PathBuf>,

    permissive: bool,
    delayed_commands: Vec<String>,
    stored_commands: Vec<CMakeTraceLine>,

    reg_tline: Regex,
    reg_other: Regex,
    reg_file_start: Regex,
    reg_file_end: Regex,
    reg_property: Regex,
}

impl CMakeTraceParser {
    pub fn new(permissive: bool) -> CMakeResult<Self> {
        Ok(Self {
            vars: HashMap::new(),
            targets: IndexMap::new(),
            custom_targets: Vec::new(),
            explicit_headers: IndexSet::new(),
            permissive,
            delayed_commands: Vec::new(),
            stored_commands: Vec::new(),
            reg_tline: Regex::new(
                r"\A\s*(.*\.(cmake|txt))\(([0-9]+)\):\s*(\w+)\(([\s\S]*?) ?\)\s*\n",
            )?,
            reg_other: Regex::new(r"\A[^\n]*\n")?,
            reg_file_start: Regex::new(r"^([A-Za-z]:)?/(.*/)*[^./]+$")?,
            reg_file_end: Regex::new(r"^.*\.[a-zA-Z]+$")?,
            reg_property: Regex::new(r"^[A-Z_]+$")?,
        })
    }

    /// Arguments that make CMake emit a trace this parser understands
    pub fn trace_args() -> Vec<String> {
        ["--trace", "--trace-expand", "--no-warn-unused-cli"]
            .iter()
            .map(|arg| arg.to_string())
            .collect()
    }

    /// The human readable trace is written to stderr
    pub fn requires_stderr() -> bool {
        true
    }

    pub fn is_permissive(&self) -> bool {
        self.permissive
    }

    /// Split raw trace text into call records
    ///
    /// Lines that are not trace records are skipped. Text that does not end
    /// in a newline cannot be skipped and is reported as an error.
    pub fn lex(&self, trace: &str) -> CMakeResult<Vec<CMakeTraceLine>> {
        let mut res = Vec::new();
        let mut loc = 0;

        while loc < trace.len() {
            let rest = &trace[loc..];

            let Some(caps) = self.reg_tline.captures(rest) else {
                let Some(skip) = self.reg_other.find(rest) else {
                    return Err(CMakeError::TraceLex {
                        position: loc,
                        snippet: rest.chars().take(80).collect(),
                    });
                };
                loc += skip.end();
                continue;
            };

            let whole = caps.get(0).map_or(0, |m| m.end());
            let file = caps.get(1).map_or("", |m| m.as_str());
            let line = caps
                .get(3)
                .and_then(|m| m.as_str().parse().ok())
                .ok_or_else(|| CMakeError::TraceLex {
                    position: loc,
                    snippet: rest.chars().take(80).collect(),
                })?;
            let func = caps.get(4).map_or("", |m| m.as_str());
            let body = caps.get(5).map_or("", |m| m.as_str());

            let args = parse_generator_expressions(body)
                .split(' ')
                .map(|arg| arg.trim().to_string())
                .collect();

            res.push(CMakeTraceLine::new(file, line, func, args));
            loc += whole;
        }

        Ok(res)
    }

    /// Lex `trace` and replay every supported command
    pub fn parse(&mut self, trace: &str) -> CMakeResult<()> {
        let lines = self.lex(trace)?;
        debug!("Parsing {} CMake trace lines", lines.len());

        for tline in lines {
            if self.delayed_commands.contains(&tline.func) {
                self.stored_commands.push(tline);
                continue;
            }
            self.execute(&tline)?;
        }

        for target in self.targets.values_mut() {
            target.strip_properties();
        }

        Ok(())
    }

    fn execute(&mut self, tline: &CMakeTraceLine) -> CMakeResult<()> {
        let Some(cmd) = TraceCommand::from_name(&tline.func) else {
            return Ok(());
        };

        match cmd {
            TraceCommand::Set => self.cmake_set(tline),
            TraceCommand::Unset => self.cmake_unset(tline),
            TraceCommand::AddExecutable => self.cmake_add_executable(tline),
            TraceCommand::AddLibrary => self.cmake_add_library(tline),
            TraceCommand::AddCustomCommand => self.cmake_add_custom_command(tline, None),
            TraceCommand::AddCustomTarget => self.cmake_add_custom_target(tline),
            TraceCommand::SetProperty => self.cmake_set_property(tline),
            TraceCommand::SetTargetProperties => self.cmake_set_target_properties(tline),
            TraceCommand::SetSourceFilesProperties => self.cmake_set_source_files_properties(tline),
            TraceCommand::TargetCompileDefinitions => self.parse_common_target_options(
                "target_compile_definitions",
                "COMPILE_DEFINITIONS",
                "INTERFACE_COMPILE_DEFINITIONS",
                tline,
                &["BEFORE"],
                false,
            ),
            TraceCommand::TargetCompileOptions => self.parse_common_target_options(
                "target_compile_options",
                "COMPILE_OPTIONS",
                "INTERFACE_COMPILE_OPTIONS",
                tline,
                &["BEFORE"],
                false,
            ),
            TraceCommand::TargetIncludeDirectories => self.parse_common_target_options(
                "target_include_directories",
                "INCLUDE_DIRECTORIES",
                "INTERFACE_INCLUDE_DIRECTORIES",
                tline,
                &["SYSTEM", "BEFORE"],
                true,
            ),
            TraceCommand::TargetLinkLibraries => self.parse_common_target_options(
                "target_link_libraries",
                "LINK_LIBRARIES",
                "INTERFACE_LINK_LIBRARIES",
                tline,
                &["BEFORE"],
                false,
            ),
            TraceCommand::TargetLinkOptions => self.parse_common_target_options(
                "target_link_options",
                "LINK_OPTIONS",
                "INTERFACE_LINK_OPTIONS",
                tline,
                &["BEFORE"],
                false,
            ),
            TraceCommand::AddDependencies => self.cmake_add_dependencies(tline),
            TraceCommand::ExecuteDelayedCalls => self.execute_delayed_calls(),
            TraceCommand::ReloadVars => {
                self.delayed_commands = self.get_cmake_var("MESON_PS_DELAYED_CALLS").to_vec();
                Ok(())
            }
        }
    }

    fn execute_delayed_calls(&mut self) -> CMakeResult<()> {
        let stored = std::mem::take(&mut self.stored_commands);
        for tline in &stored {
            self.execute(tline)?;
        }
        Ok(())
    }

    /// Report an unsupported call, or drop it in permissive mode
    fn gen_exception(&self, function: &str, message: &str, tline: &CMakeTraceLine) -> CMakeResult<()> {
        if self.permissive {
            warn!("CMake trace warning: {}() {}\n{}", function, message, tline);
            return Ok(());
        }
        Err(CMakeError::trace_call(function, message, tline))
    }

    // ------------------------------------------------------------------------
    // Variable accessors
    // ------------------------------------------------------------------------

    pub fn get_cmake_var(&self, var: &str) -> &[String] {
        self.vars.get(var).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Value of the first variable in `vars` that is set
    pub fn get_first_cmake_var_of(&self, vars: &[&str]) -> &[String] {
        vars.iter()
            .find_map(|var| self.vars.get(*var))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn var_to_str(&self, var: &str) -> Option<&str> {
        self.vars
            .get(var)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn var_to_bool(&self, var: &str) -> bool {
        self.var_to_str(var)
            .is_some_and(|value| ["1", "ON", "TRUE"].contains(&value.to_uppercase().as_str()))
    }

    // ------------------------------------------------------------------------
    // Handlers
    // ------------------------------------------------------------------------

    /// `set(<var> <value>... [PARENT_SCOPE])` and `set(<var> <value>... CACHE ...)`
    fn cmake_set(&mut self, tline: &CMakeTraceLine) -> CMakeResult<()> {
        let mut args: Vec<&str> = Vec::new();
        for arg in &tline.args {
            if arg.is_empty() || arg == "PARENT_SCOPE" {
                continue;
            }
            if arg == "CACHE" {
                break;
            }
            args.push(arg);
        }

        let Some((identifier, values)) = args.split_first() else {
            return self.gen_exception("set", "requires at least one argument", tline);
        };

        let value = values.join(" ");
        if value.is_empty() {
            self.vars.remove(*identifier);
        } else {
            self.vars.insert(
                identifier.to_string(),
                value.split(';').map(str::to_string).collect(),
            );
        }
        Ok(())
    }

    fn cmake_unset(&mut self, tline: &CMakeTraceLine) -> CMakeResult<()> {
        let Some(var) = tline.args.first() else {
            return self.gen_exception("unset", "requires at least one argument", tline);
        };
        self.vars.remove(var);
        Ok(())
    }

    fn cmake_add_executable(&mut self, tline: &CMakeTraceLine) -> CMakeResult<()> {
        let mut args = tline.args.clone();

        let Some(pos) = args.iter().position(|arg| arg == "IMPORTED") else {
            return self.gen_exception(
                "add_executable",
                "non imported executables are not supported",
                tline,
            );
        };
        args.remove(pos);

        let Some(name) = args.first() else {
            return self.gen_exception("add_executable", "requires at least 1 argument", tline);
        };

        let target = TraceTarget::new(name, TraceTargetType::Executable, true, tline);
        self.targets.insert(name.clone(), target);
        Ok(())
    }

    fn cmake_add_library(&mut self, tline: &CMakeTraceLine) -> CMakeResult<()> {
        let mut args = tline.args.clone();
        let remove = |args: &mut Vec<String>, keyword: &str| -> bool {
            match args.iter().position(|arg| arg == keyword) {
                Some(pos) => {
                    args.remove(pos);
                    true
                }
                None => false,
            }
        };

        let target = if remove(&mut args, "INTERFACE") {
            let Some(name) = args.first() else {
                return self.gen_exception(
                    "add_library",
                    "interface library name not specified",
                    tline,
                );
            };
            let imported = args.iter().any(|arg| arg == "IMPORTED");
            TraceTarget::new(name, TraceTargetType::Interface, imported, tline)
        } else if remove(&mut args, "IMPORTED") {
            if args.len() < 2 {
                return self.gen_exception("add_library", "requires at least 2 arguments", tline);
            }
            TraceTarget::new(&args[0], TraceTargetType::from_keyword(&args[1]), true, tline)
        } else if remove(&mut args, "ALIAS") {
            if args.len() < 2 {
                return self.gen_exception("add_library", "requires at least 2 arguments", tline);
            }
            // An alias behaves like an interface that links its target
            let mut target = TraceTarget::new(&args[0], TraceTargetType::Alias, false, tline);
            target
                .properties
                .insert("INTERFACE_LINK_LIBRARIES".to_string(), vec![args[1].clone()]);
            target
        } else if args.iter().any(|arg| arg == "OBJECT") {
            return self.gen_exception("add_library", "OBJECT libraries are not supported", tline);
        } else {
            let Some(name) = args.first().filter(|name| !name.is_empty()) else {
                return self.gen_exception("add_library", "requires at least 1 argument", tline);
            };
            TraceTarget::new(name, TraceTargetType::Normal, false, tline)
        };

        self.targets.insert(target.name.clone(), target);
        Ok(())
    }

    fn cmake_add_custom_command(
        &mut self,
        tline: &CMakeTraceLine,
        name: Option<&str>,
    ) -> CMakeResult<()> {
        // Commands can be passed as ';' separated lists
        let args = flatten_args(&tline.args);

        if args.is_empty() {
            return self.gen_exception("add_custom_command", "requires at least 1 argument", tline);
        }
        if args[0] == "TARGET" {
            return self.gen_exception(
                "add_custom_command",
                "TARGET syntax is currently not supported",
                tline,
            );
        }

        let mut outputs = Vec::new();
        let mut command: Vec<Vec<String>> = Vec::new();
        let mut depends = Vec::new();
        let mut working_dir: Option<String> = None;
        let mut section = None;

        for arg in args {
            if CUSTOM_COMMAND_KEYWORDS.contains(&arg.as_str()) {
                section = match arg.as_str() {
                    "OUTPUT" => Some(CustomCommandSection::Output),
                    "DEPENDS" => Some(CustomCommandSection::Depends),
                    "WORKING_DIRECTORY" => Some(CustomCommandSection::WorkingDir),
                    "COMMAND" => {
                        command.push(Vec::new());
                        Some(CustomCommandSection::Command)
                    }
                    _ => None,
                };
                continue;
            }

            match section {
                Some(CustomCommandSection::Output) => outputs.push(arg),
                Some(CustomCommandSection::Depends) => depends.push(arg),
                Some(CustomCommandSection::WorkingDir) => match working_dir.as_mut() {
                    Some(dir) => {
                        dir.push(' ');
                        dir.push_str(&arg);
                    }
                    None => working_dir = Some(arg),
                },
                Some(CustomCommandSection::Command) => {
                    if arg != "ARGS" {
                        if let Some(stage) = command.last_mut() {
                            stage.push(arg);
                        }
                    }
                }
                None => {}
            }
        }

        let target = CMakeGeneratorTarget {
            name: name.map(str::to_string),
            outputs: self.guess_files(&outputs),
            command: command.iter().map(|stage| self.guess_files(stage)).collect(),
            working_dir: working_dir.filter(|dir| !dir.is_empty()),
            depends: self.guess_files(&depends),
            current_bin_dir: self
                .var_to_str("MESON_PS_CMAKE_CURRENT_BINARY_DIR")
                .filter(|dir| !dir.is_empty())
                .map(PathBuf::from),
            current_src_dir: self
                .var_to_str("MESON_PS_CMAKE_CURRENT_SOURCE_DIR")
                .filter(|dir| !dir.is_empty())
                .map(PathBuf::from),
            tline: tline.clone(),
        };

        self.custom_targets.push(target);
        if let Some(name) = name.filter(|name| !name.is_empty()) {
            let mut trace_target = TraceTarget::new(name, TraceTargetType::Custom, false, tline);
            trace_target.generator = Some(self.custom_targets.len() - 1);
            self.targets.insert(name.to_string(), trace_target);
        }
        Ok(())
    }

    fn cmake_add_custom_target(&mut self, tline: &CMakeTraceLine) -> CMakeResult<()> {
        // Only the target name is interesting, the rest parses like a command
        match tline.args.first().filter(|name| !name.is_empty()) {
            Some(name) => {
                let name = name.clone();
                self.cmake_add_custom_command(tline, Some(&name))
            }
            None => self.gen_exception("add_custom_target", "requires at least one argument", tline),
        }
    }

    fn cmake_set_property(&mut self, tline: &CMakeTraceLine) -> CMakeResult<()> {
        let mut args = tline.args.iter();
        let scope = args.next().map(String::as_str).unwrap_or("");

        let mut append = false;
        let mut names: Vec<String> = Vec::new();
        for arg in args.by_ref() {
            // APPEND_STRING should not build a list, both are treated as APPEND
            if arg == "APPEND" || arg == "APPEND_STRING" {
                append = true;
                continue;
            }
            if arg == "PROPERTY" {
                break;
            }
            names.extend(arg.split(';').map(str::to_string));
        }

        let rest: Vec<&String> = args.collect();
        let Some((identifier, values)) = rest.split_first() else {
            return self.gen_exception("set_property", "faild to parse argument list", tline);
        };
        if values.is_empty() {
            // Setting a property to nothing
            return Ok(());
        }

        let value: Vec<String> = values
            .iter()
            .map(|v| v.as_str())
            .collect::<Vec<_>>()
            .join(" ")
            .split(';')
            .map(str::to_string)
            .collect();

        match scope {
            "TARGET" => {
                for name in &names {
                    let Some(target) = self.targets.get_mut(name) else {
                        self.gen_exception(
                            "set_property",
                            &format!("TARGET {name} not found"),
                            tline,
                        )?;
                        continue;
                    };
                    let entry = target.properties.entry(identifier.to_string()).or_default();
                    if append {
                        entry.extend(value.iter().cloned());
                    } else {
                        *entry = value.clone();
                    }
                }
            }
            "SOURCE" => {
                if identifier.as_str() == "HEADER_FILE_ONLY"
                    && value.first().is_some_and(|v| cmake_str_to_bool(v))
                {
                    for file in self.guess_files(&names) {
                        self.add_explicit_header(&file);
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn cmake_set_target_properties(&mut self, tline: &CMakeTraceLine) -> CMakeResult<()> {
        let mut args = tline.args.iter();

        let mut names: Vec<&String> = Vec::new();
        for arg in args.by_ref() {
            if arg == "PROPERTIES" {
                break;
            }
            names.push(arg);
        }

        // Property values may contain spaces, so the original quoting has to
        // be guessed. A token that looks like an upper case identifier starts
        // a new property.
        let Some(first) = args.next() else {
            return self.gen_exception(
                "set_target_properties",
                "requires at least one property",
                tline,
            );
        };

        let mut arglist: Vec<(String, Vec<String>)> = Vec::new();
        let mut name = first.clone();
        let mut values: Vec<&str> = Vec::new();
        for arg in args {
            if self.reg_property.is_match(arg) {
                if !values.is_empty() {
                    arglist.push((name, split_list(&values.join(" "))));
                }
                name = arg.clone();
                values.clear();
            } else {
                values.push(arg);
            }
        }
        if !values.is_empty() {
            arglist.push((name, split_list(&values.join(" "))));
        }

        for (prop, value) in arglist {
            for target_name in &names {
                let Some(target) = self.targets.get_mut(*target_name) else {
                    self.gen_exception(
                        "set_target_properties",
                        &format!("TARGET {target_name} not found"),
                        tline,
                    )?;
                    continue;
                };
                target.properties.insert(prop.clone(), value.clone());
            }
        }
        Ok(())
    }

    fn cmake_set_source_files_properties(&mut self, tline: &CMakeTraceLine) -> CMakeResult<()> {
        let args = flatten_args(&tline.args);
        let mut args = args.iter();

        let mut files: Vec<String> = Vec::new();
        for arg in args.by_ref() {
            if arg == "PROPERTIES" {
                break;
            }
            files.push(arg.clone());
        }

        let props: Vec<&String> = args.collect();
        let is_header = props
            .chunks(2)
            .any(|pair| pair.len() == 2 && pair[0] == "HEADER_FILE_ONLY" && cmake_str_to_bool(pair[1]));

        if is_header {
            for file in self.guess_files(&files) {
                self.add_explicit_header(&file);
            }
        }
        Ok(())
    }

    fn add_explicit_header(&mut self, file: &str) {
        if file.is_empty() {
            return;
        }
        let current_src_dir = match self.var_to_str("MESON_PS_CMAKE_CURRENT_SOURCE_DIR") {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => {
                warn!(
                    "CMake trace: source properties set before the preload script was loaded, CMAKE_CURRENT_SOURCE_DIR is unknown"
                );
                PathBuf::from(".")
            }
        };
        let path = Path::new(file);
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            current_src_dir.join(path)
        };
        self.explicit_headers.insert(path);
    }

    /// Shared implementation of the `target_*` commands
    fn parse_common_target_options(
        &mut self,
        func: &str,
        private_prop: &str,
        interface_prop: &str,
        tline: &CMakeTraceLine,
        ignore: &[&str],
        paths: bool,
    ) -> CMakeResult<()> {
        let Some((target_name, rest)) = tline.args.split_first() else {
            return self.gen_exception(func, "requires at least one argument", tline);
        };
        if !self.targets.contains_key(target_name) {
            return self.gen_exception(func, &format!("TARGET {target_name} not found"), tline);
        }

        let mut interface: Vec<String> = Vec::new();
        let mut private: Vec<String> = Vec::new();
        let mut mode = "PUBLIC";

        for arg in rest {
            if ignore.contains(&arg.as_str()) {
                continue;
            }
            if let Some(new_mode) = TARGET_MODES.iter().find(|m| **m == arg) {
                mode = *new_mode;
                continue;
            }
            if INTERFACE_MODES.contains(&mode) {
                interface.extend(arg.split(';').map(str::to_string));
            }
            if PRIVATE_MODES.contains(&mode) {
                private.extend(arg.split(';').map(str::to_string));
            }
        }

        if paths {
            interface = self.guess_files(&interface);
            private = self.guess_files(&private);
        }
        interface.retain(|item| !item.is_empty());
        private.retain(|item| !item.is_empty());

        if let Some(target) = self.targets.get_mut(target_name) {
            target
                .properties
                .entry(private_prop.to_string())
                .or_default()
                .extend(private);
            target
                .properties
                .entry(interface_prop.to_string())
                .or_default()
                .extend(interface);
        }
        Ok(())
    }

    fn cmake_add_dependencies(&mut self, tline: &CMakeTraceLine) -> CMakeResult<()> {
        if tline.args.len() < 2 {
            return self.gen_exception(
                "add_dependencies",
                "requires at least 1 target and 1 dependency",
                tline,
            );
        }

        let deps = flatten_args(&tline.args[1..]);
        let Some(target) = self.targets.get_mut(&tline.args[0]) else {
            return self.gen_exception("add_dependencies", "target not found", tline);
        };

        target.depends.extend(deps.iter().cloned());
        if let Some(generator) = target.generator {
            if let Some(custom) = self.custom_targets.get_mut(generator) {
                custom.depends.extend(deps);
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Path reassembly
    // ------------------------------------------------------------------------

    /// Rejoin paths that the trace split at spaces
    ///
    /// A token is appended to the pending string when the pending string is
    /// not an existing file, still looks like an extension-less absolute
    /// path, and either the token looks like a file name or the joined path
    /// exists. Otherwise the pending string is emitted as is.
    pub fn guess_files(&self, broken: &[String]) -> Vec<String> {
        let mut fixed = Vec::new();
        let mut curr: Option<String> = None;

        for item in broken {
            let Some(pending) = curr.take() else {
                curr = Some(item.clone());
                continue;
            };

            if Path::new(&pending).is_file() || !self.reg_file_start.is_match(&pending) {
                fixed.push(pending);
                curr = Some(item.clone());
                continue;
            }

            let joined = format!("{pending} {item}");
            if self.reg_file_end.is_match(item) || Path::new(&joined).exists() {
                fixed.push(joined);
            } else {
                // Probably a directory with a space in its name
                curr = Some(joined);
            }
        }

        if let Some(pending) = curr.filter(|pending| !pending.is_empty()) {
            fixed.push(pending);
        }
        fixed
    }

    pub fn log_targets(&self) {
        for target in self.targets.values() {
            target.log();
        }
    }
}

fn split_list(value: &str) -> Vec<String> {
    value.split(';').map(str::to_string).collect()
}
