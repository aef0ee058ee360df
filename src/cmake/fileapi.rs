//! CMake file API reader
//!
//! Writes a stateless query for the `codemodel` and `cmakeFiles` objects into
//! the build tree before configure, and afterwards rebuilds the same
//! codemodel tree the server protocol would have delivered from the reply
//! index and the object files it references.

use crate::cmake::common::{CMakeBuildFile, CMakeConfiguration};
use crate::cmake::error::{CMakeError, CMakeResult};
use crate::cmake::pathutil::{join_norm, to_posix};
use serde_json::{Map, Value, json};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Keys that only carry CMake metadata and are dropped before parsing
const STRIP_KEYS: &[&str] = &["cmake", "reply", "backtrace", "backtraceGraph", "version"];

pub struct CMakeFileApi {
    build_dir: PathBuf,
    request_dir: PathBuf,
    reply_dir: PathBuf,
    cmake_sources: Vec<CMakeBuildFile>,
    cmake_configurations: Vec<CMakeConfiguration>,
}

impl CMakeFileApi {
    pub fn new(build_dir: impl Into<PathBuf>) -> Self {
        let build_dir = build_dir.into();
        let api_base_dir = build_dir.join(".cmake").join("api").join("v1");
        Self {
            request_dir: api_base_dir.join("query").join("client-meson"),
            reply_dir: api_base_dir.join("reply"),
            build_dir,
            cmake_sources: Vec::new(),
            cmake_configurations: Vec::new(),
        }
    }

    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    pub fn get_cmake_sources(&self) -> &[CMakeBuildFile] {
        &self.cmake_sources
    }

    pub fn get_cmake_configurations(&self) -> &[CMakeConfiguration] {
        &self.cmake_configurations
    }

    /// Write the query file, must happen before CMake runs
    pub fn setup_request(&self) -> CMakeResult<()> {
        fs::create_dir_all(&self.request_dir)?;

        let query = json!({
            "requests": [
                {"kind": "codemodel", "version": {"major": 2, "minor": 0}},
                {"kind": "cmakeFiles", "version": {"major": 1, "minor": 0}},
            ]
        });
        fs::write(
            self.request_dir.join("query.json"),
            serde_json::to_string_pretty(&query)?,
        )?;
        Ok(())
    }

    pub fn load_reply(&mut self) -> CMakeResult<()> {
        if !self.reply_dir.is_dir() {
            return Err(CMakeError::FileApi(
                "no response from the CMake file API".to_string(),
            ));
        }

        let index_name = WalkDir::new(&self.reply_dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .filter(|name| name.starts_with("index-") && name.ends_with(".json"))
            .max()
            .ok_or_else(|| {
                CMakeError::FileApi("failed to find the CMake file API index".to_string())
            })?;
        debug!("Loading CMake file API index {}", index_name);

        let index = Value::Object(self.reply_file_content(&index_name)?);
        let index = strip_data(index);
        let index = self.resolve_references(index, &mut HashSet::new())?;
        let index = strip_data(index);

        let objects = index
            .get("objects")
            .and_then(Value::as_array)
            .ok_or_else(|| CMakeError::FileApi("the reply index has no objects".to_string()))?;

        for object in objects {
            match object.get("kind").and_then(Value::as_str) {
                Some("codemodel") => self.parse_codemodel(object)?,
                Some("cmakeFiles") => self.parse_cmake_files(object)?,
                Some(other) => {
                    return Err(CMakeError::FileApi(format!(
                        "unexpected object kind \"{other}\" in the reply"
                    )));
                }
                None => {
                    return Err(CMakeError::FileApi(
                        "reply object without a kind".to_string(),
                    ));
                }
            }
        }

        Ok(())
    }

    fn reply_file_content(&self, filename: &str) -> CMakeResult<Map<String, Value>> {
        let real_path = self.reply_dir.join(filename);
        if !real_path.exists() {
            return Err(CMakeError::FileApi(format!(
                "file \"{}\" does not exist",
                real_path.display()
            )));
        }

        match serde_json::from_str(&fs::read_to_string(&real_path)?)? {
            Value::Object(data) => Ok(data),
            _ => Err(CMakeError::FileApi(format!(
                "\"{}\" is not a JSON object",
                real_path.display()
            ))),
        }
    }

    /// Inline every `{"jsonFile": ...}` reference
    fn resolve_references(&self, data: Value, active: &mut HashSet<String>) -> CMakeResult<Value> {
        match data {
            Value::Array(items) => items
                .into_iter()
                .map(|item| self.resolve_references(item, active))
                .collect::<CMakeResult<Vec<_>>>()
                .map(Value::Array),
            Value::Object(mut map) => {
                let reference = map
                    .get("jsonFile")
                    .and_then(Value::as_str)
                    .map(str::to_string);

                if let Some(file) = &reference {
                    if !active.insert(file.clone()) {
                        return Err(CMakeError::FileApi(format!(
                            "recursive reference to \"{file}\""
                        )));
                    }
                    map.extend(self.reply_file_content(file)?);
                }

                let mut resolved = Map::new();
                for (key, val) in map {
                    resolved.insert(key, self.resolve_references(val, active)?);
                }

                if let Some(file) = &reference {
                    active.remove(file);
                }
                Ok(Value::Object(resolved))
            }
            other => Ok(other),
        }
    }

    fn parse_codemodel(&mut self, data: &Value) -> CMakeResult<()> {
        let paths = data
            .get("paths")
            .ok_or_else(|| CMakeError::missing_key("paths", "codemodel"))?;
        if data.get("configurations").is_none() {
            return Err(CMakeError::missing_key("configurations", "codemodel"));
        }

        let source_dir = PathBuf::from(paths["source"].as_str().unwrap_or_default());
        let build_dir = PathBuf::from(paths["build"].as_str().unwrap_or_default());

        for cnf in data["configurations"].as_array().into_iter().flatten() {
            let parser = CodemodelParser {
                cnf,
                source_dir: &source_dir,
                build_dir: &build_dir,
            };
            let projects: Vec<Value> = cnf
                .get("projects")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .map(|pro| parser.parse_project(pro))
                .collect();

            let cnf_data = json!({
                "name": cnf.get("name").and_then(Value::as_str).unwrap_or_default(),
                "projects": projects,
            });
            self.cmake_configurations
                .push(CMakeConfiguration::from_json(&cnf_data));
        }

        Ok(())
    }

    fn parse_cmake_files(&mut self, data: &Value) -> CMakeResult<()> {
        let inputs = data
            .get("inputs")
            .and_then(Value::as_array)
            .ok_or_else(|| CMakeError::missing_key("inputs", "cmakeFiles"))?;
        let paths = data
            .get("paths")
            .ok_or_else(|| CMakeError::missing_key("paths", "cmakeFiles"))?;
        let src_dir = PathBuf::from(paths["source"].as_str().unwrap_or_default());

        for input in inputs {
            let path = join_norm(&src_dir, input["path"].as_str().unwrap_or_default());
            self.cmake_sources.push(CMakeBuildFile::new(
                path.to_string_lossy(),
                input["isCMake"].as_bool().unwrap_or(false),
                input["isGenerated"].as_bool().unwrap_or(false),
            ));
        }

        Ok(())
    }
}

fn strip_data(data: Value) -> Value {
    match data {
        Value::Array(items) => Value::Array(items.into_iter().map(strip_data).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(key, _)| !STRIP_KEYS.contains(&key.as_str()))
                .map(|(key, val)| (key, strip_data(val)))
                .collect(),
        ),
        other => other,
    }
}

/// Translates one file API configuration into the server protocol layout
struct CodemodelParser<'a> {
    cnf: &'a Value,
    source_dir: &'a Path,
    build_dir: &'a Path,
}

impl CodemodelParser<'_> {
    fn parse_dir(&self, dir_entry: &Value) -> (PathBuf, PathBuf) {
        let src = dir_entry["source"].as_str().unwrap_or(".");
        let bld = dir_entry["build"].as_str().unwrap_or(".");
        (join_norm(self.source_dir, src), join_norm(self.build_dir, bld))
    }

    fn directory(&self, index: Option<u64>) -> Option<&Value> {
        let index = usize::try_from(index?).ok()?;
        self.cnf.get("directories")?.as_array()?.get(index)
    }

    fn parse_project(&self, pro: &Value) -> Value {
        // Only the first directory index is meaningful for the project itself
        let first_dir = pro
            .get("directoryIndexes")
            .and_then(Value::as_array)
            .and_then(|indexes| indexes.first())
            .and_then(Value::as_u64);
        let (src_dir, bld_dir) = match self.directory(first_dir) {
            Some(dir_entry) => self.parse_dir(dir_entry),
            None => (self.source_dir.to_path_buf(), self.build_dir.to_path_buf()),
        };

        let targets: Vec<Value> = pro
            .get("targetIndexes")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_u64)
            .filter_map(|idx| self.cnf["targets"].get(usize::try_from(idx).ok()?))
            .map(|tgt| self.parse_target(tgt))
            .collect();

        json!({
            "name": pro["name"].as_str().unwrap_or_default(),
            "sourceDirectory": to_posix(src_dir),
            "buildDirectory": to_posix(bld_dir),
            "targets": targets,
        })
    }

    fn parse_target(&self, tgt: &Value) -> Value {
        let (src_dir, bld_dir) = match self.directory(tgt["directoryIndex"].as_u64()) {
            Some(dir_entry) => self.parse_dir(dir_entry),
            None => (self.source_dir.to_path_buf(), self.build_dir.to_path_buf()),
        };

        let install_paths: Vec<String> = match tgt.get("install") {
            Some(install) => {
                let prefix = PathBuf::from(install["prefix"]["path"].as_str().unwrap_or_default());
                install["destinations"]
                    .as_array()
                    .into_iter()
                    .flatten()
                    .filter_map(|dest| dest["path"].as_str())
                    .map(|dest| to_posix(prefix.join(dest)))
                    .collect()
            }
            None => Vec::new(),
        };

        // One fragment per role in practice, still space separated inside
        let mut link_flags = Vec::new();
        let mut link_libs = Vec::new();
        for fragment in tgt["link"]["commandFragments"].as_array().into_iter().flatten() {
            let text = fragment["fragment"].as_str().unwrap_or_default();
            match fragment["role"].as_str().unwrap_or_default() {
                "flags" => link_flags.push(text.to_string()),
                "libraries" => link_libs.push(text.to_string()),
                "libraryPath" => link_flags.push(format!("-L{text}")),
                "frameworkPath" => link_flags.push(format!("-F{text}")),
                _ => {}
            }
        }
        for fragment in tgt["archive"]["commandFragments"].as_array().into_iter().flatten() {
            if fragment["role"].as_str() == Some("flags") {
                link_flags.push(fragment["fragment"].as_str().unwrap_or_default().to_string());
            }
        }

        let sources = tgt["sources"].as_array().map(Vec::as_slice).unwrap_or(&[]);
        let source_path = |idx: usize| -> Option<(String, bool)> {
            let src = sources.get(idx)?;
            Some((
                src["path"].as_str()?.to_string(),
                src["isGenerated"].as_bool().unwrap_or(false),
            ))
        };

        let mut file_groups = Vec::new();
        let mut processed_src_idx = HashSet::new();
        for cg in tgt["compileGroups"].as_array().into_iter().flatten() {
            let flags: Vec<&str> = cg["compileCommandFragments"]
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(|fragment| fragment["fragment"].as_str())
                .collect();
            let defines: Vec<&str> = cg["defines"]
                .as_array()
                .into_iter()
                .flatten()
                .map(|define| define["define"].as_str().unwrap_or_default())
                .collect();

            let mut normal_src = Vec::new();
            let mut generated_src = Vec::new();
            for idx in cg["sourceIndexes"].as_array().into_iter().flatten() {
                let Some(idx) = idx.as_u64().and_then(|idx| usize::try_from(idx).ok()) else {
                    continue;
                };
                processed_src_idx.insert(idx);
                match source_path(idx) {
                    Some((path, true)) => generated_src.push(path),
                    Some((path, false)) => normal_src.push(path),
                    None => {}
                }
            }

            // isGenerated is stored per source, so one compile group may become two
            for (is_generated, group_sources) in [(false, normal_src), (true, generated_src)] {
                if group_sources.is_empty() {
                    continue;
                }
                file_groups.push(json!({
                    "defines": defines,
                    "compileFlags": flags.join(" "),
                    "language": cg["language"].as_str().unwrap_or("C"),
                    "isGenerated": is_generated,
                    "sources": group_sources,
                    "includePath": cg.get("includes").cloned().unwrap_or_else(|| json!([])),
                }));
            }
        }

        // Object libraries only have sources without a compile group
        let mut normal_src = Vec::new();
        let mut generated_src = Vec::new();
        for idx in (0..sources.len()).filter(|idx| !processed_src_idx.contains(idx)) {
            match source_path(idx) {
                Some((path, true)) => generated_src.push(path),
                Some((path, false)) => normal_src.push(path),
                None => {}
            }
        }
        for (is_generated, group_sources) in [(false, normal_src), (true, generated_src)] {
            if !group_sources.is_empty() {
                file_groups.push(json!({"isGenerated": is_generated, "sources": group_sources}));
            }
        }

        let artifacts: Vec<&str> = tgt["artifacts"]
            .as_array()
            .into_iter()
            .flatten()
            .map(|artifact| artifact["path"].as_str().unwrap_or_default())
            .collect();

        json!({
            "artifacts": artifacts,
            "sourceDirectory": to_posix(src_dir),
            "buildDirectory": to_posix(bld_dir),
            "name": tgt["name"].as_str().unwrap_or_default(),
            "fullName": tgt["nameOnDisk"].as_str().unwrap_or_default(),
            "hasInstallRule": tgt.get("install").is_some(),
            "installPaths": install_paths,
            "linkerLanguage": tgt["link"]["language"].as_str().unwrap_or("CXX"),
            "linkLibraries": link_libs.join(" "),
            "linkFlags": link_flags.join(" "),
            "type": tgt["type"].as_str().unwrap_or("EXECUTABLE"),
            "fileGroups": file_groups,
        })
    }
}
