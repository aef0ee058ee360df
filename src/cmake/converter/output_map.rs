//! Lookup of converted targets by name, artifact or generated file

use super::{ConverterCustomTarget, ConverterTarget, TargetRef};
use crate::cmake::common::{LIB_SUFFIXES, MesonFunc};
use crate::cmake::error::CMakeResult;
use crate::cmake::pathutil::{basename, is_under, normpath, relpath, to_posix};
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy)]
struct MapEntry {
    target: TargetRef,
    func: Option<MesonFunc>,
}

/// Index from target names, artifact paths and generated outputs to targets
///
/// Keys live in separate namespaces (`__tgt_*__`, `__relart_*__`,
/// `__art_*__`, `__relgen_*__`, `__gen_*__`) plus the bare full name of a
/// target's main artifact.
#[derive(Debug)]
pub struct OutputTargetMap {
    build_dir: PathBuf,
    tgt_map: HashMap<String, MapEntry>,
    rm_so_version: Regex,
}

impl OutputTargetMap {
    pub fn new(build_dir: impl Into<PathBuf>) -> CMakeResult<Self> {
        Ok(Self {
            build_dir: normpath(build_dir.into()),
            tgt_map: HashMap::new(),
            rm_so_version: Regex::new(r"(\.[0-9]+)+$")?,
        })
    }

    pub fn len(&self) -> usize {
        self.tgt_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tgt_map.is_empty()
    }

    fn assign_keys(&mut self, keys: impl IntoIterator<Item = Option<String>>, entry: MapEntry) {
        for key in keys.into_iter().flatten() {
            if !key.is_empty() {
                self.tgt_map.insert(key, entry);
            }
        }
    }

    pub fn add_target(&mut self, idx: usize, tgt: &ConverterTarget) {
        let entry = MapEntry {
            target: TargetRef::Normal(idx),
            func: tgt.meson_func(),
        };

        let mut keys = vec![Some(Self::target_key(&tgt.cmake_name)), Some(tgt.full_name.clone())];
        for artifact in &tgt.artifacts {
            for variant in self.artifact_variants(artifact) {
                keys.push(self.rel_artifact_key(&variant));
                keys.push(Some(Self::base_artifact_key(&variant)));
            }
        }
        self.assign_keys(keys, entry);
    }

    pub fn add_custom_target(&mut self, idx: usize, tgt: &ConverterCustomTarget) {
        let entry = MapEntry {
            target: TargetRef::Custom(idx),
            func: Some(MesonFunc::CustomTarget),
        };

        let mut keys = vec![Some(Self::target_key(&tgt.cmake_name))];
        for output in &tgt.original_outputs {
            keys.push(self.rel_generated_file_key(output));
            keys.push(Some(Self::base_generated_file_key(output)));
        }
        self.assign_keys(keys, entry);
    }

    /// Spellings a linker may use for `artifact`: the path itself, the path
    /// without a trailing so-version, and both without the `lib` prefix
    fn artifact_variants(&self, artifact: &str) -> Vec<String> {
        let mut variants = vec![artifact.to_string()];
        let stripped = self.rm_so_version.replace(artifact, "").into_owned();
        if stripped != artifact && !stripped.is_empty() {
            variants.push(stripped);
        }

        let without_lib: Vec<String> = variants
            .iter()
            .filter_map(|variant| {
                let name = basename(variant);
                let short = name.strip_prefix("lib").filter(|rest| !rest.is_empty())?;
                let dir = &variant[..variant.len() - name.len()];
                Some(format!("{dir}{short}"))
            })
            .collect();
        variants.extend(without_lib);
        variants
    }

    fn first_valid(&self, keys: impl IntoIterator<Item = Option<String>>) -> Option<TargetRef> {
        keys.into_iter()
            .flatten()
            .find_map(|key| self.tgt_map.get(&key))
            .map(|entry| entry.target)
    }

    /// Target registered under its CMake name
    pub fn target(&self, name: &str) -> Option<TargetRef> {
        self.first_valid([Some(Self::target_key(name))])
    }

    /// Like [`Self::target`] but only normal targets built as executables
    pub fn executable(&self, name: &str) -> Option<usize> {
        let entry = self.tgt_map.get(&Self::target_key(name))?;
        match (entry.target, entry.func) {
            (TargetRef::Normal(idx), Some(MesonFunc::Executable)) => Some(idx),
            _ => None,
        }
    }

    /// Target producing the library or binary `name`
    pub fn artifact(&self, name: &str) -> Option<TargetRef> {
        let mut candidates = vec![
            name.to_string(),
            self.rm_so_version.replace(name, "").into_owned(),
        ];
        for suffix in LIB_SUFFIXES {
            let Some(stem) = name.strip_suffix(&format!(".{suffix}")) else {
                continue;
            };
            let stem = self.rm_so_version.replace(stem, "");
            candidates.push(format!("{stem}.{suffix}"));
        }

        let mut keys = Vec::new();
        for candidate in &candidates {
            keys.push(self.rel_artifact_key(candidate));
            keys.push(Some(basename(candidate).to_string()));
            keys.push(Some(Self::base_artifact_key(candidate)));
        }
        self.first_valid(keys)
    }

    /// Custom target generating the file `name`
    pub fn generated(&self, name: &str) -> Option<usize> {
        let target = self.first_valid([
            self.rel_generated_file_key(name),
            Some(Self::base_generated_file_key(name)),
        ])?;
        match target {
            TargetRef::Custom(idx) => Some(idx),
            TargetRef::Normal(_) => None,
        }
    }

    // ========================================================================
    // Keys
    // ========================================================================

    /// `fname` relative to the build directory, `None` if outside of it
    fn rel_path(&self, fname: &str) -> Option<String> {
        let full = normpath(self.build_dir.join(fname));
        if !is_under(&full, &self.build_dir) {
            return None;
        }
        Some(to_posix(relpath(&full, &self.build_dir)))
    }

    fn target_key(name: &str) -> String {
        format!("__tgt_{name}__")
    }

    fn rel_generated_file_key(&self, fname: &str) -> Option<String> {
        self.rel_path(fname).map(|path| format!("__relgen_{path}__"))
    }

    fn base_generated_file_key(fname: &str) -> String {
        format!("__gen_{}__", basename(fname))
    }

    fn rel_artifact_key(&self, fname: &str) -> Option<String> {
        self.rel_path(fname).map(|path| format!("__relart_{path}__"))
    }

    fn base_artifact_key(fname: &str) -> String {
        format!("__art_{}__", basename(fname))
    }

    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }
}
