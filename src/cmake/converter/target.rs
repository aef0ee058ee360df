//! Conversion of one codemodel target

use super::{ConversionContext, ConverterCustomTarget, CustomTargetReference, PostprocessInput, TargetRef};
use super::sanitize_cmake_name;
use crate::cmake::common::{
    BLACKLIST_CLANG_CL_LINK_FLAGS, BLACKLIST_COMPILER_FLAGS, BLACKLIST_LINK_FLAGS,
    BLACKLIST_LINK_LIBS, CMakeTarget, HEADER_SUFFIXES, MesonFunc, OBJ_SUFFIXES, TargetType,
    all_source_suffixes, has_suffix, lang_suffixes, native_language,
};
use crate::cmake::pathutil::{basename, file_stem, is_under, join_norm, normpath, relpath, to_posix};
use indexmap::{IndexMap, IndexSet};
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

const PIE_FLAGS: &[&str] = &["-fPIC", "-fpic", "-fPIE", "-fpie"];

/// A codemodel target on its way to becoming a native build target
#[derive(Debug, Clone)]
pub struct ConverterTarget {
    pub artifacts: Vec<String>,
    pub src_dir: String,
    pub build_dir: String,
    /// Sanitized identifier used in the generated build description
    pub name: String,
    pub cmake_name: String,
    pub full_name: String,
    pub target_type: TargetType,
    pub install: bool,
    pub install_dir: Option<String>,
    pub link_libraries: Vec<String>,
    pub link_flags: Vec<String>,
    pub link_with: Vec<TargetRef>,
    pub object_libs: Vec<usize>,
    pub depends_raw: Vec<String>,
    pub depends: Vec<TargetRef>,
    pub languages: Vec<String>,
    pub sources: Vec<String>,
    pub generated: Vec<String>,
    pub generated_raw: Vec<String>,
    pub generated_ctgt: Vec<CustomTargetReference>,
    pub includes: Vec<String>,
    pub sys_includes: Vec<String>,
    /// Compiler arguments per native language
    pub compile_opts: IndexMap<String, Vec<String>>,
    pub public_compile_opts: Vec<String>,
    pub pie: bool,
    /// `<option>=<value>` overrides such as `cpp_std=c++17`
    pub override_options: Vec<String>,
}

impl ConverterTarget {
    pub fn new(target: &CMakeTarget) -> Self {
        let mut tgt = Self {
            artifacts: target.artifacts.clone(),
            src_dir: target.src_dir.clone(),
            build_dir: target.build_dir.clone(),
            name: sanitize_cmake_name(&target.name),
            cmake_name: target.name.clone(),
            full_name: target.full_name.clone(),
            target_type: target.target_type.clone(),
            install: target.install,
            install_dir: target.install_paths.first().cloned(),
            link_libraries: target.link_libraries.clone(),
            link_flags: target
                .link_flags
                .iter()
                .chain(&target.link_lang_flags)
                .cloned()
                .collect(),
            link_with: Vec::new(),
            object_libs: Vec::new(),
            depends_raw: Vec::new(),
            depends: Vec::new(),
            languages: Vec::new(),
            sources: Vec::new(),
            generated: Vec::new(),
            generated_raw: Vec::new(),
            generated_ctgt: Vec::new(),
            includes: Vec::new(),
            sys_includes: Vec::new(),
            compile_opts: IndexMap::new(),
            public_compile_opts: Vec::new(),
            pie: false,
            override_options: Vec::new(),
        };

        for group in &target.files {
            let lang = native_language(&group.language).unwrap_or("c").to_string();
            if !tgt.languages.contains(&lang) {
                tgt.languages.push(lang.clone());
            }

            let opts = tgt.compile_opts.entry(lang).or_default();
            let args = group
                .flags
                .iter()
                .cloned()
                .chain(group.defines.iter().map(|define| format!("-D{define}")));
            for arg in args {
                if !opts.contains(&arg) {
                    opts.push(arg);
                }
            }

            for inc in &group.includes {
                let list = if inc.is_system {
                    &mut tgt.sys_includes
                } else {
                    &mut tgt.includes
                };
                if !list.contains(&inc.path) {
                    list.push(inc.path.clone());
                }
            }

            if group.is_generated {
                tgt.generated_raw.extend(group.sources.iter().cloned());
            } else {
                tgt.sources.extend(group.sources.iter().cloned());
            }
        }

        tgt
    }

    pub fn meson_func(&self) -> Option<MesonFunc> {
        self.target_type.meson_func()
    }

    pub fn is_object_library(&self) -> bool {
        self.target_type == TargetType::ObjectLibrary
    }

    // ========================================================================
    // Postprocessing
    // ========================================================================

    pub fn postprocess(
        &mut self,
        input: &PostprocessInput<'_>,
        ctx: &mut ConversionContext,
        custom_targets: &[ConverterCustomTarget],
    ) {
        self.process_compile_opts(input, ctx);

        if self.is_object_library() {
            self.pie = true;
        }

        if input.trace.targets.contains_key(&self.cmake_name) {
            self.collect_trace_properties(input, ctx);
        } else if !matches!(
            self.target_type,
            TargetType::Executable | TargetType::ObjectLibrary
        ) {
            warn!(
                "CMake: Target {} not found in CMake trace. This can lead to build errors",
                self.cmake_name
            );
        }

        // Relative libraries produced by the project become link targets
        let mut remaining = Vec::new();
        for lib in std::mem::take(&mut self.link_libraries) {
            if lib.contains(",-rpath,") {
                continue;
            }
            if !Path::new(&lib).is_absolute() {
                if let Some(link_with) = input.output_map.artifact(&lib) {
                    self.link_with.push(link_with);
                    continue;
                }
            }
            remaining.push(lib);
        }
        self.link_libraries = remaining;

        let mut supported: Vec<&str> = HEADER_SUFFIXES.iter().chain(OBJ_SUFFIXES).copied().collect();
        for lang in &self.languages {
            supported.extend_from_slice(lang_suffixes(lang));
        }
        self.sources.retain(|src| has_suffix(src, &supported));
        self.generated_raw.retain(|src| has_suffix(src, &supported));

        self.make_paths_relative(input);
        self.resolve_generated(input, custom_targets);

        if !self.includes.iter().any(|inc| inc == ".") {
            self.includes.push(".".to_string());
        }

        if let Some(install_dir) = &self.install_dir {
            if Path::new(install_dir).is_absolute() && is_under(install_dir, input.install_prefix) {
                self.install_dir = Some(to_posix(relpath(install_dir, input.install_prefix)));
            }
        }

        self.link_libraries
            .retain(|lib| !BLACKLIST_LINK_LIBS.contains(&lib.to_lowercase().as_str()));
        self.link_flags.retain(|flag| check_link_flag(flag));

        self.link_libraries = handle_frameworks(&self.link_libraries);
        self.link_flags = handle_frameworks(&self.link_flags);

        for dep in &self.depends_raw {
            if let Some(tgt) = input.output_map.target(dep) {
                self.depends.push(tgt);
            }
        }
    }

    /// Pull language standards, PIC flags and generated flag files out of
    /// the C and C++ compiler arguments
    fn process_compile_opts(&mut self, input: &PostprocessInput<'_>, ctx: &mut ConversionContext) {
        for lang in ["c", "cpp"] {
            let Some(opts) = self.compile_opts.get(lang) else {
                continue;
            };

            let mut kept = Vec::new();
            for opt in opts {
                if let Some(caps) = ctx.std_regex.captures(opt) {
                    let std = caps.get(2).map_or("", |m| m.as_str());
                    let supported = all_lang_stds(input, lang);
                    if !supported.iter().any(|known| known == std) {
                        ctx.warn_once(
                            &format!("std:{lang}:{std}"),
                            &format!(
                                "Unknown {lang}_std \"{std}\" -> Ignoring. Try setting the project-level {lang}_std if build errors occur. Known {lang}_stds are: {}",
                                supported.join(" ")
                            ),
                        );
                        continue;
                    }
                    self.override_options.push(format!("{lang}_std={std}"));
                } else if PIE_FLAGS.contains(&opt.as_str()) {
                    self.pie = true;
                } else if input.output_map.generated(opt).is_some() {
                    // Generated files passed as flags still need their custom target
                    self.generated_raw.push(opt.clone());
                    kept.push(opt.clone());
                } else if BLACKLIST_COMPILER_FLAGS.contains(&opt.as_str()) {
                    continue;
                } else {
                    kept.push(opt.clone());
                }
            }
            self.compile_opts.insert(lang.to_string(), kept);
        }
    }

    /// Walk the trace targets reachable through the link interface
    fn collect_trace_properties(&mut self, input: &PostprocessInput<'_>, ctx: &ConversionContext) {
        let trace = input.trace;
        if let Some(tgt) = trace.targets.get(&self.cmake_name) {
            self.depends_raw = tgt.depends.clone();
        }

        let mut to_process: VecDeque<String> = VecDeque::from([self.cmake_name.clone()]);
        let mut processed: IndexSet<String> = IndexSet::new();

        while let Some(curr) = to_process.pop_front() {
            if processed.contains(&curr) {
                continue;
            }
            let Some(tgt) = trace.targets.get(&curr) else {
                continue;
            };

            let non_empty = |key: &str| -> Vec<String> {
                tgt.property(key)
                    .iter()
                    .filter(|val| !val.is_empty())
                    .cloned()
                    .collect()
            };

            self.includes.extend(non_empty("INTERFACE_INCLUDE_DIRECTORIES"));
            self.link_flags.extend(non_empty("INTERFACE_LINK_OPTIONS"));
            self.public_compile_opts.extend(
                non_empty("INTERFACE_COMPILE_DEFINITIONS")
                    .iter()
                    .map(|def| format!("-D{}", def.strip_prefix("-D").unwrap_or(def))),
            );
            self.public_compile_opts
                .extend(non_empty("INTERFACE_COMPILE_OPTIONS"));

            let cfgs = non_empty("IMPORTED_CONFIGURATIONS");
            let mut cfg = cfgs.first().cloned().unwrap_or_default();
            let has_cfg = |name: &str| cfgs.iter().any(|c| c == name);
            if input.env.debug {
                if has_cfg("DEBUG") {
                    cfg = "DEBUG".to_string();
                } else if has_cfg("RELEASE") {
                    cfg = "RELEASE".to_string();
                }
            } else if has_cfg("RELEASE") {
                cfg = "RELEASE".to_string();
            }

            let mut libraries = Vec::new();
            let first_present = |keys: &[String]| -> Vec<String> {
                keys.iter()
                    .find(|key| tgt.properties.contains_key(key.as_str()))
                    .map(|key| non_empty(key.as_str()))
                    .unwrap_or_default()
            };
            libraries.extend(first_present(&[
                format!("IMPORTED_IMPLIB_{cfg}"),
                "IMPORTED_IMPLIB".to_string(),
                format!("IMPORTED_LOCATION_{cfg}"),
                "IMPORTED_LOCATION".to_string(),
            ]));

            let mut other_deps = non_empty("LINK_LIBRARIES");
            other_deps.extend(non_empty("INTERFACE_LINK_LIBRARIES"));
            other_deps.extend(first_present(&[
                format!("IMPORTED_LINK_DEPENDENT_LIBRARIES_{cfg}"),
                "IMPORTED_LINK_DEPENDENT_LIBRARIES".to_string(),
            ]));

            for dep in other_deps {
                if trace.targets.contains_key(&dep) {
                    to_process.push_back(dep);
                } else if ctx.lib_regex.is_match(&dep) || Path::new(&dep).exists() {
                    libraries.push(dep);
                }
            }

            for lib in libraries {
                if !self.link_libraries.contains(&lib) {
                    self.link_libraries.push(lib);
                }
            }

            processed.insert(curr);
        }
    }

    /// Rewrite a source or include path relative to the project, `None` drops it
    fn rel_path(&self, input: &PostprocessInput<'_>, raw: &str, is_header: bool, is_generated: bool) -> Option<String> {
        let env_src = normpath(&input.env.source_dir);
        let env_build = normpath(&input.env.build_dir);
        let root_src = normpath(input.root_src_dir);
        let subdir_build = env_build.join(input.subdir);

        let x = join_norm(&self.src_dir, raw);
        let x_str = to_posix(&x);

        if !x.exists() && !has_suffix(&x_str, OBJ_SUFFIXES) && !is_generated {
            let parent_of_generated = self
                .generated_raw
                .iter()
                .any(|r#gen| is_under(join_norm(&root_src, r#gen), &x));
            if parent_of_generated && is_under(&x, &env_build) {
                if let Err(e) = fs::create_dir_all(&x) {
                    warn!("CMake: failed to create {}: {}", x_str, e);
                    return None;
                }
                return Some(to_posix(relpath(&x, &subdir_build)));
            }
            warn!("CMake: path {} does not exist.", x_str);
            warn!(" --> Ignoring. This can lead to build errors.");
            return None;
        }

        if input.trace.explicit_headers.contains(&x) {
            return None;
        }

        if is_under(&x, &env_src) && !(is_under(&x, &root_src) || is_under(&x, &env_build)) {
            warn!(
                "CMake: path {} is inside the root project but not inside the subproject.",
                x_str
            );
            warn!(" --> Ignoring. This can lead to build errors.");
            return None;
        }

        if is_under(&x, &env_build) {
            return Some(if is_header {
                to_posix(relpath(&x, &subdir_build))
            } else {
                to_posix(relpath(&x, &root_src))
            });
        }

        if is_under(&x, &root_src) {
            return Some(to_posix(relpath(&x, &root_src)));
        }

        Some(x_str)
    }

    fn make_paths_relative(&mut self, input: &PostprocessInput<'_>) {
        let env_build = normpath(&input.env.build_dir);
        let build_dir_rel = to_posix(relpath(&self.build_dir, env_build.join(input.subdir)));

        let generated_raw: Vec<String> = self
            .generated_raw
            .iter()
            .filter_map(|r#gen| self.rel_path(input, r#gen, false, true))
            .collect();
        self.generated_raw = generated_raw;

        let unique_includes: IndexSet<&String> = self.includes.iter().collect();
        let mut includes: IndexSet<String> = unique_includes
            .into_iter()
            .filter_map(|inc| self.rel_path(input, inc, true, false))
            .collect();
        includes.insert(build_dir_rel);

        let unique_sys: IndexSet<&String> = self.sys_includes.iter().collect();
        let sys_includes: IndexSet<String> = unique_sys
            .into_iter()
            .filter_map(|inc| self.rel_path(input, inc, true, false))
            .collect();

        let sources: Vec<String> = self
            .sources
            .iter()
            .filter_map(|src| self.rel_path(input, src, false, false))
            .collect();

        self.includes = includes.into_iter().collect();
        self.sys_includes = sys_includes.into_iter().collect();
        self.sources = sources;
    }

    /// Split generated sources into custom target outputs and plain files
    fn resolve_generated(&mut self, input: &PostprocessInput<'_>, custom_targets: &[ConverterCustomTarget]) {
        for r#gen in &self.generated_raw {
            let reference = input
                .output_map
                .generated(r#gen)
                .and_then(|idx| custom_targets.get(idx).and_then(|ctgt| ctgt.get_ref(idx, r#gen)));
            match reference {
                Some(reference) => self.generated_ctgt.push(reference),
                None => self.generated.push(r#gen.clone()),
            }
        }
    }

    // ========================================================================
    // Later passes
    // ========================================================================

    fn append_objlib_sources(&mut self, obj: &ConverterTarget) {
        fn merge<T: Clone + Eq + std::hash::Hash>(into: &mut Vec<T>, from: &[T]) {
            let merged: IndexSet<T> = into.iter().chain(from).cloned().collect();
            *into = merged.into_iter().collect();
        }

        merge(&mut self.includes, &obj.includes);
        merge(&mut self.sources, &obj.sources);
        merge(&mut self.generated, &obj.generated);
        merge(&mut self.generated_ctgt, &obj.generated_ctgt);

        // Compiler arguments may be required to build the inherited sources
        for (lang, opts) in &obj.compile_opts {
            let own = self.compile_opts.entry(lang.clone()).or_default();
            for opt in opts {
                if !own.contains(opt) {
                    own.push(opt.clone());
                }
            }
        }
    }

    pub fn cleanup_dependencies(&mut self) {
        if self.meson_func().is_some_and(|func| func.transfers_dependencies()) {
            self.depends.clear();
        }
    }

    pub fn log(&self) {
        debug!(
            name = %self.name,
            cmake_name = %self.cmake_name,
            target_type = %self.target_type,
            install = self.install,
            install_dir = ?self.install_dir,
            pie = self.pie,
            "Converter target"
        );
        debug!("  -- artifacts:    {:?}", self.artifacts);
        debug!("  -- languages:    {:?}", self.languages);
        debug!("  -- sources:      {:?}", self.sources);
        debug!("  -- generated:    {:?}", self.generated);
        debug!("  -- includes:     {:?}", self.includes);
        debug!("  -- sys_includes: {:?}", self.sys_includes);
        debug!("  -- link_libs:    {:?}", self.link_libraries);
        debug!("  -- link_flags:   {:?}", self.link_flags);
        debug!("  -- options:      {:?}", self.override_options);
        for (lang, opts) in &self.compile_opts {
            debug!("  -- {}_args: {:?}", lang, opts);
        }
    }
}

fn all_lang_stds(input: &PostprocessInput<'_>, lang: &str) -> Vec<String> {
    input
        .env
        .get_compiler(lang)
        .map(|compiler| compiler.std_options.clone())
        .unwrap_or_default()
}

fn check_link_flag(flag: &str) -> bool {
    let lower = flag.to_lowercase();
    if BLACKLIST_LINK_FLAGS.contains(&lower.as_str())
        || BLACKLIST_COMPILER_FLAGS.contains(&flag)
        || BLACKLIST_CLANG_CL_LINK_FLAGS.contains(&flag)
    {
        return false;
    }
    !flag.starts_with("/D")
}

/// Turn existing `*.framework` paths into `-framework <name>`
fn handle_frameworks(flags: &[String]) -> Vec<String> {
    let mut res = Vec::new();
    for flag in flags {
        let path = Path::new(flag);
        if path.exists() && basename(flag).ends_with(".framework") {
            res.push("-framework".to_string());
            res.push(file_stem(flag).to_string());
        } else {
            res.push(flag.clone());
        }
    }
    res
}

/// Attach object libraries whose objects show up among the generated
/// sources of `targets[idx]`, then drop those object files
pub fn process_object_libs(
    ctx: &mut ConversionContext,
    targets: &mut [ConverterTarget],
    idx: usize,
    object_libs: &[usize],
    linker_workaround: bool,
) {
    let object_stems: Vec<String> = targets[idx]
        .generated
        .iter()
        .map(|r#gen| basename(r#gen))
        .filter(|name| has_suffix(name, OBJ_SUFFIXES))
        .map(|name| file_stem(name).to_string())
        .collect();
    let exts: Vec<&str> = all_source_suffixes().collect();

    let mut matched = Vec::new();
    for &obj_idx in object_libs {
        let obj = &targets[obj_idx];
        let source_files: Vec<&str> = obj
            .sources
            .iter()
            .chain(&obj.generated)
            .map(|src| basename(src))
            .collect();

        for stem in &object_stems {
            // Some generators drop the source suffix from object names
            let mut candidates = vec![stem.clone()];
            if !has_suffix(stem, &exts) {
                ctx.warn_once(
                    "objlib-guess",
                    "Object files do not contain source file extensions, thus falling back to guessing them.",
                );
                candidates.extend(exts.iter().map(|ext| format!("{stem}.{ext}")));
            }
            if candidates.iter().any(|c| source_files.contains(&c.as_str())) {
                matched.push(obj_idx);
                break;
            }
        }
    }

    for obj_idx in matched {
        let obj = targets[obj_idx].clone();
        let tgt = &mut targets[idx];
        if linker_workaround {
            tgt.append_objlib_sources(&obj);
        } else {
            let includes: IndexSet<String> = tgt.includes.iter().chain(&obj.includes).cloned().collect();
            tgt.includes = includes.into_iter().collect();
            tgt.object_libs.push(obj_idx);
        }
    }

    targets[idx]
        .generated
        .retain(|r#gen| !has_suffix(r#gen, OBJ_SUFFIXES));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmake::converter::OutputTargetMap;
    use crate::cmake::traceparser::CMakeTraceParser;
    use crate::environment::{CompilerInfo, HostEnvironment};
    use serde_json::json;
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        root: PathBuf,
        env: HostEnvironment,
        trace: CMakeTraceParser,
    }

    impl Fixture {
        /// `<tmp>/src` is the host source tree, the subproject lives in `sub`
        fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let root = temp.path().to_path_buf();
            fs::create_dir_all(root.join("src/sub/inc")).unwrap();
            fs::create_dir_all(root.join("build/sub/__CMake_build")).unwrap();
            fs::write(root.join("src/sub/main.cpp"), "").unwrap();
            fs::write(root.join("src/sub/util.c"), "").unwrap();
            fs::write(root.join("src/sub/readme.txt"), "").unwrap();

            let mut env = HostEnvironment {
                source_dir: root.join("src"),
                build_dir: root.join("build"),
                subdir: PathBuf::from("sub"),
                prefix: PathBuf::from("/usr"),
                ..HostEnvironment::default()
            };
            env.compilers.insert(
                "cpp".to_string(),
                CompilerInfo {
                    exelist: vec!["c++".to_string()],
                    std_options: vec!["c++11".to_string(), "c++17".to_string()],
                    ..CompilerInfo::default()
                },
            );

            Self {
                _temp: temp,
                root,
                env,
                trace: CMakeTraceParser::new(true).unwrap(),
            }
        }

        fn src(&self) -> PathBuf {
            self.root.join("src/sub")
        }

        fn cmake_build(&self) -> PathBuf {
            self.root.join("build/sub/__CMake_build")
        }

        fn target(&self, data: serde_json::Value) -> ConverterTarget {
            let mut data = data;
            data["sourceDirectory"] = json!(to_posix(self.src()));
            data["buildDirectory"] = json!(to_posix(self.cmake_build()));
            ConverterTarget::new(&CMakeTarget::from_json(&data))
        }

        fn postprocess(&self, tgt: &mut ConverterTarget, map: &OutputTargetMap) {
            let src = self.src();
            let subdir = PathBuf::from("sub");
            let build = self.cmake_build();
            let input = PostprocessInput {
                env: &self.env,
                root_src_dir: &src,
                subdir: &subdir,
                build_dir: &build,
                install_prefix: Path::new("/usr"),
                trace: &self.trace,
                output_map: map,
            };
            let mut ctx = ConversionContext::new().unwrap();
            tgt.postprocess(&input, &mut ctx, &[]);
        }
    }

    #[test]
    fn test_new_groups_languages_and_includes() {
        let tgt = ConverterTarget::new(&CMakeTarget::from_json(&json!({
            "name": "foo::bar",
            "type": "STATIC_LIBRARY",
            "installPaths": ["/usr/lib"],
            "fileGroups": [
                {"language": "CXX", "compileFlags": "-O2", "defines": ["A=1"],
                 "includePath": ["/x", {"path": "/sys", "isSystem": true}], "sources": ["a.cpp"]},
                {"language": "CXX", "compileFlags": "-O2", "includePath": ["/x"], "sources": ["b.cpp"]},
                {"language": "ASM", "isGenerated": true, "sources": ["gen.c"]}
            ]
        })));

        assert_eq!(tgt.name, "cm_foo__bar");
        assert_eq!(tgt.cmake_name, "foo::bar");
        assert_eq!(tgt.languages, vec!["cpp", "c"]);
        assert_eq!(tgt.compile_opts["cpp"], vec!["-O2", "-DA=1"]);
        assert_eq!(tgt.includes, vec!["/x"]);
        assert_eq!(tgt.sys_includes, vec!["/sys"]);
        assert_eq!(tgt.sources, vec!["a.cpp", "b.cpp"]);
        assert_eq!(tgt.generated_raw, vec!["gen.c"]);
        assert_eq!(tgt.install_dir.as_deref(), Some("/usr/lib"));
        assert_eq!(tgt.meson_func(), Some(MesonFunc::StaticLibrary));
    }

    #[test]
    fn test_postprocess_flags_and_paths() {
        let fx = Fixture::new();
        let mut tgt = fx.target(json!({
            "name": "app",
            "type": "EXECUTABLE",
            "hasInstallRule": true,
            "installPaths": ["/usr/bin"],
            "linkFlags": "/machine:X64 -Wl,--as-needed /DFOO",
            "linkLibraries": "-Wl,-rpath,/x -lm kernel32.lib",
            "fileGroups": [{
                "language": "CXX",
                "compileFlags": "-std=c++17 -std=gnu++98 -fPIC -Wall -O2",
                "includePath": [format!("{}/inc", to_posix(fx.src())), "/nonexistent/include"],
                "sources": ["main.cpp", "readme.txt", "missing.cpp"]
            }]
        }));
        let map = OutputTargetMap::new(fx.cmake_build()).unwrap();
        fx.postprocess(&mut tgt, &map);

        assert_eq!(tgt.override_options, vec!["cpp_std=c++17"]);
        assert!(tgt.pie);
        assert_eq!(tgt.compile_opts["cpp"], vec!["-O2"]);
        assert_eq!(tgt.sources, vec!["main.cpp"]);
        assert_eq!(tgt.includes, vec!["inc", "__CMake_build", "."]);
        assert_eq!(tgt.install_dir.as_deref(), Some("bin"));
        assert_eq!(tgt.link_flags, vec!["-Wl,--as-needed"]);
        assert_eq!(tgt.link_libraries, vec!["-lm"]);
    }

    #[test]
    fn test_postprocess_link_with_project_artifact() {
        let fx = Fixture::new();
        let lib = fx.target(json!({
            "name": "util",
            "type": "STATIC_LIBRARY",
            "artifacts": [format!("{}/libutil.a", to_posix(fx.cmake_build()))],
        }));
        let mut app = fx.target(json!({
            "name": "app",
            "type": "EXECUTABLE",
            "linkLibraries": "libutil.a -lpthread",
        }));

        let mut map = OutputTargetMap::new(fx.cmake_build()).unwrap();
        map.add_target(0, &lib);
        fx.postprocess(&mut app, &map);

        assert_eq!(app.link_with, vec![TargetRef::Normal(0)]);
        assert_eq!(app.link_libraries, vec!["-lpthread"]);
    }

    #[test]
    fn test_object_libs_detection() {
        let obj = ConverterTarget {
            sources: vec!["util.c".to_string()],
            includes: vec!["objinc".to_string()],
            compile_opts: IndexMap::from([("c".to_string(), vec!["-DOBJ".to_string()])]),
            ..ConverterTarget::new(&CMakeTarget::interface_stub("obj", "/s", "/b"))
        };
        let user = ConverterTarget {
            generated: vec!["CMakeFiles/obj.dir/util.c.o".to_string(), "gen.c".to_string()],
            includes: vec!["inc".to_string()],
            ..ConverterTarget::new(&CMakeTarget::interface_stub("user", "/s", "/b"))
        };

        let mut ctx = ConversionContext::new().unwrap();
        let mut targets = vec![obj.clone(), user.clone()];
        process_object_libs(&mut ctx, &mut targets, 1, &[0], false);
        assert_eq!(targets[1].object_libs, vec![0]);
        assert_eq!(targets[1].includes, vec!["inc", "objinc"]);
        assert_eq!(targets[1].generated, vec!["gen.c"]);

        let mut targets = vec![obj, user];
        process_object_libs(&mut ctx, &mut targets, 1, &[0], true);
        assert!(targets[1].object_libs.is_empty());
        assert_eq!(targets[1].sources, vec!["util.c"]);
        assert_eq!(targets[1].compile_opts["c"], vec!["-DOBJ"]);
    }

    #[test]
    fn test_object_libs_without_language_suffix() {
        let obj = ConverterTarget {
            sources: vec!["util.cpp".to_string()],
            ..ConverterTarget::new(&CMakeTarget::interface_stub("obj", "/s", "/b"))
        };
        let user = ConverterTarget {
            generated: vec!["obj.dir/Debug/util.obj".to_string()],
            ..ConverterTarget::new(&CMakeTarget::interface_stub("user", "/s", "/b"))
        };

        let mut ctx = ConversionContext::new().unwrap();
        let mut targets = vec![obj, user];
        process_object_libs(&mut ctx, &mut targets, 1, &[0], false);
        assert_eq!(targets[1].object_libs, vec![0]);
        assert!(targets[1].generated.is_empty());
    }

    #[test]
    fn test_link_flag_filter() {
        assert!(!check_link_flag("/DEBUG"));
        assert!(!check_link_flag("/DNDEBUG"));
        assert!(!check_link_flag("/MDd"));
        assert!(!check_link_flag("-Wall"));
        assert!(check_link_flag("-Wl,-z,defs"));
    }
}
