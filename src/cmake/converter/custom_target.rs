//! Conversion of `add_custom_command` / `add_custom_target` records

use super::{ConversionContext, CustomTargetReference, PostprocessInput, TargetRef};
use super::sanitize_cmake_name;
use crate::cmake::common::MesonFunc;
use crate::cmake::pathutil::{basename, is_under, join_norm, normpath, relpath, to_posix};
use crate::cmake::traceparser::CMakeGeneratorTarget;
use indexmap::{IndexMap, IndexSet};
use std::path::{Path, PathBuf};
use tracing::debug;

/// One argument of a custom command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandArg {
    Literal(String),
    /// Executable built by the project, index into the normal targets
    Executable(usize),
}

/// An input of a custom target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CustomInput {
    /// Source file relative to the project source directory
    File(String),
    Generated(CustomTargetReference),
}

#[derive(Debug, Clone)]
pub struct ConverterCustomTarget {
    pub name: String,
    pub cmake_name: String,
    /// Absolute output paths as declared in CMake
    pub original_outputs: Vec<String>,
    /// Output file names, unique across the project
    pub outputs: Vec<String>,
    /// Renamed outputs, original name to unique name
    pub conflict_map: IndexMap<String, String>,
    pub command: Vec<Vec<CommandArg>>,
    raw_command: Vec<Vec<String>>,
    pub working_dir: String,
    raw_working_dir: Option<String>,
    pub depends_raw: Vec<String>,
    pub inputs: Vec<CustomInput>,
    pub depends: Vec<TargetRef>,
    pub current_bin_dir: Option<PathBuf>,
    pub current_src_dir: Option<PathBuf>,
}

impl ConverterCustomTarget {
    pub fn new(target: &CMakeGeneratorTarget, ctx: &mut ConversionContext) -> Self {
        let cmake_name = match &target.name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => {
                let name = format!("custom_tgt_{}", ctx.tgt_counter);
                ctx.tgt_counter += 1;
                name
            }
        };

        Self {
            name: sanitize_cmake_name(&cmake_name),
            cmake_name,
            original_outputs: target.outputs.clone(),
            outputs: target.outputs.iter().map(|out| basename(out).to_string()).collect(),
            conflict_map: IndexMap::new(),
            command: Vec::new(),
            raw_command: target.command.clone(),
            working_dir: String::new(),
            raw_working_dir: target.working_dir.clone(),
            depends_raw: target.depends.clone(),
            inputs: Vec::new(),
            depends: Vec::new(),
            current_bin_dir: target.current_bin_dir.clone(),
            current_src_dir: target.current_src_dir.clone(),
        }
    }

    pub fn meson_func(&self) -> MesonFunc {
        MesonFunc::CustomTarget
    }

    /// Reference to the output slot producing `fname`, `self_idx` is this
    /// target's index in the custom target list
    pub fn get_ref(&self, self_idx: usize, fname: &str) -> Option<CustomTargetReference> {
        let mut name = basename(fname);
        if let Some(renamed) = self.conflict_map.get(name) {
            name = renamed;
        }
        self.outputs
            .iter()
            .position(|out| out == name)
            .map(|index| CustomTargetReference {
                ctgt: self_idx,
                index,
            })
    }

    /// Resolve working directory, outputs and commands
    fn postprocess_outputs(
        &mut self,
        input: &PostprocessInput<'_>,
        ctx: &mut ConversionContext,
        all_outputs: &mut IndexSet<String>,
    ) {
        let bin_dir = self
            .current_bin_dir
            .clone()
            .unwrap_or_else(|| input.build_dir.to_path_buf());

        // Relative working directories and outputs live in the current binary dir
        self.working_dir = match self.raw_working_dir.as_deref() {
            Some(dir) if !dir.is_empty() => to_posix(join_norm(&bin_dir, dir)),
            _ => to_posix(&bin_dir),
        };
        self.original_outputs = self
            .original_outputs
            .iter()
            .map(|out| to_posix(join_norm(&bin_dir, out)))
            .collect();

        let mut outputs = Vec::with_capacity(self.outputs.len());
        for out in &self.outputs {
            let mut unique = out.clone();
            if all_outputs.contains(out) {
                unique = format!("c{}_{}", ctx.out_counter, out);
                ctx.out_counter += 1;
                self.conflict_map.insert(out.clone(), unique.clone());
            }
            all_outputs.insert(unique.clone());
            outputs.push(unique);
        }
        self.outputs = outputs;

        self.command = self
            .raw_command
            .iter()
            .map(|cmd| {
                cmd.iter()
                    .filter(|arg| !arg.is_empty())
                    .map(|arg| match input.output_map.executable(arg) {
                        Some(idx) => CommandArg::Executable(idx),
                        None => CommandArg::Literal(arg.clone()),
                    })
                    .collect()
            })
            .collect();

        // Dummy output so the target can still be depended on
        if self.outputs.is_empty() {
            self.outputs = vec![format!("{}.h", self.name)];
        }
    }

    pub fn log(&self) {
        debug!(
            name = %self.name,
            cmake_name = %self.cmake_name,
            working_dir = %self.working_dir,
            "Converter custom target"
        );
        debug!("  -- outputs:  {:?}", self.outputs);
        debug!("  -- original: {:?}", self.original_outputs);
        debug!("  -- conflict: {:?}", self.conflict_map);
        debug!("  -- command:  {:?}", self.command);
        debug!("  -- inputs:   {:?}", self.inputs);
        debug!("  -- depends:  {:?}", self.depends);
    }
}

/// Classify the raw dependencies of `custom_targets[idx]`
///
/// Existing files win over targets so that sources are not mistaken for the
/// outputs of another target.
fn resolve_dependencies(
    input: &PostprocessInput<'_>,
    custom_targets: &[ConverterCustomTarget],
    idx: usize,
) -> (Vec<CustomInput>, Vec<TargetRef>) {
    let ctgt = &custom_targets[idx];
    let root = normpath(input.root_src_dir);
    let src_dir = ctgt
        .current_src_dir
        .clone()
        .unwrap_or_else(|| input.root_src_dir.to_path_buf());

    let mut inputs = Vec::new();
    let mut depends = Vec::new();

    for raw in ctgt.depends_raw.iter().filter(|raw| !raw.is_empty()) {
        let raw_path = Path::new(raw);
        let in_src_dir = normpath(src_dir.join(raw_path));

        if !raw_path.is_absolute() && in_src_dir.exists() && is_under(&in_src_dir, &root) {
            inputs.push(CustomInput::File(to_posix(relpath(&in_src_dir, &root))));
        } else if raw_path.is_absolute() && raw_path.exists() && is_under(raw_path, &root) {
            inputs.push(CustomInput::File(to_posix(relpath(raw_path, &root))));
        } else if let Some(art) = input.output_map.artifact(raw) {
            depends.push(art);
        } else if let Some(tgt) = input.output_map.target(raw) {
            depends.push(tgt);
        } else if let Some(reference) = input
            .output_map
            .generated(raw)
            .and_then(|r#gen| custom_targets.get(r#gen).and_then(|other| other.get_ref(r#gen, raw)))
        {
            inputs.push(CustomInput::Generated(reference));
        }
    }

    (inputs, depends)
}

/// Postprocess `custom_targets[idx]`; `all_outputs` collects the output
/// names of the targets processed so far
pub fn postprocess(
    input: &PostprocessInput<'_>,
    ctx: &mut ConversionContext,
    custom_targets: &mut [ConverterCustomTarget],
    idx: usize,
    all_outputs: &mut IndexSet<String>,
) {
    custom_targets[idx].postprocess_outputs(input, ctx, all_outputs);
    let (inputs, depends) = resolve_dependencies(input, custom_targets, idx);
    custom_targets[idx].inputs.extend(inputs);
    custom_targets[idx].depends.extend(depends);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmake::common::CMakeTarget;
    use crate::cmake::converter::{ConverterTarget, OutputTargetMap};
    use crate::cmake::traceparser::{CMakeTraceLine, CMakeTraceParser};
    use crate::environment::HostEnvironment;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn generator(
        name: Option<&str>,
        outputs: &[&str],
        command: &[&[&str]],
        depends: &[&str],
        bin_dir: &Path,
        src_dir: &Path,
    ) -> CMakeGeneratorTarget {
        CMakeGeneratorTarget {
            name: name.map(str::to_string),
            outputs: outputs.iter().map(|o| o.to_string()).collect(),
            command: command
                .iter()
                .map(|cmd| cmd.iter().map(|arg| arg.to_string()).collect())
                .collect(),
            working_dir: None,
            depends: depends.iter().map(|d| d.to_string()).collect(),
            current_bin_dir: Some(bin_dir.to_path_buf()),
            current_src_dir: Some(src_dir.to_path_buf()),
            tline: CMakeTraceLine::new("CMakeLists.txt", 1, "add_custom_command", Vec::new()),
        }
    }

    fn run(
        src: &Path,
        build: &Path,
        map: &OutputTargetMap,
        custom_targets: &mut [ConverterCustomTarget],
        ctx: &mut ConversionContext,
    ) {
        let env = HostEnvironment::default();
        let trace = CMakeTraceParser::new(true).unwrap();
        let input = PostprocessInput {
            env: &env,
            root_src_dir: src,
            subdir: Path::new("sub"),
            build_dir: build,
            install_prefix: Path::new("/usr"),
            trace: &trace,
            output_map: map,
        };
        let mut all_outputs = IndexSet::new();
        for idx in 0..custom_targets.len() {
            postprocess(&input, ctx, custom_targets, idx, &mut all_outputs);
        }
    }

    #[test]
    fn test_duplicate_outputs_are_renamed() {
        let src = Path::new("/src");
        let build = Path::new("/build");
        let mut ctx = ConversionContext::new().unwrap();
        let mut customs = vec![
            ConverterCustomTarget::new(
                &generator(None, &["a/gen.h"], &[], &[], &build.join("a"), &src.join("a")),
                &mut ctx,
            ),
            ConverterCustomTarget::new(
                &generator(None, &["b/gen.h"], &[], &[], &build.join("b"), &src.join("b")),
                &mut ctx,
            ),
        ];
        let map = OutputTargetMap::new(build).unwrap();
        run(src, build, &map, &mut customs, &mut ctx);

        assert_eq!(customs[0].name, "cm_custom_tgt_0");
        assert_eq!(customs[1].name, "cm_custom_tgt_1");
        assert_eq!(customs[0].outputs, vec!["gen.h"]);
        assert_eq!(customs[1].outputs, vec!["c0_gen.h"]);
        assert_eq!(customs[1].original_outputs, vec!["/build/b/b/gen.h"]);
        assert_eq!(
            customs[1].get_ref(1, "/build/b/b/gen.h"),
            Some(CustomTargetReference { ctgt: 1, index: 0 })
        );
        assert_eq!(customs[0].working_dir, "/build/a");
    }

    #[test]
    fn test_no_outputs_gets_dummy_header() {
        let mut ctx = ConversionContext::new().unwrap();
        let mut customs = vec![ConverterCustomTarget::new(
            &generator(Some("docs"), &[], &[&["doxygen", ""]], &[], Path::new("/build"), Path::new("/src")),
            &mut ctx,
        )];
        let map = OutputTargetMap::new("/build").unwrap();
        run(Path::new("/src"), Path::new("/build"), &map, &mut customs, &mut ctx);

        assert_eq!(customs[0].outputs, vec!["cm_docs.h"]);
        assert_eq!(
            customs[0].command,
            vec![vec![CommandArg::Literal("doxygen".to_string())]]
        );
        assert_eq!(ctx.tgt_counter, 0);
    }

    #[test]
    fn test_commands_and_dependencies() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        let build = temp.path().join("build");
        fs::create_dir_all(src.join("data")).unwrap();
        fs::write(src.join("data/input.txt"), "").unwrap();

        let tool = ConverterTarget::new(&CMakeTarget::from_json(&json!({
            "name": "gen_tool",
            "type": "EXECUTABLE",
            "artifacts": [format!("{}/gen_tool", to_posix(&build))],
        })));

        let mut ctx = ConversionContext::new().unwrap();
        let mut customs = vec![
            ConverterCustomTarget::new(
                &generator(None, &["first.c"], &[], &[], &build, &src),
                &mut ctx,
            ),
            ConverterCustomTarget::new(
                &generator(
                    None,
                    &["second.c"],
                    &[&["gen_tool", "-o", "second.c"], &["touch", "stamp"]],
                    &["data/input.txt", "gen_tool", "first.c", "unknown", ""],
                    &build,
                    &src,
                ),
                &mut ctx,
            ),
        ];

        let mut map = OutputTargetMap::new(&build).unwrap();
        map.add_target(0, &tool);
        map.add_custom_target(0, &customs[0]);
        map.add_custom_target(1, &customs[1]);
        run(&src, &build, &map, &mut customs, &mut ctx);

        let second = &customs[1];
        assert_eq!(
            second.command,
            vec![
                vec![
                    CommandArg::Executable(0),
                    CommandArg::Literal("-o".to_string()),
                    CommandArg::Literal("second.c".to_string()),
                ],
                vec![
                    CommandArg::Literal("touch".to_string()),
                    CommandArg::Literal("stamp".to_string()),
                ],
            ]
        );
        assert_eq!(
            second.inputs,
            vec![
                CustomInput::File("data/input.txt".to_string()),
                CustomInput::Generated(CustomTargetReference { ctgt: 0, index: 0 }),
            ]
        );
        assert_eq!(second.depends, vec![TargetRef::Normal(0)]);
    }
}
