//! Build description synthesis
//!
//! Walks the converted targets depth first and emits the statements a hand
//! written project file would contain. Every target is emitted exactly once,
//! before anything that references it.

use crate::cmake::ast::{AstValue, BuildNode, CodeBlock, FunctionCall};
use crate::cmake::common::{MesonFunc, TargetOptions, is_header};
use crate::cmake::converter::{
    CommandArg, ConverterCustomTarget, ConverterTarget, CustomInput, CustomTargetReference,
    TargetRef,
};
use crate::cmake::error::{CMakeError, CMakeResult};
use crate::cmake::pathutil::to_posix;
use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

pub const RUN_SCRIPT_VAR: &str = "ctgt_run_script";
/// Separates the stages of a custom command for the run script
pub const COMMAND_SEPARATOR: &str = ";;;";

/// Variable names emitted for one target
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetInfo {
    pub inc: Option<String>,
    pub src: Option<String>,
    pub dep: Option<String>,
    pub tgt: Option<String>,
    pub func: MesonFunc,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Synthesis {
    pub code: CodeBlock,
    /// Keyed by sanitized target name
    pub generated_targets: IndexMap<String, TargetInfo>,
    /// CMake target name to sanitized name
    pub internal_name_map: IndexMap<String, String>,
}

pub struct Synthesizer<'a> {
    targets: &'a [ConverterTarget],
    custom_targets: &'a [ConverterCustomTarget],
    options: &'a TargetOptions,
    processing: HashSet<String>,
    processed: IndexMap<String, TargetInfo>,
    name_map: IndexMap<String, String>,
    code: CodeBlock,
}

impl<'a> Synthesizer<'a> {
    pub fn new(
        targets: &'a [ConverterTarget],
        custom_targets: &'a [ConverterCustomTarget],
        options: &'a TargetOptions,
    ) -> Self {
        Self {
            targets,
            custom_targets,
            options,
            processing: HashSet::new(),
            processed: IndexMap::new(),
            name_map: IndexMap::new(),
            code: CodeBlock::default(),
        }
    }

    pub fn run(
        mut self,
        project_name: &str,
        languages: &[String],
        run_script: &Path,
    ) -> CMakeResult<Synthesis> {
        self.code.push(BuildNode::expr(
            FunctionCall::new("project").arg(project_name).args(languages),
        ));
        self.code.push(BuildNode::assign(
            RUN_SCRIPT_VAR,
            FunctionCall::new("find_program")
                .arg(AstValue::strings([to_posix(run_script)]))
                .kwarg("required", true),
        ));

        for idx in 0..self.custom_targets.len() {
            self.ensure_custom_target(idx)?;
        }
        for idx in 0..self.targets.len() {
            self.ensure_target(idx)?;
        }

        debug!("Synthesized {} targets", self.processed.len());
        Ok(Synthesis {
            code: self.code,
            generated_targets: self.processed,
            internal_name_map: self.name_map,
        })
    }

    fn ensure_target(&mut self, idx: usize) -> CMakeResult<()> {
        if self.processed.contains_key(&self.targets[idx].name) {
            return Ok(());
        }
        self.process_target(idx)
    }

    fn ensure_custom_target(&mut self, idx: usize) -> CMakeResult<()> {
        if self.processed.contains_key(&self.custom_targets[idx].name) {
            return Ok(());
        }
        self.process_custom_target(idx)
    }

    fn ensure(&mut self, tgt: TargetRef) -> CMakeResult<()> {
        match tgt {
            TargetRef::Normal(idx) => self.ensure_target(idx),
            TargetRef::Custom(idx) => self.ensure_custom_target(idx),
        }
    }

    fn begin(&mut self, name: &str) -> CMakeResult<()> {
        if !self.processing.insert(name.to_string()) {
            return Err(CMakeError::Cycle(name.to_string()));
        }
        Ok(())
    }

    fn finish(&mut self, name: &str, cmake_name: &str, info: TargetInfo) {
        self.processing.remove(name);
        self.processed.insert(name.to_string(), info);
        self.name_map.insert(cmake_name.to_string(), name.to_string());
    }

    fn name_of(&self, tgt: TargetRef) -> &'a str {
        let (targets, custom_targets) = (self.targets, self.custom_targets);
        match tgt {
            TargetRef::Normal(idx) => &targets[idx].name,
            TargetRef::Custom(idx) => &custom_targets[idx].name,
        }
    }

    /// Variable holding an already emitted target
    fn extract_tgt(&self, tgt: TargetRef) -> Option<AstValue> {
        self.processed
            .get(self.name_of(tgt))
            .and_then(|info| info.tgt.as_deref())
            .map(AstValue::id)
    }

    fn resolve_ctgt_ref(&self, reference: CustomTargetReference) -> Option<AstValue> {
        if !reference.valid(self.custom_targets) {
            return None;
        }
        let var = self.extract_tgt(TargetRef::Custom(reference.ctgt))?;
        if self.custom_targets[reference.ctgt].outputs.len() == 1 {
            Some(var)
        } else {
            Some(AstValue::index(var, reference.index))
        }
    }

    fn process_target(&mut self, idx: usize) -> CMakeResult<()> {
        let targets = self.targets;
        let tgt = &targets[idx];
        self.begin(&tgt.name)?;

        let mut link_with = Vec::new();
        for &dep in &tgt.link_with {
            self.ensure(dep)?;
            link_with.extend(self.extract_tgt(dep));
        }

        let mut objects = Vec::new();
        for &obj in &tgt.object_libs {
            self.ensure_target(obj)?;
            if let Some(var) = self.extract_tgt(TargetRef::Normal(obj)) {
                objects.push(AstValue::method(var, "extract_all_objects", Vec::new()));
            }
        }

        let mut dependencies = Vec::new();
        for &dep in &tgt.depends {
            if let TargetRef::Custom(cidx) = dep {
                self.ensure_custom_target(cidx)?;
                dependencies.extend(self.extract_tgt(dep));
            }
        }

        let sources: Vec<AstValue> = tgt.sources.iter().chain(&tgt.generated).map(AstValue::from).collect();

        let mut generated = Vec::new();
        let mut used_refs: IndexSet<CustomTargetReference> = IndexSet::new();
        let mut used_ctgts: IndexSet<usize> = IndexSet::new();
        for &reference in &tgt.generated_ctgt {
            self.ensure_custom_target(reference.ctgt)?;
            if used_refs.insert(reference) {
                generated.extend(self.resolve_ctgt_ref(reference));
            }
            used_ctgts.insert(reference.ctgt);
        }

        // Headers of every used custom target must exist before compiling
        for &cidx in &used_ctgts {
            let outputs = &self.custom_targets[cidx].outputs;
            for (index, out) in outputs.iter().enumerate() {
                let reference = CustomTargetReference { ctgt: cidx, index };
                if is_header(out) && used_refs.insert(reference) {
                    generated.extend(self.resolve_ctgt_ref(reference));
                }
            }
        }

        let func = tgt
            .meson_func()
            .ok_or_else(|| CMakeError::UnknownTargetType(tgt.target_type.to_string()))?;

        let name = tgt.name.as_str();
        let inc_var = format!("{name}_inc");
        let dir_var = format!("{name}_dir");
        let sys_var = format!("{name}_sys");
        let src_var = format!("{name}_src");
        let dep_var = format!("{name}_dep");

        let options = self.options;
        let install_tgt = options.get_install(&tgt.cmake_name, tgt.install);
        let link_args: Vec<String> = tgt
            .link_flags
            .iter()
            .chain(&tgt.link_libraries)
            .cloned()
            .collect();

        let mut tgt_call = FunctionCall::new(func.as_str())
            .arg(name)
            .kwarg("build_by_default", install_tgt)
            .kwarg(
                "link_args",
                AstValue::strings(options.get_link_args(&tgt.cmake_name, &link_args)),
            )
            .kwarg("link_with", link_with)
            .kwarg("include_directories", AstValue::id(&inc_var))
            .kwarg("install", install_tgt)
            .kwarg(
                "override_options",
                AstValue::strings(options.get_override_options(&tgt.cmake_name, &tgt.override_options)),
            )
            .kwarg("objects", objects);

        if install_tgt {
            if let Some(install_dir) = &tgt.install_dir {
                tgt_call = tgt_call.kwarg("install_dir", install_dir);
            }
        }
        for (lang, opts) in &tgt.compile_opts {
            tgt_call = tgt_call.kwarg(
                &format!("{lang}_args"),
                AstValue::strings(options.get_compile_args(&tgt.cmake_name, lang, opts)),
            );
        }
        match func {
            MesonFunc::Executable => tgt_call = tgt_call.kwarg("pie", tgt.pie),
            MesonFunc::StaticLibrary => tgt_call = tgt_call.kwarg("pic", tgt.pie),
            _ => {}
        }

        generated.extend(dependencies);

        let dep_call = |with_link: bool| {
            let mut call = FunctionCall::new("declare_dependency")
                .kwarg("link_args", AstValue::strings(link_args.iter()));
            if with_link {
                call = call.kwarg("link_with", AstValue::id(name));
            }
            call.kwarg("compile_args", AstValue::strings(tgt.public_compile_opts.iter()))
                .kwarg("include_directories", AstValue::id(&inc_var))
        };

        let mut nodes = vec![
            BuildNode::assign(
                &dir_var,
                FunctionCall::new("include_directories").args(&tgt.includes),
            ),
            BuildNode::assign(
                &sys_var,
                FunctionCall::new("include_directories")
                    .args(&tgt.sys_includes)
                    .kwarg("is_system", true),
            ),
            BuildNode::assign(
                &inc_var,
                vec![AstValue::id(&dir_var), AstValue::id(&sys_var)],
            ),
        ];

        let info = match func {
            MesonFunc::HeaderOnly => {
                nodes.push(BuildNode::assign(&dep_var, dep_call(false)));
                TargetInfo {
                    inc: Some(inc_var),
                    src: None,
                    dep: Some(dep_var),
                    tgt: None,
                    func,
                }
            }
            _ => {
                let mut target_sources = vec![AstValue::id(&src_var)];
                target_sources.extend(generated);
                nodes.push(BuildNode::assign(
                    &src_var,
                    FunctionCall::new("files").args(sources),
                ));
                nodes.push(BuildNode::assign(name, tgt_call.arg(target_sources)));

                let dep = match func {
                    MesonFunc::StaticLibrary | MesonFunc::SharedLibrary => {
                        nodes.push(BuildNode::assign(&dep_var, dep_call(true)));
                        Some(dep_var)
                    }
                    MesonFunc::SharedModule => {
                        nodes.push(BuildNode::assign(&dep_var, dep_call(false)));
                        Some(dep_var)
                    }
                    _ => None,
                };
                TargetInfo {
                    inc: Some(inc_var),
                    src: Some(src_var),
                    dep,
                    tgt: Some(name.to_string()),
                    func,
                }
            }
        };

        self.code.extend(nodes);
        self.finish(&tgt.name, &tgt.cmake_name, info);
        Ok(())
    }

    fn resolve_command_arg(&mut self, arg: &CommandArg) -> CMakeResult<AstValue> {
        match arg {
            CommandArg::Literal(s) => Ok(AstValue::from(s)),
            CommandArg::Executable(idx) => {
                self.ensure_target(*idx)?;
                Ok(self
                    .extract_tgt(TargetRef::Normal(*idx))
                    .unwrap_or_else(|| AstValue::from(&self.targets[*idx].name)))
            }
        }
    }

    fn resolve_input(&mut self, input: &CustomInput) -> CMakeResult<Option<AstValue>> {
        match input {
            CustomInput::File(path) => Ok(Some(AstValue::from(path))),
            CustomInput::Generated(reference) => {
                self.ensure_custom_target(reference.ctgt)?;
                Ok(self.resolve_ctgt_ref(*reference))
            }
        }
    }

    /// All command stages go through the run script, which also handles the
    /// working directory and renamed outputs
    fn process_custom_target(&mut self, idx: usize) -> CMakeResult<()> {
        let custom_targets = self.custom_targets;
        let tgt = &custom_targets[idx];
        self.begin(&tgt.name)?;

        let mut command: Vec<AstValue> = vec![
            AstValue::id(RUN_SCRIPT_VAR),
            AstValue::from("-o"),
            AstValue::from("@OUTPUT@"),
        ];
        if !tgt.original_outputs.is_empty() {
            command.push(AstValue::from("-O"));
            command.extend(tgt.original_outputs.iter().map(AstValue::from));
        }
        command.push(AstValue::from("-d"));
        command.push(AstValue::from(&tgt.working_dir));

        for stage in &tgt.command {
            for arg in stage {
                command.push(self.resolve_command_arg(arg)?);
            }
            command.push(AstValue::from(COMMAND_SEPARATOR));
        }

        let mut inputs = Vec::new();
        for input in &tgt.inputs {
            inputs.extend(self.resolve_input(input)?);
        }

        let mut depends = Vec::new();
        for &dep in &tgt.depends {
            self.ensure(dep)?;
            depends.extend(self.extract_tgt(dep));
        }

        let call = FunctionCall::new("custom_target")
            .arg(tgt.name.as_str())
            .kwarg("input", inputs)
            .kwarg("output", AstValue::strings(tgt.outputs.iter()))
            .kwarg("command", command)
            .kwarg("depends", depends);

        self.code.push(BuildNode::assign(&tgt.name, call));
        self.finish(
            &tgt.name,
            &tgt.cmake_name,
            TargetInfo {
                inc: None,
                src: None,
                dep: None,
                tgt: Some(tgt.name.clone()),
                func: MesonFunc::CustomTarget,
            },
        );
        Ok(())
    }
}
