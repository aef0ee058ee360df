//! Orchestration of one CMake subproject
//!
//! [`CMakeInterpreter`] runs CMake with tracing enabled, reads the codemodel
//! back (file API or server protocol), converts the targets and finally
//! synthesizes an equivalent native build description.

use crate::cmake::ast::CodeBlock;
use crate::cmake::common::{
    CMakeBuildFile, CMakeConfiguration, CMakeTarget, DISABLE_POLICY_WARNINGS, TargetOptions,
    backend_generator, cmake_language,
};
use crate::cmake::converter::{
    self, ConversionContext, ConverterCustomTarget, ConverterTarget, OutputTargetMap,
    PostprocessInput,
};
use crate::cmake::error::{CMakeError, CMakeResult};
use crate::cmake::executor::{CMakeExecutor, MIN_CMAKE_VERSION};
use crate::cmake::fileapi::CMakeFileApi;
use crate::cmake::pathutil::{normpath, relpath, to_posix};
use crate::cmake::server::{
    CMakeClient, CMakeServer, ProtocolVersion, ReplyData, ServerRequest,
};
use crate::cmake::synth::{Synthesizer, TargetInfo};
use crate::cmake::toolchain::{CMakeToolchain, ExecScope, write_preload_file};
use crate::cmake::traceparser::{CMakeTraceParser, TraceTargetType};
use crate::environment::{HostEnvironment, make_abs};
use crate::io::transport::Transport;
use crate::log_timing;
use indexmap::{IndexMap, IndexSet};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{Level, debug, info};

/// Directory below `<build>/<subdir>` that CMake configures into
pub const CMAKE_BUILD_DIR_NAME: &str = "__CMake_build";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum InterpreterState {
    Unconfigured,
    Configured,
    Initialised,
    Analysed,
    Synthesized,
}

pub struct CMakeInterpreter {
    env: HostEnvironment,
    subdir: PathBuf,
    src_dir: PathBuf,
    build_dir: PathBuf,
    install_prefix: PathBuf,
    backend_name: String,
    linkers: IndexSet<String>,
    permissive: bool,
    state: InterpreterState,

    // Configure and initialise
    executor: Option<CMakeExecutor>,
    generator: String,
    fileapi: CMakeFileApi,
    use_fileapi: bool,
    raw_trace: String,
    bs_files: Vec<String>,
    codemodel_configs: Option<Vec<CMakeConfiguration>>,

    // Analysis
    trace: CMakeTraceParser,
    project_name: String,
    languages: Vec<String>,
    targets: Vec<ConverterTarget>,
    custom_targets: Vec<ConverterCustomTarget>,

    // Synthesis
    generated_targets: IndexMap<String, TargetInfo>,
    internal_name_map: IndexMap<String, String>,
}

impl CMakeInterpreter {
    /// Interpreter for the CMake project in `env.source_dir/env.subdir`
    ///
    /// With `permissive` set, unsupported CMake commands in the trace are
    /// logged and skipped instead of failing the analysis.
    pub fn new(env: HostEnvironment, permissive: bool) -> CMakeResult<Self> {
        let source_root = normpath(std::path::absolute(&env.source_dir)?);
        let build_root = normpath(std::path::absolute(&env.build_dir)?);
        let subdir = env.subdir.clone();

        let src_dir = normpath(source_root.join(&subdir));
        let build_dir = normpath(build_root.join(&subdir).join(CMAKE_BUILD_DIR_NAME));
        let linkers = env
            .compilers
            .values()
            .map(|compiler| compiler.linker_id.clone())
            .filter(|id| !id.is_empty())
            .collect();

        let env = HostEnvironment {
            source_dir: source_root,
            build_dir: build_root,
            ..env
        };

        Ok(Self {
            install_prefix: env.prefix.clone(),
            backend_name: env.backend.clone(),
            subdir,
            src_dir,
            fileapi: CMakeFileApi::new(&build_dir),
            build_dir,
            linkers,
            permissive,
            state: InterpreterState::Unconfigured,
            executor: None,
            generator: String::new(),
            use_fileapi: false,
            raw_trace: String::new(),
            bs_files: Vec::new(),
            codemodel_configs: None,
            trace: CMakeTraceParser::new(permissive)?,
            project_name: String::new(),
            languages: Vec::new(),
            targets: Vec::new(),
            custom_targets: Vec::new(),
            generated_targets: IndexMap::new(),
            internal_name_map: IndexMap::new(),
            env,
        })
    }

    pub fn state(&self) -> InterpreterState {
        self.state
    }

    pub fn src_dir(&self) -> &Path {
        &self.src_dir
    }

    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    /// CMake files the configure step read, relative to the host source dir
    pub fn bs_files(&self) -> &[String] {
        &self.bs_files
    }

    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    pub fn languages(&self) -> &[String] {
        &self.languages
    }

    pub fn targets(&self) -> &[ConverterTarget] {
        &self.targets
    }

    pub fn custom_targets(&self) -> &[ConverterCustomTarget] {
        &self.custom_targets
    }

    /// MSVC `link` on a Visual Studio backend cannot link object libraries,
    /// so their sources get merged into each consumer instead
    fn needs_linker_workaround(&self) -> bool {
        self.linkers.contains("link") && self.backend_name.starts_with("vs")
    }

    // ========================================================================
    // Configure
    // ========================================================================

    fn compiler_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        for (lang, compiler) in &self.env.compilers {
            let Some(cmake_lang) = cmake_language(lang) else {
                continue;
            };
            let exelist: Vec<String> = compiler.exelist.iter().map(|exe| make_abs(exe)).collect();
            match exelist.as_slice() {
                [] => continue,
                [compiler_exe] => {
                    args.push(format!("-DCMAKE_{cmake_lang}_COMPILER={compiler_exe}"));
                }
                [launcher @ .., compiler_exe] => {
                    args.push(format!(
                        "-DCMAKE_{cmake_lang}_COMPILER_LAUNCHER={}",
                        launcher.join(";")
                    ));
                    args.push(format!("-DCMAKE_{cmake_lang}_COMPILER={compiler_exe}"));
                }
            }

            if compiler.id == "clang-cl" {
                if let Some(linker) = compiler.linker_exelist.first() {
                    args.push(format!("-DCMAKE_LINKER={}", make_abs(linker)));
                }
            }
        }
        args
    }

    /// Run CMake once on the subproject, capturing its trace
    pub async fn configure(&mut self, extra_cmake_options: &[String]) -> CMakeResult<()> {
        let generator = backend_generator(&self.backend_name)
            .ok_or_else(|| CMakeError::UnsupportedBackend(self.backend_name.clone()))?;
        self.generator = generator.to_string();

        let executor = CMakeExecutor::new(self.env.resolve_cmake_path(), MIN_CMAKE_VERSION).await?;
        let version = executor.version().clone();

        tokio::fs::create_dir_all(&self.build_dir).await?;
        let preload_file = write_preload_file(&self.build_dir)?;
        let toolchain = CMakeToolchain::new(
            &self.env,
            ExecScope::Subproject,
            &self.build_dir,
            Some(preload_file.clone()),
        )?;
        toolchain.write()?;

        // Fresh trace parser for every configure run
        self.trace = CMakeTraceParser::new(self.permissive)?;

        self.use_fileapi = version.supports_file_api();
        if self.use_fileapi {
            self.fileapi = CMakeFileApi::new(&self.build_dir);
            self.fileapi.setup_request()?;
        }

        let mut args = vec![
            "-G".to_string(),
            self.generator.clone(),
            format!("-DCMAKE_INSTALL_PREFIX={}", to_posix(&self.install_prefix)),
        ];
        args.extend(self.compiler_args());
        args.extend(extra_cmake_options.iter().cloned());
        args.extend(CMakeTraceParser::trace_args());
        args.extend(
            DISABLE_POLICY_WARNINGS
                .iter()
                .map(|policy| format!("-DCMAKE_POLICY_WARNING_{policy}=OFF")),
        );
        args.push(format!(
            "-D{}={}",
            version.preload_variable(),
            to_posix(&preload_file)
        ));
        args.extend(toolchain.get_cmake_args());
        args.push(to_posix(&self.src_dir));

        info!("Configuring the build directory with CMake version {}", version);
        info!("Running CMake with: {}", args.join(" "));
        info!(" - build directory:         {}", self.build_dir.display());
        info!(" - source directory:        {}", self.src_dir.display());
        info!(" - toolchain file:          {}", toolchain.toolchain_file().display());
        info!(" - preload file:            {}", preload_file.display());
        info!(" - trace args:              {}", CMakeTraceParser::trace_args().join(" "));
        info!(" - disabled policy warnings: [{}]", DISABLE_POLICY_WARNINGS.join(", "));

        let start = Instant::now();
        let result = executor
            .call(
                &args,
                &self.build_dir,
                &[("LC_ALL".to_string(), "C".to_string())],
            )
            .await?;
        log_timing!(Level::INFO, "cmake_configure", start.elapsed());

        for line in result.stdout.lines() {
            info!("{}", line);
        }

        self.raw_trace = if CMakeTraceParser::requires_stderr() {
            result.stderr.clone()
        } else {
            result.stdout.clone()
        };

        if !result.success() {
            return Err(CMakeError::ConfigureFailed {
                build_dir: self.build_dir.clone(),
                code: result.code,
            });
        }

        info!("CMake configuration: SUCCEEDED");
        self.executor = Some(executor);
        self.state = InterpreterState::Configured;
        Ok(())
    }

    // ========================================================================
    // Initialise
    // ========================================================================

    /// Configure, then load the codemodel and the list of CMake input files
    pub async fn initialise(&mut self, extra_cmake_options: &[String]) -> CMakeResult<()> {
        self.configure(extra_cmake_options).await?;

        if self.use_fileapi {
            self.fileapi.load_reply()?;
            self.bs_files = self.build_system_files(self.fileapi.get_cmake_sources(), None);
            self.codemodel_configs = Some(self.fileapi.get_cmake_configurations().to_vec());
        } else {
            self.initialise_server().await?;
        }

        for config in self.codemodel_configs.iter().flatten() {
            config.log();
        }
        self.state = InterpreterState::Initialised;
        Ok(())
    }

    async fn initialise_server(&mut self) -> CMakeResult<()> {
        let cmake_path = self
            .executor
            .as_ref()
            .map(|executor| executor.executable_path().to_path_buf())
            .ok_or(CMakeError::NotInitialised)?;

        let mut server = CMakeServer::new(cmake_path);
        let mut client = server.startup(Some(self.build_dir.clone())).await?;
        let result = query_server(&mut client, &self.src_dir, &self.build_dir, &self.generator).await;
        server.shutdown(Some(client)).await;

        let (build_files, files_src_dir, configs) = result?;
        self.bs_files = self.build_system_files(&build_files, Some(&files_src_dir));
        self.codemodel_configs = Some(configs);
        Ok(())
    }

    /// Non-generated CMake input files, relative to the host source dir
    fn build_system_files(&self, files: &[CMakeBuildFile], base: Option<&Path>) -> Vec<String> {
        let unique: IndexSet<String> = files
            .iter()
            .filter(|file| !file.is_cmake && !file.is_temp)
            .map(|file| {
                let path = match base {
                    Some(base) => normpath(base.join(&file.file)),
                    None => normpath(&file.file),
                };
                to_posix(relpath(&path, &self.env.source_dir))
            })
            .collect();
        unique.into_iter().collect()
    }

    // ========================================================================
    // Analyse
    // ========================================================================

    /// Convert the codemodel and the trace into converter targets
    pub fn analyse(&mut self) -> CMakeResult<()> {
        let configs = self
            .codemodel_configs
            .as_ref()
            .ok_or(CMakeError::NotInitialised)?;
        let start = Instant::now();

        self.project_name.clear();
        self.languages.clear();
        self.targets.clear();
        self.custom_targets.clear();
        self.generated_targets.clear();
        self.internal_name_map.clear();

        self.trace = CMakeTraceParser::new(self.permissive)?;
        debug!(
            "Parsing {} bytes of CMake trace (permissive: {})",
            self.raw_trace.len(),
            self.trace.is_permissive()
        );
        self.trace.parse(&self.raw_trace)?;
        self.trace.log_targets();

        let mut added: HashSet<String> = HashSet::new();
        for config in configs {
            for project in &config.projects {
                if self.project_name.is_empty() {
                    self.project_name = project.name.clone();
                }
                for target in &project.targets {
                    if target.target_type.is_skipped() || !added.insert(target.name.clone()) {
                        continue;
                    }
                    self.targets.push(ConverterTarget::new(target));
                }
            }
        }

        // Interface libraries are missing from older codemodels
        let src_dir = to_posix(&self.src_dir);
        let build_dir = to_posix(&self.build_dir);
        for trace_target in self.trace.targets.values() {
            if trace_target.target_type == TraceTargetType::Interface
                && !trace_target.imported
                && !added.contains(&trace_target.name)
            {
                added.insert(trace_target.name.clone());
                let stub = CMakeTarget::interface_stub(&trace_target.name, &src_dir, &build_dir);
                self.targets.push(ConverterTarget::new(&stub));
            }
        }

        let mut ctx = ConversionContext::new()?;
        for generator_target in &self.trace.custom_targets {
            let ctgt = ConverterCustomTarget::new(generator_target, &mut ctx);
            self.custom_targets.push(ctgt);
        }

        let mut output_map = OutputTargetMap::new(&self.build_dir)?;
        for (idx, tgt) in self.targets.iter().enumerate() {
            output_map.add_target(idx, tgt);
        }
        for (idx, ctgt) in self.custom_targets.iter().enumerate() {
            output_map.add_custom_target(idx, ctgt);
        }

        let linker_workaround = self.needs_linker_workaround();

        let input = PostprocessInput {
            env: &self.env,
            root_src_dir: &self.src_dir,
            subdir: &self.subdir,
            build_dir: &self.build_dir,
            install_prefix: &self.install_prefix,
            trace: &self.trace,
            output_map: &output_map,
        };

        let object_libs = converter::postprocess_all(
            &input,
            &mut ctx,
            &mut self.targets,
            &mut self.custom_targets,
        );
        converter::process_object_libs_all(
            &mut ctx,
            &mut self.targets,
            &object_libs,
            linker_workaround,
        );
        converter::process_inter_target_dependencies_all(
            &mut self.targets,
            &mut self.custom_targets,
        );
        converter::cleanup_dependencies_all(&mut self.targets);

        let mut languages: IndexSet<String> = IndexSet::new();
        for tgt in &self.targets {
            languages.extend(tgt.languages.iter().cloned());
        }
        self.languages = languages.into_iter().collect();

        for tgt in &self.targets {
            tgt.log();
        }
        for ctgt in &self.custom_targets {
            ctgt.log();
        }

        info!(
            "CMake project '{}' has {} build targets.",
            self.project_name,
            self.targets.len() + self.custom_targets.len()
        );
        log_timing!(Level::DEBUG, "cmake_analyse", start.elapsed());

        self.state = InterpreterState::Analysed;
        Ok(())
    }

    // ========================================================================
    // Synthesis
    // ========================================================================

    /// Build description equivalent to the analysed CMake project
    pub fn pretend_to_be_meson(&mut self, options: &TargetOptions) -> CMakeResult<CodeBlock> {
        if self.state < InterpreterState::Analysed {
            return Err(CMakeError::NotAnalysed);
        }

        let synthesis = Synthesizer::new(&self.targets, &self.custom_targets, options).run(
            &self.project_name,
            &self.languages,
            &self.env.run_script,
        )?;

        self.generated_targets = synthesis.generated_targets;
        self.internal_name_map = synthesis.internal_name_map;
        self.state = InterpreterState::Synthesized;
        debug!("Synthesized {} statements", synthesis.code.lines.len());
        Ok(synthesis.code)
    }

    /// Variables of a synthesized target, by sanitized or CMake name
    pub fn target_info(&self, target: &str) -> Option<&TargetInfo> {
        if let Some(info) = self.generated_targets.get(target) {
            return Some(info);
        }
        let internal = self.internal_name_map.get(target)?;
        self.generated_targets.get(internal)
    }

    /// CMake names of all synthesized targets
    pub fn target_list(&self) -> Vec<String> {
        self.internal_name_map.keys().cloned().collect()
    }
}

/// Server protocol exchange: handshake, configure twice, compute, then
/// fetch the CMake inputs and the codemodel
async fn query_server<T: Transport>(
    client: &mut CMakeClient<T>,
    src_dir: &Path,
    build_dir: &Path,
    generator: &str,
) -> CMakeResult<(Vec<CMakeBuildFile>, PathBuf, Vec<CMakeConfiguration>)> {
    client
        .do_handshake(
            src_dir,
            build_dir,
            generator,
            ProtocolVersion {
                major: 1,
                minor: None,
            },
        )
        .await?;
    client
        .query_checked(&ServerRequest::Configure { args: Vec::new() }, "CMake server configure")
        .await?;
    client
        .query_checked(&ServerRequest::Compute, "Generating build system files")
        .await?;

    let inputs = client
        .query_checked(&ServerRequest::CMakeInputs, "Querying CMake inputs")
        .await?;
    let ReplyData::CMakeInputs {
        build_files,
        src_dir: files_src_dir,
        ..
    } = inputs
    else {
        return Err(CMakeError::Protocol(
            "unexpected reply to the cmakeInputs request".to_string(),
        ));
    };

    let codemodel = client
        .query_checked(&ServerRequest::CodeModel, "Querying the CMake code model")
        .await?;
    let ReplyData::CodeModel { configs } = codemodel else {
        return Err(CMakeError::Protocol(
            "unexpected reply to the codemodel request".to_string(),
        ));
    };

    Ok((build_files, files_src_dir, configs))
}
