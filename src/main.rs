mod cmake;
mod environment;
mod io;
mod logging;

#[cfg(test)]
mod test_utils;

use clap::{Parser, ValueEnum};
use cmake::common::cmake_defines_to_args;
use cmake::{CMakeInterpreter, TargetOptions};
use environment::HostEnvironment;
use logging::{LogConfig, init_logging};
use serde_json::{Map, Value, json};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Build description in the host build language
    Text,
    /// Build description and target table as JSON
    Json,
}

/// CLI arguments for the CMake subproject converter
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Host machine description (JSON), see `HostEnvironment`
    #[arg(long, value_name = "FILE")]
    host_config: Option<PathBuf>,

    /// Host source root (overrides the host configuration)
    #[arg(long, value_name = "DIR")]
    source_dir: Option<PathBuf>,

    /// Host build root (overrides the host configuration)
    #[arg(long, value_name = "DIR")]
    build_dir: Option<PathBuf>,

    /// Subproject directory relative to the source root
    #[arg(long, value_name = "DIR")]
    subdir: Option<PathBuf>,

    /// CMake executable (overrides the host configuration and $CMAKE)
    #[arg(long, value_name = "PATH")]
    cmake_path: Option<PathBuf>,

    /// Cache entry passed to CMake as -DKEY=VALUE
    #[arg(short = 'D', long = "define", value_name = "KEY=VALUE", value_parser = parse_define)]
    defines: Vec<(String, String)>,

    /// Raw argument appended to the CMake command line
    #[arg(long = "cmake-arg", value_name = "ARG", allow_hyphen_values = true)]
    cmake_args: Vec<String>,

    /// Per target option overrides (JSON), see `TargetOptions`
    #[arg(long, value_name = "FILE")]
    target_options: Option<PathBuf>,

    /// Fail on unsupported CMake commands instead of logging and skipping them
    #[arg(long)]
    strict: bool,

    /// Only print the converted targets
    #[arg(long)]
    list_targets: bool,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Log level (overrides RUST_LOG env var)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Log file path (overrides CMAKE_INTEROP_LOG_FILE env var)
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,
}

fn parse_define(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got {raw:?}")),
    }
}

fn load_environment(args: &Args) -> Result<HostEnvironment, Box<dyn std::error::Error>> {
    let env = match &args.host_config {
        Some(path) => HostEnvironment::load(path)?,
        None => HostEnvironment::default(),
    };
    let env = env.with_overrides(
        args.source_dir.clone(),
        args.build_dir.clone(),
        args.subdir.clone(),
        args.cmake_path.clone(),
    );
    env.validate()?;
    Ok(env)
}

fn load_target_options(args: &Args) -> Result<TargetOptions, Box<dyn std::error::Error>> {
    match &args.target_options {
        Some(path) => Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?),
        None => Ok(TargetOptions::default()),
    }
}

fn cmake_arguments(args: &Args) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    let defines: Map<String, Value> = args
        .defines
        .iter()
        .map(|(key, value)| (key.clone(), Value::String(value.clone())))
        .collect();

    let mut res = cmake_defines_to_args(&Value::Object(defines))?;
    res.extend(args.cmake_args.iter().cloned());
    Ok(res)
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let env = load_environment(&args)?;
    let options = load_target_options(&args)?;
    let extra_args = cmake_arguments(&args)?;

    info!(
        "Converting CMake subproject {} (backend {})",
        env.source_dir.join(&env.subdir).display(),
        env.backend
    );

    let mut interpreter = CMakeInterpreter::new(env, !args.strict)?;
    interpreter.initialise(&extra_args).await?;
    interpreter.analyse()?;
    let code = interpreter.pretend_to_be_meson(&options)?;

    let targets: Map<String, Value> = interpreter
        .target_list()
        .into_iter()
        .filter_map(|name| {
            let info = interpreter.target_info(&name)?;
            Some((name, serde_json::to_value(info).ok()?))
        })
        .collect();

    match (args.format, args.list_targets) {
        (OutputFormat::Text, true) => {
            for (name, info) in &targets {
                println!("{name}: {}", info["func"].as_str().unwrap_or_default());
            }
        }
        (OutputFormat::Text, false) => print!("{code}"),
        (OutputFormat::Json, list_only) => {
            let mut out = json!({
                "project": interpreter.project_name(),
                "languages": interpreter.languages(),
                "build_files": interpreter.bs_files(),
                "targets": targets,
            });
            if !list_only {
                out["code"] = json!(code.to_string());
                out["ast"] = serde_json::to_value(&code)?;
            }
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let log_config = LogConfig::from_env().with_overrides(args.log_level.clone(), args.log_file.clone());
    if let Err(e) = init_logging(log_config) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    if let Err(e) = run(args).await {
        error!("{e}");
        eprintln!("ERROR: {e}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_define() {
        assert_eq!(
            parse_define("CMAKE_BUILD_TYPE=Release"),
            Ok(("CMAKE_BUILD_TYPE".to_string(), "Release".to_string()))
        );
        assert_eq!(parse_define("EMPTY="), Ok(("EMPTY".to_string(), String::new())));
        assert!(parse_define("NOVALUE").is_err());
        assert!(parse_define("=x").is_err());
    }

    #[test]
    fn test_cli_collects_cmake_arguments() {
        let args = Args::parse_from([
            "cmake-interop",
            "-D",
            "OPT=ON",
            "--define",
            "CMAKE_TOOLCHAIN_FILE=/x.cmake",
            "--cmake-arg",
            "-Wno-dev",
            "--format",
            "json",
        ]);
        assert_eq!(args.format, OutputFormat::Json);
        // The toolchain file is owned by the generated toolchain and dropped
        assert_eq!(cmake_arguments(&args).unwrap(), vec!["-DOPT=ON", "-Wno-dev"]);
    }
}
