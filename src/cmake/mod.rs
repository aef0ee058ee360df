//! CMake subproject support
//!
//! Runs CMake on a subproject, reads back what it configured and turns the
//! result into an equivalent native build description:
//!
//! - **executor / version / toolchain**: locating CMake and preparing a configure run
//! - **traceparser / generator**: replaying the `--trace` output of that run
//! - **fileapi / server**: reading the codemodel back from CMake
//! - **converter**: normalizing targets and resolving their dependencies
//! - **synth / ast**: emitting the native build description
//! - **interpreter**: the state machine tying the steps together

pub mod ast;
pub mod common;
pub mod converter;
pub mod error;
pub mod executor;
pub mod fileapi;
pub mod generator;
pub mod interpreter;
pub mod pathutil;
pub mod server;
pub mod synth;
pub mod toolchain;
pub mod traceparser;
pub mod version;

pub use common::{CMakeConfiguration, CMakeTarget, TargetOptions, TargetType};
pub use error::{CMakeError, CMakeResult};
pub use interpreter::{CMakeInterpreter, InterpreterState};
pub use synth::TargetInfo;
