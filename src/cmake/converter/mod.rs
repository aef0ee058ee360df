//! Target conversion
//!
//! Turns the codemodel targets and the trace targets of one CMake project
//! into build-system agnostic [`ConverterTarget`]s and
//! [`ConverterCustomTarget`]s. Targets reference each other by index into the
//! two lists owned by the caller, see [`TargetRef`].
//!
//! The passes have to run in this order over the whole target set:
//!
//! 1. [`postprocess_all`]: custom targets first, then normal targets
//! 2. [`process_object_libs_all`]
//! 3. [`process_inter_target_dependencies_all`]
//! 4. [`cleanup_dependencies_all`]

pub mod custom_target;
pub mod output_map;
pub mod target;

pub use custom_target::{CommandArg, ConverterCustomTarget, CustomInput};
pub use output_map::OutputTargetMap;
pub use target::ConverterTarget;

use crate::cmake::common::MesonFunc;
use crate::cmake::error::CMakeResult;
use crate::cmake::traceparser::CMakeTraceParser;
use crate::environment::HostEnvironment;
use indexmap::IndexSet;
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;
use tracing::warn;

/// Index of a converted target in the normal or the custom target list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetRef {
    Normal(usize),
    Custom(usize),
}

/// One output slot of a custom target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CustomTargetReference {
    pub ctgt: usize,
    pub index: usize,
}

impl CustomTargetReference {
    pub fn valid(&self, custom_targets: &[ConverterCustomTarget]) -> bool {
        custom_targets
            .get(self.ctgt)
            .is_some_and(|ctgt| self.index < ctgt.outputs.len())
    }

    pub fn filename<'a>(&self, custom_targets: &'a [ConverterCustomTarget]) -> Option<&'a str> {
        custom_targets
            .get(self.ctgt)?
            .outputs
            .get(self.index)
            .map(String::as_str)
    }
}

/// `cm_` prefixed identifier with every non word character replaced
pub fn sanitize_cmake_name(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    format!("cm_{sanitized}")
}

/// State shared by all targets of one analysis pass
pub struct ConversionContext {
    /// Numbering of anonymous custom commands
    pub tgt_counter: usize,
    /// Numbering of renamed custom target outputs
    pub out_counter: usize,
    warned: HashSet<String>,
    pub(crate) std_regex: Regex,
    pub(crate) lib_regex: Regex,
}

impl ConversionContext {
    pub fn new() -> CMakeResult<Self> {
        Ok(Self {
            tgt_counter: 0,
            out_counter: 0,
            warned: HashSet::new(),
            std_regex: Regex::new(r"^([-]{1,2}std=|/std:v?|[-]{1,2}std:)(.*)$")?,
            lib_regex: Regex::new(r"^(-l[a-zA-Z0-9_]+|-l?pthread)$")?,
        })
    }

    /// Emit `message` only the first time `key` is seen
    pub fn warn_once(&mut self, key: &str, message: &str) {
        if self.warned.insert(key.to_string()) {
            warn!("{}", message);
        }
    }
}

/// Everything target postprocessing reads but never modifies
pub struct PostprocessInput<'a> {
    pub env: &'a HostEnvironment,
    /// Source directory of the CMake project
    pub root_src_dir: &'a Path,
    /// Directory of the CMake project inside the host build
    pub subdir: &'a Path,
    /// Fallback when the trace did not record the current directories
    pub build_dir: &'a Path,
    pub install_prefix: &'a Path,
    pub trace: &'a CMakeTraceParser,
    pub output_map: &'a OutputTargetMap,
}

fn meson_func_of(
    tgt: TargetRef,
    targets: &[ConverterTarget],
    _custom_targets: &[ConverterCustomTarget],
) -> Option<MesonFunc> {
    match tgt {
        TargetRef::Normal(idx) => targets.get(idx).and_then(ConverterTarget::meson_func),
        TargetRef::Custom(_) => Some(MesonFunc::CustomTarget),
    }
}

/// Replace dependencies on dependency-transferring targets by their dependencies
fn flatten_dependencies(
    depends: &[TargetRef],
    targets: &[ConverterTarget],
    custom_targets: &[ConverterCustomTarget],
) -> Vec<TargetRef> {
    let mut to_process: Vec<TargetRef> = depends.to_vec();
    let mut processed: HashSet<TargetRef> = HashSet::new();
    let mut new_deps: IndexSet<TargetRef> = IndexSet::new();

    let mut idx = 0;
    while idx < to_process.len() {
        let dep = to_process[idx];
        idx += 1;
        processed.insert(dep);

        let transfers = meson_func_of(dep, targets, custom_targets)
            .is_some_and(|func| func.transfers_dependencies());
        match (transfers, dep) {
            (true, TargetRef::Normal(tidx)) => {
                to_process.extend(
                    targets[tidx]
                        .depends
                        .iter()
                        .filter(|inner| !processed.contains(*inner))
                        .copied(),
                );
            }
            _ => {
                new_deps.insert(dep);
            }
        }
    }

    new_deps.into_iter().collect()
}

// ============================================================================
// Passes
// ============================================================================

/// First pass, returns the indexes of the object libraries
pub fn postprocess_all(
    input: &PostprocessInput<'_>,
    ctx: &mut ConversionContext,
    targets: &mut [ConverterTarget],
    custom_targets: &mut [ConverterCustomTarget],
) -> Vec<usize> {
    let mut all_outputs: IndexSet<String> = IndexSet::new();
    for idx in 0..custom_targets.len() {
        custom_target::postprocess(input, ctx, custom_targets, idx, &mut all_outputs);
    }

    let mut object_libs = Vec::new();
    for (idx, tgt) in targets.iter_mut().enumerate() {
        tgt.postprocess(input, ctx, custom_targets);
        if tgt.is_object_library() {
            object_libs.push(idx);
        }
    }
    object_libs
}

/// Second pass
pub fn process_object_libs_all(
    ctx: &mut ConversionContext,
    targets: &mut [ConverterTarget],
    object_libs: &[usize],
    linker_workaround: bool,
) {
    for idx in 0..targets.len() {
        target::process_object_libs(ctx, targets, idx, object_libs, linker_workaround);
    }
}

/// Third pass
pub fn process_inter_target_dependencies_all(
    targets: &mut [ConverterTarget],
    custom_targets: &mut [ConverterCustomTarget],
) {
    for idx in 0..targets.len() {
        let new_deps = flatten_dependencies(&targets[idx].depends, targets, custom_targets);
        targets[idx].depends = new_deps;
    }
    for idx in 0..custom_targets.len() {
        let new_deps = flatten_dependencies(&custom_targets[idx].depends, targets, custom_targets);
        custom_targets[idx].depends = new_deps;
    }
}

/// Fourth pass, strictly after the third one ran for every target
pub fn cleanup_dependencies_all(targets: &mut [ConverterTarget]) {
    for tgt in targets.iter_mut() {
        tgt.cleanup_dependencies();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmake::common::CMakeTarget;
    use serde_json::json;

    fn converter_target(name: &str, target_type: &str) -> ConverterTarget {
        ConverterTarget::new(&CMakeTarget::from_json(&json!({
            "name": name,
            "type": target_type,
            "sourceDirectory": "/src",
            "buildDirectory": "/build",
        })))
    }

    #[test]
    fn test_sanitize_cmake_name() {
        assert_eq!(sanitize_cmake_name("foo"), "cm_foo");
        assert_eq!(sanitize_cmake_name("foo::bar-baz.1"), "cm_foo__bar_baz_1");
    }

    #[test]
    fn test_warn_once() {
        let mut ctx = ConversionContext::new().unwrap();
        ctx.warn_once("key", "first");
        ctx.warn_once("key", "second");
        assert_eq!(ctx.warned.len(), 1);
    }

    #[test]
    fn test_dependency_transfer_and_clear() {
        // c -> b -> a -> d, with a and b header only
        let mut targets = vec![
            converter_target("a", "INTERFACE_LIBRARY"),
            converter_target("b", "INTERFACE_LIBRARY"),
            converter_target("c", "STATIC_LIBRARY"),
            converter_target("d", "SHARED_LIBRARY"),
        ];
        targets[0].depends = vec![TargetRef::Normal(3)];
        targets[1].depends = vec![TargetRef::Normal(0)];
        targets[2].depends = vec![TargetRef::Normal(1)];
        let mut custom_targets = Vec::new();

        process_inter_target_dependencies_all(&mut targets, &mut custom_targets);
        cleanup_dependencies_all(&mut targets);

        assert_eq!(targets[2].depends, vec![TargetRef::Normal(3)]);
        assert!(targets[0].depends.is_empty());
        assert!(targets[1].depends.is_empty());
        assert!(targets[3].depends.is_empty());
    }

    #[test]
    fn test_flatten_handles_cycles() {
        let mut targets = vec![
            converter_target("a", "INTERFACE_LIBRARY"),
            converter_target("b", "INTERFACE_LIBRARY"),
            converter_target("c", "EXECUTABLE"),
        ];
        targets[0].depends = vec![TargetRef::Normal(1)];
        targets[1].depends = vec![TargetRef::Normal(0)];
        targets[2].depends = vec![TargetRef::Normal(0)];

        let flattened = flatten_dependencies(&targets[2].depends, &targets, &[]);
        assert!(flattened.is_empty());
    }
}
