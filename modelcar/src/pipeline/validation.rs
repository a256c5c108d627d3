//! Definition validation.
//!
//! Validation runs before any stage starts and fails fast with an error
//! naming the offending stage. Stages form a total order, so a stage may
//! only read parameters and outputs declared by strictly earlier stages.

use super::{Condition, InputSource, PipelineDefinition, StageSpec};
use crate::errors::{ContractErrorInfo, CycleDetectedError, PipelineValidationError};
use crate::utils::is_valid_identifier;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Stage name reserved for the parameter namespace.
pub const RESERVED_STAGE_NAME: &str = "params";

/// Validates a definition with every stage enabled.
///
/// # Errors
///
/// Returns the first `PipelineValidationError` found.
pub fn validate(def: &PipelineDefinition) -> Result<(), PipelineValidationError> {
    validate_with_disabled(def, &BTreeSet::new())
}

/// Validates a definition for a run that disables the named stages.
///
/// Disabled stages are treated like conditional ones: their outputs may be
/// absent, so they cannot be the only source of a required input.
///
/// # Errors
///
/// Returns the first `PipelineValidationError` found.
pub fn validate_with_disabled(
    def: &PipelineDefinition,
    disabled: &BTreeSet<String>,
) -> Result<(), PipelineValidationError> {
    if def.stages.is_empty() {
        return Err(PipelineValidationError::new(format!(
            "Pipeline '{}' has no stages",
            def.name
        ))
        .with_error_info(
            ContractErrorInfo::new("DEF-001-EMPTY", "Cannot run an empty pipeline")
                .with_fix_hint("Add at least one stage to the pipeline."),
        ));
    }

    check_parameters(def)?;
    check_stage_names(def, disabled)?;
    detect_cycles(def)?;

    let mut scope = Scope {
        def,
        earlier: HashMap::new(),
    };
    for spec in &def.stages {
        let enabled = !disabled.contains(&spec.name);
        check_stage(&scope, spec, enabled)?;
        scope.earlier.insert(spec.name.as_str(), enabled && !spec.is_conditional());
    }

    check_registration(&scope)
}

fn error(
    code: &str,
    stage: Option<&str>,
    message: String,
    hint: &str,
) -> PipelineValidationError {
    let mut info = ContractErrorInfo::new(code, message.clone()).with_fix_hint(hint);
    let mut err = PipelineValidationError::new(message);
    if let Some(stage) = stage {
        info = info.with_context_entry("stage", stage);
        err = err.with_stages(vec![stage.to_string()]);
    }
    err.with_error_info(info)
}

fn check_parameters(def: &PipelineDefinition) -> Result<(), PipelineValidationError> {
    let mut seen = HashSet::new();
    for param in &def.parameters {
        if !is_valid_identifier(&param.name) {
            return Err(error(
                "DEF-002-PARAM_NAME",
                None,
                format!("Parameter name '{}' is not a valid identifier", param.name),
                "Use lowercase letters, digits, '_' and '-'; '.' is reserved for stage outputs.",
            ));
        }
        if !seen.insert(param.name.as_str()) {
            return Err(error(
                "DEF-002-DUPLICATE_PARAM",
                None,
                format!("Parameter '{}' is declared more than once", param.name),
                "Remove the duplicate parameter declaration.",
            ));
        }
        if let Some(default) = &param.default {
            if !param.param_type.matches(default) {
                return Err(error(
                    "DEF-002-DEFAULT_TYPE",
                    None,
                    format!(
                        "Default {default} of parameter '{}' is not a {}",
                        param.name, param.param_type
                    ),
                    "Make the default match the declared parameter type.",
                ));
            }
        }
    }
    Ok(())
}

fn check_stage_names(
    def: &PipelineDefinition,
    disabled: &BTreeSet<String>,
) -> Result<(), PipelineValidationError> {
    let mut seen = HashSet::new();
    let registration = def.registration.as_ref().map(|r| r.stage_name.as_str());

    for name in def.stages.iter().map(|s| s.name.as_str()).chain(registration) {
        if !is_valid_identifier(name) || name == RESERVED_STAGE_NAME {
            return Err(error(
                "DEF-001-STAGE_NAME",
                Some(name),
                format!("Stage name '{name}' is not allowed"),
                "Stage names match [a-z0-9][a-z0-9_-]* and 'params' is reserved.",
            ));
        }
        if !seen.insert(name) {
            return Err(error(
                "DEF-001-DUPLICATE_STAGE",
                Some(name),
                format!("Stage '{name}' is declared more than once"),
                "Give every stage, including the registration step, a unique name.",
            ));
        }
    }

    for spec in &def.stages {
        let mut outputs = HashSet::new();
        for output in &spec.outputs {
            if !is_valid_identifier(output) || !outputs.insert(output.as_str()) {
                return Err(error(
                    "DEF-001-OUTPUT_NAME",
                    Some(spec.name.as_str()),
                    format!("Stage '{}' declares invalid or duplicate output '{output}'", spec.name),
                    "Output names must be unique identifiers within a stage.",
                ));
            }
        }
    }

    if let Some(unknown) = disabled.iter().find(|d| def.stage(d).is_none()) {
        return Err(error(
            "DEF-006-UNKNOWN_STAGE",
            Some(unknown.as_str()),
            format!("Cannot disable unknown stage '{unknown}'"),
            "Check the stage names passed to --skip.",
        ));
    }
    Ok(())
}

/// Stage names a stage reads from, through inputs or its condition.
fn referenced_stages(spec: &StageSpec) -> Vec<String> {
    let mut stages: Vec<String> = spec
        .inputs
        .iter()
        .flat_map(|b| b.sources.iter())
        .filter_map(|s| s.stage().map(str::to_string))
        .collect();
    if let Some(condition) = spec.condition.as_deref().and_then(|c| Condition::parse(c).ok()) {
        stages.extend(
            condition
                .references()
                .into_iter()
                .filter_map(|s| s.stage().map(str::to_string)),
        );
    }
    stages
}

fn detect_cycles(def: &PipelineDefinition) -> Result<(), CycleDetectedError> {
    let edges: HashMap<&str, Vec<String>> = def
        .stages
        .iter()
        .map(|s| (s.name.as_str(), referenced_stages(s)))
        .collect();

    let mut visited = HashSet::new();
    let mut rec_stack = HashSet::new();
    let mut path = Vec::new();

    for spec in &def.stages {
        if !visited.contains(spec.name.as_str()) {
            if let Some(cycle) = dfs_cycle(&edges, &spec.name, &mut visited, &mut rec_stack, &mut path) {
                return Err(CycleDetectedError::new(cycle));
            }
        }
    }
    Ok(())
}

fn dfs_cycle(
    edges: &HashMap<&str, Vec<String>>,
    node: &str,
    visited: &mut HashSet<String>,
    rec_stack: &mut HashSet<String>,
    path: &mut Vec<String>,
) -> Option<Vec<String>> {
    visited.insert(node.to_string());
    rec_stack.insert(node.to_string());
    path.push(node.to_string());

    for dep in edges.get(node).into_iter().flatten() {
        if !edges.contains_key(dep.as_str()) {
            continue;
        }
        if !visited.contains(dep) {
            if let Some(cycle) = dfs_cycle(edges, dep, visited, rec_stack, path) {
                return Some(cycle);
            }
        } else if rec_stack.contains(dep) {
            let start = path.iter().position(|n| n == dep).unwrap_or(0);
            let mut cycle = path[start..].to_vec();
            cycle.push(dep.clone());
            return Some(cycle);
        }
    }

    path.pop();
    rec_stack.remove(node);
    None
}

/// Names visible to the stage being checked.
struct Scope<'a> {
    def: &'a PipelineDefinition,
    /// Earlier stages, mapped to whether their outputs are guaranteed.
    earlier: HashMap<&'a str, bool>,
}

impl Scope<'_> {
    /// Checks that `source` is visible and returns whether it is guaranteed.
    fn resolve(&self, stage: &str, source: &InputSource) -> Result<bool, PipelineValidationError> {
        match source {
            InputSource::Parameter(name) => match self.def.parameter(name) {
                Some(param) => Ok(param.is_guaranteed()),
                None => Err(error(
                    "DEF-003-DANGLING_INPUT",
                    Some(stage),
                    format!("Stage '{stage}' references undeclared parameter '{name}'"),
                    "Declare the parameter or reference an earlier stage output as 'stage.output'.",
                )),
            },
            InputSource::Output { stage: producer, output } => {
                let Some(guaranteed) = self.earlier.get(producer.as_str()) else {
                    let (code, message, hint) = if self.def.stage(producer).is_some() {
                        (
                            "DEF-003-FORWARD_REF",
                            format!("Stage '{stage}' references '{source}' from a later stage"),
                            "Stages may only consume outputs of strictly earlier stages; reorder the pipeline.",
                        )
                    } else {
                        (
                            "DEF-003-DANGLING_INPUT",
                            format!("Stage '{stage}' references unknown stage '{producer}'"),
                            "Check the stage name in the reference.",
                        )
                    };
                    return Err(error(code, Some(stage), message, hint));
                };
                let declares = self
                    .def
                    .stage(producer)
                    .is_some_and(|p| p.declares_output(output));
                if !declares {
                    return Err(error(
                        "DEF-003-UNDECLARED_OUTPUT",
                        Some(stage),
                        format!("Stage '{producer}' does not declare output '{output}' read by '{stage}'"),
                        "Declare the output on the producing stage.",
                    ));
                }
                Ok(*guaranteed)
            }
        }
    }
}

/// Checks one stage. Required-input guarantees only matter for stages that
/// can run.
fn check_stage(
    scope: &Scope<'_>,
    spec: &StageSpec,
    enabled: bool,
) -> Result<(), PipelineValidationError> {
    let mut names = HashSet::new();
    for binding in &spec.inputs {
        if !is_valid_identifier(&binding.name) || !names.insert(binding.name.as_str()) {
            return Err(error(
                "DEF-003-INPUT_NAME",
                Some(spec.name.as_str()),
                format!("Stage '{}' declares invalid or duplicate input '{}'", spec.name, binding.name),
                "Input names must be unique identifiers within a stage.",
            ));
        }
        if binding.sources.is_empty() {
            return Err(error(
                "DEF-003-DANGLING_INPUT",
                Some(spec.name.as_str()),
                format!("Input '{}' of stage '{}' has no source", binding.name, spec.name),
                "Bind the input to a parameter or an earlier stage output.",
            ));
        }

        let mut guaranteed = false;
        for source in &binding.sources {
            guaranteed |= scope.resolve(&spec.name, source)?;
        }
        if enabled && binding.required && !guaranteed {
            let sources: Vec<String> = binding.sources.iter().map(ToString::to_string).collect();
            return Err(error(
                "DEF-005-UNGUARANTEED_INPUT",
                Some(spec.name.as_str()),
                format!(
                    "Required input '{}' of stage '{}' may be absent (sources: {})",
                    binding.name,
                    spec.name,
                    sources.join(", ")
                ),
                "Mark the input optional, add a fallback source, or make its producer unconditional.",
            ));
        }
    }

    if let Some(expression) = &spec.condition {
        let condition = Condition::parse(expression).map_err(|e| {
            error(
                "DEF-007-CONDITION",
                Some(spec.name.as_str()),
                format!("Stage '{}' has an invalid run condition: {e}", spec.name),
                "Conditions use ==, !=, &&, ||, ! over parameters, stage outputs and literals.",
            )
        })?;
        for reference in condition.references() {
            scope.resolve(&spec.name, reference)?;
        }
    }
    Ok(())
}

fn check_registration(scope: &Scope<'_>) -> Result<(), PipelineValidationError> {
    let Some(registration) = &scope.def.registration else {
        return Ok(());
    };
    let stage = registration.stage_name.as_str();

    for (field, source) in registration.required_sources() {
        if !scope.resolve(stage, source)? {
            return Err(error(
                "DEF-008-REGISTRATION",
                Some(stage),
                format!("Registration {field} source '{source}' may be absent"),
                "Registration sources must come from guaranteed parameters or unconditional stages.",
            ));
        }
    }
    for source in registration.metadata_bindings.values() {
        scope.resolve(stage, source)?;
    }
    Ok(())
}
