//! Two-phase variable resolver.
//!
//! Phase A (submit time) walks the variable DAG restricted to what a
//! command group references, resolving base variables first and compound
//! variables as row-major products over *axes*. An axis is a variable
//! that owns base values; a compound variable's axes are the union of its
//! references' axes (first-appearance order) plus a self axis when it
//! carries data of its own. Shared axes are bound, disjoint axes
//! multiply, so a reference repeated within one template never inflates
//! the product.
//!
//! Phase B (runtime) repeats the walk in the now-populated working
//! directory and materializes one value file per variable per command
//! group, one row per line, for the jobscript to read.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::domain::error::ResolutionError;
use crate::domain::models::{BaseValues, CommandGroup, VarDefinition, Workflow};
use crate::domain::template;

/// Which phase the resolver is serving. At submit time an unpopulated
/// file-regex scan defers; at runtime it is an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Submit,
    Runtime,
}

/// A fully resolved variable: its axes and the row-major value vector.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedVar {
    pub name: String,
    /// (axis id, axis length), outermost first
    pub axes: Vec<(String, usize)>,
    pub values: Vec<String>,
}

/// Outcome of resolving one variable.
#[derive(Debug, Clone, PartialEq)]
pub enum VarResolution {
    Resolved(ResolvedVar),
    /// Unresolvable until the working directory is populated
    Deferred,
}

impl VarResolution {
    pub fn resolved(&self) -> Option<&ResolvedVar> {
        match self {
            Self::Resolved(var) => Some(var),
            Self::Deferred => None,
        }
    }
}

/// The value matrix of one command group: a column per directly
/// referenced variable over the group's combined axis space.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueMatrix {
    pub axes: Vec<(String, usize)>,
    /// (variable name, column values), one entry per direct reference
    pub columns: Vec<(String, Vec<String>)>,
}

impl ValueMatrix {
    pub fn num_rows(&self) -> usize {
        self.axes.iter().map(|(_, len)| len).product()
    }

    pub fn column(&self, name: &str) -> Option<&[String]> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, values)| values.as_slice())
    }

    /// The bound values for one task row.
    pub fn row(&self, index: usize) -> Vec<(&str, &str)> {
        self.columns
            .iter()
            .map(|(name, values)| (name.as_str(), values[index].as_str()))
            .collect()
    }
}

// Stride of each axis within a row-major space, first axis outermost.
fn strides(axes: &[(String, usize)]) -> HashMap<String, usize> {
    let mut strides = HashMap::new();
    let mut stride = 1;
    for (name, len) in axes.iter().rev() {
        strides.insert(name.clone(), stride);
        stride *= len;
    }
    strides
}

fn coords(mut index: usize, axes: &[(String, usize)]) -> HashMap<String, usize> {
    let axis_strides = strides(axes);
    let mut coords = HashMap::new();
    for (name, _) in axes {
        let stride = axis_strides[name];
        coords.insert(name.clone(), index / stride);
        index %= stride;
    }
    coords
}

// Project a row of an enclosing space onto a variable's own axis space.
fn project(coords: &HashMap<String, usize>, axes: &[(String, usize)]) -> usize {
    let axis_strides = strides(axes);
    axes.iter()
        .map(|(name, _)| coords[name] * axis_strides[name])
        .sum()
}

/// Resolve every variable a command group reaches, in dependency order.
pub fn resolve_group_variables(
    workflow: &Workflow,
    group: &CommandGroup,
    directory: &Path,
    phase: Phase,
) -> Result<BTreeMap<String, VarResolution>, ResolutionError> {
    let defs = workflow.variables_for_group(group);
    let mut done: BTreeMap<String, VarResolution> = BTreeMap::new();
    let mut pending: Vec<&VarDefinition> = defs;

    while !pending.is_empty() {
        let ready_at = pending
            .iter()
            .position(|def| def.references().iter().all(|r| done.contains_key(r)));
        // Cycles are rejected at declaration time; a stale store row could
        // still produce one, so fail instead of spinning.
        let Some(position) = ready_at else {
            let name = pending[0].name.clone();
            return Err(ResolutionError::Unresolved(name));
        };
        let def = pending.remove(position);
        let resolution = resolve_one(def, &done, directory, phase)?;
        done.insert(def.name.clone(), resolution);
    }

    Ok(done)
}

fn resolve_one(
    def: &VarDefinition,
    done: &BTreeMap<String, VarResolution>,
    directory: &Path,
    phase: Phase,
) -> Result<VarResolution, ResolutionError> {
    let references = def.references();

    // A deferred dependency defers everything above it.
    let mut ref_vars = Vec::with_capacity(references.len());
    for name in &references {
        match done.get(name).and_then(|r| r.resolved()) {
            Some(var) => ref_vars.push(var),
            None => return Ok(VarResolution::Deferred),
        }
    }

    let own = match def.base_values(directory)? {
        BaseValues::Known(values) => Some(values),
        BaseValues::None => None,
        BaseValues::Deferred => {
            if phase == Phase::Runtime {
                return Err(ResolutionError::EmptyScan {
                    name: def.name.clone(),
                    directory: directory.display().to_string(),
                });
            }
            return Ok(VarResolution::Deferred);
        }
    };

    // Axis space: references' axes in first-appearance order, then a self
    // axis when the variable carries its own base values.
    let mut axes: Vec<(String, usize)> = Vec::new();
    for var in &ref_vars {
        for axis in &var.axes {
            if !axes.iter().any(|(name, _)| name == &axis.0) {
                axes.push(axis.clone());
            }
        }
    }
    if let Some(own_values) = &own {
        axes.push((def.name.clone(), own_values.len()));
    }

    let total: usize = axes.iter().map(|(_, len)| len).product();
    let mut values = Vec::with_capacity(total);
    for row in 0..total {
        let row_coords = coords(row, &axes);
        let mut bindings = HashMap::new();
        for var in &ref_vars {
            let index = project(&row_coords, &var.axes);
            bindings.insert(var.name.clone(), var.values[index].clone());
        }
        let substituted = template::substitute(&def.value, &bindings);
        let value = match &own {
            Some(own_values) => {
                let own_index = row_coords[&def.name];
                template::apply_positional(&substituted, &own_values[own_index], &def.name)?
            }
            None => substituted,
        };
        values.push(value);
    }

    Ok(VarResolution::Resolved(ResolvedVar {
        name: def.name.clone(),
        axes,
        values,
    }))
}

/// Build a command group's value matrix from its resolved variables.
/// Returns None if any directly referenced variable is deferred.
pub fn group_matrix(
    group: &CommandGroup,
    resolutions: &BTreeMap<String, VarResolution>,
) -> Option<ValueMatrix> {
    let direct = group.referenced_variables();
    let mut vars = Vec::with_capacity(direct.len());
    for name in &direct {
        vars.push(resolutions.get(name)?.resolved()?);
    }

    let mut axes: Vec<(String, usize)> = Vec::new();
    for var in &vars {
        for axis in &var.axes {
            if !axes.iter().any(|(name, _)| name == &axis.0) {
                axes.push(axis.clone());
            }
        }
    }

    let total: usize = axes.iter().map(|(_, len)| len).product();
    let mut columns = Vec::with_capacity(vars.len());
    for var in &vars {
        let mut column = Vec::with_capacity(total);
        for row in 0..total {
            let row_coords = coords(row, &axes);
            column.push(var.values[project(&row_coords, &var.axes)].clone());
        }
        columns.push((var.name.clone(), column));
    }

    Some(ValueMatrix { axes, columns })
}

/// Task count usable before resolution: the product of statically known
/// multiplicities across the group's variable closure. None when any
/// file-regex variable lacks a subset hint, in which case the group
/// submits a single looping task.
pub fn provisional_task_count(workflow: &Workflow, group: &CommandGroup) -> Option<usize> {
    let mut count = 1usize;
    for def in workflow.variables_for_group(group) {
        if def.has_base_values() {
            count *= def.static_multiplicity()?;
        }
    }
    Some(count)
}

/// Phase B materialization: one value file per column, one row per line.
/// Returns (variable name, file path) pairs in column order.
pub fn write_value_files(
    matrix: &ValueMatrix,
    directory: &Path,
    extension: &str,
) -> std::io::Result<Vec<(String, PathBuf)>> {
    std::fs::create_dir_all(directory)?;
    let mut files = Vec::with_capacity(matrix.columns.len());
    for (name, values) in &matrix.columns {
        let path = directory.join(format!("var_{}{}", name, extension));
        let mut body = String::new();
        for value in values {
            body.push_str(value);
            body.push('\n');
        }
        // Write-and-rename keeps concurrent writers byte-stable.
        let tmp = directory.join(format!(".var_{}{}.tmp{}", name, extension, std::process::id()));
        {
            let mut handle = std::fs::File::create(&tmp)?;
            handle.write_all(body.as_bytes())?;
        }
        std::fs::rename(&tmp, &path)?;
        files.push((name.clone(), path));
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::workflow::{
        CommandGroupSpec, GroupOverrides, VariableSpec, WorkflowSpec,
    };
    use serde_json::json;
    use std::path::PathBuf;

    fn workflow_from(commands: Vec<&str>, vars: Vec<(&str, VariableSpec)>) -> Workflow {
        let spec = WorkflowSpec {
            command_groups: vec![CommandGroupSpec {
                commands: commands.into_iter().map(String::from).collect(),
                ..Default::default()
            }],
            variables: vars
                .into_iter()
                .map(|(name, spec)| (name.to_string(), spec))
                .collect(),
            ..Default::default()
        };
        Workflow::from_spec(&spec, PathBuf::from("/work"), &GroupOverrides::default()).unwrap()
    }

    fn data(values: Vec<serde_json::Value>, template: &str) -> VariableSpec {
        VariableSpec {
            value: Some(template.into()),
            data: Some(values),
            ..Default::default()
        }
    }

    fn resolve(workflow: &Workflow) -> BTreeMap<String, VarResolution> {
        resolve_group_variables(
            workflow,
            &workflow.command_groups[0],
            &workflow.directory,
            Phase::Submit,
        )
        .unwrap()
    }

    #[test]
    fn test_single_base_variable() {
        // One group, one data variable with five values
        let workflow = workflow_from(
            vec!["postProcess <<f>>"],
            vec![(
                "f",
                data(
                    vec![json!("a"), json!("b"), json!("c"), json!("d"), json!("e")],
                    "{:s}",
                ),
            )],
        );
        let resolutions = resolve(&workflow);
        let f = resolutions["f"].resolved().unwrap();
        assert_eq!(f.values, vec!["a", "b", "c", "d", "e"]);

        let matrix = group_matrix(&workflow.command_groups[0], &resolutions).unwrap();
        assert_eq!(matrix.num_rows(), 5);
        assert_eq!(matrix.column("f").unwrap(), f.values.as_slice());
    }

    #[test]
    fn test_compound_product_with_bound_column() {
        // file depends on base and carries its own data axis; the group
        // matrix binds base row-wise to the same product.
        let workflow = workflow_from(
            vec!["process <<file>> --tag <<base>>"],
            vec![
                ("base", data(vec![json!("x"), json!("y")], "{:s}")),
                (
                    "file",
                    data(
                        vec![json!(20), json!(40)],
                        "out/<<base>>_inc{:03d}.txt",
                    ),
                ),
            ],
        );
        let resolutions = resolve(&workflow);
        let file = resolutions["file"].resolved().unwrap();
        assert_eq!(
            file.values,
            vec![
                "out/x_inc020.txt",
                "out/x_inc040.txt",
                "out/y_inc020.txt",
                "out/y_inc040.txt",
            ]
        );

        let matrix = group_matrix(&workflow.command_groups[0], &resolutions).unwrap();
        assert_eq!(matrix.num_rows(), 4);
        assert_eq!(matrix.column("base").unwrap(), ["x", "x", "y", "y"]);
    }

    #[test]
    fn test_repeated_reference_is_bound_not_multiplied() {
        let workflow = workflow_from(
            vec!["link <<pair>>"],
            vec![
                ("a", data(vec![json!("p"), json!("q")], "{:s}")),
                (
                    "pair",
                    VariableSpec {
                        value: Some("<<a>>-<<a>>".into()),
                        ..Default::default()
                    },
                ),
            ],
        );
        let resolutions = resolve(&workflow);
        let pair = resolutions["pair"].resolved().unwrap();
        assert_eq!(pair.values, vec!["p-p", "q-q"]);
    }

    #[test]
    fn test_independent_variables_multiply() {
        let workflow = workflow_from(
            vec!["run <<a>> <<b>>"],
            vec![
                ("a", data(vec![json!(1), json!(2)], "{:d}")),
                ("b", data(vec![json!("u"), json!("v"), json!("w")], "{:s}")),
            ],
        );
        let resolutions = resolve(&workflow);
        let matrix = group_matrix(&workflow.command_groups[0], &resolutions).unwrap();
        assert_eq!(matrix.num_rows(), 6);
        assert_eq!(matrix.column("a").unwrap(), ["1", "1", "1", "2", "2", "2"]);
        assert_eq!(
            matrix.column("b").unwrap(),
            ["u", "v", "w", "u", "v", "w"]
        );
    }

    #[test]
    fn test_shared_axis_binds_across_columns() {
        // Two compounds over the same base share its axis.
        let workflow = workflow_from(
            vec!["mv <<src>> <<dst>>"],
            vec![
                ("n", data(vec![json!(1), json!(2)], "{:d}")),
                (
                    "src",
                    VariableSpec {
                        value: Some("in/<<n>>.dat".into()),
                        ..Default::default()
                    },
                ),
                (
                    "dst",
                    VariableSpec {
                        value: Some("out/<<n>>.dat".into()),
                        ..Default::default()
                    },
                ),
            ],
        );
        let resolutions = resolve(&workflow);
        let matrix = group_matrix(&workflow.command_groups[0], &resolutions).unwrap();
        assert_eq!(matrix.num_rows(), 2);
        assert_eq!(matrix.column("src").unwrap(), ["in/1.dat", "in/2.dat"]);
        assert_eq!(matrix.column("dst").unwrap(), ["out/1.dat", "out/2.dat"]);
    }

    #[test]
    fn test_file_regex_defers_at_submit() {
        let workflow = workflow_from(
            vec!["collect <<found>> into <<merged>>"],
            vec![
                (
                    "found",
                    VariableSpec {
                        value: Some("{:d}".into()),
                        file_regex: Some(crate::domain::models::FileRegex {
                            pattern: r"out_(\d+)\.dat".into(),
                            group: 0,
                            kind: crate::domain::models::ValueKind::Int,
                            subset: None,
                        }),
                        ..Default::default()
                    },
                ),
                (
                    "merged",
                    VariableSpec {
                        value: Some("merged_<<found>>".into()),
                        ..Default::default()
                    },
                ),
            ],
        );
        let resolutions = resolve(&workflow);
        assert_eq!(resolutions["found"], VarResolution::Deferred);
        // Deferral propagates to dependents
        assert_eq!(resolutions["merged"], VarResolution::Deferred);
        assert!(group_matrix(&workflow.command_groups[0], &resolutions).is_none());
    }

    #[test]
    fn test_file_regex_empty_errors_at_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let mut workflow = workflow_from(
            vec!["collect <<found>>"],
            vec![(
                "found",
                VariableSpec {
                    value: Some("{:d}".into()),
                    file_regex: Some(crate::domain::models::FileRegex {
                        pattern: r"out_(\d+)\.dat".into(),
                        group: 0,
                        kind: crate::domain::models::ValueKind::Int,
                        subset: None,
                    }),
                    ..Default::default()
                },
            )],
        );
        workflow.directory = dir.path().to_path_buf();
        let err = resolve_group_variables(
            &workflow,
            &workflow.command_groups[0],
            dir.path(),
            Phase::Runtime,
        )
        .unwrap_err();
        assert!(matches!(err, ResolutionError::EmptyScan { .. }));
    }

    #[test]
    fn test_file_regex_resolves_at_runtime() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["out_3.dat", "out_7.dat"] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }
        let mut workflow = workflow_from(
            vec!["collect <<found>>"],
            vec![(
                "found",
                VariableSpec {
                    value: Some("{:d}".into()),
                    file_regex: Some(crate::domain::models::FileRegex {
                        pattern: r"out_(\d+)\.dat".into(),
                        group: 0,
                        kind: crate::domain::models::ValueKind::Int,
                        subset: None,
                    }),
                    ..Default::default()
                },
            )],
        );
        workflow.directory = dir.path().to_path_buf();
        let resolutions = resolve_group_variables(
            &workflow,
            &workflow.command_groups[0],
            dir.path(),
            Phase::Runtime,
        )
        .unwrap();
        let found = resolutions["found"].resolved().unwrap();
        assert_eq!(found.values, vec!["3", "7"]);
    }

    #[test]
    fn test_provisional_task_count() {
        let workflow = workflow_from(
            vec!["run <<a>>"],
            vec![("a", data(vec![json!(1), json!(2), json!(3)], "{:d}"))],
        );
        assert_eq!(
            provisional_task_count(&workflow, &workflow.command_groups[0]),
            Some(3)
        );

        let deferred = workflow_from(
            vec!["run <<f>>"],
            vec![(
                "f",
                VariableSpec {
                    value: Some("{:s}".into()),
                    file_regex: Some(crate::domain::models::FileRegex {
                        pattern: "x(.)".into(),
                        group: 0,
                        kind: crate::domain::models::ValueKind::Str,
                        subset: None,
                    }),
                    ..Default::default()
                },
            )],
        );
        assert_eq!(
            provisional_task_count(&deferred, &deferred.command_groups[0]),
            None
        );
    }

    #[test]
    fn test_group_without_variables_has_one_row() {
        let workflow = workflow_from(vec!["echo done"], vec![]);
        let resolutions = resolve(&workflow);
        let matrix = group_matrix(&workflow.command_groups[0], &resolutions).unwrap();
        assert_eq!(matrix.num_rows(), 1);
        assert!(matrix.columns.is_empty());
    }

    #[test]
    fn test_write_value_files() {
        let dir = tempfile::tempdir().unwrap();
        let matrix = ValueMatrix {
            axes: vec![("f".into(), 2)],
            columns: vec![("f".into(), vec!["a".into(), "b".into()])],
        };
        let files = write_value_files(&matrix, dir.path(), ".txt").unwrap();
        assert_eq!(files.len(), 1);
        let body = std::fs::read_to_string(&files[0].1).unwrap();
        assert_eq!(body, "a\nb\n");

        // Re-writing produces identical bytes
        write_value_files(&matrix, dir.path(), ".txt").unwrap();
        assert_eq!(std::fs::read_to_string(&files[0].1).unwrap(), body);
    }
}
