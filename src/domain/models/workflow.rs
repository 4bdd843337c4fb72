//! Workflow aggregate: the persisted, validated unit of command groups and
//! variable definitions.
//!
//! `WorkflowSpec` is the parsed declaration document; `normalize` applies
//! option inheritance and default ordering, and `Workflow::validate`
//! enforces the declaration invariants before anything is persisted.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::error::DeclarationError;
use crate::domain::models::command_group::CommandGroup;
use crate::domain::models::variable::{FileRegex, VarDefinition, VarSource};

/// One command group as declared.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandGroupSpec {
    pub commands: Vec<String>,
    #[serde(default)]
    pub exec_order: Option<i64>,
    #[serde(default)]
    pub sub_order: Option<i64>,
    #[serde(default)]
    pub options: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub directory: Option<String>,
    #[serde(default)]
    pub modules: Option<Vec<String>>,
    #[serde(default)]
    pub job_array: Option<bool>,
    #[serde(default)]
    pub parallel_variables: Option<bool>,
}

/// One variable as declared: a value template plus at most one of `data`
/// or `file_regex`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VariableSpec {
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub data: Option<Vec<Value>>,
    #[serde(default)]
    pub file_regex: Option<FileRegex>,
}

/// The parsed workflow declaration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowSpec {
    pub command_groups: Vec<CommandGroupSpec>,
    #[serde(default)]
    pub variables: BTreeMap<String, VariableSpec>,
    /// Workflow-level defaults inherited by every command group
    #[serde(default)]
    pub options: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub directory: Option<String>,
    #[serde(default)]
    pub modules: Option<Vec<String>>,
    #[serde(default)]
    pub job_array: Option<bool>,
    #[serde(default)]
    pub profile_name: Option<String>,
    #[serde(default)]
    pub profile_order: Option<i64>,
}

/// Call-site overrides, the highest inheritance level.
#[derive(Debug, Clone, Default)]
pub struct GroupOverrides {
    pub options: Option<BTreeMap<String, String>>,
    pub directory: Option<String>,
    pub modules: Option<Vec<String>>,
    pub job_array: Option<bool>,
}

impl WorkflowSpec {
    /// Apply the three-level option inheritance (workflow default, group
    /// override, call-site override) and fill missing exec/sub orders.
    ///
    /// When no group declares an `exec_order`, groups execute in
    /// declaration order, one per level. `sub_order` defaults to 0.
    pub fn normalize(&self, overrides: &GroupOverrides) -> Vec<CommandGroup> {
        self.command_groups
            .iter()
            .enumerate()
            .map(|(index, spec)| {
                CommandGroup {
                    index,
                    exec_order: spec.exec_order.unwrap_or(index as i64),
                    sub_order: spec.sub_order.unwrap_or(0),
                    commands: spec.commands.clone(),
                    directory: overrides
                        .directory
                        .clone()
                        .or_else(|| spec.directory.clone())
                        .or_else(|| self.directory.clone()),
                    scheduler_options: overrides
                        .options
                        .clone()
                        .or_else(|| spec.options.clone())
                        .or_else(|| self.options.clone())
                        .unwrap_or_default(),
                    modules: overrides
                        .modules
                        .clone()
                        .or_else(|| spec.modules.clone())
                        .or_else(|| self.modules.clone())
                        .unwrap_or_default(),
                    job_array: overrides
                        .job_array
                        .or(spec.job_array)
                        .or(self.job_array)
                        .unwrap_or(true),
                    parallel_variables: spec.parallel_variables.unwrap_or(true),
                    profile_name: self.profile_name.clone(),
                    profile_order: self.profile_order,
                }
            })
            .collect()
    }

    /// Build the variable definitions from the declaration.
    pub fn variable_definitions(&self) -> BTreeMap<String, VarDefinition> {
        self.variables
            .iter()
            .map(|(name, spec)| {
                let source = match (&spec.data, &spec.file_regex) {
                    (Some(data), _) => Some(VarSource::Data(data.clone())),
                    (None, Some(fr)) => Some(VarSource::FileRegex(fr.clone())),
                    (None, None) => None,
                };
                (
                    name.clone(),
                    VarDefinition::new(name.clone(), source, spec.value.clone()),
                )
            })
            .collect()
    }
}

/// The validated workflow aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    /// Absolute working directory shared by all tasks
    pub directory: PathBuf,
    pub command_groups: Vec<CommandGroup>,
    pub variables: BTreeMap<String, VarDefinition>,
}

impl Workflow {
    /// Build and validate a workflow from a declaration. Nothing is
    /// persisted when this fails.
    pub fn from_spec(
        spec: &WorkflowSpec,
        directory: PathBuf,
        overrides: &GroupOverrides,
    ) -> Result<Self, DeclarationError> {
        let workflow = Self {
            id: 0,
            created_at: Utc::now(),
            directory,
            command_groups: spec.normalize(overrides),
            variables: spec.variable_definitions(),
        };
        workflow.validate()?;
        Ok(workflow)
    }

    /// Number of channels at the minimum exec_order.
    pub fn channel_width(&self) -> usize {
        let Some(first) = self.command_groups.iter().map(|g| g.exec_order).min() else {
            return 0;
        };
        self.command_groups
            .iter()
            .filter(|g| g.exec_order == first)
            .map(|g| g.sub_order)
            .collect::<HashSet<_>>()
            .len()
    }

    /// Distinct exec_order values, ascending.
    pub fn exec_orders(&self) -> Vec<i64> {
        let mut orders: Vec<i64> = self
            .command_groups
            .iter()
            .map(|g| g.exec_order)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        orders.sort_unstable();
        orders
    }

    /// Groups at one exec_order, ordered by (sub_order, declaration index).
    pub fn groups_at(&self, exec_order: i64) -> Vec<&CommandGroup> {
        let mut groups: Vec<&CommandGroup> = self
            .command_groups
            .iter()
            .filter(|g| g.exec_order == exec_order)
            .collect();
        groups.sort_by_key(|g| (g.sub_order, g.index));
        groups
    }

    /// All declaration invariants: command groups, channel topology,
    /// variable references and acyclicity, template well-formedness.
    pub fn validate(&self) -> Result<(), DeclarationError> {
        for group in &self.command_groups {
            group.validate()?;
        }
        self.validate_topology()?;
        self.validate_variables()
    }

    fn validate_topology(&self) -> Result<(), DeclarationError> {
        let orders = self.exec_orders();
        if orders.is_empty() {
            return Ok(());
        }
        let expected: Vec<i64> = (0..orders.len() as i64).collect();
        if orders != expected {
            return Err(DeclarationError::BadExecOrders(orders));
        }

        let mut prev_width: Option<usize> = None;
        for &order in &orders {
            let groups = self.groups_at(order);
            let subs: Vec<i64> = groups.iter().map(|g| g.sub_order).collect();
            let expected: Vec<i64> = (0..subs.len() as i64).collect();
            if subs != expected {
                return Err(DeclarationError::NonContiguousChannels {
                    exec_order: order,
                    got: subs,
                });
            }
            // Channels may merge but never split or reappear.
            if let Some(parents) = prev_width {
                if subs.len() > parents {
                    return Err(DeclarationError::ChannelSplit {
                        exec_order: order,
                        channels: subs.len(),
                        parents,
                    });
                }
            }
            prev_width = Some(subs.len());
        }
        Ok(())
    }

    fn validate_variables(&self) -> Result<(), DeclarationError> {
        for var in self.variables.values() {
            var.validate()?;
            for reference in var.references() {
                if !self.variables.contains_key(&reference) {
                    return Err(DeclarationError::UndefinedVariable(reference));
                }
            }
        }
        for group in &self.command_groups {
            for name in group.referenced_variables() {
                if !self.variables.contains_key(&name) {
                    return Err(DeclarationError::UndefinedVariable(name));
                }
            }
        }
        self.check_cycles()
    }

    // DFS cycle detection over the variable reference graph.
    fn check_cycles(&self) -> Result<(), DeclarationError> {
        fn visit(
            name: &str,
            variables: &BTreeMap<String, VarDefinition>,
            visited: &mut HashSet<String>,
            stack: &mut Vec<String>,
        ) -> Option<Vec<String>> {
            if stack.iter().any(|n| n == name) {
                let start = stack.iter().position(|n| n == name).unwrap();
                let mut cycle = stack[start..].to_vec();
                cycle.push(name.to_string());
                return Some(cycle);
            }
            if visited.contains(name) {
                return None;
            }
            stack.push(name.to_string());
            if let Some(var) = variables.get(name) {
                for reference in var.references() {
                    if let Some(cycle) = visit(&reference, variables, visited, stack) {
                        return Some(cycle);
                    }
                }
            }
            stack.pop();
            visited.insert(name.to_string());
            None
        }

        let mut visited = HashSet::new();
        for name in self.variables.keys() {
            let mut stack = Vec::new();
            if let Some(cycle) = visit(name, &self.variables, &mut visited, &mut stack) {
                return Err(DeclarationError::CyclicVariables(cycle.join(" -> ")));
            }
        }
        Ok(())
    }

    /// Variable definitions reachable from a command group's templates,
    /// including those reached transitively through value templates.
    pub fn variables_for_group(&self, group: &CommandGroup) -> Vec<&VarDefinition> {
        let mut queue: Vec<String> = group.referenced_variables();
        let mut seen: Vec<String> = Vec::new();
        while let Some(name) = queue.pop() {
            if seen.contains(&name) {
                continue;
            }
            if let Some(var) = self.variables.get(&name) {
                queue.extend(var.references());
                seen.push(name);
            }
        }
        seen.sort();
        seen.iter().filter_map(|n| self.variables.get(n)).collect()
    }
}
