//! Command groups: ordered lists of shell command templates that become a
//! single jobscript.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::error::DeclarationError;
use crate::domain::template;

/// A normalized command group within a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandGroup {
    /// Declaration index within the workflow
    pub index: usize,
    /// Coarse ordinal deciding scheduler hold dependencies
    pub exec_order: i64,
    /// Parallel channel within the exec_order
    pub sub_order: i64,
    /// Shell command templates with `<<name>>` placeholders
    pub commands: Vec<String>,
    /// Working-directory override relative to the workflow directory
    pub directory: Option<String>,
    /// Opaque scheduler options, passed through to the bridge
    pub scheduler_options: BTreeMap<String, String>,
    /// Environment modules loaded before the commands run
    pub modules: Vec<String>,
    /// Execute as a scheduler job array
    pub job_array: bool,
    /// One task per value-matrix row (vs a single task looping over rows)
    pub parallel_variables: bool,
    pub profile_name: Option<String>,
    pub profile_order: Option<i64>,
}

impl CommandGroup {
    /// Variable names referenced directly by the commands and the
    /// directory override, in first-appearance order.
    pub fn referenced_variables(&self) -> Vec<String> {
        let mut names = Vec::new();
        for cmd in &self.commands {
            for name in template::unique_references(cmd) {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        if let Some(dir) = &self.directory {
            for name in template::unique_references(dir) {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        names
    }

    /// Every group needs at least one non-empty command.
    pub fn validate(&self) -> Result<(), DeclarationError> {
        if self.commands.is_empty() || self.commands.iter().any(|c| c.trim().is_empty()) {
            return Err(DeclarationError::EmptyCommands(self.index));
        }
        Ok(())
    }
}
