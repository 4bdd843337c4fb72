//! Shared helpers for integration tests.
#![allow(dead_code)]

use std::path::Path;

use batchflow::domain::models::{Config, WorkflowSpec};
use batchflow::services::Controller;

/// Config with fast retry backoff so lock-contention tests stay quick.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.retry.initial_backoff_ms = 5;
    config.retry.max_backoff_ms = 50;
    config
}

pub fn controller_in(workdir: &Path) -> Controller {
    Controller::new(test_config(), workdir.to_path_buf())
}

/// One command group over one data variable.
pub fn single_group_spec(command: &str, var: &str, values: &[&str]) -> WorkflowSpec {
    let yaml = format!(
        "command_groups:\n  - commands: [\"{}\"]\n    parallel_variables: false\nvariables:\n  {}:\n    value: \"{{:s}}\"\n    data: [{}]\n",
        command,
        var,
        values.join(", ")
    );
    serde_yaml::from_str(&yaml).expect("test spec parses")
}

/// Grid of (exec_order, sub_order, command) groups plus raw variables.
pub fn grid_spec(groups: &[(i64, i64, &str)], variables: &str) -> WorkflowSpec {
    let mut yaml = String::from("command_groups:\n");
    for (exec, sub, command) in groups {
        yaml.push_str(&format!(
            "  - commands: [\"{}\"]\n    exec_order: {}\n    sub_order: {}\n",
            command, exec, sub
        ));
    }
    if !variables.is_empty() {
        yaml.push_str("variables:\n");
        yaml.push_str(variables);
    }
    serde_yaml::from_str(&yaml).expect("test spec parses")
}
