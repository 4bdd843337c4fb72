//! CLI type definitions.
//!
//! clap command structures for every batchflow operation, including the
//! runtime hooks jobscripts invoke on cluster nodes.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "batchflow")]
#[command(about = "Declarative workflow submission for HPC batch schedulers", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Working directory (defaults to the invoking directory)
    #[arg(short = 'd', long, global = true)]
    pub dir: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build and persist a workflow from a declaration file
    Make {
        /// Workflow declaration (YAML or JSON); defaults to workflow.yml
        #[arg(default_value = "workflow.yml")]
        spec: PathBuf,
    },

    /// Submit a workflow, making it first when no id is given
    Submit {
        /// Submit an existing workflow by id
        #[arg(short, long, conflicts_with = "spec")]
        workflow: Option<i64>,

        /// Workflow declaration to make and submit
        #[arg(short, long)]
        spec: Option<PathBuf>,

        /// Task ranges, one per channel, comma-separated
        /// (e.g. "0-4,0-2" or "0-9:2,all")
        #[arg(short = 't', long)]
        tasks: Option<String>,

        /// Start a new iteration with fresh task records
        #[arg(long)]
        iterate: bool,
    },

    /// Runtime hook: resolve variables and write a task's command file
    WriteCmd {
        jobscript_id: i64,
        task_index: i64,
    },

    /// Runtime hook: record a task start
    SetTaskStart {
        jobscript_id: i64,
        task_index: i64,
    },

    /// Runtime hook: record a task end with its exit status
    SetTaskEnd {
        jobscript_id: i64,
        task_index: i64,

        #[arg(long, default_value = "0")]
        exit_status: i64,
    },

    /// Cancel scheduler jobs and fail non-terminal tasks
    Kill {
        /// Workflow to cancel; every workflow in the store when omitted
        workflow_id: Option<i64>,

        /// Cancel the workflow owning this submission instead
        #[arg(short, long, conflicts_with = "workflow_id")]
        submission: Option<i64>,
    },

    /// Remove all generated artifacts from the working directory
    Clean {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        force: bool,
    },

    /// Summarize task states per workflow
    Stat {
        #[arg(short, long)]
        workflow: Option<i64>,
    },

    /// Show per-task statistics
    ShowStats {
        #[arg(short, long)]
        workflow: Option<i64>,
    },

    /// Record an archive operation for a task
    Archive {
        task_id: i64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_structure_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_submit_with_ranges() {
        let cli = Cli::try_parse_from([
            "batchflow", "submit", "-w", "3", "-t", "0-4,all", "--iterate",
        ])
        .unwrap();
        match cli.command {
            Commands::Submit {
                workflow,
                tasks,
                iterate,
                ..
            } => {
                assert_eq!(workflow, Some(3));
                assert_eq!(tasks.as_deref(), Some("0-4,all"));
                assert!(iterate);
            }
            _ => panic!("expected submit"),
        }
    }

    #[test]
    fn test_parse_runtime_hooks() {
        let cli = Cli::try_parse_from([
            "batchflow",
            "set-task-end",
            "7",
            "2",
            "--exit-status",
            "1",
            "--dir",
            "/work",
        ])
        .unwrap();
        assert_eq!(cli.dir, Some(PathBuf::from("/work")));
        match cli.command {
            Commands::SetTaskEnd {
                jobscript_id,
                task_index,
                exit_status,
            } => {
                assert_eq!((jobscript_id, task_index, exit_status), (7, 2, 1));
            }
            _ => panic!("expected set-task-end"),
        }
    }
}
