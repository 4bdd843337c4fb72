//! Command-line interface.
//!
//! The dispatcher wires configuration, logging, the controller and the
//! scheduler bridge together and maps domain errors to exit codes:
//! 2 for declaration errors, 3 for store errors, 1 otherwise.

pub mod commands;
pub mod types;

use std::path::PathBuf;

use anyhow::{Context, Result};

pub use types::{Cli, Commands};

use crate::adapters::bridge::DirectBridge;
use crate::domain::error::{DeclarationError, StoreError};
use crate::domain::ports::NullArchive;
use crate::infrastructure::config::ConfigLoader;
use crate::infrastructure::logging;
use crate::services::Controller;

pub async fn run(cli: Cli) -> Result<()> {
    let workdir = resolve_workdir(cli.dir)?;
    let config = ConfigLoader::load(&workdir)?;
    logging::init(&config.logging)?;

    let controller = Controller::new(config, workdir);
    let bridge = DirectBridge::new();

    match cli.command {
        Commands::Make { spec } => commands::make::handle_make(&controller, &spec, cli.json).await,
        Commands::Submit {
            workflow,
            spec,
            tasks,
            iterate,
        } => {
            commands::submit::handle_submit(
                &controller,
                &bridge,
                workflow,
                spec,
                tasks,
                iterate,
                cli.json,
            )
            .await
        }
        Commands::WriteCmd {
            jobscript_id,
            task_index,
        } => {
            commands::runtime::handle_write_cmd(&controller, jobscript_id, task_index, cli.json)
                .await
        }
        Commands::SetTaskStart {
            jobscript_id,
            task_index,
        } => commands::runtime::handle_set_task_start(&controller, jobscript_id, task_index).await,
        Commands::SetTaskEnd {
            jobscript_id,
            task_index,
            exit_status,
        } => {
            commands::runtime::handle_set_task_end(
                &controller,
                jobscript_id,
                task_index,
                exit_status,
            )
            .await
        }
        Commands::Kill {
            workflow_id,
            submission,
        } => {
            commands::kill::handle_kill(&controller, &bridge, workflow_id, submission, cli.json)
                .await
        }
        Commands::Clean { force } => commands::clean::handle_clean(&controller, force).await,
        Commands::Stat { workflow } => {
            commands::stat::handle_stat(&controller, workflow, cli.json).await
        }
        Commands::ShowStats { workflow } => {
            commands::stat::handle_show_stats(&controller, workflow, cli.json).await
        }
        Commands::Archive { task_id } => {
            commands::archive::handle_archive(&controller, &NullArchive, task_id, cli.json).await
        }
    }
}

fn resolve_workdir(dir: Option<PathBuf>) -> Result<PathBuf> {
    let workdir = match dir {
        Some(dir) if dir.is_absolute() => dir,
        Some(dir) => std::env::current_dir()?.join(dir),
        None => std::env::current_dir().context("resolving working directory")?,
    };
    Ok(workdir)
}

/// Exit code for a failed run: declaration errors are 2, store errors 3,
/// everything else 1.
pub fn exit_code(error: &anyhow::Error) -> i32 {
    for cause in error.chain() {
        if cause.downcast_ref::<DeclarationError>().is_some() {
            return 2;
        }
        if cause.downcast_ref::<StoreError>().is_some() {
            return 3;
        }
    }
    1
}
