//! Jobscript emitter.
//!
//! Produces the abstract jobscript for one scheduled command group: header
//! metadata the scheduler bridge renders into its own dialect, a bash body
//! that routes each task through `write-cmd` / `set-task-start` /
//! `set-task-end`, and the runtime command file that binds the group's
//! variable files to file descriptors.
//!
//! Task directories are zero-padded to the width of the largest task
//! ordinal so that value lists of length 9 and 10 pad consistently within
//! a workflow.

use std::path::{Path, PathBuf};

use crate::domain::models::CommandGroup;
use crate::domain::ports::{HeaderSpec, SchedulerBridge};
use crate::domain::template;

/// Zero-pad `num` to the digit width of `largest`.
pub fn zeropad(num: usize, largest: usize) -> String {
    let width = largest.to_string().len();
    format!("{:0width$}", num, width = width)
}

/// Directory slot for task `k` when distributing `len` directories over
/// `total` tasks. Integer division guarantees every index lands exactly
/// once.
pub fn dir_slot(k: usize, len: usize, total: usize) -> usize {
    k * len / total
}

/// Name of the per-task directory for a 0-based task index.
pub fn task_dir_name(task_index: usize, num_tasks: usize) -> String {
    zeropad(task_index + 1, num_tasks)
}

/// Everything needed to render one jobscript.
pub struct EmitParams<'a> {
    pub group: &'a CommandGroup,
    pub jobscript_id: i64,
    pub num_tasks: usize,
    /// Absolute workflow working directory
    pub workdir: &'a Path,
    /// Absolute submission directory
    pub submit_dir: &'a Path,
    pub jobscript_ext: &'a str,
}

impl EmitParams<'_> {
    /// Whether the group fans out as one scheduler task per matrix row.
    pub fn array_mode(&self) -> bool {
        self.group.job_array && self.group.parallel_variables
    }

    pub fn file_name(&self) -> String {
        format!(
            "js_{}_{}{}",
            self.group.exec_order, self.group.sub_order, self.jobscript_ext
        )
    }

    fn group_dir_name(&self) -> String {
        format!("cg_{}", self.group.index)
    }
}

/// Header metadata handed to the scheduler bridge.
pub fn header_spec(params: &EmitParams) -> HeaderSpec {
    let array = if params.array_mode() && params.num_tasks > 0 {
        Some((1, params.num_tasks))
    } else {
        None
    };
    HeaderSpec {
        name: format!("bf_{}_{}", params.group.exec_order, params.group.sub_order),
        options: params.group.scheduler_options.clone(),
        modules: params.group.modules.clone(),
        array,
        workdir: params.workdir.to_path_buf(),
    }
}

/// Render the full jobscript text.
pub fn render_jobscript(bridge: &dyn SchedulerBridge, params: &EmitParams) -> String {
    let header = header_spec(params);
    let mut lines: Vec<String> = vec!["#!/bin/bash".into(), String::new()];
    lines.push(format!(
        "# --- jobscript generated by batchflow (version: {}) ---",
        env!("CARGO_PKG_VERSION")
    ));
    lines.push(String::new());
    lines.extend(bridge.render_header(&header));
    lines.push(String::new());

    for module in &params.group.modules {
        lines.push(format!("module load {}", module));
    }
    if !params.group.modules.is_empty() {
        lines.push(String::new());
    }

    lines.push(format!("ROOT_DIR={}", params.workdir.display()));
    lines.push(format!("SUBMIT_DIR={}", params.submit_dir.display()));
    lines.push(format!("GROUP_DIR=$SUBMIT_DIR/{}", params.group_dir_name()));
    lines.push(format!("TASK_ID={}", bridge.task_id_expr()));
    lines.push("TASK_IDX=$((TASK_ID - 1))".into());
    lines.push(format!("MAX_NUM_TASKS={}", params.num_tasks.max(1)));
    lines.push("PAD_WIDTH=${#MAX_NUM_TASKS}".into());
    lines.push("TASK_DIR=$(printf \"%0${PAD_WIDTH}d\" $TASK_ID)".into());
    lines.push("export ROOT_DIR GROUP_DIR TASK_IDX".into());
    lines.push(String::new());

    if let Some(dir) = &params.group.directory {
        // A directory override carrying variable references resolves
        // inside the commands themselves; a literal one is entered here.
        if template::unique_references(dir).is_empty() {
            lines.push(format!("cd $ROOT_DIR/{}", dir));
        } else {
            lines.push("cd $ROOT_DIR".into());
        }
    } else {
        lines.push("cd $ROOT_DIR".into());
    }
    lines.push(String::new());

    lines.push(format!(
        "batchflow write-cmd {} $TASK_IDX --dir $ROOT_DIR",
        params.jobscript_id
    ));
    lines.push(String::new());

    if params.array_mode() {
        lines.push(format!(
            "batchflow set-task-start {} $TASK_IDX --dir $ROOT_DIR",
            params.jobscript_id
        ));
        lines.push(". $GROUP_DIR/tasks/$TASK_DIR/cmd.sh".into());
        lines.push("rc=$?".into());
        lines.push(format!(
            "batchflow set-task-end {} $TASK_IDX --exit-status $rc --dir $ROOT_DIR",
            params.jobscript_id
        ));
    } else {
        lines.push(". $GROUP_DIR/tasks/$TASK_DIR/cmd.sh".into());
    }
    lines.push(String::new());

    lines.join("\n")
}

/// Render the runtime command file for one task of a command group.
///
/// Array mode: skip to the task's row across every bound descriptor, read
/// one line from each, run the commands once. Loop mode: a single
/// scheduler task walks every row, bracketing each with task start/end.
pub fn render_command_file(
    group: &CommandGroup,
    jobscript_id: i64,
    variable_names: &[String],
    array_mode: bool,
    variable_file_ext: &str,
) -> String {
    let mut lines: Vec<String> = Vec::new();
    lines.push(format!(
        "# --- command file generated by batchflow (version: {}) ---",
        env!("CARGO_PKG_VERSION")
    ));
    lines.push(String::new());

    let commands: Vec<String> = group
        .commands
        .iter()
        .map(|cmd| shellify(cmd))
        .collect();

    if variable_names.is_empty() {
        // No value matrix: run the commands once per task.
        if array_mode {
            lines.extend(commands);
        } else {
            lines.push(format!(
                "batchflow set-task-start {} 0 --dir $ROOT_DIR",
                jobscript_id
            ));
            lines.extend(commands);
            lines.push("rc=$?".into());
            lines.push(format!(
                "batchflow set-task-end {} 0 --exit-status $rc --dir $ROOT_DIR",
                jobscript_id
            ));
        }
        lines.push(String::new());
        return lines.join("\n");
    }

    let fd_of = |idx: usize| idx + 3;

    if array_mode {
        for (idx, name) in variable_names.iter().enumerate() {
            lines.push(format!(
                "exec {}< $GROUP_DIR/vars/var_{}{}",
                fd_of(idx),
                name,
                variable_file_ext
            ));
        }
        lines.push("for _ in $(seq 1 $TASK_IDX); do".into());
        for (idx, _) in variable_names.iter().enumerate() {
            lines.push(format!("\tread -u{} _", fd_of(idx)));
        }
        lines.push("done".into());
        for (idx, name) in variable_names.iter().enumerate() {
            lines.push(format!("read -u{} {} || exit 1", fd_of(idx), name));
        }
        lines.push(String::new());
        lines.extend(commands);
        lines.push(String::new());
        for (idx, _) in variable_names.iter().enumerate() {
            lines.push(format!("exec {}<&-", fd_of(idx)));
        }
    } else {
        lines.push("ROW=0".into());
        lines.push("while true".into());
        lines.push("do".into());
        for (idx, name) in variable_names.iter().enumerate() {
            lines.push(format!("\tread -u{} {} || break", fd_of(idx), name));
        }
        lines.push(format!(
            "\tbatchflow set-task-start {} $ROW --dir $ROOT_DIR",
            jobscript_id
        ));
        for cmd in &commands {
            lines.push(format!("\t{}", cmd));
        }
        lines.push("\trc=$?".into());
        lines.push(format!(
            "\tbatchflow set-task-end {} $ROW --exit-status $rc --dir $ROOT_DIR",
            jobscript_id
        ));
        lines.push("\tROW=$((ROW + 1))".into());
        let mut done_line = String::from("done");
        for (idx, name) in variable_names.iter().enumerate() {
            done_line.push_str(&format!(
                " {}< $GROUP_DIR/vars/var_{}{}",
                fd_of(idx),
                name,
                variable_file_ext
            ));
        }
        lines.push(done_line);
    }

    lines.push(String::new());
    lines.join("\n")
}

// `<<name>>` placeholders become shell variable expansions.
fn shellify(command: &str) -> String {
    let mut out = command.to_string();
    for name in template::unique_references(command) {
        out = out.replace(&format!("<<{}>>", name), &format!("${{{}}}", name));
    }
    out
}

/// Create the per-task directories for a jobscript, zero-padded uniformly.
pub fn make_task_dirs(
    group_dir: &Path,
    num_tasks: usize,
) -> std::io::Result<Vec<PathBuf>> {
    let mut dirs = Vec::with_capacity(num_tasks);
    for task_index in 0..num_tasks.max(1) {
        let dir = group_dir
            .join("tasks")
            .join(task_dir_name(task_index, num_tasks.max(1)));
        std::fs::create_dir_all(&dir)?;
        dirs.push(dir);
    }
    Ok(dirs)
}
