//! Channel scheduler.
//!
//! Turns a workflow's (exec_order, sub_order) grid plus optional task
//! ranges into an ordered dispatch plan: per command group, the derived
//! channel identity, the effective task indices, and the upstream groups
//! whose completion must gate it via scheduler holds.
//!
//! Channels merge but never split. When Q child groups derive from P
//! parent channels, child j absorbs the contiguous parent slice
//! [j*P/Q, (j+1)*P/Q) and takes the minimum absorbed channel as its
//! identity; integer division keeps the partition exact.

use std::collections::HashMap;

use crate::domain::error::DeclarationError;
use crate::domain::models::{TaskRange, Workflow};

/// One command group's place in a submission plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledGroup {
    /// Declaration index into the workflow's command groups
    pub group_index: usize,
    /// Derived channel identity
    pub channel: usize,
    /// Channels absorbed from the previous exec_order
    pub parent_channels: Vec<usize>,
    /// Effective task indices for this group
    pub task_indices: Vec<usize>,
    /// Declaration indices of groups gating this one
    pub depends_on: Vec<usize>,
}

/// Compute the dispatch plan.
///
/// `own_counts` holds the value-matrix row count for every group that
/// directly references variables; groups absent from it inherit their
/// task vector from upstream (1:1 along a channel, summed on a merge).
pub fn schedule(
    workflow: &Workflow,
    own_counts: &HashMap<usize, usize>,
    ranges: Option<&[TaskRange]>,
) -> Result<Vec<ScheduledGroup>, DeclarationError> {
    let width = workflow.channel_width();
    if let Some(ranges) = ranges {
        if ranges.len() != width {
            return Err(DeclarationError::BadRangeCount {
                expected: width,
                got: ranges.len(),
            });
        }
    }

    let mut plan: Vec<ScheduledGroup> = Vec::with_capacity(workflow.command_groups.len());
    // channel id -> position in `plan` of the group currently owning it
    let mut frontier: Vec<(usize, usize)> = Vec::new();

    for (level, exec_order) in workflow.exec_orders().into_iter().enumerate() {
        let groups = workflow.groups_at(exec_order);
        let mut next_frontier: Vec<(usize, usize)> = Vec::new();

        if level == 0 {
            for (channel, group) in groups.iter().enumerate() {
                let own = own_counts.get(&group.index).copied().unwrap_or(1);
                let range = ranges.map(|r| r[channel]).unwrap_or_else(TaskRange::all);
                let task_indices = range.indices(channel, own)?;
                next_frontier.push((channel, plan.len()));
                plan.push(ScheduledGroup {
                    group_index: group.index,
                    channel,
                    parent_channels: vec![channel],
                    task_indices,
                    depends_on: Vec::new(),
                });
            }
        } else {
            let parents = frontier.clone();
            let parent_count = parents.len();
            let child_count = groups.len();
            if child_count > parent_count {
                return Err(DeclarationError::ChannelSplit {
                    exec_order,
                    channels: child_count,
                    parents: parent_count,
                });
            }

            for (j, group) in groups.iter().enumerate() {
                let slice = &parents[j * parent_count / child_count
                    ..(j + 1) * parent_count / child_count];
                let parent_channels: Vec<usize> = slice.iter().map(|(c, _)| *c).collect();
                let depends_on: Vec<usize> =
                    slice.iter().map(|(_, pos)| plan[*pos].group_index).collect();
                let channel = *parent_channels.iter().min().expect("non-empty parent slice");

                let task_indices = match own_counts.get(&group.index) {
                    // The group's own variable product overrides inheritance.
                    Some(own) => (0..*own).collect(),
                    None if slice.len() == 1 => plan[slice[0].1].task_indices.clone(),
                    None => {
                        let total: usize =
                            slice.iter().map(|(_, pos)| plan[*pos].task_indices.len()).sum();
                        (0..total).collect()
                    }
                };

                next_frontier.push((channel, plan.len()));
                plan.push(ScheduledGroup {
                    group_index: group.index,
                    channel,
                    parent_channels,
                    task_indices,
                    depends_on,
                });
            }
        }

        frontier = next_frontier;
    }

    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::workflow::{CommandGroupSpec, GroupOverrides, WorkflowSpec};
    use std::path::PathBuf;

    fn workflow(grid: Vec<(i64, i64)>) -> Workflow {
        let spec = WorkflowSpec {
            command_groups: grid
                .into_iter()
                .map(|(exec, sub)| CommandGroupSpec {
                    commands: vec!["echo run".into()],
                    exec_order: Some(exec),
                    sub_order: Some(sub),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };
        Workflow::from_spec(&spec, PathBuf::from("/work"), &GroupOverrides::default()).unwrap()
    }

    #[test]
    fn test_two_channels_merging() {
        // g0 exec=0 sub=0, g1 exec=0 sub=1, g2 exec=1 sub=0
        let wf = workflow(vec![(0, 0), (0, 1), (1, 0)]);
        let counts = HashMap::from([(0, 10), (1, 10)]);
        let ranges = vec![
            TaskRange::parse("0-2").unwrap(),
            TaskRange::parse("0-4").unwrap(),
        ];
        let plan = schedule(&wf, &counts, Some(&ranges)).unwrap();

        assert_eq!(plan[0].task_indices, vec![0, 1, 2]);
        assert_eq!(plan[1].task_indices, vec![0, 1, 2, 3, 4]);

        let merged = &plan[2];
        assert_eq!(merged.channel, 0);
        assert_eq!(merged.parent_channels, vec![0, 1]);
        assert_eq!(merged.depends_on, vec![0, 1]);
        // Sum of merged parents' selected counts
        assert_eq!(merged.task_indices.len(), 8);
    }

    #[test]
    fn test_identity_flow_along_channel() {
        let wf = workflow(vec![(0, 0), (1, 0), (2, 0)]);
        let counts = HashMap::from([(0, 4)]);
        let plan = schedule(&wf, &counts, None).unwrap();
        assert_eq!(plan[1].task_indices, vec![0, 1, 2, 3]);
        assert_eq!(plan[1].depends_on, vec![0]);
        assert_eq!(plan[2].task_indices, vec![0, 1, 2, 3]);
        assert_eq!(plan[2].depends_on, vec![1]);
    }

    #[test]
    fn test_range_selection_flows_downstream() {
        let wf = workflow(vec![(0, 0), (1, 0)]);
        let counts = HashMap::from([(0, 6)]);
        let ranges = vec![TaskRange::parse("1-5:2").unwrap()];
        let plan = schedule(&wf, &counts, Some(&ranges)).unwrap();
        assert_eq!(plan[0].task_indices, vec![1, 3, 5]);
        assert_eq!(plan[1].task_indices, vec![1, 3, 5]);
    }

    #[test]
    fn test_own_product_overrides_inheritance() {
        let wf = workflow(vec![(0, 0), (1, 0)]);
        let counts = HashMap::from([(0, 3), (1, 7)]);
        let plan = schedule(&wf, &counts, None).unwrap();
        assert_eq!(plan[1].task_indices.len(), 7);
    }

    #[test]
    fn test_three_into_two_partition() {
        let wf = workflow(vec![(0, 0), (0, 1), (0, 2), (1, 0), (1, 1)]);
        let counts = HashMap::from([(0, 1), (1, 1), (2, 1)]);
        let plan = schedule(&wf, &counts, None).unwrap();

        // Child 0 absorbs parent slice [0,1); child 1 absorbs [1,3)
        assert_eq!(plan[3].parent_channels, vec![0]);
        assert_eq!(plan[3].channel, 0);
        assert_eq!(plan[4].parent_channels, vec![1, 2]);
        assert_eq!(plan[4].channel, 1);
        assert_eq!(plan[4].depends_on, vec![1, 2]);
    }

    #[test]
    fn test_exec_zero_has_empty_dependencies() {
        let wf = workflow(vec![(0, 0), (0, 1)]);
        let counts = HashMap::new();
        let plan = schedule(&wf, &counts, None).unwrap();
        assert!(plan.iter().all(|g| g.depends_on.is_empty()));
    }

    #[test]
    fn test_range_count_must_match_width() {
        let wf = workflow(vec![(0, 0), (0, 1)]);
        let counts = HashMap::new();
        let ranges = vec![TaskRange::all()];
        assert!(matches!(
            schedule(&wf, &counts, Some(&ranges)).unwrap_err(),
            DeclarationError::BadRangeCount {
                expected: 2,
                got: 1
            }
        ));
    }

    #[test]
    fn test_plan_is_ordered_by_exec_then_sub() {
        let wf = workflow(vec![(1, 0), (0, 1), (0, 0)]);
        let counts = HashMap::new();
        let plan = schedule(&wf, &counts, None).unwrap();
        // Declaration indices of (0,0), (0,1), (1,0)
        let order: Vec<usize> = plan.iter().map(|g| g.group_index).collect();
        assert_eq!(order, vec![2, 1, 0]);
    }
}
