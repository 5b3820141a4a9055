//! Derived progress state used to order task listings.

use serde::{Deserialize, Serialize};

use crate::types::{Status, Subtask};

/// Where a task sits in its working lifecycle.
///
/// Derived, never stored. Ranks sort ascending with the most actionable work
/// first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressState {
    /// Some subtasks done, some remaining.
    InExecution,
    /// Structured into subtasks, none done yet.
    ReadyToStart,
    /// Every subtask done but the task itself not marked done.
    ReadyToReview,
    /// The task itself is in progress.
    AiWorking,
    /// No subtasks, but a description exists.
    Started,
    /// Bare title only.
    Idle,
    Done,
}

impl ProgressState {
    /// Sort rank, 1 = most urgent.
    pub fn rank(&self) -> u8 {
        match self {
            ProgressState::InExecution => 1,
            ProgressState::ReadyToStart => 2,
            ProgressState::ReadyToReview => 3,
            ProgressState::AiWorking => 4,
            ProgressState::Started => 5,
            ProgressState::Idle => 6,
            ProgressState::Done => 7,
        }
    }
}

/// Derive the progress state from a hydrated task.
pub fn progress_state(
    status: Status,
    description: Option<&str>,
    subtasks: &[Subtask],
) -> ProgressState {
    let done = subtasks.iter().filter(|s| s.status == Status::Done).count();
    let has_description = description.is_some_and(|d| !d.trim().is_empty());
    progress_state_for(status, has_description, subtasks.len(), done)
}

/// Count-based variant used on the listing path, where subtask totals come
/// from an aggregate query instead of hydrated rows.
pub fn progress_state_for(
    status: Status,
    has_description: bool,
    subtask_count: usize,
    done_count: usize,
) -> ProgressState {
    match status {
        Status::Done => ProgressState::Done,
        Status::InProgress => ProgressState::AiWorking,
        Status::Pending => {
            if subtask_count > 0 {
                if done_count == subtask_count {
                    ProgressState::ReadyToReview
                } else if done_count > 0 {
                    ProgressState::InExecution
                } else {
                    ProgressState::ReadyToStart
                }
            } else if has_description {
                ProgressState::Started
            } else {
                ProgressState::Idle
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn done_status_wins_over_subtasks() {
        assert_eq!(
            progress_state_for(Status::Done, true, 5, 2),
            ProgressState::Done
        );
    }

    #[test]
    fn in_progress_maps_to_ai_working() {
        assert_eq!(
            progress_state_for(Status::InProgress, false, 3, 3),
            ProgressState::AiWorking
        );
    }

    #[test]
    fn pending_with_subtasks_follows_completion() {
        assert_eq!(
            progress_state_for(Status::Pending, false, 4, 0),
            ProgressState::ReadyToStart
        );
        assert_eq!(
            progress_state_for(Status::Pending, false, 4, 2),
            ProgressState::InExecution
        );
        assert_eq!(
            progress_state_for(Status::Pending, false, 4, 4),
            ProgressState::ReadyToReview
        );
    }

    #[test]
    fn pending_without_subtasks_uses_description() {
        assert_eq!(
            progress_state_for(Status::Pending, true, 0, 0),
            ProgressState::Started
        );
        assert_eq!(
            progress_state_for(Status::Pending, false, 0, 0),
            ProgressState::Idle
        );
    }

    #[test]
    fn blank_description_counts_as_absent() {
        assert_eq!(
            progress_state(Status::Pending, Some("   "), &[]),
            ProgressState::Idle
        );
    }

    #[test]
    fn ranks_are_distinct_and_ordered() {
        let states = [
            ProgressState::InExecution,
            ProgressState::ReadyToStart,
            ProgressState::ReadyToReview,
            ProgressState::AiWorking,
            ProgressState::Started,
            ProgressState::Idle,
            ProgressState::Done,
        ];
        for (i, s) in states.iter().enumerate() {
            assert_eq!(s.rank() as usize, i + 1);
        }
    }
}
