//! Turn/branch manager.
//!
//! Every user chat message is one turn, identified by a fresh [`BranchId`].
//! The branch id tags the job the turn submits and is the key for undoing
//! that turn later.
//!
//! ```text
//! Drafted ──▶ Submitted ──▶ Completed ──▶ RollbackRequested ──▶ RolledBack
//!    │            │             ▲                 │
//!    └────────────┴──▶ Failed   └──── (failed) ───┘
//! ```

use std::collections::BTreeMap;

use parking_lot::Mutex;
use strum::EnumString;
use tabula_types::{BranchId, JobId};
use thiserror::Error;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum TurnState {
    Drafted,
    Submitted,
    Completed,
    Failed,
    RollbackRequested,
    RolledBack,
}

impl TurnState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnState::Drafted => "drafted",
            TurnState::Submitted => "submitted",
            TurnState::Completed => "completed",
            TurnState::Failed => "failed",
            TurnState::RollbackRequested => "rollback_requested",
            TurnState::RolledBack => "rolled_back",
        }
    }
}

impl std::fmt::Display for TurnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TurnError {
    #[error("unknown turn {0}")]
    UnknownBranch(BranchId),
    #[error("cannot {action} turn {branch_id} in state {state}")]
    InvalidState {
        branch_id: BranchId,
        state: TurnState,
        action: &'static str,
    },
    #[error("turn {0} still has a job in flight")]
    InFlight(BranchId),
}

/// One user turn.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub branch_id: BranchId,
    pub message: String,
    pub state: TurnState,
    /// Job submitted for this turn, once submitted.
    pub job_id: Option<JobId>,
}

/// Turns keyed by branch id. Branch ids are UUIDv7, so iteration order is
/// creation order.
#[derive(Default)]
pub struct TurnManager {
    turns: Mutex<BTreeMap<BranchId, Turn>>,
}

impl TurnManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a turn for a user message and mint its branch id.
    pub fn draft(&self, message: impl Into<String>) -> BranchId {
        let branch_id = BranchId::new();
        let turn = Turn {
            branch_id,
            message: message.into(),
            state: TurnState::Drafted,
            job_id: None,
        };
        self.turns.lock().insert(branch_id, turn);
        debug!("Drafted turn {}", branch_id.short());
        branch_id
    }

    pub fn mark_submitted(&self, branch_id: BranchId, job_id: JobId) -> Result<(), TurnError> {
        self.transition(branch_id, "submit", |turn| match turn.state {
            TurnState::Drafted => {
                turn.job_id = Some(job_id);
                Ok(TurnState::Submitted)
            }
            _ => Err(()),
        })
    }

    pub fn mark_completed(&self, branch_id: BranchId) -> Result<(), TurnError> {
        self.transition(branch_id, "complete", |turn| match turn.state {
            TurnState::Submitted => Ok(TurnState::Completed),
            _ => Err(()),
        })
    }

    /// A turn fails when its job fails or when it never got sent.
    pub fn mark_failed(&self, branch_id: BranchId) -> Result<(), TurnError> {
        self.transition(branch_id, "fail", |turn| match turn.state {
            TurnState::Drafted | TurnState::Submitted => Ok(TurnState::Failed),
            _ => Err(()),
        })
    }

    /// Move a completed turn to `RollbackRequested`.
    ///
    /// A turn whose job is still in flight yields [`TurnError::InFlight`].
    pub fn begin_rollback(&self, branch_id: BranchId) -> Result<(), TurnError> {
        let mut turns = self.turns.lock();
        let turn = turns
            .get_mut(&branch_id)
            .ok_or(TurnError::UnknownBranch(branch_id))?;
        match turn.state {
            TurnState::Completed => {
                turn.state = TurnState::RollbackRequested;
                debug!("Turn {} -> {}", branch_id.short(), turn.state);
                Ok(())
            }
            TurnState::Submitted => Err(TurnError::InFlight(branch_id)),
            state => Err(TurnError::InvalidState {
                branch_id,
                state,
                action: "roll back",
            }),
        }
    }

    /// Settle a requested rollback. A failed rollback returns the turn to
    /// `Completed`.
    pub fn finish_rollback(&self, branch_id: BranchId, success: bool) -> Result<(), TurnError> {
        self.transition(branch_id, "finish rollback of", |turn| match turn.state {
            TurnState::RollbackRequested if success => Ok(TurnState::RolledBack),
            TurnState::RollbackRequested => Ok(TurnState::Completed),
            _ => Err(()),
        })
    }

    pub fn get(&self, branch_id: BranchId) -> Option<Turn> {
        self.turns.lock().get(&branch_id).cloned()
    }

    pub fn state(&self, branch_id: BranchId) -> Option<TurnState> {
        self.turns.lock().get(&branch_id).map(|t| t.state)
    }

    /// All turns, oldest first.
    pub fn turns(&self) -> Vec<Turn> {
        self.turns.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.turns.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.lock().is_empty()
    }

    fn transition(
        &self,
        branch_id: BranchId,
        action: &'static str,
        step: impl FnOnce(&mut Turn) -> Result<TurnState, ()>,
    ) -> Result<(), TurnError> {
        let mut turns = self.turns.lock();
        let turn = turns
            .get_mut(&branch_id)
            .ok_or(TurnError::UnknownBranch(branch_id))?;
        let from = turn.state;
        let to = step(turn).map_err(|()| TurnError::InvalidState {
            branch_id,
            state: from,
            action,
        })?;
        turn.state = to;
        debug!("Turn {} {} -> {}", branch_id.short(), from, to);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_and_rollback() {
        let turns = TurnManager::new();
        let branch = turns.draft("add a total row");
        let job = JobId::new();

        turns.mark_submitted(branch, job).unwrap();
        assert_eq!(turns.get(branch).unwrap().job_id, Some(job));
        turns.mark_completed(branch).unwrap();
        turns.begin_rollback(branch).unwrap();
        assert_eq!(turns.state(branch), Some(TurnState::RollbackRequested));
        turns.finish_rollback(branch, true).unwrap();
        assert_eq!(turns.state(branch), Some(TurnState::RolledBack));
    }

    #[test]
    fn test_rollback_rejections() {
        let turns = TurnManager::new();
        let branch = turns.draft("x");

        assert!(matches!(
            turns.begin_rollback(branch),
            Err(TurnError::InvalidState {
                state: TurnState::Drafted,
                ..
            })
        ));

        turns.mark_submitted(branch, JobId::new()).unwrap();
        assert_eq!(turns.begin_rollback(branch), Err(TurnError::InFlight(branch)));

        turns.mark_failed(branch).unwrap();
        assert!(matches!(
            turns.begin_rollback(branch),
            Err(TurnError::InvalidState {
                state: TurnState::Failed,
                ..
            })
        ));

        let unknown = BranchId::new();
        assert_eq!(
            turns.begin_rollback(unknown),
            Err(TurnError::UnknownBranch(unknown))
        );
    }

    #[test]
    fn test_failed_rollback_returns_to_completed() {
        let turns = TurnManager::new();
        let branch = turns.draft("x");
        turns.mark_submitted(branch, JobId::new()).unwrap();
        turns.mark_completed(branch).unwrap();
        turns.begin_rollback(branch).unwrap();
        turns.finish_rollback(branch, false).unwrap();
        assert_eq!(turns.state(branch), Some(TurnState::Completed));

        // Completed again, so a retry is allowed.
        turns.begin_rollback(branch).unwrap();
    }

    #[test]
    fn test_turns_in_creation_order() {
        let turns = TurnManager::new();
        let a = turns.draft("first");
        let b = turns.draft("second");
        let listed: Vec<_> = turns.turns().into_iter().map(|t| t.branch_id).collect();
        assert_eq!(listed, vec![a, b]);
        assert!(turns.mark_completed(a).is_err());
    }
}
