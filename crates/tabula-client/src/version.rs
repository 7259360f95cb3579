//! The client's believed document version.
//!
//! One [`VersionStore`] per session holds the last known-good
//! `spreadSheetVersionId` / `editLockVersion` pair. It is read right before a
//! request is built (the optimistic-lock claim) and changes only through:
//!
//! - [`load_initial`](VersionStore::load_initial) when the document is opened,
//! - [`try_advance`](VersionStore::try_advance) from a completed job result,
//! - [`confirm_rollback`](VersionStore::confirm_rollback) after a successful rollback.
//!
//! Nothing here blocks local edits; lock mismatches are detected by the
//! backend, which fails the job.

use parking_lot::RwLock;
use tabula_types::{ChatSessionId, VersionPair, VersionToken};
use thiserror::Error;
use tracing::{debug, info};

/// A completed result that cannot advance the store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
    /// `PartialResultDiscarded`: one of the required fields was missing.
    #[error("partial result discarded: missing {}", missing.join(", "))]
    PartialResult { missing: Vec<&'static str> },
}

/// Fields of a completed result that may advance the store.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub spread_sheet_version_id: Option<&'a VersionToken>,
    pub edit_lock_version: Option<&'a VersionToken>,
    pub chat_session_id: Option<&'a ChatSessionId>,
}

/// A successful advance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advance {
    pub previous: Option<VersionPair>,
    pub current: VersionPair,
}

#[derive(Default)]
pub struct VersionStore {
    current: RwLock<Option<VersionPair>>,
}

impl VersionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current pair, if one has ever been loaded.
    pub fn snapshot(&self) -> Option<VersionPair> {
        self.current.read().clone()
    }

    /// Seed the store when a document is opened.
    pub fn load_initial(&self, pair: VersionPair) {
        info!("Version store loaded at {}", pair);
        *self.current.write() = Some(pair);
    }

    /// Advance from a completed job result.
    ///
    /// Requires a non-empty version, lock, and chat-session id; otherwise the
    /// store is untouched and `PartialResult` names what was missing.
    pub fn try_advance(&self, candidate: Candidate<'_>) -> Result<Advance, VersionError> {
        let mut missing = Vec::new();
        if candidate.spread_sheet_version_id.is_none_or(|v| v.is_empty()) {
            missing.push("spreadSheetVersionId");
        }
        if candidate.edit_lock_version.is_none_or(|l| l.is_empty()) {
            missing.push("editLockVersion");
        }
        if candidate.chat_session_id.is_none_or(|c| c.is_blank()) {
            missing.push("chatSessionId");
        }
        let pair = match VersionPair::from_parts(
            candidate.spread_sheet_version_id,
            candidate.edit_lock_version,
        ) {
            Some(pair) if missing.is_empty() => pair,
            _ => return Err(VersionError::PartialResult { missing }),
        };

        let mut current = self.current.write();
        let previous = current.replace(pair.clone());
        debug!(
            "Version advanced {} -> {}",
            previous.as_ref().map(|p| p.to_string()).unwrap_or_else(|| "-".into()),
            pair
        );
        Ok(Advance {
            previous,
            current: pair,
        })
    }

    /// Restore the pair reported by a successful rollback.
    pub fn confirm_rollback(&self, pair: VersionPair) {
        info!("Version restored by rollback to {}", pair);
        *self.current.write() = Some(pair);
    }
}
