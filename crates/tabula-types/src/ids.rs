//! Typed identifiers for jobs, turns, documents, chats, and users.
//!
//! Two families:
//!
//! - **Minted** ids ([`JobId`], [`BranchId`]) are generated by the client as
//!   UUIDv7 (timestamp + random). They are unique per submission and sort in
//!   creation order. The `short()` form is for logs and UI only.
//! - **Issued** ids ([`DocumentId`], [`ChatId`], [`ChatSessionId`], [`UserId`])
//!   come from the backend or the host application. They are opaque strings;
//!   this crate never inspects their contents beyond emptiness.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of one submitted AI job (UUIDv7).
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(uuid::Uuid);

/// Identifier of one user turn (`userChatSessionBranchId`, UUIDv7).
///
/// Tags the outgoing job so the backend can attribute its edits, and names
/// the turn to undo in a rollback request.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BranchId(uuid::Uuid);

/// Spreadsheet document identifier.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

/// Chat identifier (one chat thread attached to a document).
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(String);

/// Backend-issued chat session identifier, returned with job results.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatSessionId(String);

/// User (or guest) identifier.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

// ── Minted ids ──────────────────────────────────────────────────────────────

macro_rules! impl_minted_id {
    ($T:ident, $name:literal) => {
        impl $T {
            /// Create a new time-ordered ID (UUIDv7).
            pub fn new() -> Self {
                Self(uuid::Uuid::now_v7())
            }

            /// First 8 hex characters, for human display only, not lookup.
            pub fn short(&self) -> String {
                self.0.as_simple().to_string()[..8].to_string()
            }

            /// Full 32-character hex string (no hyphens).
            pub fn to_hex(&self) -> String {
                self.0.as_simple().to_string()
            }

            /// Parse from a hex string (32 chars, no hyphens) or standard UUID format.
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                uuid::Uuid::parse_str(s).map(Self)
            }
        }

        impl Default for $T {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<uuid::Uuid> for $T {
            fn from(u: uuid::Uuid) -> Self {
                Self(u)
            }
        }

        impl std::str::FromStr for $T {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl fmt::Display for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl fmt::Debug for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $name, self.short())
            }
        }
    };
}

impl_minted_id!(JobId, "JobId");
impl_minted_id!(BranchId, "BranchId");

// ── Issued ids ──────────────────────────────────────────────────────────────

macro_rules! impl_issued_id {
    ($T:ident, $name:literal) => {
        impl $T {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Blank (empty or whitespace-only) ids are never valid on the wire.
            pub fn is_blank(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl From<&str> for $T {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $T {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl AsRef<str> for $T {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl fmt::Debug for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:?})", $name, self.0)
            }
        }
    };
}

impl_issued_id!(DocumentId, "DocumentId");
impl_issued_id!(ChatId, "ChatId");
impl_issued_id!(ChatSessionId, "ChatSessionId");
impl_issued_id!(UserId, "UserId");

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // ── Minted ids ──────────────────────────────────────────────────────

    #[test]
    fn test_new_is_unique() {
        let a = JobId::new();
        let b = JobId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_short_is_8_chars() {
        assert_eq!(BranchId::new().short().len(), 8);
    }

    #[test]
    fn test_parse_hex_and_hyphenated() {
        let id = JobId::new();
        assert_eq!(JobId::parse(&id.to_hex()).unwrap(), id);
        assert_eq!(id.to_string().parse::<JobId>().unwrap(), id);
    }

    #[test]
    fn test_ordering_is_time_ordered() {
        let ids: Vec<JobId> = (0..10).map(|_| JobId::new()).collect();
        for i in 1..ids.len() {
            assert!(ids[i] >= ids[i - 1]);
        }
    }

    #[test]
    fn test_minted_id_serializes_as_uuid_string() {
        let id = BranchId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
    }

    // ── Issued ids ──────────────────────────────────────────────────────

    #[test]
    fn test_issued_id_is_transparent_string() {
        let id = ChatSessionId::new("cs-42");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"cs-42\"");
        let parsed: ChatSessionId = serde_json::from_str("\"cs-42\"").unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_blank_detection() {
        assert!(UserId::from("").is_blank());
        assert!(UserId::from("   ").is_blank());
        assert!(!UserId::from("guest-1").is_blank());
    }

    #[test]
    fn test_debug_format() {
        assert_eq!(format!("{:?}", DocumentId::from("doc")), "DocumentId(\"doc\")");
        let job = JobId::new();
        assert!(format!("{job:?}").starts_with("JobId("));
    }
}
