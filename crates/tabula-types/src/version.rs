//! Optimistic-concurrency tokens.
//!
//! The backend issues two opaque tokens with every confirmed write:
//! `spreadSheetVersionId` names the document snapshot, `editLockVersion` is the
//! lock the next writer must present. They travel together as a
//! [`VersionPair`] and are never updated independently.

use std::fmt;

use serde::{Deserialize, Serialize};

/// An opaque backend-issued version token.
#[derive(Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionToken(String);

impl VersionToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl From<&str> for VersionToken {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for VersionToken {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

/// Document version plus the optimistic lock issued with it.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionPair {
    pub spread_sheet_version_id: VersionToken,
    pub edit_lock_version: VersionToken,
}

impl VersionPair {
    pub fn new(version: impl Into<VersionToken>, lock: impl Into<VersionToken>) -> Self {
        Self {
            spread_sheet_version_id: version.into(),
            edit_lock_version: lock.into(),
        }
    }

    /// Build a pair from two optional wire fields.
    ///
    /// Returns `None` unless both are present and non-empty.
    pub fn from_parts(
        version: Option<&VersionToken>,
        lock: Option<&VersionToken>,
    ) -> Option<Self> {
        match (version, lock) {
            (Some(v), Some(l)) if !v.is_empty() && !l.is_empty() => Some(Self {
                spread_sheet_version_id: v.clone(),
                edit_lock_version: l.clone(),
            }),
            _ => None,
        }
    }
}

impl fmt::Display for VersionPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.spread_sheet_version_id, self.edit_lock_version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_parts_requires_both_non_empty() {
        let v = VersionToken::from("v1");
        let l = VersionToken::from("L1");
        let blank = VersionToken::from("");

        assert_eq!(VersionPair::from_parts(Some(&v), Some(&l)), Some(VersionPair::new("v1", "L1")));
        assert_eq!(VersionPair::from_parts(Some(&v), None), None);
        assert_eq!(VersionPair::from_parts(None, Some(&l)), None);
        assert_eq!(VersionPair::from_parts(Some(&v), Some(&blank)), None);
    }

    #[test]
    fn test_pair_wire_shape() {
        let json = serde_json::to_value(VersionPair::new("v2", "L2")).unwrap();
        assert_eq!(json["spreadSheetVersionId"], "v2");
        assert_eq!(json["editLockVersion"], "L2");
    }
}
