//! Typed ID definitions for all fleet controller resources.
//!
//! Each ID type has a unique prefix that identifies the resource kind.
//! IDs are ULID-based for sortability and uniqueness.

use crate::define_id;

// =============================================================================
// Fleet Model
// =============================================================================

define_id!(PoolId, "pool");
define_id!(ClaimId, "claim");
define_id!(NodeId, "node");
define_id!(WorkloadId, "wl");

// =============================================================================
// Events and Requests
// =============================================================================

define_id!(NoticeId, "ntc");
define_id!(RequestId, "req");

// =============================================================================
// Events
// =============================================================================

/// Event sequence number on the fleet event bus: a simple monotonic integer,
/// not ULID-based. This is handled separately from the typed IDs above.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventSeq(u64);

impl EventSeq {
    /// Creates a new EventSeq from a u64.
    #[must_use]
    pub const fn new(seq: u64) -> Self {
        Self(seq)
    }

    /// Returns the underlying u64 value.
    #[must_use]
    pub const fn value(&self) -> u64 {
        self.0
    }

    /// Returns the next sequence number.
    #[must_use]
    pub const fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for EventSeq {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for EventSeq {
    fn from(seq: u64) -> Self {
        Self(seq)
    }
}

impl From<EventSeq> for u64 {
    fn from(seq: EventSeq) -> Self {
        seq.0
    }
}

impl serde::Serialize for EventSeq {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u64(self.0)
    }
}

impl<'de> serde::Deserialize<'de> for EventSeq {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let seq = u64::deserialize(deserializer)?;
        Ok(Self(seq))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_id_roundtrip() {
        let id = PoolId::new();
        let s = id.to_string();
        let parsed: PoolId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_pool_id_prefix() {
        let id = PoolId::new();
        let s = id.to_string();
        assert!(s.starts_with("pool_"));
    }

    #[test]
    fn test_pool_id_invalid_prefix() {
        let result: Result<PoolId, _> = "claim_01HV4Z2WQXKJNM8GPQY6VBKC3D".parse();
        assert!(result.is_err());
        assert!(matches!(
            result.unwrap_err(),
            crate::IdError::InvalidPrefix { .. }
        ));
    }

    #[test]
    fn test_pool_id_missing_separator() {
        let result: Result<PoolId, _> = "pool01HV4Z2WQXKJNM8GPQY6VBKC3D".parse();
        assert!(result.is_err());
        assert!(matches!(
            result.unwrap_err(),
            crate::IdError::MissingSeparator
        ));
    }

    #[test]
    fn test_pool_id_empty() {
        let result: Result<PoolId, _> = "".parse();
        assert!(result.is_err());
        assert!(matches!(result.unwrap_err(), crate::IdError::Empty));
    }

    #[test]
    fn test_pool_id_invalid_ulid() {
        let result: Result<PoolId, _> = "pool_invalid".parse();
        assert!(result.is_err());
        assert!(matches!(result.unwrap_err(), crate::IdError::InvalidUlid(_)));
    }

    #[test]
    fn test_claim_id_json_roundtrip() {
        let id = ClaimId::new();
        let json = serde_json::to_string(&id).unwrap();
        let parsed: ClaimId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_node_id_sortable() {
        let id1 = NodeId::new();
        std::thread::sleep(std::time::Duration::from_millis(1));
        let id2 = NodeId::new();
        // ULIDs are time-ordered, so id1 < id2
        assert!(id1 < id2);
    }

    #[test]
    fn test_event_seq_next() {
        let seq = EventSeq::new(41);
        assert_eq!(seq.next().value(), 42);
    }

    #[test]
    fn test_all_id_prefixes_unique() {
        let prefixes = vec![
            PoolId::PREFIX,
            ClaimId::PREFIX,
            NodeId::PREFIX,
            WorkloadId::PREFIX,
            NoticeId::PREFIX,
            RequestId::PREFIX,
        ];

        let unique: std::collections::HashSet<_> = prefixes.iter().collect();
        assert_eq!(prefixes.len(), unique.len(), "Duplicate ID prefixes found!");
    }
}
