//! Typed ID definitions for desired-state and observed-state resources.

use crate::define_id;

// =============================================================================
// Desired state
// =============================================================================

define_id!(DeploymentId, "dep");
define_id!(SentinelId, "snt");
define_id!(CiliumNetworkPolicyId, "cnp");

// =============================================================================
// Observed state and connections
// =============================================================================

define_id!(InstanceId, "ins");
define_id!(ConnectionId, "conn");

// =============================================================================
// Version cursor
// =============================================================================

/// Per-region, cross-kind ordinal assigned at mutation time.
///
/// Row versions and change-log sequences are drawn from the same generator, so
/// one `Version` cursor resumes every stream mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version(u64);

impl Version {
    /// The cursor of a client that has seen nothing.
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn value(&self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Converts a `BIGINT` column value. Negative values never come out of the
    /// generator and are clamped to zero.
    #[must_use]
    pub fn from_db(value: i64) -> Self {
        Self(u64::try_from(value).unwrap_or(0))
    }

    /// Converts to a `BIGINT` bind parameter, saturating at `i64::MAX`.
    #[must_use]
    pub fn to_db(self) -> i64 {
        i64::try_from(self.0).unwrap_or(i64::MAX)
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Version {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Version> for u64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

impl serde::Serialize for Version {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u64(self.0)
    }
}

impl<'de> serde::Deserialize<'de> for Version {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Self)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_deployment_id_roundtrip() {
        let id = DeploymentId::new();
        let parsed: DeploymentId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!(id.to_string().starts_with("dep_"));
    }

    #[test]
    fn test_sentinel_id_rejects_deployment_prefix() {
        let result: Result<SentinelId, _> = "dep_01HV4Z2WQXKJNM8GPQY6VBKC3D".parse();
        assert!(matches!(
            result.unwrap_err(),
            crate::IdError::InvalidPrefix { expected: "snt", .. }
        ));
    }

    #[test]
    fn test_id_missing_separator() {
        let result: Result<InstanceId, _> = "ins01HV4Z2WQXKJNM8GPQY6VBKC3D".parse();
        assert_eq!(result.unwrap_err(), crate::IdError::MissingSeparator);
    }

    #[test]
    fn test_id_empty() {
        let err = CiliumNetworkPolicyId::parse("").unwrap_err();
        assert!(err.is_empty());
    }

    #[test]
    fn test_id_invalid_ulid() {
        let result: Result<DeploymentId, _> = "dep_invalid".parse();
        assert!(matches!(result.unwrap_err(), crate::IdError::InvalidUlid(_)));
    }

    #[test]
    fn test_id_json_roundtrip() {
        let id = SentinelId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let parsed: SentinelId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_ids_sort_by_creation() {
        let first = DeploymentId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = DeploymentId::new();
        assert!(first < second);
        assert!(first.to_string() < second.to_string());
    }

    #[test]
    fn test_version_db_conversions() {
        assert_eq!(Version::from_db(-4), Version::ZERO);
        assert_eq!(Version::from_db(42).value(), 42);
        assert_eq!(Version::new(u64::MAX).to_db(), i64::MAX);
        assert!(Version::ZERO.is_zero());
    }

    #[test]
    fn test_all_id_prefixes_unique() {
        let prefixes = [
            DeploymentId::PREFIX,
            SentinelId::PREFIX,
            CiliumNetworkPolicyId::PREFIX,
            InstanceId::PREFIX,
            ConnectionId::PREFIX,
        ];

        let unique: std::collections::HashSet<_> = prefixes.iter().collect();
        assert_eq!(prefixes.len(), unique.len(), "Duplicate ID prefixes found!");
    }

    proptest! {
        #[test]
        fn version_db_roundtrip(value in 0i64..i64::MAX) {
            prop_assert_eq!(Version::from_db(value).to_db(), value);
        }
    }
}
