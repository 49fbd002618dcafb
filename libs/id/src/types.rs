//! Typed id definitions for all control plane resources.

use crate::define_id;

// =============================================================================
// Tenancy and Billing
// =============================================================================

define_id!(AccountId, "acct");
define_id!(TierId, "tier");

// =============================================================================
// Fleet
// =============================================================================

define_id!(NodeId, "node");

// =============================================================================
// Workloads
// =============================================================================

define_id!(WorkloadId, "wl");
define_id!(WorkloadEventId, "wev");

// =============================================================================
// Requests
// =============================================================================

define_id!(RequestId, "req");

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_account_id_roundtrip() {
        let id = AccountId::new();
        let parsed: AccountId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_node_id_prefix() {
        let id = NodeId::new();
        assert!(id.to_string().starts_with("node_"));
    }

    #[test]
    fn test_workload_id_rejects_node_prefix() {
        let node = NodeId::new().to_string();
        let err = node.parse::<WorkloadId>().unwrap_err();
        assert!(err.is_prefix_error());
    }

    #[test]
    fn test_missing_separator() {
        let result: Result<TierId, _> = "tier01HV4Z2WQXKJNM8GPQY6VBKC3D".parse();
        assert!(matches!(result, Err(crate::IdError::MissingSeparator)));
    }

    #[test]
    fn test_empty() {
        let result: Result<TierId, _> = "".parse();
        assert!(matches!(result, Err(crate::IdError::Empty)));
    }

    #[test]
    fn test_invalid_ulid() {
        let result: Result<WorkloadId, _> = "wl_not-a-ulid".parse();
        assert!(matches!(result, Err(crate::IdError::InvalidUlid(_))));
    }

    #[test]
    fn test_json_is_plain_string() {
        let id = WorkloadId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let parsed: WorkloadId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_ids_sort_by_creation_time() {
        let first = WorkloadId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = WorkloadId::new();
        assert!(first < second);
    }

    #[test]
    fn test_all_id_prefixes_unique() {
        let prefixes = [
            AccountId::PREFIX,
            TierId::PREFIX,
            NodeId::PREFIX,
            WorkloadId::PREFIX,
            WorkloadEventId::PREFIX,
            RequestId::PREFIX,
        ];

        let unique: std::collections::HashSet<_> = prefixes.iter().collect();
        assert_eq!(prefixes.len(), unique.len(), "Duplicate id prefixes found!");
    }

    proptest! {
        #[test]
        fn prop_arbitrary_strings_never_panic(s in "\\PC*") {
            let _ = s.parse::<NodeId>();
        }

        #[test]
        fn prop_ulid_bits_roundtrip(hi in any::<u64>(), lo in any::<u64>()) {
            let ulid = crate::Ulid::from((hi, lo));
            let id = AccountId::from_ulid(ulid);
            let parsed: AccountId = id.to_string().parse().unwrap();
            prop_assert_eq!(parsed.ulid(), ulid);
        }
    }
}
