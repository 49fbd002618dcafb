//! DNS record management.
//!
//! Workload domains live in one zone and node domains in another. A
//! workload with a generated domain is bound by CNAME to its node's name;
//! the node's name resolves through an A record to its public address.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use fleet_id::{NodeId, Ulid, WorkloadId};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    A,
    Cname,
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A => f.write_str("A"),
            Self::Cname => f.write_str("CNAME"),
        }
    }
}

#[derive(Debug, Error)]
pub enum DnsError {
    /// A record with this name and type already points elsewhere.
    #[error("{record_type} record {name} already points at {existing}")]
    Conflict {
        name: String,
        record_type: RecordType,
        existing: String,
    },

    /// The DNS provider failed.
    #[error("dns provider error: {0}")]
    Provider(String),
}

/// Record management for one zone.
#[async_trait]
pub trait DnsService: Send + Sync {
    /// The zone's apex, e.g. `workloads.example.com`.
    fn zone(&self) -> &str;

    /// Creates `name` (relative to the zone) pointing at `target`.
    ///
    /// Creating a record that already exists with the same target succeeds.
    async fn create_record(
        &self,
        name: &str,
        target: &str,
        record_type: RecordType,
    ) -> Result<(), DnsError>;

    /// Deletes a record. Deleting a missing record succeeds.
    async fn delete_record(&self, name: &str, record_type: RecordType) -> Result<(), DnsError>;
}

/// A DNS service that keeps its records in memory and logs every change.
#[derive(Debug, Clone)]
pub struct LoggingDns {
    zone: String,
    records: Arc<RwLock<HashMap<(String, RecordType), String>>>,
}

impl LoggingDns {
    pub fn new(zone: impl Into<String>) -> Self {
        Self {
            zone: zone.into(),
            records: Arc::default(),
        }
    }

    /// The current target of a record, if any.
    pub async fn lookup(&self, name: &str, record_type: RecordType) -> Option<String> {
        self.records
            .read()
            .await
            .get(&(name.to_string(), record_type))
            .cloned()
    }
}

#[async_trait]
impl DnsService for LoggingDns {
    fn zone(&self) -> &str {
        &self.zone
    }

    async fn create_record(
        &self,
        name: &str,
        target: &str,
        record_type: RecordType,
    ) -> Result<(), DnsError> {
        let mut records = self.records.write().await;
        let key = (name.to_string(), record_type);
        if let Some(existing) = records.get(&key) {
            if existing != target {
                return Err(DnsError::Conflict {
                    name: name.to_string(),
                    record_type,
                    existing: existing.clone(),
                });
            }
            return Ok(());
        }
        records.insert(key, target.to_string());
        info!(zone = %self.zone, name = %name, target = %target, record_type = %record_type, "DNS record created");
        Ok(())
    }

    async fn delete_record(&self, name: &str, record_type: RecordType) -> Result<(), DnsError> {
        let removed = self
            .records
            .write()
            .await
            .remove(&(name.to_string(), record_type));
        if removed.is_some() {
            info!(zone = %self.zone, name = %name, record_type = %record_type, "DNS record deleted");
        }
        Ok(())
    }
}

/// Ids carry an underscore and upper-case ULID; labels must be neither.
fn dns_label(ulid: Ulid) -> String {
    ulid.to_string().to_ascii_lowercase()
}

/// The two zones the control plane manages.
#[derive(Clone)]
pub struct DnsZones {
    pub workloads: Arc<dyn DnsService>,
    pub nodes: Arc<dyn DnsService>,
}

impl DnsZones {
    pub fn new(workloads: Arc<dyn DnsService>, nodes: Arc<dyn DnsService>) -> Self {
        Self { workloads, nodes }
    }

    /// Record name of a node inside the nodes zone.
    pub fn node_record_name(node_id: &NodeId) -> String {
        dns_label(node_id.ulid())
    }

    /// Fully qualified name of a node, e.g. `01h....nodes.example.com`.
    pub fn node_domain(&self, node_id: &NodeId) -> String {
        format!("{}.{}", Self::node_record_name(node_id), self.nodes.zone())
    }

    /// Generated public domain for a workload.
    pub fn workload_domain(&self, workload_id: &WorkloadId) -> String {
        format!("{}.{}", dns_label(workload_id.ulid()), self.workloads.zone())
    }

    /// The record name of `domain` inside the workloads zone, if it is a
    /// generated domain.
    pub fn workload_record_name<'a>(&self, domain: &'a str) -> Option<&'a str> {
        domain
            .strip_suffix(self.workloads.zone())
            .and_then(|rest| rest.strip_suffix('.'))
            .filter(|name| !name.is_empty() && !name.contains('.'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_is_idempotent_for_same_target() {
        let dns = LoggingDns::new("nodes.test");
        dns.create_record("n1", "10.0.0.1", RecordType::A).await.unwrap();
        dns.create_record("n1", "10.0.0.1", RecordType::A).await.unwrap();
        assert_eq!(
            dns.lookup("n1", RecordType::A).await.as_deref(),
            Some("10.0.0.1")
        );
    }

    #[tokio::test]
    async fn test_create_conflicting_target_fails() {
        let dns = LoggingDns::new("nodes.test");
        dns.create_record("n1", "10.0.0.1", RecordType::A).await.unwrap();
        let err = dns
            .create_record("n1", "10.0.0.2", RecordType::A)
            .await
            .unwrap_err();
        assert!(matches!(err, DnsError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_delete_missing_record_succeeds() {
        let dns = LoggingDns::new("nodes.test");
        dns.delete_record("ghost", RecordType::Cname).await.unwrap();
    }

    #[test]
    fn test_workload_record_name() {
        let zones = DnsZones::new(
            Arc::new(LoggingDns::new("workloads.test")),
            Arc::new(LoggingDns::new("nodes.test")),
        );
        assert_eq!(zones.workload_record_name("abc.workloads.test"), Some("abc"));
        assert_eq!(zones.workload_record_name("app.example.com"), None);
        assert_eq!(zones.workload_record_name("a.b.workloads.test"), None);
    }

    #[test]
    fn test_generated_names_are_dns_labels() {
        let zones = DnsZones::new(
            Arc::new(LoggingDns::new("workloads.test")),
            Arc::new(LoggingDns::new("nodes.test")),
        );
        let node = NodeId::new();
        let workload = WorkloadId::new();

        let node_domain = zones.node_domain(&node);
        let label = DnsZones::node_record_name(&node);
        assert_eq!(node_domain, format!("{label}.nodes.test"));
        assert_eq!(label, node.ulid().to_string().to_lowercase());

        let domain = zones.workload_domain(&workload);
        let name = zones.workload_record_name(&domain).unwrap();
        assert!(name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }
}
