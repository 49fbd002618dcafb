//! Outbound collaborators: node agents and DNS.

pub mod agent;
pub mod dns;

pub use agent::{AgentClient, AgentClientConfig, AgentError, AgentErrorKind, HttpAgentClient};
pub use dns::{DnsError, DnsService, DnsZones, LoggingDns, RecordType};
