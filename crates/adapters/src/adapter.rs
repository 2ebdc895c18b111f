//! Capability shared by every external-system adapter.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::CallContext;
use crate::error::Result;

/// The four external systems behind the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    Inventory,
    Billing,
    CustomerManagement,
    SalesChannel,
}

impl AdapterKind {
    pub const ALL: [AdapterKind; 4] = [
        AdapterKind::Inventory,
        AdapterKind::Billing,
        AdapterKind::CustomerManagement,
        AdapterKind::SalesChannel,
    ];

    /// Returns the name used for health tracking and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            AdapterKind::Inventory => "inventory",
            AdapterKind::Billing => "billing",
            AdapterKind::CustomerManagement => "customer",
            AdapterKind::SalesChannel => "channel",
        }
    }
}

impl std::fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Descriptive information reported by a downstream system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub system: String,
    pub details: serde_json::Value,
}

/// Operations every adapter supports regardless of its domain.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Which external system this adapter talks to.
    fn kind(&self) -> AdapterKind;

    /// Name under which the adapter's health is tracked.
    fn name(&self) -> &str {
        self.kind().as_str()
    }

    /// Verifies the downstream system is reachable.
    async fn test_connection(&self, ctx: &CallContext) -> Result<()>;

    /// Returns version and capability information for the downstream system.
    async fn system_info(&self, ctx: &CallContext) -> Result<SystemInfo>;
}
