//! Saga and step state machines.

use adapters::AdapterKind;
use queue::{Domain, priority};
use serde::{Deserialize, Serialize};

/// The status of an order-processing saga.
///
/// State transitions:
/// ```text
/// Received ──► Processing ──┬──► Completed
///                           ├──► Failed                    (first step failed)
///                           └──► Compensating ──┬──► Compensated
///                                               └──► Failed (needs intervention)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SagaStatus {
    #[default]
    Received,
    Processing,
    Completed,
    Failed,
    Compensating,
    Compensated,
}

impl SagaStatus {
    /// Returns true if no further automated transition will happen.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaStatus::Completed | SagaStatus::Failed | SagaStatus::Compensated
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStatus::Received => "received",
            SagaStatus::Processing => "processing",
            SagaStatus::Completed => "completed",
            SagaStatus::Failed => "failed",
            SagaStatus::Compensating => "compensating",
            SagaStatus::Compensated => "compensated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        [
            SagaStatus::Received,
            SagaStatus::Processing,
            SagaStatus::Completed,
            SagaStatus::Failed,
            SagaStatus::Compensating,
            SagaStatus::Compensated,
        ]
        .into_iter()
        .find(|status| status.as_str() == s)
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    #[default]
    Pending,
    Queued,
    Processing,
    Completed,
    Failed,
    Compensated,
}

impl StepStatus {
    /// Queued or processing.
    pub fn is_active(&self) -> bool {
        matches!(self, StepStatus::Queued | StepStatus::Processing)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Queued => "queued",
            StepStatus::Processing => "processing",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Compensated => "compensated",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The steps of the order-processing saga, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepName {
    Inventory,
    Invoice,
    Crm,
    Marketplace,
}

impl StepName {
    pub const ALL: [StepName; 4] = [
        StepName::Inventory,
        StepName::Invoice,
        StepName::Crm,
        StepName::Marketplace,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepName::Inventory => "inventory",
            StepName::Invoice => "invoice",
            StepName::Crm => "crm",
            StepName::Marketplace => "marketplace",
        }
    }

    pub fn index(&self) -> usize {
        match self {
            StepName::Inventory => 0,
            StepName::Invoice => 1,
            StepName::Crm => 2,
            StepName::Marketplace => 3,
        }
    }

    pub fn next(&self) -> Option<StepName> {
        Self::ALL.get(self.index() + 1).copied()
    }

    pub fn previous(&self) -> Option<StepName> {
        self.index().checked_sub(1).map(|i| Self::ALL[i])
    }

    /// The adapter the step calls.
    pub fn adapter(&self) -> AdapterKind {
        match self {
            StepName::Inventory => AdapterKind::Inventory,
            StepName::Invoice => AdapterKind::Billing,
            StepName::Crm => AdapterKind::CustomerManagement,
            StepName::Marketplace => AdapterKind::SalesChannel,
        }
    }

    /// Queue the step's job is routed to.
    pub fn domain(&self) -> Domain {
        match self {
            StepName::Inventory => Domain::Inventory,
            StepName::Invoice => Domain::Billing,
            StepName::Crm => Domain::Customer,
            StepName::Marketplace => Domain::Channel,
        }
    }

    /// Job action that performs the step.
    pub fn action(&self) -> &'static str {
        match self {
            StepName::Inventory => "reserve_stock",
            StepName::Invoice => "process_invoice",
            StepName::Crm => "update_customer",
            StepName::Marketplace => "update_order_status",
        }
    }

    pub fn priority(&self) -> u8 {
        match self {
            StepName::Inventory => priority::INVENTORY,
            StepName::Invoice => priority::BILLING,
            StepName::Crm => priority::CUSTOMER,
            StepName::Marketplace => priority::CHANNEL,
        }
    }

    /// Finds the step performed by a job route.
    pub fn from_route(domain: Domain, action: &str) -> Option<StepName> {
        Self::ALL
            .into_iter()
            .find(|step| step.domain() == domain && step.action() == action)
    }
}

impl std::fmt::Display for StepName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
