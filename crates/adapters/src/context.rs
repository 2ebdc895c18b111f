//! Per-call context propagated to every adapter operation.

use common::{CorrelationId, OrderId};

/// Carries the correlation id and, for side-effecting operations, the
/// idempotency key the downstream system deduplicates on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    pub correlation_id: CorrelationId,
    pub idempotency_key: Option<String>,
}

impl CallContext {
    pub fn new(correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id,
            idempotency_key: None,
        }
    }

    /// Attaches an idempotency key.
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Attaches the natural key `<order_id>:<step>` used by saga steps.
    pub fn for_step(correlation_id: CorrelationId, order_id: OrderId, step: &str) -> Self {
        Self::new(correlation_id).with_idempotency_key(format!("{order_id}:{step}"))
    }

    /// Returns the idempotency key, or a validation error if absent.
    pub fn require_key(&self) -> crate::Result<&str> {
        self.idempotency_key
            .as_deref()
            .ok_or_else(|| crate::AdapterError::validation("operation requires an idempotency key"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn test_for_step_builds_natural_key() {
        let order_id = OrderId::new();
        let ctx = CallContext::for_step(CorrelationId::from("c-1"), order_id, "invoice");
        assert_eq!(ctx.require_key().unwrap(), format!("{order_id}:invoice"));
        assert_eq!(ctx.correlation_id.as_str(), "c-1");
    }

    #[test]
    fn test_require_key_without_key() {
        let ctx = CallContext::new(CorrelationId::new());
        assert_eq!(
            ctx.require_key().unwrap_err().kind,
            ErrorKind::ValidationError
        );
    }
}
