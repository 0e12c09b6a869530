//! Tenants: the billing and isolation unit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A recorded payment failure. While present and the balance is exhausted,
/// billable requests are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentFailure {
    pub failure_code: String,
    pub failure_reason: String,
    pub failed_at: DateTime<Utc>,
}

/// A tenant. Every persisted record in both stores is owned by exactly one
/// tenant through its `uid`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Tenant {
    /// 64-bit identifier used for row-level isolation.
    pub uid: i64,
    /// Human-readable slug, unique.
    pub slug: String,
    /// Upstream organization id (identity provider), when the tenant maps
    /// to an organization rather than a single user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
    /// Owner user id for personal tenants.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    /// Credit balance in USD.
    pub current_credits_usd: f64,
    /// External payment-provider customer id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_failure: Option<PaymentFailure>,
    /// Whether credits are topped up automatically when exhausted.
    #[serde(default)]
    pub automatic_payment: bool,
}

impl Tenant {
    /// Whether billable requests must be rejected.
    pub fn credits_exhausted(&self) -> bool {
        self.current_credits_usd <= 0.0 && self.payment_failure.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_requires_both_empty_balance_and_failure() {
        let mut tenant = Tenant {
            current_credits_usd: -0.5,
            ..Default::default()
        };
        assert!(!tenant.credits_exhausted());

        tenant.payment_failure = Some(PaymentFailure {
            failure_code: "card_declined".into(),
            failure_reason: "insufficient funds".into(),
            failed_at: Utc::now(),
        });
        assert!(tenant.credits_exhausted());

        tenant.current_credits_usd = 3.0;
        assert!(!tenant.credits_exhausted());
    }
}
