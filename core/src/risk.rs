//! Risk evaluation port.
//!
//! Risk is advisory. Admission blocks only on an explicit verdict above its
//! threshold; a transport failure is treated as a pass (fail-open) so that an
//! outage of the risk service cannot stop a sale.

use crate::error::RiskError;
use crate::types::UserId;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

/// Input to a risk evaluation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskRequest {
    /// Buyer
    pub user_id: UserId,
    /// Order total in minor units
    pub amount: i64,
}

/// Verdict of a risk evaluation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskVerdict {
    /// 0 (clean) to 100 (certain fraud)
    pub risk_level: i32,
}

impl RiskVerdict {
    /// `true` if `risk_level` is strictly above `threshold`.
    #[must_use]
    pub const fn blocks(&self, threshold: i32) -> bool {
        self.risk_level > threshold
    }
}

/// Risk evaluator.
///
/// Implementations should bound their own latency; admission does not retry.
pub trait RiskEvaluator: Send + Sync {
    /// Score a purchase attempt.
    ///
    /// # Errors
    ///
    /// Returns [`RiskError`] if the evaluator could not produce a verdict.
    fn evaluate<'a>(&'a self, request: &'a RiskRequest)
    -> BoxFuture<'a, Result<RiskVerdict, RiskError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_is_exclusive() {
        assert!(!RiskVerdict { risk_level: 80 }.blocks(80));
        assert!(RiskVerdict { risk_level: 81 }.blocks(80));
    }
}
