//! Mock risk evaluator.

use flashsale_core::BoxFuture;
use flashsale_core::error::RiskError;
use flashsale_core::risk::{RiskEvaluator, RiskRequest, RiskVerdict};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Mock risk evaluator.
///
/// Returns a fixed risk level, or fails every call to simulate an outage.
#[derive(Debug, Clone)]
pub struct MockRiskEvaluator {
    /// `Some(level)` to answer with that level, `None` to be unavailable.
    pub risk_level: Option<i32>,
    calls: Arc<AtomicUsize>,
}

impl MockRiskEvaluator {
    /// Low-risk evaluator (level 10).
    #[must_use]
    pub fn allow() -> Self {
        Self::with_level(10)
    }

    /// Evaluator answering with `level`.
    #[must_use]
    pub fn with_level(level: i32) -> Self {
        Self {
            risk_level: Some(level),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Evaluator that is always unreachable.
    #[must_use]
    pub fn unavailable() -> Self {
        Self {
            risk_level: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of evaluations requested so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockRiskEvaluator {
    fn default() -> Self {
        Self::allow()
    }
}

impl RiskEvaluator for MockRiskEvaluator {
    fn evaluate<'a>(
        &'a self,
        _request: &'a RiskRequest,
    ) -> BoxFuture<'a, Result<RiskVerdict, RiskError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.risk_level
                .map(|risk_level| RiskVerdict { risk_level })
                .ok_or_else(|| RiskError::Unavailable("mock risk service is down".into()))
        })
    }
}
