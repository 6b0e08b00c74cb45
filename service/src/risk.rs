//! HTTP client for the risk-scoring service.
//!
//! `POST {base_url}/v1/risk/evaluate` with a JSON [`RiskRequest`], answered by
//! a JSON [`RiskVerdict`]. Every failure, including a timeout, is a
//! [`RiskError`]; the orchestrator decides what that means.

use flashsale_core::BoxFuture;
use flashsale_core::error::RiskError;
use flashsale_core::risk::{RiskEvaluator, RiskRequest, RiskVerdict};
use std::time::Duration;

/// [`RiskEvaluator`] over JSON/HTTP.
#[derive(Debug, Clone)]
pub struct HttpRiskClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRiskClient {
    /// Client for the service at `base_url`, bounding each call by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`RiskError::Unavailable`] if the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RiskError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RiskError::Unavailable(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/v1/risk/evaluate", base_url.trim_end_matches('/')),
        })
    }

    /// Full URL requests are sent to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl RiskEvaluator for HttpRiskClient {
    fn evaluate<'a>(
        &'a self,
        request: &'a RiskRequest,
    ) -> BoxFuture<'a, Result<RiskVerdict, RiskError>> {
        Box::pin(async move {
            let response = self
                .client
                .post(&self.endpoint)
                .json(request)
                .send()
                .await
                .map_err(|e| RiskError::Unavailable(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                return Err(RiskError::Unavailable(format!(
                    "Risk service answered {status}"
                )));
            }

            response
                .json::<RiskVerdict>()
                .await
                .map_err(|e| RiskError::InvalidResponse(e.to_string()))
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use flashsale_core::types::UserId;

    #[test]
    fn endpoint_ignores_trailing_slash() {
        let client = HttpRiskClient::new("http://risk.internal/", Duration::from_millis(200)).unwrap();
        assert_eq!(client.endpoint(), "http://risk.internal/v1/risk/evaluate");
    }

    #[tokio::test]
    async fn unreachable_service_is_an_error() {
        // Nothing listens on port 1
        let client = HttpRiskClient::new("http://127.0.0.1:1", Duration::from_millis(200)).unwrap();
        let request = RiskRequest {
            user_id: UserId::new(7),
            amount: 9_900,
        };

        let result = client.evaluate(&request).await;
        assert!(matches!(result, Err(RiskError::Unavailable(_))));
    }
}
