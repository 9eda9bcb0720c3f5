//! Pricing Oracle Client
//!
//! Request/response fee quoting against the sidecar-style HTTP oracle. The
//! oracle receives an opaque encoded signed call and answers with a numeric
//! fee; transport failures are kept distinct from malformed answers.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// A single fee quote, denominated by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeQuote {
    pub partial_fee: u128,
}

#[derive(Error, Debug)]
pub enum OracleError {
    #[error("pricing oracle unreachable")]
    Unreachable(#[source] reqwest::Error),

    #[error("malformed oracle response: {0}")]
    BadResponse(String),
}

/// External price computation for a not-yet-submitted call.
#[async_trait]
pub trait PricingOracle: Send + Sync {
    /// Quote the fee for an encoded signed call. Must not broadcast it.
    async fn fee_quote(&self, encoded_call: &[u8]) -> Result<FeeQuote, OracleError>;
}

#[derive(Debug, Deserialize)]
struct FeeEstimateResponse {
    #[serde(rename = "partialFee")]
    partial_fee: String,
}

/// HTTP client for the sidecar fee-estimation endpoint.
pub struct SidecarOracle {
    http: reqwest::Client,
    endpoint: Url,
}

impl SidecarOracle {
    pub fn new(base_url: Url) -> Result<Self, OracleError> {
        let endpoint = base_url
            .join("transaction/fee-estimate")
            .map_err(|e| OracleError::BadResponse(format!("bad oracle base url: {e}")))?;
        Ok(Self {
            http: reqwest::Client::new(),
            endpoint,
        })
    }
}

#[async_trait]
impl PricingOracle for SidecarOracle {
    async fn fee_quote(&self, encoded_call: &[u8]) -> Result<FeeQuote, OracleError> {
        let body = serde_json::json!({ "tx": format!("0x{}", hex::encode(encoded_call)) });
        debug!("querying fee estimate at {}", self.endpoint);

        let response = self
            .http
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await
            .map_err(OracleError::Unreachable)?
            .error_for_status()
            .map_err(OracleError::Unreachable)?;

        let estimate: FeeEstimateResponse = response
            .json()
            .await
            .map_err(|e| OracleError::BadResponse(e.to_string()))?;

        let partial_fee = estimate
            .partial_fee
            .parse::<u128>()
            .map_err(|_| OracleError::BadResponse(format!("non-numeric fee `{}`", estimate.partial_fee)))?;

        Ok(FeeQuote { partial_fee })
    }
}
