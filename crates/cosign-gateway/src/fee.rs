//! Fee Estimator
//!
//! Previews the cost of a not-yet-submitted call: builds it, asks the ledger
//! client for the fee-estimation-only signed encoding bound to the caller's
//! identity, and delegates the price computation to the oracle. Nothing is
//! broadcast and no round state is touched.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use cosign_chain::{ChainError, LedgerClient};
use cosign_types::{Address, CatalogEntry, TypedCall};

use crate::builder::{self, ValidationError};
use crate::oracle::{FeeQuote, OracleError, PricingOracle};

#[derive(Error, Debug)]
pub enum EstimationError {
    /// Bad user input; surfaced field-level, the oracle is never contacted.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The ledger client could not produce the estimation encoding.
    #[error("failed to encode call for estimation")]
    Encoding(#[source] ChainError),

    #[error("pricing oracle unreachable")]
    OracleUnreachable(#[source] OracleError),

    #[error("pricing oracle answered with a malformed quote")]
    MalformedQuote(#[source] OracleError),
}

/// Non-submitting fee preview for a signing identity.
pub struct FeeEstimator<C, O> {
    client: Arc<C>,
    oracle: O,
}

impl<C: LedgerClient, O: PricingOracle> FeeEstimator<C, O> {
    pub fn new(client: Arc<C>, oracle: O) -> Self {
        Self { client, oracle }
    }

    /// Estimate from raw field values. Validation short-circuits before any
    /// oracle traffic.
    pub async fn estimate(
        &self,
        entry: &CatalogEntry,
        raw_values: &[Option<String>],
        who: &Address,
    ) -> Result<FeeQuote, EstimationError> {
        let call = builder::build(entry, raw_values)?;
        self.estimate_call(&call, who).await
    }

    /// Estimate an already-built call.
    pub async fn estimate_call(
        &self,
        call: &TypedCall,
        who: &Address,
    ) -> Result<FeeQuote, EstimationError> {
        let info = self
            .client
            .signing_info(who)
            .await
            .map_err(EstimationError::Encoding)?;

        let encoded = self
            .client
            .encode_for_estimate(call, who, &info)
            .await
            .map_err(EstimationError::Encoding)?;

        debug!(
            "estimating {}.{} for {} ({} encoded bytes)",
            call.namespace,
            call.operation,
            who,
            encoded.len()
        );

        self.oracle.fee_quote(&encoded).await.map_err(|e| match e {
            OracleError::Unreachable(_) => EstimationError::OracleUnreachable(e),
            OracleError::BadResponse(_) => EstimationError::MalformedQuote(e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use cosign_chain::MockLedgerClient;
    use cosign_types::ParamSpec;

    /// Oracle double that counts calls and returns a fixed quote.
    struct CountingOracle {
        calls: AtomicUsize,
    }

    impl CountingOracle {
        fn quoting() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }

        fn count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PricingOracle for &CountingOracle {
        async fn fee_quote(&self, _encoded_call: &[u8]) -> Result<FeeQuote, OracleError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(FeeQuote { partial_fee: 12_500 })
        }
    }

    /// Oracle double failing with one of the two error shapes.
    struct FailingOracle {
        unreachable: bool,
    }

    #[async_trait]
    impl PricingOracle for FailingOracle {
        async fn fee_quote(&self, _encoded_call: &[u8]) -> Result<FeeQuote, OracleError> {
            if self.unreachable {
                // an unparseable URL yields a reqwest error without traffic
                let cause = reqwest::Client::new().get("http://").send().await.unwrap_err();
                Err(OracleError::Unreachable(cause))
            } else {
                Err(OracleError::BadResponse("partialFee missing".to_string()))
            }
        }
    }

    fn transfer_entry() -> CatalogEntry {
        CatalogEntry::new(
            "balances",
            "transfer",
            vec![
                ParamSpec::new("dest", "AccountId"),
                ParamSpec::new("value", "Balance"),
            ],
        )
    }

    #[tokio::test]
    async fn validation_short_circuits_before_the_oracle() {
        let oracle = CountingOracle::quoting();
        let estimator = FeeEstimator::new(Arc::new(MockLedgerClient::new()), &oracle);

        let err = estimator
            .estimate(
                &transfer_entry(),
                &[Some("addr".to_string()), None],
                &Address::from("alice"),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, EstimationError::Validation(_)));
        assert_eq!(oracle.count(), 0);
    }

    #[tokio::test]
    async fn quotes_a_valid_call_without_submitting() {
        let client = Arc::new(MockLedgerClient::new());
        let oracle = CountingOracle::quoting();
        let estimator = FeeEstimator::new(client.clone(), &oracle);

        let quote = estimator
            .estimate(
                &transfer_entry(),
                &[Some("addr".to_string()), Some("100".to_string())],
                &Address::from("alice"),
            )
            .await
            .unwrap();

        assert_eq!(quote.partial_fee, 12_500);
        assert_eq!(oracle.count(), 1);
        // estimation never broadcasts
        assert!(client.submissions().is_empty());
    }

    #[tokio::test]
    async fn unreachable_and_malformed_oracle_failures_map_distinctly() {
        let values = [Some("addr".to_string()), Some("100".to_string())];

        let estimator = FeeEstimator::new(
            Arc::new(MockLedgerClient::new()),
            FailingOracle { unreachable: true },
        );
        let err = estimator
            .estimate(&transfer_entry(), &values, &Address::from("alice"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EstimationError::OracleUnreachable(OracleError::Unreachable(_))
        ));

        let estimator = FeeEstimator::new(
            Arc::new(MockLedgerClient::new()),
            FailingOracle { unreachable: false },
        );
        let err = estimator
            .estimate(&transfer_entry(), &values, &Address::from("alice"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EstimationError::MalformedQuote(OracleError::BadResponse(_))
        ));
    }

    #[tokio::test]
    async fn identical_inputs_yield_identical_quotes() {
        let oracle = CountingOracle::quoting();
        let estimator = FeeEstimator::new(Arc::new(MockLedgerClient::new()), &oracle);
        let values = [Some("addr".to_string()), Some("100".to_string())];

        let first = estimator
            .estimate(&transfer_entry(), &values, &Address::from("alice"))
            .await
            .unwrap();
        let second = estimator
            .estimate(&transfer_entry(), &values, &Address::from("alice"))
            .await
            .unwrap();

        assert_eq!(first, second);
    }
}
