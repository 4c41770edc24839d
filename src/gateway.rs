//! Payment gateway seam, plus an in-memory gateway for development and tests.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;
use ulid::Ulid;

use crate::model::Cents;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("declined: {0}")]
    Declined(String),
    #[error("gateway timeout")]
    Timeout,
    #[error("{0}")]
    Other(String),
}

/// Attached to every authorization so the provider side can be traced back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentMetadata {
    pub booking_id: Ulid,
    pub villa_id: Ulid,
    pub guest_user_id: Ulid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentIntent {
    pub id: String,
    pub amount: Cents,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Charge {
    pub id: String,
    pub amount: Cents,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Refund {
    pub id: String,
    pub amount: Cents,
}

/// Authorize-then-capture card processor.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn authorize(
        &self,
        amount: Cents,
        currency: &str,
        metadata: &PaymentMetadata,
    ) -> Result<PaymentIntent, GatewayError>;

    async fn capture(&self, intent_id: &str) -> Result<Charge, GatewayError>;

    /// Cancel an uncaptured authorization.
    async fn void(&self, intent_id: &str) -> Result<(), GatewayError>;

    /// Refund part of a captured intent. A repeated `idempotency_key`
    /// returns the first refund instead of refunding again.
    async fn refund(
        &self,
        intent_id: &str,
        amount: Cents,
        idempotency_key: &str,
    ) -> Result<Refund, GatewayError>;
}

/// State of one mock intent, exposed for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockIntent {
    pub amount: Cents,
    pub currency: String,
    pub metadata: PaymentMetadata,
    pub charge_id: Option<String>,
    pub voided: bool,
    pub refunded: Cents,
}

/// In-memory gateway. Every call succeeds unless a failure switch is set.
#[derive(Debug, Default)]
pub struct MockPaymentGateway {
    intents: DashMap<String, MockIntent>,
    /// Refunds by idempotency key.
    refunds: DashMap<String, Refund>,
    next_id: AtomicU64,
    fail_authorize: AtomicBool,
    fail_capture: AtomicBool,
    fail_void: AtomicBool,
    fail_refund: AtomicBool,
}

impl MockPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_authorize(&self, on: bool) {
        self.fail_authorize.store(on, Ordering::SeqCst);
    }

    pub fn fail_capture(&self, on: bool) {
        self.fail_capture.store(on, Ordering::SeqCst);
    }

    pub fn fail_void(&self, on: bool) {
        self.fail_void.store(on, Ordering::SeqCst);
    }

    pub fn fail_refund(&self, on: bool) {
        self.fail_refund.store(on, Ordering::SeqCst);
    }

    pub fn intent(&self, intent_id: &str) -> Option<MockIntent> {
        self.intents.get(intent_id).map(|i| i.value().clone())
    }

    fn next(&self, prefix: &str) -> String {
        format!("{prefix}_{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn unknown(intent_id: &str) -> GatewayError {
        GatewayError::Other(format!("no such payment intent {intent_id}"))
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn authorize(
        &self,
        amount: Cents,
        currency: &str,
        metadata: &PaymentMetadata,
    ) -> Result<PaymentIntent, GatewayError> {
        if self.fail_authorize.load(Ordering::SeqCst) {
            return Err(GatewayError::Declined("card declined".into()));
        }
        if amount <= 0 {
            return Err(GatewayError::Other(format!("invalid amount {amount}")));
        }
        let id = self.next("pi_mock");
        self.intents.insert(
            id.clone(),
            MockIntent {
                amount,
                currency: currency.to_owned(),
                metadata: metadata.clone(),
                charge_id: None,
                voided: false,
                refunded: 0,
            },
        );
        debug!(intent = %id, amount, "mock authorization");
        Ok(PaymentIntent { id, amount })
    }

    async fn capture(&self, intent_id: &str) -> Result<Charge, GatewayError> {
        if self.fail_capture.load(Ordering::SeqCst) {
            return Err(GatewayError::Timeout);
        }
        let mut intent = self
            .intents
            .get_mut(intent_id)
            .ok_or_else(|| Self::unknown(intent_id))?;
        if intent.voided {
            return Err(GatewayError::Other(format!("intent {intent_id} was voided")));
        }
        // Capturing twice returns the first charge.
        let id = match &intent.charge_id {
            Some(id) => id.clone(),
            None => {
                let id = self.next("ch_mock");
                intent.charge_id = Some(id.clone());
                id
            }
        };
        Ok(Charge {
            id,
            amount: intent.amount,
        })
    }

    async fn void(&self, intent_id: &str) -> Result<(), GatewayError> {
        if self.fail_void.load(Ordering::SeqCst) {
            return Err(GatewayError::Timeout);
        }
        let mut intent = self
            .intents
            .get_mut(intent_id)
            .ok_or_else(|| Self::unknown(intent_id))?;
        if intent.charge_id.is_some() {
            return Err(GatewayError::Other(format!("intent {intent_id} already captured")));
        }
        intent.voided = true;
        Ok(())
    }

    async fn refund(
        &self,
        intent_id: &str,
        amount: Cents,
        idempotency_key: &str,
    ) -> Result<Refund, GatewayError> {
        if self.fail_refund.load(Ordering::SeqCst) {
            return Err(GatewayError::Timeout);
        }
        if let Some(done) = self.refunds.get(idempotency_key) {
            return Ok(done.value().clone());
        }
        let mut intent = self
            .intents
            .get_mut(intent_id)
            .ok_or_else(|| Self::unknown(intent_id))?;
        if intent.charge_id.is_none() {
            return Err(GatewayError::Other(format!("intent {intent_id} not captured")));
        }
        if amount <= 0 || intent.refunded + amount > intent.amount {
            return Err(GatewayError::Other(format!(
                "refund of {amount} exceeds captured {} less refunded {}",
                intent.amount, intent.refunded
            )));
        }
        intent.refunded += amount;
        let refund = Refund {
            id: self.next("re_mock"),
            amount,
        };
        self.refunds.insert(idempotency_key.to_owned(), refund.clone());
        Ok(refund)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> PaymentMetadata {
        PaymentMetadata {
            booking_id: Ulid::new(),
            villa_id: Ulid::new(),
            guest_user_id: Ulid::new(),
        }
    }

    #[tokio::test]
    async fn authorize_capture_refund() {
        let gw = MockPaymentGateway::new();
        let intent = gw.authorize(10_000, "usd", &meta()).await.unwrap();
        let charge = gw.capture(&intent.id).await.unwrap();
        assert_eq!(charge.amount, 10_000);
        assert_eq!(gw.capture(&intent.id).await.unwrap(), charge);

        gw.refund(&intent.id, 4_000, "r1").await.unwrap();
        assert!(gw.refund(&intent.id, 7_000, "r2").await.is_err());
        assert_eq!(gw.intent(&intent.id).unwrap().refunded, 4_000);
    }

    #[tokio::test]
    async fn repeated_refund_key_refunds_once() {
        let gw = MockPaymentGateway::new();
        let intent = gw.authorize(10_000, "usd", &meta()).await.unwrap();
        gw.capture(&intent.id).await.unwrap();

        let first = gw.refund(&intent.id, 5_000, "refund-b1").await.unwrap();
        let again = gw.refund(&intent.id, 5_000, "refund-b1").await.unwrap();
        assert_eq!(first, again);
        assert_eq!(gw.intent(&intent.id).unwrap().refunded, 5_000);

        gw.refund(&intent.id, 5_000, "refund-b2").await.unwrap();
        assert_eq!(gw.intent(&intent.id).unwrap().refunded, 10_000);
    }

    #[tokio::test]
    async fn voided_intent_cannot_be_captured() {
        let gw = MockPaymentGateway::new();
        let intent = gw.authorize(10_000, "usd", &meta()).await.unwrap();
        gw.void(&intent.id).await.unwrap();
        assert!(gw.capture(&intent.id).await.is_err());
        assert!(gw.intent(&intent.id).unwrap().voided);
    }

    #[test]
    fn failure_switches() {
        let gw = MockPaymentGateway::new();
        gw.fail_authorize(true);
        let err = tokio_test::block_on(gw.authorize(10_000, "usd", &meta())).unwrap_err();
        assert!(matches!(err, GatewayError::Declined(_)));

        gw.fail_authorize(false);
        let intent = tokio_test::block_on(gw.authorize(10_000, "usd", &meta())).unwrap();
        gw.fail_capture(true);
        assert_eq!(
            tokio_test::block_on(gw.capture(&intent.id)),
            Err(GatewayError::Timeout)
        );
        assert!(gw.intent(&intent.id).unwrap().charge_id.is_none());
    }
}
