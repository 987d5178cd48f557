use crate::config::PaymentConfig;
use crate::errors::CoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Status of a payment intent as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Canceled,
    Failed,
}

impl FromStr for PaymentStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "succeeded" => Ok(Self::Succeeded),
            "canceled" => Ok(Self::Canceled),
            "failed" => Ok(Self::Failed),
            other => Err(CoreError::Provider(format!(
                "unknown payment status: {other:?}"
            ))),
        }
    }
}

/// A freshly created payment intent.
#[derive(Debug, Clone)]
pub struct CreatedPayment {
    /// Identifier assigned by the provider.
    pub payment_id: String,
    /// Hosted page the buyer is sent to in order to pay.
    pub confirmation_url: String,
}

/// Seam to the external payment provider.
///
/// Transport or provider failures surface as [`CoreError::Provider`], never
/// as a `Pending` status: the caller must be able to tell "poll again" apart
/// from "something is wrong".
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Creates a payment intent for `amount` whole currency units,
    /// referencing the product being bought.
    async fn create_payment(
        &self,
        amount: i64,
        description: &str,
        product_id: Uuid,
    ) -> Result<CreatedPayment, CoreError>;

    /// Polls the provider for the current status of a payment.
    async fn get_status(&self, payment_id: &str) -> Result<PaymentStatus, CoreError>;
}

#[derive(Debug, Serialize)]
struct CreatePaymentRequest<'a> {
    amount: i64,
    currency: &'a str,
    description: &'a str,
    return_url: &'a str,
    metadata: PaymentMetadata,
}

#[derive(Debug, Serialize, Deserialize)]
struct PaymentMetadata {
    product_id: Uuid,
}

#[derive(Debug, Deserialize)]
struct PaymentResource {
    id: String,
    status: String,
    #[serde(default)]
    confirmation_url: Option<String>,
}

/// Payment gateway backed by the provider's REST API over HTTPS.
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: String,
    api_token: String,
    return_url: String,
    currency: String,
}

impl HttpPaymentGateway {
    pub fn new(config: &PaymentConfig) -> Result<Self, CoreError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| CoreError::Provider(format!("failed to build http client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
            return_url: config.return_url.clone(),
            currency: config.currency.clone(),
        })
    }

    fn payments_url(&self) -> String {
        format!("{}/payments", self.base_url)
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self, description))]
    async fn create_payment(
        &self,
        amount: i64,
        description: &str,
        product_id: Uuid,
    ) -> Result<CreatedPayment, CoreError> {
        // A fresh key per logical creation: if the transport layer retries
        // this request, the provider deduplicates on the key instead of
        // charging twice.
        let idempotency_key = Uuid::new_v4();

        let body = CreatePaymentRequest {
            amount,
            currency: &self.currency,
            description,
            return_url: &self.return_url,
            metadata: PaymentMetadata { product_id },
        };

        let response = self
            .client
            .post(self.payments_url())
            .bearer_auth(&self.api_token)
            .header("Idempotency-Key", idempotency_key.to_string())
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::Provider(format!("create payment request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(CoreError::Provider(format!(
                "provider returned {} on payment creation",
                response.status()
            )));
        }

        let resource: PaymentResource = response
            .json()
            .await
            .map_err(|e| CoreError::Provider(format!("malformed payment response: {e}")))?;

        let confirmation_url = resource.confirmation_url.ok_or_else(|| {
            CoreError::Provider("payment response missing confirmation_url".into())
        })?;

        debug!(payment_id = %resource.id, "payment intent created");

        Ok(CreatedPayment {
            payment_id: resource.id,
            confirmation_url,
        })
    }

    #[instrument(skip(self))]
    async fn get_status(&self, payment_id: &str) -> Result<PaymentStatus, CoreError> {
        let response = self
            .client
            .get(format!("{}/{}", self.payments_url(), payment_id))
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| CoreError::Provider(format!("status request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(CoreError::Provider(format!(
                "provider returned {} on status poll",
                response.status()
            )));
        }

        let resource: PaymentResource = response
            .json()
            .await
            .map_err(|e| CoreError::Provider(format!("malformed status response: {e}")))?;

        resource.status.parse()
    }
}
