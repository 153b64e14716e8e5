use crate::payment::PaymentJob;
use crate::processor_type::ProcessorType;
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Method, Request, StatusCode};
use hyper_util::client::legacy::{Client, connect::HttpConnector};
use rust_decimal::Decimal;
use serde::Serialize;
use std::time::Duration;
use time::OffsetDateTime;

#[derive(Debug, thiserror::Error)]
pub enum PaymentProcessorError {
    #[error("invalid payment request: {0}")]
    InvalidPayment(String),
    #[error("processor is unavailable: {0}")]
    Unavailable(String),
    #[error("processor answered {0}")]
    Rejected(StatusCode),
    #[error("processor did not answer within {0:?}")]
    Timeout(Duration),
}

/// Body posted to a payment processor. Never carries the retry counter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentRequest {
    #[serde(rename = "correlationId")]
    pub correlation_id: String,
    pub amount: Decimal,
    #[serde(rename = "requestedAt", with = "time::serde::rfc3339")]
    pub requested_at: OffsetDateTime,
}

impl From<&PaymentJob> for PaymentRequest {
    fn from(job: &PaymentJob) -> Self {
        Self {
            correlation_id: job.correlation_id.clone(),
            amount: job.amount,
            requested_at: job.requested_at,
        }
    }
}

/// Outbound call to one of the two payment processors.
///
/// Any `Err` is a plain "not successful" for the dispatcher; the variants only
/// exist so the logs can tell a timeout from a 500.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn submit(
        &self,
        processor: ProcessorType,
        request: &PaymentRequest,
    ) -> Result<(), PaymentProcessorError>;
}

pub struct PaymentProcessor {
    url: String,
    timeout: Duration,
    client: Client<HttpConnector, Full<Bytes>>,
}

impl PaymentProcessor {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let client =
            Client::builder(hyper_util::rt::TokioExecutor::new()).build(HttpConnector::new());

        Self {
            url: format!("{}/payments", base_url.trim_end_matches('/')),
            timeout,
            client,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn process(&self, request: &PaymentRequest) -> Result<(), PaymentProcessorError> {
        let json_bytes = serde_json::to_vec(request)
            .map_err(|e| PaymentProcessorError::InvalidPayment(e.to_string()))?;

        let req = Request::builder()
            .method(Method::POST)
            .uri(&self.url)
            .header("content-type", "application/json")
            .body(Full::new(Bytes::from(json_bytes)))
            .map_err(|e| PaymentProcessorError::InvalidPayment(e.to_string()))?;

        let call = async {
            let response = self
                .client
                .request(req)
                .await
                .map_err(|e| PaymentProcessorError::Unavailable(e.to_string()))?;
            let status = response.status();

            // drain the body so the connection goes back to the pool
            let _ = response.into_body().collect().await;

            if !status.is_success() {
                return Err(PaymentProcessorError::Rejected(status));
            }
            Ok(())
        };

        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| PaymentProcessorError::Timeout(self.timeout))?
    }
}

/// Default and fallback processors reached over HTTP.
pub struct HttpPaymentGateway {
    default: PaymentProcessor,
    fallback: PaymentProcessor,
}

impl HttpPaymentGateway {
    pub fn new(default: PaymentProcessor, fallback: PaymentProcessor) -> Self {
        Self { default, fallback }
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn submit(
        &self,
        processor: ProcessorType,
        request: &PaymentRequest,
    ) -> Result<(), PaymentProcessorError> {
        match processor {
            ProcessorType::Default => self.default.process(request).await,
            ProcessorType::Fallback => self.fallback.process(request).await,
        }
    }
}
