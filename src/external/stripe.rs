use crate::config::StripeConfig;
use crate::utils::retry::{RetryPolicy, retry_with_backoff};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

const STRIPE_API_BASE: &str = "https://api.stripe.com/v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorErrorKind {
    /// Timeouts, connection failures, 429 and 5xx. Safe to retry.
    Unavailable,
    NotFound,
    Authentication,
    /// The processor understood the request and refused it.
    Rejected,
    InvalidResponse,
}

impl std::fmt::Display for ProcessorErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessorErrorKind::Unavailable => write!(f, "unavailable"),
            ProcessorErrorKind::NotFound => write!(f, "not_found"),
            ProcessorErrorKind::Authentication => write!(f, "authentication"),
            ProcessorErrorKind::Rejected => write!(f, "rejected"),
            ProcessorErrorKind::InvalidResponse => write!(f, "invalid_response"),
        }
    }
}

/// Every failure coming out of the billing processor is folded into this shape
/// before it reaches the services.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ProcessorError {
    pub kind: ProcessorErrorKind,
    pub message: String,
    pub cause: Option<String>,
}

impl ProcessorError {
    pub fn new(kind: ProcessorErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn is_transient(&self) -> bool {
        self.kind == ProcessorErrorKind::Unavailable
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ProcessorErrorKind::NotFound
    }

    fn from_reqwest(context: &str, err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() || err.is_connect() || err.is_request() {
            ProcessorErrorKind::Unavailable
        } else if err.is_decode() {
            ProcessorErrorKind::InvalidResponse
        } else {
            ProcessorErrorKind::Unavailable
        };
        Self::new(kind, format!("{context} failed")).with_cause(err.to_string())
    }

    /// Maps an HTTP error status plus the Stripe error envelope (when the body
    /// has one) to a kind.
    fn from_response(context: &str, status: StatusCode, body: &str) -> Self {
        let details = serde_json::from_str::<StripeErrorEnvelope>(body)
            .ok()
            .map(|e| e.error);
        let code = details.as_ref().and_then(|d| d.code.clone());
        let kind = match status {
            StatusCode::TOO_MANY_REQUESTS => ProcessorErrorKind::Unavailable,
            s if s.is_server_error() => ProcessorErrorKind::Unavailable,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                ProcessorErrorKind::Authentication
            }
            StatusCode::NOT_FOUND => ProcessorErrorKind::NotFound,
            _ if code.as_deref() == Some("resource_missing") => ProcessorErrorKind::NotFound,
            _ => ProcessorErrorKind::Rejected,
        };
        let message = details
            .as_ref()
            .and_then(|d| d.message.clone())
            .unwrap_or_else(|| format!("{context} failed with status {status}"));
        let cause = match (details.and_then(|d| d.error_type), code) {
            (Some(t), Some(c)) => format!("status={status} type={t} code={c}"),
            (Some(t), None) => format!("status={status} type={t}"),
            (None, Some(c)) => format!("status={status} code={c}"),
            (None, None) => format!("status={status}"),
        };
        Self::new(kind, message).with_cause(cause)
    }
}

#[derive(Debug, Deserialize)]
struct StripeErrorEnvelope {
    error: StripeErrorDetails,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetails {
    #[serde(rename = "type")]
    error_type: Option<String>,
    code: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorSubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Unpaid,
    Incomplete,
    IncompleteExpired,
    Canceled,
    Paused,
}

impl ProcessorSubscriptionStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "active" => Some(Self::Active),
            "trialing" => Some(Self::Trialing),
            "past_due" => Some(Self::PastDue),
            "unpaid" => Some(Self::Unpaid),
            "incomplete" => Some(Self::Incomplete),
            "incomplete_expired" => Some(Self::IncompleteExpired),
            "canceled" => Some(Self::Canceled),
            "paused" => Some(Self::Paused),
            _ => None,
        }
    }

    /// The subscription has ended and will never bill again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Canceled | Self::IncompleteExpired)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessorCustomer {
    pub id: String,
    pub email: Option<String>,
}

/// Subscription state as observed at `observed_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessorSubscription {
    pub id: String,
    pub customer_id: String,
    pub status: ProcessorSubscriptionStatus,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub cancel_at_period_end: bool,
    pub metadata: HashMap<String, String>,
    pub observed_at: DateTime<Utc>,
}

impl ProcessorSubscription {
    pub fn metadata_user_id(&self) -> Option<i64> {
        self.metadata.get("user_id").and_then(|v| v.parse().ok())
    }

    pub fn metadata_plan_id(&self) -> Option<i64> {
        self.metadata.get("plan_id").and_then(|v| v.parse().ok())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutSessionHandle {
    pub id: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub customer_id: String,
    pub user_id: i64,
    pub plan_id: i64,
    pub plan_name: String,
    pub unit_amount: i64,
    pub interval_days: i32,
}

/// Billing operations the engine consumes from the external processor.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn create_customer(
        &self,
        email: &str,
        user_id: i64,
    ) -> Result<ProcessorCustomer, ProcessorError>;

    async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutSessionHandle, ProcessorError>;

    async fn list_subscriptions_by_customer(
        &self,
        customer_id: &str,
    ) -> Result<Vec<ProcessorSubscription>, ProcessorError>;

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<ProcessorSubscription, ProcessorError>;

    /// Never cancels immediately: billing and access both run to the period end.
    async fn cancel_at_period_end(
        &self,
        subscription_id: &str,
    ) -> Result<ProcessorSubscription, ProcessorError>;

    async fn list_customers_by_email(
        &self,
        email: &str,
    ) -> Result<Vec<ProcessorCustomer>, ProcessorError>;
}

#[derive(Debug, Deserialize)]
struct StripeList<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct StripeCustomer {
    id: String,
    email: Option<String>,
}

impl From<StripeCustomer> for ProcessorCustomer {
    fn from(c: StripeCustomer) -> Self {
        Self {
            id: c.id,
            email: c.email,
        }
    }
}

#[derive(Debug, Deserialize)]
struct StripeSubscription {
    id: String,
    customer: String,
    status: String,
    current_period_start: Option<i64>,
    current_period_end: Option<i64>,
    #[serde(default)]
    cancel_at_period_end: bool,
    #[serde(default)]
    metadata: HashMap<String, String>,
    #[serde(default)]
    items: StripeSubscriptionItems,
}

#[derive(Debug, Deserialize, Default)]
struct StripeSubscriptionItems {
    data: Vec<StripeSubscriptionItem>,
}

#[derive(Debug, Deserialize)]
struct StripeSubscriptionItem {
    current_period_start: Option<i64>,
    current_period_end: Option<i64>,
}

impl StripeSubscription {
    // Newer API versions move the billing period onto the subscription items.
    fn period_start(&self) -> Option<i64> {
        self.current_period_start
            .or_else(|| self.items.data.first().and_then(|i| i.current_period_start))
    }

    fn period_end(&self) -> Option<i64> {
        self.current_period_end
            .or_else(|| self.items.data.first().and_then(|i| i.current_period_end))
    }

    fn into_processor(self, observed_at: DateTime<Utc>) -> Result<ProcessorSubscription, ProcessorError> {
        let invalid = |what: &str| {
            ProcessorError::new(
                ProcessorErrorKind::InvalidResponse,
                format!("subscription {} has no valid {what}", self.id),
            )
        };
        let status = ProcessorSubscriptionStatus::parse(&self.status)
            .ok_or_else(|| invalid("status"))?;
        let start = self
            .period_start()
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
            .ok_or_else(|| invalid("current_period_start"))?;
        let end = self
            .period_end()
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
            .ok_or_else(|| invalid("current_period_end"))?;
        Ok(ProcessorSubscription {
            id: self.id,
            customer_id: self.customer,
            status,
            current_period_start: start,
            current_period_end: end,
            cancel_at_period_end: self.cancel_at_period_end,
            metadata: self.metadata,
            observed_at,
        })
    }
}

#[derive(Debug, Deserialize)]
struct StripeCheckoutSession {
    id: String,
    url: Option<String>,
}

#[derive(Clone)]
pub struct StripeService {
    client: Client,
    config: StripeConfig,
    retry: RetryPolicy,
}

impl StripeService {
    pub fn new(config: StripeConfig) -> Result<Self, ProcessorError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| {
                ProcessorError::new(ProcessorErrorKind::Unavailable, "failed to build HTTP client")
                    .with_cause(e.to_string())
            })?;
        Ok(Self {
            client,
            config,
            retry: RetryPolicy::default(),
        })
    }

    /// Verifies the `Stripe-Signature` header and parses the event.
    pub fn verify_webhook_signature(
        &self,
        payload: &str,
        signature: &str,
    ) -> Result<stripe::Event, stripe::WebhookError> {
        stripe::Webhook::construct_event(payload, signature, &self.config.webhook_secret)
    }

    fn request(
        &self,
        method: &Method,
        path: &str,
        params: &[(String, String)],
        idempotency_key: Option<&str>,
    ) -> RequestBuilder {
        let url = format!("{STRIPE_API_BASE}{path}");
        let request = self
            .client
            .request(method.clone(), &url)
            .bearer_auth(&self.config.secret_key);
        if *method == Method::GET {
            return request.query(params);
        }
        let request = request.form(params);
        match idempotency_key {
            Some(key) => request.header("Idempotency-Key", key),
            None => request,
        }
    }

    async fn send<T>(
        &self,
        context: &str,
        method: Method,
        path: &str,
        params: &[(String, String)],
    ) -> Result<T, ProcessorError>
    where
        T: for<'de> Deserialize<'de>,
    {
        // 同一次逻辑调用的所有重试共用一个幂等键
        let idempotency_key = (method != Method::GET).then(|| Uuid::new_v4().to_string());
        retry_with_backoff(&self.retry, ProcessorError::is_transient, || async {
            let request = self.request(&method, path, params, idempotency_key.as_deref());

            let response = request
                .send()
                .await
                .map_err(|e| ProcessorError::from_reqwest(context, e))?;

            let status = response.status();
            if status.is_success() {
                response
                    .json::<T>()
                    .await
                    .map_err(|e| ProcessorError::from_reqwest(context, e))
            } else {
                let body = response.text().await.unwrap_or_default();
                let err = ProcessorError::from_response(context, status, &body);
                log::warn!("Stripe {context} failed: {err} ({:?})", err.cause);
                Err(err)
            }
        })
        .await
    }
}

fn param(key: &str, value: impl ToString) -> (String, String) {
    (key.to_string(), value.to_string())
}

#[async_trait]
impl PaymentProcessor for StripeService {
    async fn create_customer(
        &self,
        email: &str,
        user_id: i64,
    ) -> Result<ProcessorCustomer, ProcessorError> {
        let params = vec![param("email", email), param("metadata[user_id]", user_id)];
        let customer: StripeCustomer = self
            .send("create customer", Method::POST, "/customers", &params)
            .await?;
        Ok(customer.into())
    }

    async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutSessionHandle, ProcessorError> {
        let params = vec![
            param("mode", "subscription"),
            param("customer", &request.customer_id),
            param("client_reference_id", request.user_id),
            param("success_url", &self.config.success_url),
            param("cancel_url", &self.config.cancel_url),
            param("line_items[0][quantity]", 1),
            param("line_items[0][price_data][currency]", &self.config.currency),
            param("line_items[0][price_data][unit_amount]", request.unit_amount),
            param("line_items[0][price_data][product_data][name]", &request.plan_name),
            param("line_items[0][price_data][recurring][interval]", "day"),
            param(
                "line_items[0][price_data][recurring][interval_count]",
                request.interval_days,
            ),
            param("metadata[user_id]", request.user_id),
            param("metadata[plan_id]", request.plan_id),
            param("subscription_data[metadata][user_id]", request.user_id),
            param("subscription_data[metadata][plan_id]", request.plan_id),
        ];
        let session: StripeCheckoutSession = self
            .send("create checkout session", Method::POST, "/checkout/sessions", &params)
            .await?;
        Ok(CheckoutSessionHandle {
            id: session.id,
            url: session.url,
        })
    }

    async fn list_subscriptions_by_customer(
        &self,
        customer_id: &str,
    ) -> Result<Vec<ProcessorSubscription>, ProcessorError> {
        let params = vec![
            param("customer", customer_id),
            param("status", "all"),
            param("limit", 20),
        ];
        let list: StripeList<StripeSubscription> = self
            .send("list subscriptions", Method::GET, "/subscriptions", &params)
            .await?;
        let observed_at = Utc::now();
        list.data
            .into_iter()
            .map(|s| s.into_processor(observed_at))
            .collect()
    }

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<ProcessorSubscription, ProcessorError> {
        let path = format!("/subscriptions/{subscription_id}");
        let sub: StripeSubscription = self
            .send("retrieve subscription", Method::GET, &path, &[])
            .await?;
        sub.into_processor(Utc::now())
    }

    async fn cancel_at_period_end(
        &self,
        subscription_id: &str,
    ) -> Result<ProcessorSubscription, ProcessorError> {
        // 仅在账期结束时取消，不立即终止
        let path = format!("/subscriptions/{subscription_id}");
        let params = vec![param("cancel_at_period_end", "true")];
        let sub: StripeSubscription = self
            .send("update subscription", Method::POST, &path, &params)
            .await?;
        sub.into_processor(Utc::now())
    }

    async fn list_customers_by_email(
        &self,
        email: &str,
    ) -> Result<Vec<ProcessorCustomer>, ProcessorError> {
        let params = vec![param("email", email), param("limit", 10)];
        let list: StripeList<StripeCustomer> = self
            .send("list customers", Method::GET, "/customers", &params)
            .await?;
        Ok(list.data.into_iter().map(Into::into).collect())
    }
}
