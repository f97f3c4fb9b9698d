use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, header::CONTENT_TYPE};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{
    AccessTokenCache, Authorization, CaptureResult, FetchedToken, PaymentError, PaymentGateway,
    Result, ReturnContext, format_amount, parse_amount_cents,
};
use crate::config::PaymentConfig;
use crate::types::{OrderStatus, PaymentOrder};

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Fallback lifetime when the processor omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 300;

/// REST client for the payment processor.
pub struct ProcessorClient {
    http: Client,
    config: PaymentConfig,
    tokens: AccessTokenCache,
}

impl ProcessorClient {
    pub fn new(config: PaymentConfig) -> Result<Self> {
        let http = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            http,
            config,
            tokens: AccessTokenCache::default(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.api_url.trim_end_matches('/'))
    }

    async fn fetch_token(&self) -> Result<FetchedToken> {
        let resp = self
            .http
            .post(self.url("/v1/oauth2/token"))
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(PaymentError::TokenExchangeFailed(format!(
                "status {}: {body}",
                status.as_u16()
            )));
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| PaymentError::TokenExchangeFailed(e.to_string()))?;

        Ok(FetchedToken {
            access_token: token.access_token,
            expires_in: std::time::Duration::from_secs(
                token.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS),
            ),
        })
    }

    async fn access_token(&self) -> Result<String> {
        self.tokens.get_or_refresh(|| self.fetch_token()).await
    }

    /// Sends an authenticated request, retrying once with a fresh token if
    /// the cached one was rejected.
    async fn send_authorized<F>(&self, build: F) -> Result<Response>
    where
        F: Fn(&str) -> RequestBuilder,
    {
        let token = self.access_token().await?;
        let resp = build(&token).send().await?;

        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }

        tracing::warn!("processor rejected cached access token, refreshing");
        self.tokens.invalidate().await;
        let token = self.access_token().await?;
        Ok(build(&token).send().await?)
    }
}

/// Reads a response body as JSON, keeping non-JSON bodies as a string value.
async fn read_body(resp: Response) -> (StatusCode, Value) {
    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();
    let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
    (status, body)
}

fn approval_link(order: &Value) -> Option<String> {
    order
        .get("links")?
        .as_array()?
        .iter()
        .find(|link| link.get("rel").and_then(Value::as_str) == Some("approve"))
        .and_then(|link| link.get("href"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[async_trait]
impl PaymentGateway for ProcessorClient {
    fn currency(&self) -> &str {
        &self.config.currency
    }

    async fn create_order(
        &self,
        amount_cents: i64,
        description: &str,
        context: &ReturnContext,
    ) -> Result<PaymentOrder> {
        if amount_cents <= 0 {
            return Err(PaymentError::InvalidAmount(amount_cents));
        }

        let body = json!({
            "intent": "AUTHORIZE",
            "purchase_units": [{
                "amount": {
                    "currency_code": self.config.currency,
                    "value": format_amount(amount_cents),
                },
                "description": description,
            }],
            "application_context": {
                "return_url": context.return_url,
                "cancel_url": context.cancel_url,
                "user_action": "PAY_NOW",
            }
        });

        let url = self.url("/v2/checkout/orders");
        let resp = self
            .send_authorized(|token| self.http.post(&url).bearer_auth(token).json(&body))
            .await?;
        let (status, order) = read_body(resp).await;

        if !status.is_success() {
            return Err(PaymentError::OrderCreationFailed(format!(
                "status {}: {order}",
                status.as_u16()
            )));
        }

        let order_id = order
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| PaymentError::OrderCreationFailed("response has no order id".into()))?
            .to_string();

        let approval_url = approval_link(&order).ok_or_else(|| {
            PaymentError::OrderCreationFailed("response has no approve link".into())
        })?;

        tracing::info!(order_id = %order_id, amount_cents, "created payment order");

        Ok(PaymentOrder {
            order_id,
            approval_url: Some(approval_url),
            authorization_id: None,
            amount_cents,
            currency: self.config.currency.clone(),
            status: OrderStatus::Created,
        })
    }

    async fn authorize(&self, order_id: &str) -> Result<Authorization> {
        let url = self.url(&format!(
            "/v2/checkout/orders/{}/authorize",
            urlencoding::encode(order_id)
        ));
        let resp = self
            .send_authorized(|token| {
                self.http
                    .post(&url)
                    .bearer_auth(token)
                    .header(CONTENT_TYPE, "application/json")
            })
            .await?;
        let (status, body) = read_body(resp).await;

        if !status.is_success() {
            return Err(PaymentError::AuthorizationFailed(format!(
                "status {}: {body}",
                status.as_u16()
            )));
        }

        let held = body
            .pointer("/purchase_units/0/payments/authorizations/0")
            .ok_or_else(|| {
                PaymentError::AuthorizationFailed("response has no authorization".into())
            })?;
        let authorization_id = held
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                PaymentError::AuthorizationFailed("response has no authorization id".into())
            })?;
        let amount = held.get("amount").ok_or_else(|| {
            PaymentError::AuthorizationFailed("response has no authorized amount".into())
        })?;
        let amount_cents = amount
            .get("value")
            .and_then(Value::as_str)
            .and_then(parse_amount_cents)
            .ok_or_else(|| {
                PaymentError::AuthorizationFailed(format!("unreadable authorized amount: {amount}"))
            })?;
        let currency = amount
            .get("currency_code")
            .and_then(Value::as_str)
            .unwrap_or(&self.config.currency)
            .to_string();

        tracing::info!(
            order_id,
            authorization_id,
            amount_cents,
            "authorized payment order"
        );
        Ok(Authorization {
            id: authorization_id.to_string(),
            amount_cents,
            currency,
        })
    }

    async fn capture(&self, authorization_id: &str) -> Result<CaptureResult> {
        let url = self.url(&format!(
            "/v2/payments/authorizations/{}/capture",
            urlencoding::encode(authorization_id)
        ));
        let resp = self
            .send_authorized(|token| {
                self.http
                    .post(&url)
                    .bearer_auth(token)
                    .header(CONTENT_TYPE, "application/json")
            })
            .await?;
        let (status, body) = read_body(resp).await;

        if !status.is_success() {
            return Err(PaymentError::CaptureFailed {
                status: status.as_u16(),
                body: body.to_string(),
            });
        }

        let capture_id = body.get("id").and_then(Value::as_str).map(str::to_string);
        let capture_status = body
            .get("status")
            .and_then(Value::as_str)
            .map(str::to_string);

        tracing::info!(authorization_id, capture_id = ?capture_id, "captured payment");

        Ok(CaptureResult {
            capture_id,
            status: capture_status,
            raw: body,
        })
    }
}
