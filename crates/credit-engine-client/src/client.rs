//! Credit engine HTTP client implementation.

use reqwest::{Client, RequestBuilder, StatusCode};
use std::time::Duration;

use credit_engine_core::{HoldId, OperationId, Plan, UserId};

use crate::error::{ClientError, Result};
use crate::types::{
    ApiErrorResponse, AppliedDelta, ApplyDeltaRequest, Balance, Hold, OpenAccountBody,
    OperationRecord, OperationStatus, Quote, QuoteRequest, Reservation, ReserveRequest,
    Settlement, UpdateOperationBody,
};

/// Credit engine API client.
///
/// Wraps the internal RPC surface with typed requests and errors. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CreditEngineClient {
    client: Client,
    base_url: String,
    api_key: String,
    service_name: String,
}

impl CreditEngineClient {
    /// Create a new client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Base URL of the credit engine service (e.g., `"http://credit-engine:8080"`)
    /// * `api_key` - Service API key for authentication
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Configuration` if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        Self::with_options(base_url, api_key, ClientOptions::default())
    }

    /// Create a new client with custom options.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Configuration` if the HTTP client cannot be built.
    pub fn with_options(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        options: ClientOptions,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(options.timeout_seconds))
            .build()
            .map_err(|e| ClientError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            service_name: options.service_name,
        })
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("x-api-key", &self.api_key)
            .header("x-service-name", &self.service_name)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    // ===== Accounts =====

    /// Open a zero-balance account.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the account already exists.
    pub async fn open_account(&self, user_id: UserId, plan: Plan) -> Result<Balance> {
        let response = self
            .authed(self.client.post(self.url("/v1/accounts")))
            .json(&OpenAccountBody { user_id, plan })
            .send()
            .await?;

        Self::handle_response(response).await
    }

    /// Get an account's balance snapshot.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::NotFound` for an unknown account.
    pub async fn get_balance(&self, user_id: &UserId) -> Result<Balance> {
        let response = self
            .authed(self.client.get(self.url(&format!("/v1/accounts/{user_id}"))))
            .send()
            .await?;

        Self::handle_response(response).await
    }

    /// Apply a signed credit change.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::InsufficientCredits` if the balance would go negative.
    pub async fn apply_delta(&self, request: &ApplyDeltaRequest) -> Result<AppliedDelta> {
        let response = self
            .authed(self.client.post(self.url("/v1/ledger/apply")))
            .json(request)
            .send()
            .await?;

        let applied: AppliedDelta = Self::handle_response(response).await?;
        tracing::debug!(
            user_id = %request.user_id,
            delta = request.delta,
            balance = applied.balance,
            replayed = applied.replayed,
            "Balance change applied"
        );
        Ok(applied)
    }

    // ===== Holds =====

    /// Reserve credits before starting an operation.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::InsufficientCredits` or `ClientError::DailyCapExceeded`
    /// when the account cannot cover the hold.
    pub async fn reserve(&self, request: &ReserveRequest) -> Result<Reservation> {
        let response = self
            .authed(self.client.post(self.url("/v1/holds")))
            .json(request)
            .send()
            .await?;

        let reservation: Reservation = Self::handle_response(response).await?;
        tracing::debug!(
            user_id = %request.user_id,
            hold_id = %reservation.hold_id,
            amount = reservation.amount,
            replayed = reservation.replayed,
            "Credits reserved"
        );
        Ok(reservation)
    }

    /// Commit a hold after the operation succeeded.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::NotFound` for an unknown hold.
    pub async fn commit(&self, hold_id: &HoldId) -> Result<Settlement> {
        self.settle(hold_id, "commit").await
    }

    /// Cancel a hold after the operation failed, refunding its credits.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::NotFound` for an unknown hold.
    pub async fn cancel(&self, hold_id: &HoldId) -> Result<Settlement> {
        self.settle(hold_id, "cancel").await
    }

    async fn settle(&self, hold_id: &HoldId, action: &str) -> Result<Settlement> {
        let response = self
            .authed(
                self.client
                    .post(self.url(&format!("/v1/holds/{hold_id}/{action}"))),
            )
            .send()
            .await?;

        let settlement: Settlement = Self::handle_response(response).await?;
        tracing::debug!(hold_id = %hold_id, action, status = %settlement.status, "Hold settled");
        Ok(settlement)
    }

    /// Get a hold.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::NotFound` for an unknown hold.
    pub async fn get_hold(&self, hold_id: &HoldId) -> Result<Hold> {
        let response = self
            .authed(self.client.get(self.url(&format!("/v1/holds/{hold_id}"))))
            .send()
            .await?;

        Self::handle_response(response).await
    }

    // ===== Pricing =====

    /// Price an operation without reserving anything.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the operation cannot be priced.
    pub async fn quote(&self, request: &QuoteRequest) -> Result<Quote> {
        let response = self
            .authed(self.client.post(self.url("/v1/quotes")))
            .json(request)
            .send()
            .await?;

        Self::handle_response(response).await
    }

    // ===== Operations =====

    /// Get an operation's status record.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::NotFound` if the record is unknown or expired.
    pub async fn get_operation(&self, operation_id: &OperationId) -> Result<OperationRecord> {
        let response = self
            .authed(
                self.client
                    .get(self.url(&format!("/v1/operations/{operation_id}"))),
            )
            .send()
            .await?;

        Self::handle_response(response).await
    }

    /// Update an operation's status record.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::NotFound` if the record is unknown or expired.
    pub async fn update_operation(
        &self,
        operation_id: &OperationId,
        status: OperationStatus,
        detail: Option<String>,
    ) -> Result<OperationRecord> {
        let response = self
            .authed(
                self.client
                    .put(self.url(&format!("/v1/operations/{operation_id}"))),
            )
            .json(&UpdateOperationBody { status, detail })
            .send()
            .await?;

        Self::handle_response(response).await
    }

    /// Handle API response and convert errors.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();

        if status.is_success() {
            return Ok(response.json().await?);
        }

        // Try to parse error response
        let error_body: std::result::Result<ApiErrorResponse, _> = response.json().await;

        match error_body {
            Ok(api_error) => Err(map_api_error(status, api_error)),
            Err(_) => Err(ClientError::Api {
                code: "unknown".to_string(),
                message: format!("HTTP {status}"),
                status: status.as_u16(),
            }),
        }
    }
}

fn detail_i64(details: Option<&serde_json::Value>, field: &str) -> i64 {
    details
        .and_then(|d| d.get(field))
        .and_then(serde_json::Value::as_i64)
        .unwrap_or(0)
}

/// Map specific error codes to typed errors.
fn map_api_error(status: StatusCode, api_error: ApiErrorResponse) -> ClientError {
    let body = api_error.error;
    let details = body.details.as_ref();

    match body.code.as_str() {
        "insufficient_credits" => ClientError::InsufficientCredits {
            balance: detail_i64(details, "balance"),
            required: detail_i64(details, "required"),
        },
        "daily_cap_exceeded" => ClientError::DailyCapExceeded {
            remaining: detail_i64(details, "remaining"),
            required: detail_i64(details, "required"),
        },
        "concurrency_conflict" => ClientError::ConcurrencyConflict {
            attempts: u32::try_from(detail_i64(details, "attempts")).unwrap_or(0),
        },
        _ if status == StatusCode::NOT_FOUND => ClientError::NotFound {
            code: body.code,
            message: body.message,
        },
        _ => ClientError::Api {
            code: body.code,
            message: body.message,
            status: status.as_u16(),
        },
    }
}

/// Client options for customization.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Request timeout in seconds (default: 30).
    pub timeout_seconds: u64,
    /// Service name to include in requests.
    pub service_name: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            service_name: "unknown".to_string(),
        }
    }
}

impl ClientOptions {
    /// Create options with a service name.
    #[must_use]
    pub fn with_service_name(name: impl Into<String>) -> Self {
        Self {
            service_name: name.into(),
            ..Self::default()
        }
    }
}
