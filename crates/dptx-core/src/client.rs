//! HTTP client for the remote configuration service.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;

use crate::api::{CommitReceipt, DeleteOutcome, Transaction, TransactionApi};
use crate::config::ClientConfig;
use crate::context::CallContext;
use crate::error::{ApiError, Error, Result};
use crate::staging::{StagedWrite, WriteMethod};
use crate::version::{ConfigurationVersion, parse_version_body};

const VERSION_PATH: &str = "configuration/version";
const TRANSACTIONS_PATH: &str = "transactions";

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<u16>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreatedTransaction {
    id: String,
}

#[derive(Debug, Deserialize)]
struct CommitBody {
    #[serde(default)]
    status: Option<String>,
}

/// Decodes a failure response into an [`Error`].
///
/// Bodies shaped like `{"code": int, "message": string}` become
/// [`Error::Api`]; when `code` is missing the HTTP status stands in. Any
/// other body becomes a raw [`Error::Status`].
#[must_use]
pub fn decode_error(status: u16, body: &[u8]) -> Error {
    match serde_json::from_slice::<ErrorBody>(body) {
        Ok(ErrorBody {
            code,
            message: Some(message),
        }) => Error::Api(ApiError::new(code.unwrap_or(status), message)),
        _ => Error::Status {
            status,
            body: String::from_utf8_lossy(body).trim().to_string(),
        },
    }
}

/// API client for the version, transaction and staging endpoints.
#[derive(Clone)]
pub struct DataPlaneClient {
    client: Client,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
}

impl std::fmt::Debug for DataPlaneClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataPlaneClient")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl DataPlaneClient {
    /// Creates a new client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the HTTP client
    /// cannot be constructed.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        config.validate()?;

        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| Error::transport_with_source("failed to build HTTP client", e))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim().trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    /// Returns the base URL requests are resolved against.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.username {
            Some(username) => req.basic_auth(username, self.password.as_deref()),
            None => req,
        }
    }

    async fn send(&self, ctx: &CallContext, req: RequestBuilder) -> Result<(u16, Vec<u8>)> {
        let req = self.authorize(req);
        ctx.run(async move {
            let response = req
                .send()
                .await
                .map_err(|e| Error::transport_with_source("failed to send request", e))?;
            let status = response.status();
            let body = response
                .bytes()
                .await
                .map_err(|e| Error::transport_with_source("failed to read response body", e))?;
            tracing::trace!(status = status.as_u16(), bytes = body.len(), "response received");
            Ok((status.as_u16(), body.to_vec()))
        })
        .await
    }

    /// Applies one staged write inside `transaction`.
    ///
    /// The write is sent to `<base>/<path>?transaction_id=<id>`. Success is
    /// any of 200, 201, 202 or 204; the decoded response body (or `null` when
    /// empty) is returned.
    ///
    /// # Errors
    ///
    /// Returns a transport error, or the decoded API/status error.
    pub async fn stage_write(
        &self,
        ctx: &CallContext,
        transaction: &Transaction,
        write: &StagedWrite,
    ) -> Result<serde_json::Value> {
        let url = self.url(&write.path);
        let req = match write.method {
            WriteMethod::Post => self.client.post(&url),
            WriteMethod::Put => self.client.put(&url),
            WriteMethod::Delete => self.client.delete(&url),
        }
        .query(&[("transaction_id", transaction.id.as_str())]);
        let req = match &write.body {
            Some(body) => req.json(body),
            None => req,
        };

        let (status, body) = self.send(ctx, req).await?;
        tracing::debug!(
            method = %write.method,
            path = %write.path,
            transaction_id = %transaction.id,
            status,
            "staged write"
        );

        match StatusCode::from_u16(status) {
            Ok(StatusCode::OK | StatusCode::CREATED | StatusCode::ACCEPTED | StatusCode::NO_CONTENT) => {
                if body.iter().all(u8::is_ascii_whitespace) {
                    return Ok(serde_json::Value::Null);
                }
                serde_json::from_slice(&body)
                    .map_err(|e| Error::parse(format!("invalid staged write response: {e}")))
            }
            _ => Err(decode_error(status, &body)),
        }
    }
}

#[async_trait]
impl TransactionApi for DataPlaneClient {
    async fn current_version(&self, ctx: &CallContext) -> Result<ConfigurationVersion> {
        let req = self.client.get(self.url(VERSION_PATH));
        let (status, body) = self.send(ctx, req).await?;

        if status != StatusCode::OK.as_u16() {
            return Err(decode_error(status, &body));
        }
        parse_version_body(&body)
    }

    async fn create_transaction(
        &self,
        ctx: &CallContext,
        base_version: &ConfigurationVersion,
    ) -> Result<Transaction> {
        let req = self
            .client
            .post(self.url(TRANSACTIONS_PATH))
            .query(&[("version", base_version.as_str())]);
        let (status, body) = self.send(ctx, req).await?;

        if status != StatusCode::CREATED.as_u16() {
            return Err(decode_error(status, &body));
        }

        let created: CreatedTransaction = serde_json::from_slice(&body)
            .map_err(|e| Error::parse(format!("invalid transaction response: {e}")))?;
        if created.id.trim().is_empty() {
            return Err(Error::parse("transaction response carried an empty id"));
        }
        Ok(Transaction::new(created.id, base_version.clone()))
    }

    async fn commit_transaction(
        &self,
        ctx: &CallContext,
        transaction_id: &str,
    ) -> Result<CommitReceipt> {
        let req = self
            .client
            .put(self.url(&format!("{TRANSACTIONS_PATH}/{transaction_id}")));
        let (status, body) = self.send(ctx, req).await?;

        if status != StatusCode::OK.as_u16() && status != StatusCode::ACCEPTED.as_u16() {
            return Err(decode_error(status, &body));
        }

        let reported = serde_json::from_slice::<CommitBody>(&body)
            .ok()
            .and_then(|b| b.status);
        Ok(CommitReceipt {
            transaction_id: transaction_id.to_string(),
            status_code: status,
            status: reported,
            committed_at: Utc::now(),
        })
    }

    async fn delete_transaction(
        &self,
        ctx: &CallContext,
        transaction_id: &str,
    ) -> Result<DeleteOutcome> {
        let req = self
            .client
            .delete(self.url(&format!("{TRANSACTIONS_PATH}/{transaction_id}")));
        let (status, body) = self.send(ctx, req).await?;

        match StatusCode::from_u16(status) {
            Ok(StatusCode::OK | StatusCode::NO_CONTENT) => Ok(DeleteOutcome::Deleted),
            Ok(StatusCode::NOT_FOUND) => Ok(DeleteOutcome::AlreadyGone),
            _ => Err(decode_error(status, &body)),
        }
    }
}
