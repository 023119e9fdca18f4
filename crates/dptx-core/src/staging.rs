//! Raw writes staged inside a transaction.
//!
//! The coordinator does not know what is being configured. [`StagedWrites`]
//! is the generic mutation used by callers that only have a list of
//! method/path/body triples to apply, such as the CLI.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::api::Transaction;
use crate::client::DataPlaneClient;
use crate::context::CallContext;
use crate::error::{Error, Result};
use crate::mutation::Mutation;

/// HTTP method of a staged write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WriteMethod {
    /// Create a resource.
    Post,
    /// Replace a resource.
    Put,
    /// Remove a resource.
    Delete,
}

impl fmt::Display for WriteMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        };
        f.write_str(s)
    }
}

/// One write against an endpoint outside the coordinator's four primitives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedWrite {
    /// HTTP method.
    pub method: WriteMethod,
    /// Path relative to the client's base URL.
    pub path: String,
    /// JSON body, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

impl StagedWrite {
    /// Validates the write's path.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an empty path or one carrying its
    /// own `transaction_id`.
    pub fn validate(&self) -> Result<()> {
        let path = self.path.trim();
        if path.is_empty() || path == "/" {
            return Err(Error::InvalidInput("staged write path is empty".to_string()));
        }
        if path.contains("transaction_id=") {
            return Err(Error::InvalidInput(format!(
                "staged write path must not set transaction_id: {path}"
            )));
        }
        Ok(())
    }
}

/// Applies a list of writes, in order, inside the transaction.
#[derive(Debug, Clone)]
pub struct StagedWrites {
    client: Arc<DataPlaneClient>,
    writes: Vec<StagedWrite>,
}

impl StagedWrites {
    /// Creates the mutation after validating every write.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the list is empty or a write is invalid.
    pub fn new(client: Arc<DataPlaneClient>, writes: Vec<StagedWrite>) -> Result<Self> {
        if writes.is_empty() {
            return Err(Error::InvalidInput("no writes to stage".to_string()));
        }
        for write in &writes {
            write.validate()?;
        }
        Ok(Self { client, writes })
    }

    /// Returns the writes this mutation applies.
    #[must_use]
    pub fn writes(&self) -> &[StagedWrite] {
        &self.writes
    }
}

#[async_trait]
impl Mutation for StagedWrites {
    type Output = Vec<serde_json::Value>;

    async fn apply(&self, ctx: &CallContext, transaction: &Transaction) -> Result<Self::Output> {
        let mut responses = Vec::with_capacity(self.writes.len());
        for (index, write) in self.writes.iter().enumerate() {
            let response = self
                .client
                .stage_write(ctx, transaction, write)
                .await
                .map_err(|e| {
                    Error::mutation_with_source(
                        format!("write {index} ({} {})", write.method, write.path),
                        e,
                    )
                })?;
            responses.push(response);
        }
        Ok(responses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;

    #[test]
    fn writes_deserialize_from_json() {
        let writes: Vec<StagedWrite> = serde_json::from_str(
            r#"[
                {"method": "POST", "path": "/configuration/backends", "body": {"name": "web"}},
                {"method": "DELETE", "path": "/configuration/backends/old"}
            ]"#,
        )
        .expect("valid writes");
        assert_eq!(writes[0].method, WriteMethod::Post);
        assert_eq!(writes[1].body, None);
    }

    #[test]
    fn rejects_empty_lists_and_smuggled_transaction_ids() {
        let client =
            Arc::new(DataPlaneClient::new(&ClientConfig::new("http://127.0.0.1:1")).expect("client"));
        assert!(StagedWrites::new(Arc::clone(&client), Vec::new()).is_err());

        let smuggled = StagedWrite {
            method: WriteMethod::Put,
            path: "/configuration/backends/web?transaction_id=abc".to_string(),
            body: None,
        };
        assert!(StagedWrites::new(client, vec![smuggled]).is_err());
    }
}
