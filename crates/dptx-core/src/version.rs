//! Configuration versions and the version oracle.
//!
//! The remote service reports its version in several shapes:
//!
//! - a bare JSON integer: `42`
//! - an object with an integer field: `{"version": 42}`
//! - an object with a float field: `{"version": 42.0}`
//! - an object with a string field: `{"version": "42"}`
//!
//! All of them normalize to the same canonical decimal string.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::api::TransactionApi;
use crate::context::CallContext;
use crate::error::{Error, Phase, Result};

/// Largest float that still represents every integer exactly.
const MAX_EXACT_FLOAT: f64 = 9_007_199_254_740_992.0;

/// An opaque, monotonically advancing configuration version.
///
/// Always held in canonical decimal form: ASCII digits without leading zeros.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConfigurationVersion(String);

impl ConfigurationVersion {
    /// Parses a decimal version string, trimming whitespace and leading zeros.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] if the value is empty or not purely decimal.
    pub fn parse(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::parse(format!(
                "configuration version must be a decimal integer, got {value:?}"
            )));
        }
        let canonical = trimmed.trim_start_matches('0');
        if canonical.is_empty() {
            return Ok(Self("0".to_string()));
        }
        Ok(Self(canonical.to_string()))
    }

    /// Returns the canonical decimal representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<u64> for ConfigurationVersion {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl TryFrom<String> for ConfigurationVersion {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ConfigurationVersion> for String {
    fn from(value: ConfigurationVersion) -> Self {
        value.0
    }
}

impl fmt::Display for ConfigurationVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Integral floats up to 2^53 only decode exactly with serde_json's
// `float_roundtrip` feature.
#[derive(Deserialize)]
#[serde(untagged)]
enum VersionScalar {
    Int(u64),
    Float(f64),
    Text(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum VersionBody {
    Bare(VersionScalar),
    Wrapped { version: VersionScalar },
}

impl VersionScalar {
    fn into_version(self) -> Result<ConfigurationVersion> {
        match self {
            Self::Int(value) => Ok(ConfigurationVersion::from(value)),
            Self::Float(value) => {
                if !value.is_finite() || value < 0.0 || value.fract() != 0.0 {
                    return Err(Error::parse(format!(
                        "configuration version must be a non-negative integer, got {value}"
                    )));
                }
                if value > MAX_EXACT_FLOAT {
                    return Err(Error::parse(format!(
                        "configuration version {value} exceeds exact float range"
                    )));
                }
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let integral = value as u64;
                Ok(ConfigurationVersion::from(integral))
            }
            Self::Text(value) => ConfigurationVersion::parse(&value),
        }
    }
}

/// Decodes a version response body in any of the accepted shapes.
///
/// # Errors
///
/// Returns [`Error::Parse`] if the body matches none of the shapes.
pub fn parse_version_body(body: &[u8]) -> Result<ConfigurationVersion> {
    let decoded: VersionBody = serde_json::from_slice(body).map_err(|e| {
        Error::parse(format!(
            "unrecognized version body {:?}: {e}",
            String::from_utf8_lossy(body)
        ))
    })?;
    match decoded {
        VersionBody::Bare(scalar) | VersionBody::Wrapped { version: scalar } => {
            scalar.into_version()
        }
    }
}

/// Reads the remote service's current configuration version.
///
/// No retry happens here: a stale version is an expected, meaningful answer
/// and retrying belongs to the caller.
#[derive(Clone)]
pub struct VersionOracle {
    api: Arc<dyn TransactionApi>,
}

impl VersionOracle {
    /// Creates an oracle reading through the given API.
    #[must_use]
    pub fn new(api: Arc<dyn TransactionApi>) -> Self {
        Self { api }
    }

    /// Returns the current configuration version.
    ///
    /// # Errors
    ///
    /// Returns the transport, status or parse error from the read, wrapped
    /// with `version_read` context.
    pub async fn current_version(&self, ctx: &CallContext) -> Result<ConfigurationVersion> {
        let version = self
            .api
            .current_version(ctx)
            .await
            .map_err(|err| err.in_phase(Phase::VersionRead, None))?;
        tracing::debug!(version = %version, "read configuration version");
        Ok(version)
    }
}
