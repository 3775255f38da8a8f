//! Root account configuration data.
//!
//! The debtor steers its currency through the `config_data` string of the
//! root account: the target interest rate for creditor accounts and an
//! optional pointer to a document describing the debtor. For all other
//! accounts `config_data` is opaque to this service.

use serde::Deserialize;
use thiserror::Error;

use ledgerd_core::{INTEREST_RATE_CEIL, INTEREST_RATE_FLOOR};

const IRI_MAX_LENGTH: usize = 200;
const CONTENT_TYPE_MAX_BYTES: usize = 100;

/// A document describing the debtor, referenced by IRI.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DebtorInfo {
    pub iri: String,
    pub content_type: Option<String>,
    pub sha256: Option<Vec<u8>>,
}

/// Parsed root account configuration.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RootConfigData {
    /// Annual rate (percent) the debtor wants creditor accounts to accrue.
    pub interest_rate_target: f64,
    pub info: Option<DebtorInfo>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigDataError {
    #[error("malformed root config data")]
    Malformed,
    #[error("interest rate target out of bounds")]
    RateOutOfBounds,
}

#[derive(Deserialize)]
struct RawDebtorInfo {
    #[serde(rename = "type")]
    type_name: Option<String>,
    iri: String,
    #[serde(rename = "contentType")]
    content_type: Option<String>,
    sha256: Option<String>,
}

#[derive(Deserialize)]
struct RawRootConfigData {
    #[serde(rename = "type")]
    type_name: Option<String>,
    #[serde(rename = "rate", default)]
    interest_rate_target: f64,
    info: Option<RawDebtorInfo>,
}

fn decode_sha256(s: &str) -> Result<Vec<u8>, ConfigDataError> {
    if s.len() != 64 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ConfigDataError::Malformed);
    }
    hex::decode(s).map_err(|_| ConfigDataError::Malformed)
}

/// Parses (and validates) a root account's `config_data` string. The empty
/// string is a valid default configuration.
pub fn parse_root_config_data(config_data: &str) -> Result<RootConfigData, ConfigDataError> {
    if config_data.is_empty() {
        return Ok(RootConfigData::default());
    }

    let raw: RawRootConfigData =
        serde_json::from_str(config_data).map_err(|_| ConfigDataError::Malformed)?;

    if raw.type_name.as_deref().is_some_and(|t| t != "RootConfigData") {
        return Err(ConfigDataError::Malformed);
    }
    if !raw.interest_rate_target.is_finite()
        || raw.interest_rate_target < INTEREST_RATE_FLOOR
        || raw.interest_rate_target > INTEREST_RATE_CEIL
    {
        return Err(ConfigDataError::RateOutOfBounds);
    }

    let info = match raw.info {
        None => None,
        Some(raw_info) => {
            if raw_info.type_name.as_deref().is_some_and(|t| t != "DebtorInfo") {
                return Err(ConfigDataError::Malformed);
            }
            if raw_info.iri.is_empty() || raw_info.iri.chars().count() > IRI_MAX_LENGTH {
                return Err(ConfigDataError::Malformed);
            }
            if let Some(ct) = &raw_info.content_type {
                if !ct.is_ascii() || ct.len() > CONTENT_TYPE_MAX_BYTES {
                    return Err(ConfigDataError::Malformed);
                }
            }
            let sha256 = match &raw_info.sha256 {
                Some(s) if !s.is_empty() => Some(decode_sha256(s)?),
                _ => None,
            };
            Some(DebtorInfo {
                iri: raw_info.iri,
                content_type: raw_info.content_type,
                sha256,
            })
        }
    };

    Ok(RootConfigData { interest_rate_target: raw.interest_rate_target, info })
}
