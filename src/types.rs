use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How attestations are signed after a run succeeds.
///
/// - `Key`: sign with a long-lived ed25519 key loaded through the secret
///   store; verification needs only the public key and works offline.
/// - `Keyless`: request a short-lived certificate from an external authority
///   and sign with an ephemeral key that is discarded after use.
/// - `None`: runs are attested but never signed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignerMode {
    Key,
    Keyless,
    None,
}

impl Default for SignerMode {
    fn default() -> Self {
        SignerMode::None
    }
}

impl FromStr for SignerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "key" => Ok(SignerMode::Key),
            "keyless" => Ok(SignerMode::Keyless),
            "none" => Ok(SignerMode::None),
            other => Err(format!(
                "invalid signing mode: {other} (expected \"key\", \"keyless\" or \"none\")"
            )),
        }
    }
}

/// Enforcement mode for resource verification.
///
/// - `Enforce`: refuse to create a run when a matched resource is unsigned or
///   wrongly signed.
/// - `Warn`: log the failure and proceed.
/// - `Off`: skip verification entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationMode {
    Enforce,
    Warn,
    Off,
}

impl Default for VerificationMode {
    fn default() -> Self {
        VerificationMode::Off
    }
}

impl FromStr for VerificationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "enforce" => Ok(VerificationMode::Enforce),
            "warn" => Ok(VerificationMode::Warn),
            "off" => Ok(VerificationMode::Off),
            other => Err(format!(
                "invalid verification mode: {other} (expected \"enforce\", \"warn\" or \"off\")"
            )),
        }
    }
}

/// What to do when no verification policy matches a resource name.
///
/// `Allow` (default) dispatches the resource unverified; `Deny` refuses it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnmatchedPolicy {
    Allow,
    Deny,
}

impl Default for UnmatchedPolicy {
    fn default() -> Self {
        UnmatchedPolicy::Allow
    }
}

/// Backend for persisted run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// Store records as JSON documents under the storage root.
    Embedded,
    /// Keep records in memory only (lost on exit).
    Memory,
}

impl Default for StorageMode {
    fn default() -> Self {
        StorageMode::Embedded
    }
}

/// What happens when a requested isolation property is not achieved by the
/// execution substrate.
///
/// - `Fail`: the task run is terminated as Failed.
/// - `Report` (default): the violation is recorded on the task run and later
///   caps the compliance level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IsolationEnforcement {
    Fail,
    Report,
}

impl Default for IsolationEnforcement {
    fn default() -> Self {
        IsolationEnforcement::Report
    }
}

/// Declared type of a parameter or result value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    String,
    Number,
    Structured,
}

impl Default for ValueType {
    fn default() -> Self {
        ValueType::String
    }
}

/// Parse duration strings like `"500ms"`, `"90s"`, `"10m"`, `"1h"`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| format!("invalid duration (missing unit): {s}"))?;

    let (value, unit) = s.split_at(split);
    let value: u64 = value
        .parse()
        .map_err(|_| format!("invalid duration value: {s}"))?;

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 60 * 60)),
        other => Err(format!(
            "invalid duration unit: {other} (expected ms, s, m or h)"
        )),
    }
}
