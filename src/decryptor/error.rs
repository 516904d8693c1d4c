//! # Decryption Error Types
//!
//! Error types for key material loading and SOPS decryption, with
//! classification of engine failures into transient and permanent reasons.

use crate::crd::ObjectKey;
use crate::decryptor::backend::KeyKind;
use thiserror::Error;

/// A key secret entry that could not be turned into usable key material
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("key entry '{entry}' is not valid UTF-8")]
    NotUtf8 { entry: String },
    #[error("key entry '{entry}' is empty")]
    Empty { entry: String },
    #[error("key entry '{entry}' contains no age identities")]
    NoAgeIdentities { entry: String },
    #[error("key entry '{entry}' is not a valid AWS credentials document: {source}")]
    InvalidAws {
        entry: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("key entry '{entry}' is not a valid Azure AAD config: {source}")]
    InvalidAzure {
        entry: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("key entry '{entry}' is missing required field '{field}'")]
    MissingField { entry: String, field: &'static str },
    #[error("key entry '{entry}' is not a GCP credentials JSON object")]
    InvalidGcp { entry: String },
    #[error("failed to import PGP key '{entry}': {message}")]
    PgpImport { entry: String, message: String },
    #[error("failed to prepare keyring: {0}")]
    Keyring(#[from] std::io::Error),
}

/// A key secret that contributed no usable key material
#[derive(Debug, Error)]
pub enum KeyMaterialError {
    #[error("secret {secret} contains no recognised key entries")]
    NoEntries { secret: ObjectKey },
    #[error("secret {secret} has invalid key entries: {}", format_errors(.errors))]
    Invalid {
        secret: ObjectKey,
        errors: Vec<CredentialError>,
    },
}

fn format_errors(errors: &[CredentialError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors returned by a decryption attempt
#[derive(Debug, Error)]
pub enum DecryptError {
    #[error("resource is not SOPS encrypted")]
    NotEncrypted,
    #[error("SOPS envelope declares no master keys")]
    NoMasterKeys,
    #[error("no key material available for any key declared in the envelope ({})", format_kinds(.declared))]
    NoMatchingBackend { declared: Vec<KeyKind> },
    #[error("failed to encode document for decryption: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode decrypted document: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("decrypted value for key '{key}' is not valid base64: {source}")]
    InvalidBase64 {
        key: String,
        #[source]
        source: base64::DecodeError,
    },
    #[error("decrypted document does not contain secret item '{0}'")]
    MissingItem(String),
    #[error("failed to emit encrypted {input} file as decrypted {output}: {message}")]
    Panicked {
        input: &'static str,
        output: &'static str,
        message: String,
    },
    #[error("sops binary not found: {0}")]
    BinaryNotFound(String),
    #[error("failed to run sops: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("SOPS decryption failed: {} - {message}", .reason.as_str())]
    Engine {
        reason: DecryptionFailureReason,
        message: String,
    },
}

fn format_kinds(kinds: &[KeyKind]) -> String {
    kinds
        .iter()
        .map(KeyKind::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

impl DecryptError {
    pub fn is_transient(&self) -> bool {
        match self {
            DecryptError::Engine { reason, .. } => reason.is_transient(),
            DecryptError::Spawn(_) => true,
            _ => false,
        }
    }

    /// Short label used for metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            DecryptError::NotEncrypted => "not_encrypted",
            DecryptError::NoMasterKeys => "no_master_keys",
            DecryptError::NoMatchingBackend { .. } => "no_matching_backend",
            DecryptError::Encode(_) | DecryptError::Decode(_) => "document",
            DecryptError::InvalidBase64 { .. } => "invalid_base64",
            DecryptError::MissingItem(_) => "missing_item",
            DecryptError::Panicked { .. } => "panicked",
            DecryptError::BinaryNotFound(_) | DecryptError::Spawn(_) => "engine_unavailable",
            DecryptError::Engine { reason, .. } => reason.as_str(),
        }
    }
}

/// Classification of engine failure reasons
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecryptionFailureReason {
    /// None of the supplied keys could recover the data key (permanent)
    KeyNotFound,
    /// Key material is malformed (permanent)
    InvalidKeyFormat,
    /// Document is not valid SOPS content (permanent)
    CorruptedDocument,
    /// Network timeout contacting a key service (transient)
    NetworkTimeout,
    /// KMS/Vault endpoint unavailable (transient)
    ProviderUnavailable,
    /// Credentials rejected by the key service (may be transient)
    PermissionDenied,
    /// Unknown error (assume transient for safety)
    Unknown,
}

impl DecryptionFailureReason {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DecryptionFailureReason::NetworkTimeout
                | DecryptionFailureReason::ProviderUnavailable
                | DecryptionFailureReason::PermissionDenied
                | DecryptionFailureReason::Unknown
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DecryptionFailureReason::KeyNotFound => "key_not_found",
            DecryptionFailureReason::InvalidKeyFormat => "invalid_key_format",
            DecryptionFailureReason::CorruptedDocument => "corrupted_document",
            DecryptionFailureReason::NetworkTimeout => "network_timeout",
            DecryptionFailureReason::ProviderUnavailable => "provider_unavailable",
            DecryptionFailureReason::PermissionDenied => "permission_denied",
            DecryptionFailureReason::Unknown => "unknown",
        }
    }

    pub fn remediation(&self) -> &'static str {
        match self {
            DecryptionFailureReason::KeyNotFound => {
                "Check that a SopsProvider selecting this resource also selects a key secret holding one of the keys listed in the sops envelope."
            }
            DecryptionFailureReason::InvalidKeyFormat => {
                "Check the key secret entries: PGP keys must be ASCII-armored (.asc), age identities must start with AGE-SECRET-KEY-1 (.agekey)."
            }
            DecryptionFailureReason::CorruptedDocument => {
                "Re-encrypt the resource with sops; the encrypted values or the envelope were modified."
            }
            DecryptionFailureReason::NetworkTimeout => {
                "Network timeout contacting the key service. This is usually transient - will retry."
            }
            DecryptionFailureReason::ProviderUnavailable => {
                "The key service is unavailable. This is usually transient - will retry."
            }
            DecryptionFailureReason::PermissionDenied => {
                "The key service rejected the credentials. Verify the credentials stored in the key secret."
            }
            DecryptionFailureReason::Unknown => {
                "Unknown SOPS decryption error. Check operator logs for the detailed error message."
            }
        }
    }
}

/// Classify a sops failure from its stderr and exit code
///
/// Exit codes are checked first:
/// - 128: could not retrieve the data key with any master key
/// - 111: no encryption key found in the envelope
/// - 51: MAC mismatch
/// - 2: input could not be read or parsed
pub fn classify_sops_error(error_msg: &str, exit_code: Option<i32>) -> DecryptionFailureReason {
    match exit_code {
        Some(128 | 111) => return DecryptionFailureReason::KeyNotFound,
        Some(51 | 2) => return DecryptionFailureReason::CorruptedDocument,
        _ => {}
    }

    let error_lower = error_msg.to_lowercase();

    if error_lower.contains("timeout") || error_lower.contains("timed out") {
        return DecryptionFailureReason::NetworkTimeout;
    }

    if error_lower.contains("unavailable")
        || error_lower.contains("connection refused")
        || error_lower.contains("no such host")
    {
        return DecryptionFailureReason::ProviderUnavailable;
    }

    if error_lower.contains("permission denied")
        || error_lower.contains("unauthorized")
        || error_lower.contains("forbidden")
        || error_lower.contains("accessdenied")
    {
        return DecryptionFailureReason::PermissionDenied;
    }

    if error_lower.contains("failed to get the data key")
        || error_lower.contains("no decryption key")
        || error_lower.contains("key not found")
    {
        return DecryptionFailureReason::KeyNotFound;
    }

    if error_lower.contains("invalid key") || error_lower.contains("malformed") {
        return DecryptionFailureReason::InvalidKeyFormat;
    }

    if error_lower.contains("error unmarshalling")
        || error_lower.contains("could not decrypt value")
        || error_lower.contains("corrupt")
    {
        return DecryptionFailureReason::CorruptedDocument;
    }

    DecryptionFailureReason::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_take_precedence() {
        assert_eq!(
            classify_sops_error("connection refused", Some(128)),
            DecryptionFailureReason::KeyNotFound
        );
        assert_eq!(
            classify_sops_error("", Some(51)),
            DecryptionFailureReason::CorruptedDocument
        );
    }

    #[test]
    fn test_message_fallback() {
        assert_eq!(
            classify_sops_error("Error: failed to get the data key required to decrypt", Some(1)),
            DecryptionFailureReason::KeyNotFound
        );
        assert_eq!(
            classify_sops_error("dial tcp: i/o timeout", None),
            DecryptionFailureReason::NetworkTimeout
        );
        assert_eq!(
            classify_sops_error("AccessDeniedException: not allowed", None),
            DecryptionFailureReason::PermissionDenied
        );
        assert_eq!(
            classify_sops_error("something odd", None),
            DecryptionFailureReason::Unknown
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(DecryptionFailureReason::ProviderUnavailable.is_transient());
        assert!(!DecryptionFailureReason::KeyNotFound.is_transient());
        assert!(!no_backend_error().is_transient());
    }

    fn no_backend_error() -> DecryptError {
        DecryptError::NoMatchingBackend {
            declared: vec![KeyKind::Age, KeyKind::Pgp],
        }
    }

    #[test]
    fn test_no_backend_message_lists_key_types() {
        let message = no_backend_error().to_string();
        assert!(message.contains("age, pgp"));
    }
}
