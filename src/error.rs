//! Error types for the eSocial client.

use crate::credential::CredentialError;
use crate::xml::XmlError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T, E = EsocialError> = std::result::Result<T, E>;

/// eSocial client errors.
#[derive(Error, Debug)]
pub enum EsocialError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("event is not a well-formed XML document: {0}")]
    InvalidInput(#[from] XmlError),

    #[error("batch already holds the maximum of {capacity} events")]
    CapacityExceeded { capacity: usize },

    #[error("signature failure: {0}")]
    SignatureFailure(String),

    #[error("{schema} document failed schema validation: {}", summarize(.violations))]
    SchemaViolation {
        schema: String,
        violations: Vec<Violation>,
    },

    #[error("HTTP error calling {endpoint}: {source}")]
    Transport {
        endpoint: String,
        source: reqwest::Error,
    },

    #[error("{endpoint} returned HTTP {status}: {body}")]
    HttpStatus {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("unexpected response from {endpoint}: {reason}")]
    InvalidResponse { endpoint: String, reason: String },

    #[error("remote fault [{code}]: {message}")]
    RemoteFault {
        code: String,
        message: String,
        detail: Option<String>,
    },
}

impl EsocialError {
    /// Classify the error so callers can branch on kind rather than text.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) | Self::Credential(_) => ErrorKind::Configuration,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
            Self::SignatureFailure(_) => ErrorKind::SignatureFailure,
            Self::SchemaViolation { .. } => ErrorKind::SchemaViolation,
            Self::Transport { .. } | Self::HttpStatus { .. } | Self::InvalidResponse { .. } => {
                ErrorKind::TransportFailure
            }
            Self::RemoteFault { .. } => ErrorKind::RemoteFault,
        }
    }

    /// Violations carried by a schema failure.
    pub fn violations(&self) -> &[Violation] {
        match self {
            Self::SchemaViolation { violations, .. } => violations,
            _ => &[],
        }
    }
}

/// Error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Missing identity, sender or credential, or unusable configuration
    Configuration,
    /// Input that is not a well-formed XML document
    InvalidInput,
    /// Batch is full
    CapacityExceeded,
    /// Signing could not produce a verifiable signature
    SignatureFailure,
    /// Document does not conform to its schema
    SchemaViolation,
    /// Network, TLS or HTTP-level failure
    TransportFailure,
    /// SOAP fault returned by the service
    RemoteFault,
}

impl ErrorKind {
    /// Get the string code for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "CONFIGURATION_ERROR",
            Self::InvalidInput => "INVALID_INPUT",
            Self::CapacityExceeded => "CAPACITY_EXCEEDED",
            Self::SignatureFailure => "SIGNATURE_FAILURE",
            Self::SchemaViolation => "SCHEMA_VIOLATION",
            Self::TransportFailure => "TRANSPORT_FAILURE",
            Self::RemoteFault => "REMOTE_FAULT",
        }
    }
}

/// Violation codes reported by schema validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationCode {
    /// Root element is not the expected one
    UnexpectedRoot,
    /// Root namespace does not match the registered schema version
    NamespaceMismatch,
    /// Required element is absent
    MissingElement,
    /// Element is not allowed at this position
    UnexpectedElement,
    /// Required attribute is absent
    MissingAttribute,
    /// Element or attribute value is malformed
    InvalidValue,
    /// Too many repeated elements
    TooManyElements,
    /// Too few repeated elements
    TooFewElements,
    /// Required XML-DSig signature block is absent
    MissingSignature,
}

impl ViolationCode {
    /// Get the string code for this violation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnexpectedRoot => "UNEXPECTED_ROOT",
            Self::NamespaceMismatch => "NAMESPACE_MISMATCH",
            Self::MissingElement => "MISSING_ELEMENT",
            Self::UnexpectedElement => "UNEXPECTED_ELEMENT",
            Self::MissingAttribute => "MISSING_ATTRIBUTE",
            Self::InvalidValue => "INVALID_VALUE",
            Self::TooManyElements => "TOO_MANY_ELEMENTS",
            Self::TooFewElements => "TOO_FEW_ELEMENTS",
            Self::MissingSignature => "MISSING_SIGNATURE",
        }
    }
}

/// A schema violation found in a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// Violation code
    pub code: ViolationCode,
    /// Human-readable message
    pub message: String,
    /// Element path (if available)
    pub location: Option<String>,
}

impl Violation {
    /// Create a new violation.
    pub fn new(code: ViolationCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            location: None,
        }
    }

    /// Create a violation with location.
    pub fn with_location(
        code: ViolationCode,
        message: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            location: Some(location.into()),
        }
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.location {
            Some(location) => {
                write!(f, "[{}] {} at {}", self.code.as_str(), self.message, location)
            }
            None => write!(f, "[{}] {}", self.code.as_str(), self.message),
        }
    }
}

fn summarize(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
