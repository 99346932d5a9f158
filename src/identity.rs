//! Employer and transmitter identities.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Length of a CNPJ root (the registration number prefix shared by every
/// establishment of a company).
pub const CNPJ_ROOT_LEN: usize = 8;

/// Errors raised when building an [`Identity`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("unknown registration type {0}, expected 1 (CNPJ) or 2 (CPF)")]
    UnknownType(u8),

    #[error("registration number must contain only digits, got {0:?}")]
    NotNumeric(String),

    #[error("{kind} registration number must have {expected} digits, got {actual}")]
    BadLength {
        kind: RegistrationType,
        expected: &'static str,
        actual: usize,
    },
}

/// Registration type (`tpInsc`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum RegistrationType {
    /// Legal entity registry (CNPJ), code 1
    Cnpj,
    /// Individual taxpayer registry (CPF), code 2
    Cpf,
}

impl RegistrationType {
    /// Numeric `tpInsc` code.
    pub fn code(self) -> u8 {
        match self {
            Self::Cnpj => 1,
            Self::Cpf => 2,
        }
    }
}

impl TryFrom<u8> for RegistrationType {
    type Error = IdentityError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(Self::Cnpj),
            2 => Ok(Self::Cpf),
            other => Err(IdentityError::UnknownType(other)),
        }
    }
}

impl From<RegistrationType> for u8 {
    fn from(kind: RegistrationType) -> Self {
        kind.code()
    }
}

impl fmt::Display for RegistrationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cnpj => f.write_str("CNPJ"),
            Self::Cpf => f.write_str("CPF"),
        }
    }
}

/// Identity of an employer or of the transmitter sending on its behalf.
///
/// Validated at construction: the number is all digits, with 8 or 14 digits
/// for a CNPJ and 11 for a CPF.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "IdentityFields", into = "IdentityFields")]
pub struct Identity {
    registration_type: RegistrationType,
    registration_number: String,
    use_full_number: bool,
}

impl Identity {
    /// Build a validated identity.
    pub fn new(
        registration_type: RegistrationType,
        registration_number: impl Into<String>,
    ) -> Result<Self, IdentityError> {
        let registration_number = registration_number.into();
        if registration_number.is_empty()
            || !registration_number.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(IdentityError::NotNumeric(registration_number));
        }

        let len = registration_number.len();
        let ok = match registration_type {
            RegistrationType::Cnpj => len == CNPJ_ROOT_LEN || len == 14,
            RegistrationType::Cpf => len == 11,
        };
        if !ok {
            return Err(IdentityError::BadLength {
                kind: registration_type,
                expected: match registration_type {
                    RegistrationType::Cnpj => "8 or 14",
                    RegistrationType::Cpf => "11",
                },
                actual: len,
            });
        }

        Ok(Self {
            registration_type,
            registration_number,
            use_full_number: false,
        })
    }

    /// CNPJ identity.
    pub fn cnpj(number: impl Into<String>) -> Result<Self, IdentityError> {
        Self::new(RegistrationType::Cnpj, number)
    }

    /// CPF identity.
    pub fn cpf(number: impl Into<String>) -> Result<Self, IdentityError> {
        Self::new(RegistrationType::Cpf, number)
    }

    /// Keep the full CNPJ instead of its 8-digit root.
    pub fn with_full_number(mut self, use_full_number: bool) -> Self {
        self.use_full_number = use_full_number;
        self
    }

    pub fn registration_type(&self) -> RegistrationType {
        self.registration_type
    }

    /// Registration number as configured.
    pub fn registration_number(&self) -> &str {
        &self.registration_number
    }

    pub fn uses_full_number(&self) -> bool {
        self.use_full_number
    }

    /// Number used on the wire for the employer: the CNPJ root unless the
    /// full number was requested; CPFs are never truncated.
    pub fn effective_number(&self) -> &str {
        if self.use_full_number || self.registration_type == RegistrationType::Cpf {
            return &self.registration_number;
        }
        let end = self.registration_number.len().min(CNPJ_ROOT_LEN);
        &self.registration_number[..end]
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.registration_type, self.registration_number)
    }
}

/// Serialized form of an [`Identity`], mirroring the `tpInsc`/`nrInsc` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityFields {
    #[serde(rename = "tpInsc")]
    registration_type: RegistrationType,
    #[serde(rename = "nrInsc")]
    registration_number: String,
    #[serde(default, rename = "use_full")]
    use_full_number: bool,
}

impl TryFrom<IdentityFields> for Identity {
    type Error = IdentityError;

    fn try_from(fields: IdentityFields) -> Result<Self, Self::Error> {
        Ok(Identity::new(fields.registration_type, fields.registration_number)?
            .with_full_number(fields.use_full_number))
    }
}

impl From<Identity> for IdentityFields {
    fn from(identity: Identity) -> Self {
        Self {
            registration_type: identity.registration_type,
            registration_number: identity.registration_number,
            use_full_number: identity.use_full_number,
        }
    }
}
