//! Signing credential: an RSA private key and its certificate chain.
//!
//! Loaded once from PEM material and never mutated afterwards. Share it by
//! `Arc`. Key bytes are zeroized on drop and never appear in `Debug` output.

use ring::rand::SystemRandom;
use ring::signature::{self, RsaKeyPair, UnparsedPublicKey};
use rustls_pki_types::PrivateKeyDer;
use std::fmt;
use std::path::Path;
use thiserror::Error;
use zeroize::Zeroizing;

/// Errors raised while loading or using a credential.
#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("malformed PEM input: {0}")]
    Pem(String),

    #[error("no certificate found in PEM input")]
    NoCertificate,

    #[error("no private key found in PEM input")]
    NoPrivateKey,

    #[error("unsupported private key: {0}")]
    UnsupportedKey(String),

    #[error("RSA signing failed")]
    Signing,
}

/// Holder's private key and certificate chain (leaf first).
pub struct Credential {
    key_pair: RsaKeyPair,
    certificates: Vec<Vec<u8>>,
    identity_pem: Zeroizing<Vec<u8>>,
}

impl Credential {
    /// Load from a PEM certificate chain and a PEM private key (PKCS#8 or
    /// PKCS#1 RSA).
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self, CredentialError> {
        let certificates = rustls_pemfile::certs(&mut &cert_pem[..])
            .map(|cert| cert.map(|der| der.as_ref().to_vec()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| CredentialError::Pem(e.to_string()))?;
        if certificates.is_empty() {
            return Err(CredentialError::NoCertificate);
        }

        let key = rustls_pemfile::private_key(&mut &key_pem[..])
            .map_err(|e| CredentialError::Pem(e.to_string()))?
            .ok_or(CredentialError::NoPrivateKey)?;
        let key_pair = match &key {
            PrivateKeyDer::Pkcs8(der) => RsaKeyPair::from_pkcs8(der.secret_pkcs8_der()),
            PrivateKeyDer::Pkcs1(der) => RsaKeyPair::from_der(der.secret_pkcs1_der()),
            _ => {
                return Err(CredentialError::UnsupportedKey(
                    "only RSA keys (PKCS#8 or PKCS#1) can sign eSocial documents".into(),
                ))
            }
        }
        .map_err(|e| CredentialError::UnsupportedKey(e.to_string()))?;

        let mut identity_pem =
            Zeroizing::new(Vec::with_capacity(cert_pem.len() + key_pem.len() + 1));
        identity_pem.extend_from_slice(cert_pem);
        identity_pem.push(b'\n');
        identity_pem.extend_from_slice(key_pem);

        Ok(Self {
            key_pair,
            certificates,
            identity_pem,
        })
    }

    /// Load from PEM files on disk.
    pub fn from_pem_files(
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
    ) -> Result<Self, CredentialError> {
        let cert_pem = read(cert_path.as_ref())?;
        let key_pem = read(key_path.as_ref())?;
        Self::from_pem(&cert_pem, &key_pem)
    }

    /// Leaf certificate, DER-encoded.
    pub fn certificate_der(&self) -> &[u8] {
        &self.certificates[0]
    }

    /// Full chain, DER-encoded, leaf first.
    pub fn certificate_chain(&self) -> &[Vec<u8>] {
        &self.certificates
    }

    /// RSA modulus length in bits.
    pub fn key_bits(&self) -> usize {
        self.key_pair.public().modulus_len() * 8
    }

    /// RSASSA-PKCS1-v1_5 SHA-256 signature over `message`.
    pub fn sign_rsa_sha256(&self, message: &[u8]) -> Result<Vec<u8>, CredentialError> {
        let mut signature = vec![0u8; self.key_pair.public().modulus_len()];
        self.key_pair
            .sign(
                &signature::RSA_PKCS1_SHA256,
                &SystemRandom::new(),
                message,
                &mut signature,
            )
            .map_err(|_| CredentialError::Signing)?;
        Ok(signature)
    }

    /// Check an RSASSA-PKCS1-v1_5 SHA-256 signature against this credential's
    /// public key.
    pub fn verify_rsa_sha256(&self, message: &[u8], signature_value: &[u8]) -> bool {
        UnparsedPublicKey::new(
            &signature::RSA_PKCS1_2048_8192_SHA256,
            self.key_pair.public().as_ref(),
        )
        .verify(message, signature_value)
        .is_ok()
    }

    /// Certificate chain followed by the private key, for the TLS client identity.
    pub(crate) fn identity_pem(&self) -> &[u8] {
        &self.identity_pem
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("certificates", &self.certificates.len())
            .field("key_bits", &self.key_bits())
            .field("private_key", &"<redacted>")
            .finish()
    }
}

fn read(path: &Path) -> Result<Zeroizing<Vec<u8>>, CredentialError> {
    std::fs::read(path)
        .map(Zeroizing::new)
        .map_err(|source| CredentialError::Read {
            path: path.display().to_string(),
            source,
        })
}
