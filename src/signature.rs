//! XML-DSig signing and the gate every signed document passes through.
//!
//! The bundled [`EnvelopedSigner`] produces the signature shape the service
//! expects: an enveloped `Signature` appended to the document root,
//! referencing the whole document (`URI=""`), inclusive C14N 1.0, SHA-256
//! digest, RSA-SHA256 signature value and the signer's certificate in
//! `KeyInfo`.

use crate::credential::{Credential, CredentialError};
use crate::error::{EsocialError, Result};
use crate::xml::{NamespaceScope, XmlElement};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

pub const DSIG_NS: &str = "http://www.w3.org/2000/09/xmldsig#";
pub const C14N_ALGORITHM: &str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315";
pub const ENVELOPED_SIGNATURE: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";
pub const RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
pub const SHA256_DIGEST: &str = "http://www.w3.org/2001/04/xmlenc#sha256";

/// Errors reported by a signer.
#[derive(Error, Debug)]
pub enum SignatureError {
    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error("{0}")]
    Rejected(String),
}

/// Signing capability: returns a copy of `document` carrying a signature
/// made with `credential`.
pub trait XmlSigner: Send + Sync {
    fn sign(
        &self,
        document: &XmlElement,
        credential: &Credential,
    ) -> std::result::Result<XmlElement, SignatureError>;
}

/// Enveloped XML-DSig signer (C14N 1.0, SHA-256, RSA-SHA256).
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvelopedSigner;

impl XmlSigner for EnvelopedSigner {
    fn sign(
        &self,
        document: &XmlElement,
        credential: &Credential,
    ) -> std::result::Result<XmlElement, SignatureError> {
        let mut signed = document.clone();
        signed.remove_elements(is_signature);

        let digest = STANDARD.encode(Sha256::digest(signed.canonicalize().as_bytes()));
        let signed_info = signed_info(&digest);

        let document_scope = signed.scope_over(&NamespaceScope::new());
        let signature_scope = signature_shell().scope_over(&document_scope);
        let value = credential
            .sign_rsa_sha256(signed_info.canonicalize_in_scope(&signature_scope).as_bytes())?;

        let signature = signature_shell()
            .with_child(signed_info)
            .with_child(XmlElement::new("SignatureValue").with_text(STANDARD.encode(value)))
            .with_child(
                XmlElement::new("KeyInfo").with_child(
                    XmlElement::new("X509Data").with_child(
                        XmlElement::new("X509Certificate")
                            .with_text(STANDARD.encode(credential.certificate_der())),
                    ),
                ),
            );
        signed.push(signature);
        Ok(signed)
    }
}

fn signature_shell() -> XmlElement {
    XmlElement::new("Signature").with_attr("xmlns", DSIG_NS)
}

fn method(name: &str, algorithm: &str) -> XmlElement {
    XmlElement::new(name).with_attr("Algorithm", algorithm)
}

fn signed_info(digest: &str) -> XmlElement {
    XmlElement::new("SignedInfo")
        .with_child(method("CanonicalizationMethod", C14N_ALGORITHM))
        .with_child(method("SignatureMethod", RSA_SHA256))
        .with_child(
            XmlElement::new("Reference")
                .with_attr("URI", "")
                .with_child(
                    XmlElement::new("Transforms")
                        .with_child(method("Transform", ENVELOPED_SIGNATURE))
                        .with_child(method("Transform", C14N_ALGORITHM)),
                )
                .with_child(method("DigestMethod", SHA256_DIGEST))
                .with_child(XmlElement::new("DigestValue").with_text(digest)),
        )
}

/// Whether `element` is an XML-DSig `Signature` block.
pub fn is_signature(element: &XmlElement) -> bool {
    element.local_name() == "Signature"
        && element
            .namespace_declarations()
            .any(|(_, uri)| uri == DSIG_NS)
}

/// Check the signature block on the root of `document`.
///
/// The structure is always checked. The digest and the signature value are
/// recomputed when the block uses algorithms this crate implements.
pub fn verify(document: &XmlElement, credential: &Credential) -> std::result::Result<(), String> {
    let signatures: Vec<&XmlElement> = document.elements().filter(|e| is_signature(e)).collect();
    let signature = match signatures.as_slice() {
        [one] => *one,
        other => {
            return Err(format!(
                "expected exactly one Signature block on <{}>, found {}",
                document.name(),
                other.len()
            ))
        }
    };

    let signed_info = signature
        .child("SignedInfo")
        .ok_or("Signature has no SignedInfo")?;
    let reference = signed_info
        .child("Reference")
        .ok_or("SignedInfo has no Reference")?;
    let digest_value = reference
        .child("DigestValue")
        .map(|e| strip_whitespace(&e.text()))
        .filter(|v| !v.is_empty())
        .ok_or("Reference has no DigestValue")?;
    let signature_value = signature
        .child("SignatureValue")
        .map(|e| strip_whitespace(&e.text()))
        .filter(|v| !v.is_empty())
        .ok_or("Signature has no SignatureValue")?;
    signature
        .find("KeyInfo/X509Data/X509Certificate")
        .filter(|e| !e.text().trim().is_empty())
        .ok_or("Signature has no X509Certificate")?;

    fn algorithm(element: Option<&XmlElement>) -> Option<&str> {
        element.and_then(|e| e.attr("Algorithm"))
    }
    let canonicalization = algorithm(signed_info.child("CanonicalizationMethod"));
    let transforms_known = reference
        .child("Transforms")
        .map(|t| {
            t.children_named("Transform").all(|tr| {
                matches!(tr.attr("Algorithm"), Some(ENVELOPED_SIGNATURE) | Some(C14N_ALGORITHM))
            })
        })
        .unwrap_or(true);

    if reference.attr("URI") == Some("")
        && algorithm(reference.child("DigestMethod")) == Some(SHA256_DIGEST)
        && transforms_known
    {
        let mut unsigned = document.clone();
        unsigned.remove_elements(is_signature);
        let expected = STANDARD.encode(Sha256::digest(unsigned.canonicalize().as_bytes()));
        if expected != digest_value {
            return Err("digest does not match the signed content".to_string());
        }
    }

    if canonicalization == Some(C14N_ALGORITHM)
        && algorithm(signed_info.child("SignatureMethod")) == Some(RSA_SHA256)
    {
        let scope = signature.scope_over(&document.scope_over(&NamespaceScope::new()));
        let canonical = signed_info.canonicalize_in_scope(&scope);
        let value = STANDARD
            .decode(signature_value.as_bytes())
            .map_err(|e| format!("SignatureValue is not base64: {e}"))?;
        if !credential.verify_rsa_sha256(canonical.as_bytes(), &value) {
            return Err("SignatureValue does not verify against the credential".to_string());
        }
    }

    Ok(())
}

fn strip_whitespace(value: &str) -> String {
    value.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Signs documents and refuses to hand back anything without a verifiable
/// signature block.
#[derive(Clone)]
pub struct SignatureGate {
    signer: Arc<dyn XmlSigner>,
}

impl SignatureGate {
    pub fn new(signer: Arc<dyn XmlSigner>) -> Self {
        Self { signer }
    }

    /// Sign `document` with `credential` and verify the result.
    pub fn sign(
        &self,
        document: &XmlElement,
        credential: Option<&Credential>,
    ) -> Result<XmlElement> {
        let credential = credential.ok_or_else(|| {
            EsocialError::SignatureFailure("no credential available for signing".to_string())
        })?;

        let signed = self
            .signer
            .sign(document, credential)
            .map_err(|e| EsocialError::SignatureFailure(e.to_string()))?;
        verify(&signed, credential).map_err(EsocialError::SignatureFailure)?;

        debug!(root = %signed.name(), "Document signed");
        Ok(signed)
    }
}

impl Default for SignatureGate {
    fn default() -> Self {
        Self::new(Arc::new(EnvelopedSigner))
    }
}

impl std::fmt::Debug for SignatureGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureGate").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const CERT: &[u8] = include_bytes!("../tests/fixtures/client-cert.pem");
    const KEY: &[u8] = include_bytes!("../tests/fixtures/client-key.pem");

    const EVENT: &str = r#"<eSocial xmlns="http://www.esocial.gov.br/schema/evt/evtMonit/v_S_01_02_00" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"><evtMonit Id="ID1123456780000002019032114182400001"><ideEvento><tpAmb>2</tpAmb></ideEvento></evtMonit></eSocial>"#;

    fn credential() -> Credential {
        Credential::from_pem(CERT, KEY).unwrap()
    }

    #[test]
    fn test_sign_appends_signature_block() {
        let document = XmlElement::parse(EVENT).unwrap();
        let signed = EnvelopedSigner.sign(&document, &credential()).unwrap();

        let last = signed.elements().last().unwrap();
        assert!(is_signature(last));
        assert_eq!(
            last.find("SignedInfo/Reference").unwrap().attr("URI"),
            Some("")
        );
        assert!(verify(&signed, &credential()).is_ok());
    }

    #[test]
    fn test_signature_survives_serialization() {
        let document = XmlElement::parse(EVENT).unwrap();
        let signed = EnvelopedSigner.sign(&document, &credential()).unwrap();
        let reparsed = XmlElement::parse(&signed.to_document_string()).unwrap();
        assert!(verify(&reparsed, &credential()).is_ok());
    }

    #[test]
    fn test_resign_replaces_existing_signature() {
        let document = XmlElement::parse(EVENT).unwrap();
        let signed = EnvelopedSigner.sign(&document, &credential()).unwrap();
        let resigned = EnvelopedSigner.sign(&signed, &credential()).unwrap();
        assert_eq!(resigned.elements().filter(|e| is_signature(e)).count(), 1);
        assert!(verify(&resigned, &credential()).is_ok());
    }

    #[test]
    fn test_tampered_content_fails_verification() {
        let document = XmlElement::parse(EVENT).unwrap();
        let signed = EnvelopedSigner.sign(&document, &credential()).unwrap();
        let tampered = signed.to_xml_string().replace("<tpAmb>2</tpAmb>", "<tpAmb>1</tpAmb>");
        let tampered = XmlElement::parse(&tampered).unwrap();

        let err = verify(&tampered, &credential()).unwrap_err();
        assert!(err.contains("digest"));
    }

    #[test]
    fn test_forged_signature_value_fails_verification() {
        let document = XmlElement::parse(EVENT).unwrap();
        let signed = EnvelopedSigner.sign(&document, &credential()).unwrap();
        let value = signed.find("Signature/SignatureValue").unwrap().text();
        let forged = signed
            .to_xml_string()
            .replace(value.trim(), &STANDARD.encode([7u8; 256]));
        let forged = XmlElement::parse(&forged).unwrap();

        let err = verify(&forged, &credential()).unwrap_err();
        assert!(err.contains("does not verify"));
    }

    #[test]
    fn test_unsigned_document_fails_verification() {
        let document = XmlElement::parse(EVENT).unwrap();
        let err = verify(&document, &credential()).unwrap_err();
        assert!(err.contains("found 0"));
    }

    #[test]
    fn test_gate_requires_credential() {
        let gate = SignatureGate::default();
        let document = XmlElement::parse(EVENT).unwrap();
        let err = gate.sign(&document, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SignatureFailure);
    }

    struct NoopSigner;

    impl XmlSigner for NoopSigner {
        fn sign(
            &self,
            document: &XmlElement,
            _credential: &Credential,
        ) -> std::result::Result<XmlElement, SignatureError> {
            Ok(document.clone())
        }
    }

    struct FailingSigner;

    impl XmlSigner for FailingSigner {
        fn sign(
            &self,
            _document: &XmlElement,
            _credential: &Credential,
        ) -> std::result::Result<XmlElement, SignatureError> {
            Err(SignatureError::Rejected("token not present".into()))
        }
    }

    #[test]
    fn test_gate_rejects_signer_without_signature_block() {
        let gate = SignatureGate::new(Arc::new(NoopSigner));
        let document = XmlElement::parse(EVENT).unwrap();
        let err = gate.sign(&document, Some(&credential())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SignatureFailure);
    }

    #[test]
    fn test_gate_reports_signer_error() {
        let gate = SignatureGate::new(Arc::new(FailingSigner));
        let document = XmlElement::parse(EVENT).unwrap();
        let err = gate.sign(&document, Some(&credential())).unwrap_err();
        assert!(err.to_string().contains("token not present"));
    }
}
