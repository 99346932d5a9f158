//! SOAP 1.1 transport to the eSocial web services over mutual TLS.
//!
//! Each call builds its own HTTP client carrying the credential's client
//! certificate, posts one RPC envelope and maps the reply: SOAP faults to
//! [`EsocialError::RemoteFault`], other non-success statuses to
//! [`EsocialError::HttpStatus`], and otherwise hands back the document found
//! at `Body/<Op>Response/<Op>Result/*`.

use crate::credential::Credential;
use crate::envelope::Operation;
use crate::error::{EsocialError, Result};
use crate::xml::XmlElement;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const SOAP_11_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
pub const SOAP_12_NS: &str = "http://www.w3.org/2003/05/soap-envelope";

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

const SERVICE_BASE: &str = "http://www.esocial.gov.br/servicos/empregador";
const RESTRICTED_HOST: &str = "webservices.producaorestrita.esocial.gov.br";

/// CA chain of the eSocial services embedded at build time from
/// `certs/esocial_chain.pem`. Empty when the crate was built without it.
const BUNDLED_CHAIN: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/esocial_chain.pem"));

/// The embedded eSocial CA chain, if this build carries one.
pub fn bundled_ca_chain() -> Option<&'static [u8]> {
    if BUNDLED_CHAIN.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        Some(BUNDLED_CHAIN)
    }
}

/// eSocial environment to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Target {
    /// Live environment
    #[serde(rename = "production")]
    Production,
    /// Restricted production (test) environment
    #[default]
    #[serde(rename = "restricted", alias = "restricted_production")]
    RestrictedProduction,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Production => f.write_str("production"),
            Self::RestrictedProduction => f.write_str("restricted"),
        }
    }
}

/// Web service hosting one or more operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    Send,
    Retrieve,
    EventIds,
    Download,
}

impl Service {
    pub fn for_operation(operation: Operation) -> Self {
        match operation {
            Operation::SendBatch => Self::Send,
            Operation::RetrieveBatch => Self::Retrieve,
            Operation::EmployerEventIds | Operation::EmployeeEventIds => Self::EventIds,
            Operation::DownloadByIds => Self::Download,
        }
    }

    fn path(self) -> &'static str {
        match self {
            Self::Send => "/servicos/empregador/enviarloteeventos/WsEnviarLoteEventos.svc",
            Self::Retrieve => {
                "/servicos/empregador/consultarloteeventos/WsConsultarLoteEventos.svc"
            }
            Self::EventIds => {
                "/servicos/empregador/dwlcirurgico/WsConsultarIdentificadoresEventos.svc"
            }
            Self::Download => "/servicos/empregador/dwlcirurgico/WsSolicitarDownloadEventos.svc",
        }
    }

    fn production_host(self) -> &'static str {
        match self {
            Self::Send => "webservices.envio.esocial.gov.br",
            Self::Retrieve => "webservices.consulta.esocial.gov.br",
            Self::EventIds | Self::Download => "webservices.download.esocial.gov.br",
        }
    }
}

/// Service URLs used by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub send: String,
    pub retrieve: String,
    pub event_ids: String,
    pub download: String,
}

impl Endpoints {
    /// Published URLs of `target`.
    pub fn for_target(target: Target) -> Self {
        let url = |service: Service| {
            let host = match target {
                Target::Production => service.production_host(),
                Target::RestrictedProduction => RESTRICTED_HOST,
            };
            format!("https://{host}{}", service.path())
        };

        Self {
            send: url(Service::Send),
            retrieve: url(Service::Retrieve),
            event_ids: url(Service::EventIds),
            download: url(Service::Download),
        }
    }

    /// Every service at `base` with its standard path, for gateways and
    /// test servers.
    pub fn at_base(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        let url = |service: Service| format!("{base}{}", service.path());
        Self {
            send: url(Service::Send),
            retrieve: url(Service::Retrieve),
            event_ids: url(Service::EventIds),
            download: url(Service::Download),
        }
    }

    pub fn url(&self, service: Service) -> &str {
        match service {
            Service::Send => &self.send,
            Service::Retrieve => &self.retrieve,
            Service::EventIds => &self.event_ids,
            Service::Download => &self.download,
        }
    }

    pub fn set(&mut self, service: Service, url: impl Into<String>) {
        let slot = match service {
            Service::Send => &mut self.send,
            Service::Retrieve => &mut self.retrieve,
            Service::EventIds => &mut self.event_ids,
            Service::Download => &mut self.download,
        };
        *slot = url.into();
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Self::for_target(Target::default())
    }
}

/// RPC binding of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoapBinding {
    pub namespace: &'static str,
    pub service: &'static str,
    pub method: &'static str,
    pub parameter: &'static str,
}

impl SoapBinding {
    pub fn for_operation(operation: Operation) -> Self {
        match operation {
            Operation::SendBatch => Self {
                namespace: "lote/eventos/envio/v1_1_0",
                service: "ServicoEnviarLoteEventos",
                method: "EnviarLoteEventos",
                parameter: "loteEventos",
            },
            Operation::RetrieveBatch => Self {
                namespace: "lote/eventos/envio/consulta/retornoProcessamento/v1_1_0",
                service: "ServicoConsultarLoteEventos",
                method: "ConsultarLoteEventos",
                parameter: "consulta",
            },
            Operation::EmployerEventIds => Self {
                namespace: "consulta/identificadores-eventos/v1_0_0",
                service: "ServicoConsultarIdentificadoresEventos",
                method: "ConsultarIdentificadoresEventosEmpregador",
                parameter: "consultaEventosEmpregador",
            },
            Operation::EmployeeEventIds => Self {
                namespace: "consulta/identificadores-eventos/v1_0_0",
                service: "ServicoConsultarIdentificadoresEventos",
                method: "ConsultarIdentificadoresEventosTrabalhador",
                parameter: "consultaEventosTrabalhador",
            },
            Operation::DownloadByIds => Self {
                namespace: "download/solicitacao/v1_0_0",
                service: "ServicoSolicitarDownloadEventos",
                method: "SolicitarDownloadEventosPorId",
                parameter: "solicitacao",
            },
        }
    }

    /// Service namespace URI.
    pub fn namespace_uri(&self) -> String {
        format!("{SERVICE_BASE}/{}", self.namespace)
    }

    /// Value of the `SOAPAction` header (unquoted).
    pub fn action(&self) -> String {
        format!("{}/{}/{}", self.namespace_uri(), self.service, self.method)
    }
}

/// SOAP 1.1 request wrapping `document` as the single RPC parameter of
/// `operation`.
pub fn soap_request(operation: Operation, document: &XmlElement) -> XmlElement {
    let binding = SoapBinding::for_operation(operation);
    XmlElement::new("soap:Envelope")
        .with_attr("xmlns:soap", SOAP_11_NS)
        .with_attr("xmlns:v1", binding.namespace_uri())
        .with_child(XmlElement::new("soap:Header"))
        .with_child(
            XmlElement::new("soap:Body").with_child(
                XmlElement::new(format!("v1:{}", binding.method)).with_child(
                    XmlElement::new(format!("v1:{}", binding.parameter))
                        .with_child(document.clone()),
                ),
            ),
        )
}

/// Response document of a remote operation, passed through unmodified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolResult {
    operation: Operation,
    document: XmlElement,
}

impl ProtocolResult {
    pub fn new(operation: Operation, document: XmlElement) -> Self {
        Self { operation, document }
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn document(&self) -> &XmlElement {
        &self.document
    }

    pub fn into_document(self) -> XmlElement {
        self.document
    }

    /// `cdResposta` of the first `status` block, if numeric.
    pub fn response_code(&self) -> Option<u32> {
        self.status_field("cdResposta")?.trim().parse().ok()
    }

    /// `descResposta` of the first `status` block.
    pub fn response_description(&self) -> Option<String> {
        self.status_field("descResposta").map(|s| s.trim().to_string())
    }

    /// `protocoloEnvio` issued for a sent batch.
    pub fn protocol_number(&self) -> Option<String> {
        self.document
            .descendant("protocoloEnvio")
            .map(|e| e.text().trim().to_string())
            .filter(|p| !p.is_empty())
    }

    fn status_field(&self, name: &str) -> Option<String> {
        self.document
            .descendant("status")
            .and_then(|status| status.child(name))
            .or_else(|| self.document.descendant(name))
            .map(XmlElement::text)
    }
}

/// HTTP client for the eSocial services.
#[derive(Clone)]
pub struct TransportClient {
    endpoints: Endpoints,
    timeout: Duration,
    ca_bundle: Option<Vec<u8>>,
    credential: Option<Arc<Credential>>,
}

impl TransportClient {
    /// Client trusting the bundled eSocial CA chain.
    pub fn new(endpoints: Endpoints) -> Self {
        Self {
            endpoints,
            timeout: DEFAULT_TIMEOUT,
            ca_bundle: bundled_ca_chain().map(<[u8]>::to_vec),
            credential: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Trust only the CAs in this PEM bundle instead of the bundled chain.
    pub fn with_ca_bundle(mut self, pem: Vec<u8>) -> Self {
        self.ca_bundle = Some(pem);
        self
    }

    /// Present this credential as the TLS client certificate.
    pub fn with_credential(mut self, credential: Arc<Credential>) -> Self {
        self.credential = Some(credential);
        self
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn has_ca_bundle(&self) -> bool {
        self.ca_bundle.is_some()
    }

    fn http_client(&self) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(self.timeout);

        if let Some(credential) = &self.credential {
            let identity = reqwest::Identity::from_pem(credential.identity_pem()).map_err(|e| {
                EsocialError::Configuration(format!("client certificate rejected: {e}"))
            })?;
            builder = builder.identity(identity);
        }

        if let Some(bundle) = &self.ca_bundle {
            let certificates = reqwest::Certificate::from_pem_bundle(bundle)
                .map_err(|e| EsocialError::Configuration(format!("invalid CA bundle: {e}")))?;
            if certificates.is_empty() {
                return Err(EsocialError::Configuration(
                    "CA bundle holds no certificates".to_string(),
                ));
            }
            builder = builder.tls_built_in_root_certs(false);
            for certificate in certificates {
                builder = builder.add_root_certificate(certificate);
            }
        } else {
            warn!("No CA chain bundled or configured, trusting the built-in web PKI roots");
        }

        builder
            .build()
            .map_err(|e| EsocialError::Configuration(format!("failed to build HTTP client: {e}")))
    }

    /// Post `document` as `operation` and return the response document.
    pub async fn invoke(
        &self,
        operation: Operation,
        document: &XmlElement,
    ) -> Result<ProtocolResult> {
        let endpoint = self.endpoints.url(Service::for_operation(operation));
        let binding = SoapBinding::for_operation(operation);
        let body = soap_request(operation, document).to_document_string();
        let client = self.http_client()?;

        info!(
            operation = %operation,
            endpoint = %endpoint,
            bytes = body.len(),
            "Calling eSocial web service"
        );

        let response = client
            .post(endpoint)
            .header(CONTENT_TYPE, "text/xml; charset=utf-8")
            .header("SOAPAction", format!("\"{}\"", binding.action()))
            .body(body)
            .send()
            .await
            .map_err(|source| EsocialError::Transport {
                endpoint: endpoint.to_string(),
                source,
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|source| EsocialError::Transport {
                endpoint: endpoint.to_string(),
                source,
            })?;

        debug!(
            operation = %operation,
            status = status.as_u16(),
            bytes = text.len(),
            "Response received"
        );

        parse_response(operation, endpoint, status.as_u16(), &text)
    }
}

impl fmt::Debug for TransportClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportClient")
            .field("endpoints", &self.endpoints)
            .field("timeout", &self.timeout)
            .field("ca_bundle", &self.ca_bundle.is_some())
            .field("credential", &self.credential.is_some())
            .finish()
    }
}

/// Map a raw HTTP reply to the operation result.
pub fn parse_response(
    operation: Operation,
    endpoint: &str,
    status: u16,
    body: &str,
) -> Result<ProtocolResult> {
    let success = (200..300).contains(&status);
    let http_status = || EsocialError::HttpStatus {
        endpoint: endpoint.to_string(),
        status,
        body: body.to_string(),
    };
    let invalid = |reason: String| EsocialError::InvalidResponse {
        endpoint: endpoint.to_string(),
        reason,
    };

    let envelope = match XmlElement::parse(body) {
        Ok(envelope) => envelope,
        Err(_) if !success => return Err(http_status()),
        Err(e) => return Err(invalid(format!("body is not XML: {e}"))),
    };

    let soap_body = if is_soap_envelope(&envelope) {
        envelope.child("Body")
    } else {
        None
    };

    if let Some(fault) = soap_body.and_then(|b| b.child("Fault")) {
        let error = fault_error(fault);
        warn!(
            operation = %operation,
            endpoint = %endpoint,
            status,
            error = %error,
            "SOAP fault"
        );
        return Err(error);
    }
    if !success {
        return Err(http_status());
    }

    let soap_body = soap_body.ok_or_else(|| invalid("no SOAP Envelope/Body".to_string()))?;
    let response = soap_body
        .first_element()
        .ok_or_else(|| invalid("empty SOAP Body".to_string()))?;
    let result = response
        .first_element()
        .ok_or_else(|| invalid(format!("{} carries no result", response.name())))?;
    let document = result
        .first_element()
        .ok_or_else(|| invalid(format!("{} carries no document", result.name())))?;

    Ok(ProtocolResult::new(operation, document.clone()))
}

fn is_soap_envelope(element: &XmlElement) -> bool {
    if element.local_name() != "Envelope" {
        return false;
    }
    let namespace = match element.prefix() {
        Some(prefix) => element.attr(&format!("xmlns:{prefix}")),
        None => element.default_namespace(),
    };
    matches!(namespace, Some(SOAP_11_NS) | Some(SOAP_12_NS))
}

/// SOAP 1.1 (`faultcode`/`faultstring`/`detail`) or SOAP 1.2
/// (`Code/Value`/`Reason/Text`/`Detail`) fault.
fn fault_error(fault: &XmlElement) -> EsocialError {
    let text = |element: Option<&XmlElement>| element.map(|e| e.text().trim().to_string());

    let code = text(fault.child("faultcode"))
        .or_else(|| text(fault.find("Code/Value")))
        .unwrap_or_default();
    let message = text(fault.child("faultstring"))
        .or_else(|| text(fault.find("Reason/Text")))
        .unwrap_or_default();
    let detail = fault
        .child("detail")
        .or_else(|| fault.child("Detail"))
        .map(|detail| {
            if detail.elements().next().is_none() {
                detail.text().trim().to_string()
            } else {
                detail.elements().map(XmlElement::to_xml_string).collect()
            }
        })
        .filter(|d| !d.is_empty());

    EsocialError::RemoteFault {
        code,
        message,
        detail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const ENDPOINT: &str =
        "https://localhost/servicos/empregador/consultarloteeventos/WsConsultarLoteEventos.svc";

    const RETRIEVE_RESPONSE: &str = r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Body><ConsultarLoteEventosResponse xmlns="http://www.esocial.gov.br/servicos/empregador/lote/eventos/envio/consulta/retornoProcessamento/v1_1_0"><ConsultarLoteEventosResult><eSocial xmlns="http://www.esocial.gov.br/schema/lote/eventos/envio/retornoProcessamento/v1_3_0"><retornoProcessamentoLoteEventos><status><cdResposta>201</cdResposta><descResposta>Lote processado com sucesso.</descResposta></status><dadosRecepcaoLote><protocoloEnvio>1.2.201903.0000000000000012345</protocoloEnvio></dadosRecepcaoLote></retornoProcessamentoLoteEventos></eSocial></ConsultarLoteEventosResult></ConsultarLoteEventosResponse></s:Body></s:Envelope>"#;

    const FAULT_11: &str = r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Body><s:Fault><faultcode>s:Client</faultcode><faultstring xml:lang="pt-BR">Certificado nao autorizado</faultstring><detail><erro>403.16</erro></detail></s:Fault></s:Body></s:Envelope>"#;

    const FAULT_12: &str = r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope"><s:Body><s:Fault><s:Code><s:Value>s:Receiver</s:Value></s:Code><s:Reason><s:Text xml:lang="en">Internal error</s:Text></s:Reason></s:Fault></s:Body></s:Envelope>"#;

    #[test]
    fn test_endpoints_per_target() {
        let production = Endpoints::for_target(Target::Production);
        assert_eq!(
            production.send,
            "https://webservices.envio.esocial.gov.br/servicos/empregador/enviarloteeventos/WsEnviarLoteEventos.svc"
        );
        assert_eq!(
            production.retrieve,
            "https://webservices.consulta.esocial.gov.br/servicos/empregador/consultarloteeventos/WsConsultarLoteEventos.svc"
        );

        let restricted = Endpoints::for_target(Target::RestrictedProduction);
        assert_eq!(
            restricted.download,
            "https://webservices.producaorestrita.esocial.gov.br/servicos/empregador/dwlcirurgico/WsSolicitarDownloadEventos.svc"
        );
        assert_eq!(Endpoints::default(), restricted);
    }

    #[test]
    fn test_endpoint_override() {
        let mut endpoints = Endpoints::at_base("http://127.0.0.1:8080/");
        assert_eq!(
            endpoints.url(Service::EventIds),
            "http://127.0.0.1:8080/servicos/empregador/dwlcirurgico/WsConsultarIdentificadoresEventos.svc"
        );
        endpoints.set(Service::Send, "http://gateway/send");
        assert_eq!(
            endpoints.url(Service::for_operation(Operation::SendBatch)),
            "http://gateway/send"
        );
    }

    #[test]
    fn test_soap_action() {
        assert_eq!(
            SoapBinding::for_operation(Operation::SendBatch).action(),
            "http://www.esocial.gov.br/servicos/empregador/lote/eventos/envio/v1_1_0/ServicoEnviarLoteEventos/EnviarLoteEventos"
        );
        assert_eq!(
            SoapBinding::for_operation(Operation::EmployeeEventIds).action(),
            "http://www.esocial.gov.br/servicos/empregador/consulta/identificadores-eventos/v1_0_0/ServicoConsultarIdentificadoresEventos/ConsultarIdentificadoresEventosTrabalhador"
        );
    }

    #[test]
    fn test_soap_request_wraps_document() {
        let document = XmlElement::new("eSocial").with_attr("xmlns", "urn:test");
        let request = soap_request(Operation::RetrieveBatch, &document);
        assert_eq!(request.attr("xmlns:soap"), Some(SOAP_11_NS));
        let wrapped = request
            .find("Body/ConsultarLoteEventos/consulta")
            .and_then(XmlElement::first_element);
        assert_eq!(wrapped, Some(&document));
    }

    #[test]
    fn test_parse_success_response() {
        let result =
            parse_response(Operation::RetrieveBatch, ENDPOINT, 200, RETRIEVE_RESPONSE).unwrap();
        assert_eq!(result.document().local_name(), "eSocial");
        assert_eq!(result.response_code(), Some(201));
        assert_eq!(
            result.response_description().as_deref(),
            Some("Lote processado com sucesso.")
        );
        assert_eq!(
            result.protocol_number().as_deref(),
            Some("1.2.201903.0000000000000012345")
        );
    }

    #[test]
    fn test_parse_soap11_fault() {
        let err = parse_response(Operation::RetrieveBatch, ENDPOINT, 500, FAULT_11).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RemoteFault);
        match err {
            EsocialError::RemoteFault {
                code,
                message,
                detail,
            } => {
                assert_eq!(code, "s:Client");
                assert_eq!(message, "Certificado nao autorizado");
                assert_eq!(detail.as_deref(), Some("<erro>403.16</erro>"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_parse_soap12_fault() {
        let err = parse_response(Operation::SendBatch, ENDPOINT, 500, FAULT_12).unwrap_err();
        assert_eq!(err.to_string(), "remote fault [s:Receiver]: Internal error");
    }

    #[test]
    fn test_http_error_without_fault() {
        let err =
            parse_response(Operation::SendBatch, ENDPOINT, 503, "Service Unavailable").unwrap_err();
        assert!(matches!(err, EsocialError::HttpStatus { status: 503, .. }));
        assert_eq!(err.kind(), ErrorKind::TransportFailure);
    }

    #[test]
    fn test_unusable_response() {
        let empty = r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Body/></s:Envelope>"#;
        let err = parse_response(Operation::SendBatch, ENDPOINT, 200, empty).unwrap_err();
        assert!(matches!(err, EsocialError::InvalidResponse { .. }));

        let err = parse_response(Operation::SendBatch, ENDPOINT, 200, "not xml").unwrap_err();
        assert!(matches!(err, EsocialError::InvalidResponse { .. }));
    }

    const CA_CERT: &[u8] = include_bytes!("../tests/fixtures/client-cert.pem");

    #[test]
    fn test_default_trusts_bundled_chain() {
        let transport = TransportClient::new(Endpoints::default());
        assert_eq!(transport.has_ca_bundle(), bundled_ca_chain().is_some());
        assert!(transport.http_client().is_ok());
    }

    #[test]
    fn test_custom_ca_bundle() {
        let transport =
            TransportClient::new(Endpoints::default()).with_ca_bundle(CA_CERT.to_vec());
        assert!(transport.has_ca_bundle());
        assert!(transport.http_client().is_ok());
    }

    #[test]
    fn test_garbage_ca_bundle() {
        let garbage = b"not a certificate".to_vec();
        let transport = TransportClient::new(Endpoints::default()).with_ca_bundle(garbage);
        let err = transport.http_client().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let broken = b"-----BEGIN CERTIFICATE-----\n@@@@\n-----END CERTIFICATE-----\n";
        let transport = TransportClient::new(Endpoints::default()).with_ca_bundle(broken.to_vec());
        let err = transport.http_client().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_empty_ca_bundle() {
        let transport = TransportClient::new(Endpoints::default()).with_ca_bundle(Vec::new());
        let err = transport.http_client().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("no certificates"));
    }

    #[test]
    fn test_client_certificate_identity() {
        let credential = Credential::from_pem(
            CA_CERT,
            include_bytes!("../tests/fixtures/client-key.pem"),
        )
        .unwrap();
        let transport = TransportClient::new(Endpoints::default())
            .with_ca_bundle(CA_CERT.to_vec())
            .with_credential(Arc::new(credential));
        assert!(transport.http_client().is_ok());
    }

    #[test]
    fn test_target_serde_names() {
        let target: Target = serde_yaml::from_str("production").unwrap();
        assert_eq!(target, Target::Production);
        let target: Target = serde_yaml::from_str("restricted").unwrap();
        assert_eq!(target, Target::RestrictedProduction);
        assert_eq!(Target::default(), Target::RestrictedProduction);
    }
}
