//! Schema validation of event documents and operation envelopes.

use crate::batch::DEFAULT_MAX_BATCH_SIZE;
use crate::envelope::{namespace_for, Operation, SchemaVersions, DATE_TIME_FORMAT};
use crate::error::{EsocialError, Result, Violation, ViolationCode};
use crate::identity::{Identity, RegistrationType};
use crate::ids::EventId;
use crate::signature::is_signature;
use crate::xml::XmlElement;
use chrono::NaiveDateTime;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// What a document is supposed to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    /// A signed event document destined for a batch
    Event,
    /// The envelope of a remote operation
    Envelope(Operation),
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Event => f.write_str("event"),
            Self::Envelope(operation) => write!(f, "{operation}"),
        }
    }
}

/// Result of validating one document.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    /// Violations found
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    /// Check if any violations were found.
    pub fn has_violations(&self) -> bool {
        !self.violations.is_empty()
    }

    /// Add a violation.
    pub fn add_violation(&mut self, violation: Violation) {
        self.violations.push(violation);
    }
}

/// Validation capability: checks `document` against the schema of `kind`
/// at `version`.
pub trait SchemaValidator: Send + Sync {
    fn validate(
        &self,
        document: &XmlElement,
        kind: DocumentKind,
        version: &str,
    ) -> ValidationReport;
}

/// Built-in validator enforcing the structure of the eSocial envelopes.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuralValidator;

impl SchemaValidator for StructuralValidator {
    fn validate(
        &self,
        document: &XmlElement,
        kind: DocumentKind,
        version: &str,
    ) -> ValidationReport {
        let mut report = ValidationReport::default();

        if document.local_name() != "eSocial" {
            report.add_violation(Violation::with_location(
                ViolationCode::UnexpectedRoot,
                format!("expected root element eSocial, found {}", document.name()),
                document.name(),
            ));
            return report;
        }

        match kind {
            DocumentKind::Event => validate_event(document, &mut report),
            DocumentKind::Envelope(operation) => {
                let expected = namespace_for(operation, version);
                if document.default_namespace() != Some(expected.as_str()) {
                    report.add_violation(Violation::with_location(
                        ViolationCode::NamespaceMismatch,
                        format!(
                            "expected namespace {expected}, found {}",
                            document.default_namespace().unwrap_or("none")
                        ),
                        "eSocial",
                    ));
                }

                match operation {
                    Operation::SendBatch => validate_send(document, &mut report),
                    Operation::RetrieveBatch => validate_retrieve(document, &mut report),
                    Operation::EmployerEventIds => validate_employer_ids(document, &mut report),
                    Operation::EmployeeEventIds => validate_employee_ids(document, &mut report),
                    Operation::DownloadByIds => validate_download(document, &mut report),
                }

                if operation.requires_signature() {
                    require_signature(document, "eSocial", &mut report);
                }
            }
        }

        report
    }
}

fn validate_event(document: &XmlElement, report: &mut ValidationReport) {
    let Some(event) = document.elements().find(|e| !is_signature(e)) else {
        report.add_violation(Violation::with_location(
            ViolationCode::MissingElement,
            "event document has no event element",
            "eSocial",
        ));
        return;
    };

    let path = format!("eSocial/{}", event.name());
    match event.attr("Id") {
        None => report.add_violation(Violation::with_location(
            ViolationCode::MissingAttribute,
            "event element has no Id attribute",
            path,
        )),
        Some(id) => {
            if let Err(e) = EventId::parse(id) {
                report.add_violation(Violation::with_location(
                    ViolationCode::InvalidValue,
                    e.to_string(),
                    path,
                ));
            }
        }
    }

    require_signature(document, "eSocial", report);
}

fn validate_send(document: &XmlElement, report: &mut ValidationReport) {
    check_children(document, &["envioLoteEventos"], "eSocial", report);
    let Some(batch) = required(document, "envioLoteEventos", "eSocial", report) else {
        return;
    };
    let path = "eSocial/envioLoteEventos";
    check_children(batch, &["ideEmpregador", "ideTransmissor", "eventos"], path, report);

    match batch.attr("grupo") {
        None => report.add_violation(Violation::with_location(
            ViolationCode::MissingAttribute,
            "envioLoteEventos has no grupo attribute",
            path,
        )),
        Some(group) if group.parse::<u32>().map_or(true, |g| g == 0) => {
            report.add_violation(Violation::with_location(
                ViolationCode::InvalidValue,
                format!("grupo must be a positive integer, got {group:?}"),
                path,
            ))
        }
        Some(_) => {}
    }

    if let Some(block) = required(batch, "ideEmpregador", path, report) {
        check_identity(block, &format!("{path}/ideEmpregador"), report);
    }
    if let Some(block) = required(batch, "ideTransmissor", path, report) {
        check_identity(block, &format!("{path}/ideTransmissor"), report);
    }

    let Some(eventos) = required(batch, "eventos", path, report) else {
        return;
    };
    let eventos_path = format!("{path}/eventos");
    check_children(eventos, &["evento"], &eventos_path, report);

    let count = eventos.children_named("evento").count();
    if count > DEFAULT_MAX_BATCH_SIZE {
        report.add_violation(Violation::with_location(
            ViolationCode::TooManyElements,
            format!("a batch holds at most {DEFAULT_MAX_BATCH_SIZE} events, found {count}"),
            eventos_path.as_str(),
        ));
    }

    for (index, evento) in eventos.children_named("evento").enumerate() {
        let evento_path = format!("{eventos_path}/evento[{}]", index + 1);
        match evento.attr("Id") {
            None => report.add_violation(Violation::with_location(
                ViolationCode::MissingAttribute,
                "evento has no Id attribute",
                evento_path.as_str(),
            )),
            Some(id) => {
                if let Err(e) = EventId::parse(id) {
                    report.add_violation(Violation::with_location(
                        ViolationCode::InvalidValue,
                        e.to_string(),
                        evento_path.as_str(),
                    ));
                }
            }
        }

        match evento.elements().count() {
            1 => {}
            0 => report.add_violation(Violation::with_location(
                ViolationCode::TooFewElements,
                "evento does not wrap an event document",
                evento_path,
            )),
            n => report.add_violation(Violation::with_location(
                ViolationCode::TooManyElements,
                format!("evento wraps {n} documents, expected one"),
                evento_path,
            )),
        }
    }
}

fn validate_retrieve(document: &XmlElement, report: &mut ValidationReport) {
    check_children(document, &["consultaLoteEventos"], "eSocial", report);
    let Some(query) = required(document, "consultaLoteEventos", "eSocial", report) else {
        return;
    };
    let path = "eSocial/consultaLoteEventos";
    check_children(query, &["protocoloEnvio"], path, report);
    if let Some(protocol) = required(query, "protocoloEnvio", path, report) {
        if protocol.text().trim().is_empty() {
            report.add_violation(Violation::with_location(
                ViolationCode::InvalidValue,
                "protocoloEnvio is empty",
                format!("{path}/protocoloEnvio"),
            ));
        }
    }
}

fn validate_employer_ids(document: &XmlElement, report: &mut ValidationReport) {
    let Some(query) = event_ids_query(document, "consultaEvtsEmpregador", report) else {
        return;
    };
    let path = "eSocial/consultaIdentificadoresEvts/consultaEvtsEmpregador";
    check_children(query, &["tpEvt", "perApur"], path, report);

    if let Some(event_type) = required(query, "tpEvt", path, report) {
        let value = event_type.text();
        if !is_event_type(value.trim()) {
            report.add_violation(Violation::with_location(
                ViolationCode::InvalidValue,
                format!("tpEvt must look like S-1000, got {value:?}"),
                format!("{path}/tpEvt"),
            ));
        }
    }
    if let Some(period) = required(query, "perApur", path, report) {
        let value = period.text();
        if !is_period(value.trim()) {
            report.add_violation(Violation::with_location(
                ViolationCode::InvalidValue,
                format!("perApur must be YYYY or YYYY-MM, got {value:?}"),
                format!("{path}/perApur"),
            ));
        }
    }
}

fn validate_employee_ids(document: &XmlElement, report: &mut ValidationReport) {
    let Some(query) = event_ids_query(document, "consultaEvtsTrabalhador", report) else {
        return;
    };
    let path = "eSocial/consultaIdentificadoresEvts/consultaEvtsTrabalhador";
    check_children(query, &["cpfTrab", "dtIni", "dtFim"], path, report);

    if let Some(cpf) = required(query, "cpfTrab", path, report) {
        if let Err(e) = Identity::cpf(cpf.text().trim()) {
            report.add_violation(Violation::with_location(
                ViolationCode::InvalidValue,
                e.to_string(),
                format!("{path}/cpfTrab"),
            ));
        }
    }

    let start = required(query, "dtIni", path, report).and_then(|e| date_time(e, path, report));
    let end = required(query, "dtFim", path, report).and_then(|e| date_time(e, path, report));
    if let (Some(start), Some(end)) = (start, end) {
        if start > end {
            report.add_violation(Violation::with_location(
                ViolationCode::InvalidValue,
                format!("dtIni {start} is after dtFim {end}"),
                path,
            ));
        }
    }
}

fn validate_download(document: &XmlElement, report: &mut ValidationReport) {
    check_children(document, &["download"], "eSocial", report);
    let Some(download) = required(document, "download", "eSocial", report) else {
        return;
    };
    let path = "eSocial/download";
    check_children(download, &["ideEmpregador", "solicDownloadEvtsPorId"], path, report);

    if let Some(block) = required(download, "ideEmpregador", path, report) {
        check_identity(block, &format!("{path}/ideEmpregador"), report);
    }

    let Some(request) = required(download, "solicDownloadEvtsPorId", path, report) else {
        return;
    };
    let request_path = format!("{path}/solicDownloadEvtsPorId");
    check_children(request, &["id"], &request_path, report);

    let mut count = 0;
    for (index, id) in request.children_named("id").enumerate() {
        count += 1;
        if let Err(e) = EventId::parse(id.text().trim()) {
            report.add_violation(Violation::with_location(
                ViolationCode::InvalidValue,
                e.to_string(),
                format!("{request_path}/id[{}]", index + 1),
            ));
        }
    }
    if count == 0 {
        report.add_violation(Violation::with_location(
            ViolationCode::TooFewElements,
            "at least one event id is required",
            request_path,
        ));
    }
}

/// Shared prefix of both id queries: `consultaIdentificadoresEvts` with the
/// employer block and one query element named `query`.
fn event_ids_query<'a>(
    document: &'a XmlElement,
    query: &str,
    report: &mut ValidationReport,
) -> Option<&'a XmlElement> {
    check_children(document, &["consultaIdentificadoresEvts"], "eSocial", report);
    let outer = required(document, "consultaIdentificadoresEvts", "eSocial", report)?;
    let path = "eSocial/consultaIdentificadoresEvts";
    check_children(outer, &["ideEmpregador", query], path, report);

    if let Some(block) = required(outer, "ideEmpregador", path, report) {
        check_identity(block, &format!("{path}/ideEmpregador"), report);
    }
    required(outer, query, path, report)
}

fn check_identity(block: &XmlElement, path: &str, report: &mut ValidationReport) {
    check_children(block, &["tpInsc", "nrInsc"], path, report);
    let registration_type = required(block, "tpInsc", path, report);
    let number = required(block, "nrInsc", path, report);
    let (Some(registration_type), Some(number)) = (registration_type, number) else {
        return;
    };

    let code = registration_type.text();
    let kind = match code.trim().parse::<u8>().map(RegistrationType::try_from) {
        Ok(Ok(kind)) => kind,
        _ => {
            report.add_violation(Violation::with_location(
                ViolationCode::InvalidValue,
                format!("tpInsc must be 1 or 2, got {code:?}"),
                format!("{path}/tpInsc"),
            ));
            return;
        }
    };

    if let Err(e) = Identity::new(kind, number.text().trim()) {
        report.add_violation(Violation::with_location(
            ViolationCode::InvalidValue,
            e.to_string(),
            format!("{path}/nrInsc"),
        ));
    }
}

fn require_signature(document: &XmlElement, path: &str, report: &mut ValidationReport) {
    if !document.elements().any(is_signature) {
        report.add_violation(Violation::with_location(
            ViolationCode::MissingSignature,
            "document is not signed",
            path,
        ));
    }
}

fn required<'a>(
    parent: &'a XmlElement,
    name: &str,
    path: &str,
    report: &mut ValidationReport,
) -> Option<&'a XmlElement> {
    let child = parent.child(name);
    if child.is_none() {
        report.add_violation(Violation::with_location(
            ViolationCode::MissingElement,
            format!("missing required element {name}"),
            path,
        ));
    }
    child
}

fn check_children(
    parent: &XmlElement,
    allowed: &[&str],
    path: &str,
    report: &mut ValidationReport,
) {
    for child in parent.elements() {
        if !allowed.contains(&child.local_name()) && !is_signature(child) {
            report.add_violation(Violation::with_location(
                ViolationCode::UnexpectedElement,
                format!("unexpected element {}", child.name()),
                path,
            ));
        }
    }
}

fn date_time(
    element: &XmlElement,
    path: &str,
    report: &mut ValidationReport,
) -> Option<NaiveDateTime> {
    let value = element.text();
    match NaiveDateTime::parse_from_str(value.trim(), DATE_TIME_FORMAT) {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            report.add_violation(Violation::with_location(
                ViolationCode::InvalidValue,
                format!("{} must be YYYY-MM-DDTHH:MM:SS, got {value:?}", element.name()),
                format!("{path}/{}", element.name()),
            ));
            None
        }
    }
}

fn is_event_type(value: &str) -> bool {
    value.len() == 6
        && value.starts_with("S-")
        && value[2..].bytes().all(|b| b.is_ascii_digit())
}

fn is_period(value: &str) -> bool {
    let bytes = value.as_bytes();
    let year_ok = |y: &[u8]| y.len() == 4 && y.iter().all(u8::is_ascii_digit);
    match bytes.len() {
        4 => year_ok(bytes),
        7 => {
            year_ok(&bytes[..4])
                && bytes[4] == b'-'
                && bytes[5..].iter().all(u8::is_ascii_digit)
                && value[5..].parse::<u8>().is_ok_and(|m| (1..=12).contains(&m))
        }
        _ => false,
    }
}

/// Runs the configured validator and turns a failing report into
/// [`EsocialError::SchemaViolation`].
#[derive(Clone)]
pub struct SchemaGate {
    validator: Arc<dyn SchemaValidator>,
    versions: SchemaVersions,
}

impl SchemaGate {
    pub fn new(validator: Arc<dyn SchemaValidator>, versions: SchemaVersions) -> Self {
        Self { validator, versions }
    }

    /// Schema versions handed to the validator.
    pub fn versions(&self) -> &SchemaVersions {
        &self.versions
    }

    /// Validate `document` as `kind`.
    pub fn validate(&self, document: &XmlElement, kind: DocumentKind) -> Result<()> {
        // Events travel inside the send envelope and share its version.
        let version = match kind {
            DocumentKind::Event => self.versions.version(Operation::SendBatch),
            DocumentKind::Envelope(operation) => self.versions.version(operation),
        };

        let report = self.validator.validate(document, kind, version);
        if report.has_violations() {
            warn!(
                schema = %kind,
                version = %version,
                violations = report.violations.len(),
                "Schema validation failed"
            );
            return Err(EsocialError::SchemaViolation {
                schema: kind.to_string(),
                violations: report.violations,
            });
        }

        debug!(schema = %kind, version = %version, "Schema validation passed");
        Ok(())
    }
}

impl Default for SchemaGate {
    fn default() -> Self {
        Self::new(Arc::new(StructuralValidator), SchemaVersions::default())
    }
}

impl fmt::Debug for SchemaGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaGate")
            .field("versions", &self.versions)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::SignedEvent;
    use crate::credential::Credential;
    use crate::envelope::EnvelopeBuilder;
    use crate::error::ErrorKind;
    use crate::signature::SignatureGate;
    use chrono::NaiveDate;

    const CERT: &[u8] = include_bytes!("../tests/fixtures/client-cert.pem");
    const KEY: &[u8] = include_bytes!("../tests/fixtures/client-key.pem");
    const ID: &str = "ID1123456780000002019032114182400001";

    fn employer() -> Identity {
        Identity::cnpj("12345678901234").unwrap()
    }

    fn credential() -> Credential {
        Credential::from_pem(CERT, KEY).unwrap()
    }

    fn signed(document: &XmlElement) -> XmlElement {
        SignatureGate::default().sign(document, Some(&credential())).unwrap()
    }

    fn codes(gate: &SchemaGate, document: &XmlElement, kind: DocumentKind) -> Vec<ViolationCode> {
        match gate.validate(document, kind) {
            Ok(()) => Vec::new(),
            Err(e) => e.violations().iter().map(|v| v.code).collect(),
        }
    }

    fn event() -> XmlElement {
        XmlElement::new("eSocial")
            .with_attr("xmlns", "http://www.esocial.gov.br/schema/evt/evtMonit/v_S_01_02_00")
            .with_child(
                XmlElement::new("evtMonit")
                    .with_attr("Id", ID)
                    .with_child(XmlElement::new("ideEvento")),
            )
    }

    #[test]
    fn test_signed_event_passes() {
        let gate = SchemaGate::default();
        assert!(gate.validate(&signed(&event()), DocumentKind::Event).is_ok());
    }

    #[test]
    fn test_unsigned_event_rejected() {
        let gate = SchemaGate::default();
        assert_eq!(
            codes(&gate, &event(), DocumentKind::Event),
            vec![ViolationCode::MissingSignature]
        );
    }

    #[test]
    fn test_event_without_id_rejected() {
        let gate = SchemaGate::default();
        let document = signed(&XmlElement::new("eSocial").with_child(XmlElement::new("evtMonit")));
        assert_eq!(
            codes(&gate, &document, DocumentKind::Event),
            vec![ViolationCode::MissingAttribute]
        );
    }

    #[test]
    fn test_wrong_root_rejected() {
        let gate = SchemaGate::default();
        let err = gate
            .validate(&XmlElement::new("Envelope"), DocumentKind::Event)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SchemaViolation);
        assert_eq!(err.violations()[0].code, ViolationCode::UnexpectedRoot);
    }

    #[test]
    fn test_send_envelopes_pass() {
        let gate = SchemaGate::default();
        let builder = EnvelopeBuilder::new(gate.versions());
        let kind = DocumentKind::Envelope(Operation::SendBatch);

        let empty = builder.send_batch(1, &employer(), &employer(), &[]);
        assert!(gate.validate(&empty, kind).is_ok());

        let events = vec![SignedEvent::new(EventId::parse(ID).unwrap(), signed(&event()))];
        let full = builder.send_batch(2, &employer(), &employer(), &events);
        assert!(gate.validate(&full, kind).is_ok());
    }

    #[test]
    fn test_send_envelope_group_zero_rejected() {
        let gate = SchemaGate::default();
        let envelope =
            EnvelopeBuilder::new(gate.versions()).send_batch(0, &employer(), &employer(), &[]);
        assert_eq!(
            codes(&gate, &envelope, DocumentKind::Envelope(Operation::SendBatch)),
            vec![ViolationCode::InvalidValue]
        );
    }

    #[test]
    fn test_namespace_must_match_version() {
        let gate = SchemaGate::default();
        let other = SchemaVersions {
            send: "1.0.0".to_string(),
            ..SchemaVersions::default()
        };
        let envelope = EnvelopeBuilder::new(&other).send_batch(1, &employer(), &employer(), &[]);
        assert_eq!(
            codes(&gate, &envelope, DocumentKind::Envelope(Operation::SendBatch)),
            vec![ViolationCode::NamespaceMismatch]
        );
    }

    #[test]
    fn test_retrieve_requires_protocol() {
        let gate = SchemaGate::default();
        let builder = EnvelopeBuilder::new(gate.versions());
        let kind = DocumentKind::Envelope(Operation::RetrieveBatch);
        let good = builder.retrieve_batch("1.2.201903.0000000000000012345");
        assert!(gate.validate(&good, kind).is_ok());
        assert_eq!(
            codes(&gate, &builder.retrieve_batch("  "), kind),
            vec![ViolationCode::InvalidValue]
        );
    }

    #[test]
    fn test_employer_ids_query() {
        let gate = SchemaGate::default();
        let builder = EnvelopeBuilder::new(gate.versions());
        let kind = DocumentKind::Envelope(Operation::EmployerEventIds);

        let good = signed(&builder.employer_event_ids(&employer(), "S-1000", "2019-03"));
        assert!(gate.validate(&good, kind).is_ok());

        let yearly = signed(&builder.employer_event_ids(&employer(), "S-1000", "2019"));
        assert!(gate.validate(&yearly, kind).is_ok());

        let bad = signed(&builder.employer_event_ids(&employer(), "1000", "2019-13"));
        assert_eq!(
            codes(&gate, &bad, kind),
            vec![ViolationCode::InvalidValue, ViolationCode::InvalidValue]
        );

        let unsigned = builder.employer_event_ids(&employer(), "S-1000", "2019-03");
        assert_eq!(codes(&gate, &unsigned, kind), vec![ViolationCode::MissingSignature]);
    }

    #[test]
    fn test_employee_ids_query() {
        let gate = SchemaGate::default();
        let builder = EnvelopeBuilder::new(gate.versions());
        let kind = DocumentKind::Envelope(Operation::EmployeeEventIds);
        let start = NaiveDate::from_ymd_opt(2019, 3, 10).unwrap().and_hms_opt(0, 0, 0).unwrap();
        let end = NaiveDate::from_ymd_opt(2019, 4, 10).unwrap().and_hms_opt(0, 0, 0).unwrap();

        let good = signed(&builder.employee_event_ids(&employer(), "09887219967", start, end));
        assert!(gate.validate(&good, kind).is_ok());

        let reversed = signed(&builder.employee_event_ids(&employer(), "09887219967", end, start));
        assert_eq!(codes(&gate, &reversed, kind), vec![ViolationCode::InvalidValue]);

        let bad_cpf = signed(&builder.employee_event_ids(&employer(), "0988", start, end));
        assert_eq!(codes(&gate, &bad_cpf, kind), vec![ViolationCode::InvalidValue]);
    }

    #[test]
    fn test_download_request() {
        let gate = SchemaGate::default();
        let builder = EnvelopeBuilder::new(gate.versions());
        let kind = DocumentKind::Envelope(Operation::DownloadByIds);

        let good = signed(&builder.download_by_ids(&employer(), [ID]));
        assert!(gate.validate(&good, kind).is_ok());

        let none = signed(&builder.download_by_ids(&employer(), Vec::<String>::new()));
        assert_eq!(codes(&gate, &none, kind), vec![ViolationCode::TooFewElements]);

        let malformed = signed(&builder.download_by_ids(&employer(), ["ID123"]));
        assert_eq!(codes(&gate, &malformed, kind), vec![ViolationCode::InvalidValue]);
    }

    #[test]
    fn test_period_and_event_type_shapes() {
        assert!(is_period("2019"));
        assert!(is_period("2019-12"));
        assert!(!is_period("2019-00"));
        assert!(!is_period("19-01"));
        assert!(is_event_type("S-2220"));
        assert!(!is_event_type("S-22a0"));
        assert!(!is_event_type("X-2220"));
    }

    struct RejectAll;

    impl SchemaValidator for RejectAll {
        fn validate(&self, _: &XmlElement, _: DocumentKind, version: &str) -> ValidationReport {
            let mut report = ValidationReport::default();
            report.add_violation(Violation::new(ViolationCode::InvalidValue, version));
            report
        }
    }

    #[test]
    fn test_gate_passes_version_to_validator() {
        let gate = SchemaGate::new(Arc::new(RejectAll), SchemaVersions::default());
        let err = gate
            .validate(&event(), DocumentKind::Envelope(Operation::SendBatch))
            .unwrap_err();
        assert_eq!(err.violations()[0].message, "1.1.1");
        assert!(err.to_string().starts_with("send document failed schema validation"));
    }
}
