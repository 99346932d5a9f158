//! Envelope construction for the five web-service operations.
//!
//! Every envelope is an `eSocial` document whose default namespace embeds
//! the schema version registered for its operation, with dots replaced by
//! underscores (`1.1.1` becomes `v1_1_1`).

use crate::batch::SignedEvent;
use crate::identity::Identity;
use crate::xml::XmlElement;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Base URI shared by every envelope namespace.
pub const SCHEMA_BASE: &str = "http://www.esocial.gov.br/schema";

/// Format of `dtIni`/`dtFim` in employee queries.
pub const DATE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Remote operations supported by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Send a batch of events
    SendBatch,
    /// Retrieve the processing result of a batch
    RetrieveBatch,
    /// Query event ids of employer-level events
    EmployerEventIds,
    /// Query event ids of one employee
    EmployeeEventIds,
    /// Request the download of events by id
    DownloadByIds,
}

impl Operation {
    pub const ALL: [Operation; 5] = [
        Operation::SendBatch,
        Operation::RetrieveBatch,
        Operation::EmployerEventIds,
        Operation::EmployeeEventIds,
        Operation::DownloadByIds,
    ];

    /// Key of the operation in the schema version table.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SendBatch => "send",
            Self::RetrieveBatch => "retrieve",
            Self::EmployerEventIds => "view_employer_events_ids",
            Self::EmployeeEventIds => "view_employee_events_ids",
            Self::DownloadByIds => "download_events_by_ids",
        }
    }

    /// Namespace path below [`SCHEMA_BASE`].
    pub fn schema_path(&self) -> &'static str {
        match self {
            Self::SendBatch => "lote/eventos/envio",
            Self::RetrieveBatch => "lote/eventos/envio/consulta/retornoProcessamento",
            Self::EmployerEventIds => "consulta/identificadores-eventos/empregador",
            Self::EmployeeEventIds => "consulta/identificadores-eventos/trabalhador",
            Self::DownloadByIds => "download/solicitacao/id",
        }
    }

    /// Whether the envelope itself must be signed before transmission.
    pub fn requires_signature(&self) -> bool {
        matches!(
            self,
            Self::EmployerEventIds | Self::EmployeeEventIds | Self::DownloadByIds
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Schema version registered for each operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaVersions {
    pub send: String,
    pub retrieve: String,
    pub view_employer_events_ids: String,
    pub view_employee_events_ids: String,
    pub download_events_by_ids: String,
}

impl Default for SchemaVersions {
    fn default() -> Self {
        Self {
            send: "1.1.1".to_string(),
            retrieve: "1.0.0".to_string(),
            view_employer_events_ids: "1.0.0".to_string(),
            view_employee_events_ids: "1.0.0".to_string(),
            download_events_by_ids: "1.0.0".to_string(),
        }
    }
}

impl SchemaVersions {
    /// Dotted version for `operation`.
    pub fn version(&self, operation: Operation) -> &str {
        match operation {
            Operation::SendBatch => &self.send,
            Operation::RetrieveBatch => &self.retrieve,
            Operation::EmployerEventIds => &self.view_employer_events_ids,
            Operation::EmployeeEventIds => &self.view_employee_events_ids,
            Operation::DownloadByIds => &self.download_events_by_ids,
        }
    }

    /// Default namespace of the envelope for `operation`.
    pub fn namespace(&self, operation: Operation) -> String {
        namespace_for(operation, self.version(operation))
    }
}

/// Envelope namespace of `operation` at a dotted schema `version`.
pub fn namespace_for(operation: Operation, version: &str) -> String {
    format!(
        "{SCHEMA_BASE}/{}/v{}",
        operation.schema_path(),
        version.replace('.', "_")
    )
}

/// Builds the envelope of each operation from typed inputs.
#[derive(Debug, Clone)]
pub struct EnvelopeBuilder<'a> {
    versions: &'a SchemaVersions,
}

impl<'a> EnvelopeBuilder<'a> {
    pub fn new(versions: &'a SchemaVersions) -> Self {
        Self { versions }
    }

    /// `eSocial/envioLoteEventos`: employer, transmitter and one `evento`
    /// per signed event, in batch order.
    pub fn send_batch(
        &self,
        group: u32,
        employer: &Identity,
        sender: &Identity,
        events: &[SignedEvent],
    ) -> XmlElement {
        let mut eventos = XmlElement::new("eventos");
        for event in events {
            eventos.push(
                XmlElement::new("evento")
                    .with_attr("Id", event.id().as_str())
                    .with_child(event.document().clone()),
            );
        }

        let batch = XmlElement::new("envioLoteEventos")
            .with_attr("grupo", group.to_string())
            .with_child(employer_block(employer))
            .with_child(identity_block("ideTransmissor", sender, sender.registration_number()))
            .with_child(eventos);

        self.root(Operation::SendBatch).with_child(batch)
    }

    /// `eSocial/consultaLoteEventos/protocoloEnvio` carrying the protocol
    /// number unchanged.
    pub fn retrieve_batch(&self, protocol_number: &str) -> XmlElement {
        self.root(Operation::RetrieveBatch).with_child(
            XmlElement::new("consultaLoteEventos")
                .with_child(XmlElement::new("protocoloEnvio").with_text(protocol_number)),
        )
    }

    /// `eSocial/consultaIdentificadoresEvts` for employer-level events of
    /// type `event_type` (e.g. `S-1000`) in `period` (`YYYY` or `YYYY-MM`).
    pub fn employer_event_ids(
        &self,
        employer: &Identity,
        event_type: &str,
        period: &str,
    ) -> XmlElement {
        self.root(Operation::EmployerEventIds).with_child(
            XmlElement::new("consultaIdentificadoresEvts")
                .with_child(employer_block(employer))
                .with_child(
                    XmlElement::new("consultaEvtsEmpregador")
                        .with_child(XmlElement::new("tpEvt").with_text(event_type))
                        .with_child(XmlElement::new("perApur").with_text(period)),
                ),
        )
    }

    /// `eSocial/consultaIdentificadoresEvts` for the events of one employee
    /// between two instants.
    pub fn employee_event_ids(
        &self,
        employer: &Identity,
        cpf: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> XmlElement {
        self.root(Operation::EmployeeEventIds).with_child(
            XmlElement::new("consultaIdentificadoresEvts")
                .with_child(employer_block(employer))
                .with_child(
                    XmlElement::new("consultaEvtsTrabalhador")
                        .with_child(XmlElement::new("cpfTrab").with_text(cpf))
                        .with_child(
                            XmlElement::new("dtIni")
                                .with_text(start.format(DATE_TIME_FORMAT).to_string()),
                        )
                        .with_child(
                            XmlElement::new("dtFim")
                                .with_text(end.format(DATE_TIME_FORMAT).to_string()),
                        ),
                ),
        )
    }

    /// `eSocial/download` requesting the given event ids, in order.
    pub fn download_by_ids<I, S>(&self, employer: &Identity, event_ids: I) -> XmlElement
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut request = XmlElement::new("solicDownloadEvtsPorId");
        for id in event_ids {
            request.push(XmlElement::new("id").with_text(id.as_ref()));
        }

        self.root(Operation::DownloadByIds).with_child(
            XmlElement::new("download")
                .with_child(employer_block(employer))
                .with_child(request),
        )
    }

    fn root(&self, operation: Operation) -> XmlElement {
        XmlElement::new("eSocial").with_attr("xmlns", self.versions.namespace(operation))
    }
}

fn employer_block(employer: &Identity) -> XmlElement {
    identity_block("ideEmpregador", employer, employer.effective_number())
}

fn identity_block(name: &str, identity: &Identity, number: &str) -> XmlElement {
    XmlElement::new(name)
        .with_child(
            XmlElement::new("tpInsc").with_text(identity.registration_type().code().to_string()),
        )
        .with_child(XmlElement::new("nrInsc").with_text(number))
}
