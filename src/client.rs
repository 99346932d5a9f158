//! eSocial web-service client: one filing session per instance.
//!
//! [`WsClient`] owns the batch and the event-id history. Every document it
//! produces passes the signature gate (when the operation is signed) and the
//! schema gate before it is appended to the batch or handed to the
//! transport, so nothing non-conformant is ever transmitted.

use crate::batch::{BatchAccumulator, SignedEvent, DEFAULT_MAX_BATCH_SIZE};
use crate::config::ClientConfig;
use crate::credential::Credential;
use crate::envelope::{EnvelopeBuilder, Operation, SchemaVersions};
use crate::error::{EsocialError, Result};
use crate::identity::Identity;
use crate::ids::EventId;
use crate::schema::{DocumentKind, SchemaGate, SchemaValidator, StructuralValidator};
use crate::signature::{EnvelopedSigner, SignatureGate, XmlSigner};
use crate::transport::{Endpoints, ProtocolResult, Target, TransportClient, DEFAULT_TIMEOUT};
use crate::xml::XmlElement;
use chrono::NaiveDateTime;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Unsigned event document supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    document: XmlElement,
}

impl RawEvent {
    /// Parse event XML. Input that is not a well-formed document is
    /// rejected with `InvalidInput`.
    pub fn parse(xml: &str) -> Result<Self> {
        Ok(Self {
            document: XmlElement::parse(xml)?,
        })
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Ok(Self {
            document: XmlElement::parse_bytes(data)?,
        })
    }

    pub fn document(&self) -> &XmlElement {
        &self.document
    }

    pub fn into_document(self) -> XmlElement {
        self.document
    }
}

impl From<XmlElement> for RawEvent {
    fn from(document: XmlElement) -> Self {
        Self { document }
    }
}

/// Lifecycle of the batch held by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    /// Nothing queued
    Idle,
    /// Events queued that have not been transmitted
    Accumulating,
    /// Every queued event has been transmitted; the batch still holds them
    Sent,
}

/// Builder for [`WsClient`].
pub struct WsClientBuilder {
    employer: Option<Identity>,
    sender: Option<Identity>,
    credential: Option<Arc<Credential>>,
    endpoints: Option<Endpoints>,
    target: Target,
    ca_bundle: Option<Vec<u8>>,
    timeout: Duration,
    max_batch_size: usize,
    schema_versions: SchemaVersions,
    signer: Arc<dyn XmlSigner>,
    validator: Arc<dyn SchemaValidator>,
}

impl Default for WsClientBuilder {
    fn default() -> Self {
        Self {
            employer: None,
            sender: None,
            credential: None,
            endpoints: None,
            target: Target::default(),
            ca_bundle: None,
            timeout: DEFAULT_TIMEOUT,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            schema_versions: SchemaVersions::default(),
            signer: Arc::new(EnvelopedSigner),
            validator: Arc::new(StructuralValidator),
        }
    }
}

impl WsClientBuilder {
    pub fn employer(mut self, employer: Identity) -> Self {
        self.employer = Some(employer);
        self
    }

    pub fn sender(mut self, sender: Identity) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn credential(mut self, credential: Arc<Credential>) -> Self {
        self.credential = Some(credential);
        self
    }

    pub fn target(mut self, target: Target) -> Self {
        self.target = target;
        self
    }

    /// Use these URLs instead of the published endpoints of the target.
    pub fn endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = Some(endpoints);
        self
    }

    /// Trust these CAs instead of the bundled eSocial chain.
    pub fn ca_bundle(mut self, pem: Vec<u8>) -> Self {
        self.ca_bundle = Some(pem);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    pub fn schema_versions(mut self, versions: SchemaVersions) -> Self {
        self.schema_versions = versions;
        self
    }

    pub fn signer(mut self, signer: Arc<dyn XmlSigner>) -> Self {
        self.signer = signer;
        self
    }

    pub fn validator(mut self, validator: Arc<dyn SchemaValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn build(self) -> Result<WsClient> {
        if self.max_batch_size == 0 || self.max_batch_size > DEFAULT_MAX_BATCH_SIZE {
            return Err(EsocialError::Configuration(format!(
                "max_batch_size must be between 1 and {DEFAULT_MAX_BATCH_SIZE}, got {}",
                self.max_batch_size
            )));
        }

        let endpoints = self
            .endpoints
            .unwrap_or_else(|| Endpoints::for_target(self.target));
        let mut transport = TransportClient::new(endpoints).with_timeout(self.timeout);
        if let Some(pem) = self.ca_bundle {
            transport = transport.with_ca_bundle(pem);
        }
        if let Some(credential) = &self.credential {
            transport = transport.with_credential(Arc::clone(credential));
        }

        Ok(WsClient {
            employer: self.employer,
            sender: self.sender,
            credential: self.credential,
            batch: BatchAccumulator::new(self.max_batch_size),
            sent_events: 0,
            signatures: SignatureGate::new(self.signer),
            schemas: SchemaGate::new(self.validator, self.schema_versions),
            transport,
        })
    }
}

/// Client for the eSocial employer web services.
pub struct WsClient {
    employer: Option<Identity>,
    sender: Option<Identity>,
    credential: Option<Arc<Credential>>,
    batch: BatchAccumulator,
    /// Leading events of the batch already transmitted.
    sent_events: usize,
    signatures: SignatureGate,
    schemas: SchemaGate,
    transport: TransportClient,
}

impl WsClient {
    pub fn builder() -> WsClientBuilder {
        WsClientBuilder::default()
    }

    /// Build a client from configuration, loading the credential and CA
    /// bundle it names.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        config.validate()?;

        let mut builder = Self::builder()
            .target(config.target)
            .endpoints(config.resolved_endpoints())
            .timeout(config.timeout())
            .max_batch_size(config.max_batch_size)
            .schema_versions(config.schema_versions.clone());
        if let Some(employer) = &config.employer {
            builder = builder.employer(employer.clone());
        }
        if let Some(sender) = &config.sender {
            builder = builder.sender(sender.clone());
        }
        if let Some(credential) = config.load_credential()? {
            builder = builder.credential(Arc::new(credential));
        }
        if let Some(pem) = config.load_ca_bundle()? {
            builder = builder.ca_bundle(pem);
        }
        builder.build()
    }

    pub fn employer(&self) -> Option<&Identity> {
        self.employer.as_ref()
    }

    pub fn sender(&self) -> Option<&Identity> {
        self.sender.as_ref()
    }

    pub fn endpoints(&self) -> &Endpoints {
        self.transport.endpoints()
    }

    /// Events queued for the next send, in order.
    pub fn batch(&self) -> &[SignedEvent] {
        self.batch.events()
    }

    /// Event ids issued since the last clear.
    pub fn issued_ids(&self) -> &[EventId] {
        self.batch.issued_ids()
    }

    pub fn state(&self) -> BatchState {
        if self.batch.is_empty() {
            BatchState::Idle
        } else if self.sent_events == self.batch.len() {
            BatchState::Sent
        } else {
            BatchState::Accumulating
        }
    }

    /// Assign an id to `event`, sign it, validate it and queue it.
    ///
    /// On failure the batch and the id history are left as they were.
    pub fn add_event(&mut self, event: RawEvent) -> Result<EventId> {
        let employer = self.employer.as_ref().ok_or_else(|| missing("employer identity"))?;
        if self.sender.is_none() {
            return Err(missing("sender identity"));
        }
        let credential = self.credential.as_deref().ok_or_else(|| missing("credential"))?;
        self.batch.ensure_capacity()?;

        let id = self.batch.next_id(employer);
        let sealed = seal_event(&self.signatures, &self.schemas, event, &id, credential)
            .and_then(|signed| self.batch.append(signed));
        if let Err(e) = sealed {
            self.batch.release_id(&id);
            warn!(event_id = %id, error = %e, "Event rejected");
            return Err(e);
        }

        if self.sent_events > 0 {
            warn!(
                already_sent = self.sent_events,
                "Adding to a batch that still holds transmitted events"
            );
        }
        debug!(event_id = %id, batch_size = self.batch.len(), "Event queued");
        Ok(id)
    }

    /// Parse `xml` and queue it with [`add_event`](Self::add_event).
    pub fn add_event_xml(&mut self, xml: &str) -> Result<EventId> {
        self.add_event(RawEvent::parse(xml)?)
    }

    /// Empty the batch and the id history.
    pub fn clear_batch(&mut self) {
        self.batch.clear();
        self.sent_events = 0;
        debug!("Batch cleared");
    }

    /// Validated send envelope for the current batch, without transmitting it.
    pub fn prepare_send_batch(&self, group: u32) -> Result<XmlElement> {
        let employer = self.employer.as_ref().ok_or_else(|| missing("employer identity"))?;
        let sender = self.sender.as_ref().ok_or_else(|| missing("sender identity"))?;

        let envelope = self.envelopes().send_batch(group, employer, sender, self.batch.events());
        self.schemas
            .validate(&envelope, DocumentKind::Envelope(Operation::SendBatch))?;
        Ok(envelope)
    }

    /// Transmit the current batch. The batch is kept; clear it once the
    /// returned protocol has been recorded.
    pub async fn send_events_batch(&mut self, group: u32) -> Result<ProtocolResult> {
        let envelope = self.prepare_send_batch(group)?;
        if self.sent_events > 0 {
            warn!(
                already_sent = self.sent_events,
                batch_size = self.batch.len(),
                "Retransmitting events that were already sent"
            );
        }

        let result = self.transport.invoke(Operation::SendBatch, &envelope).await?;
        self.sent_events = self.batch.len();

        info!(
            batch_size = self.batch.len(),
            group,
            response_code = ?result.response_code(),
            protocol = ?result.protocol_number(),
            "Batch sent"
        );
        Ok(result)
    }

    /// Validated retrieve envelope, without transmitting it.
    pub fn prepare_retrieve_batch(&self, protocol_number: &str) -> Result<XmlElement> {
        let envelope = self.envelopes().retrieve_batch(protocol_number);
        self.schemas
            .validate(&envelope, DocumentKind::Envelope(Operation::RetrieveBatch))?;
        Ok(envelope)
    }

    /// Processing result of a previously sent batch.
    pub async fn retrieve_events_batch(&self, protocol_number: &str) -> Result<ProtocolResult> {
        let envelope = self.prepare_retrieve_batch(protocol_number)?;
        let result = self
            .transport
            .invoke(Operation::RetrieveBatch, &envelope)
            .await?;
        info!(
            protocol = %protocol_number,
            response_code = ?result.response_code(),
            "Batch result retrieved"
        );
        Ok(result)
    }

    /// Signed and validated employer id query, without transmitting it.
    pub fn prepare_employer_ids(&self, event_type: &str, period: &str) -> Result<XmlElement> {
        let employer = self.employer.as_ref().ok_or_else(|| missing("employer identity"))?;
        let envelope = self.envelopes().employer_event_ids(employer, event_type, period);
        self.seal_envelope(Operation::EmployerEventIds, &envelope)
    }

    /// Ids of employer-level events of `event_type` (e.g. `S-1000`) in
    /// `period` (`YYYY` or `YYYY-MM`).
    pub async fn obtain_employer_ids(
        &self,
        event_type: &str,
        period: &str,
    ) -> Result<ProtocolResult> {
        let envelope = self.prepare_employer_ids(event_type, period)?;
        self.transport
            .invoke(Operation::EmployerEventIds, &envelope)
            .await
    }

    /// Signed and validated employee id query, without transmitting it.
    pub fn prepare_employee_ids(
        &self,
        cpf: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<XmlElement> {
        let employer = self.employer.as_ref().ok_or_else(|| missing("employer identity"))?;
        let envelope = self.envelopes().employee_event_ids(employer, cpf, start, end);
        self.seal_envelope(Operation::EmployeeEventIds, &envelope)
    }

    /// Ids of the events of the employee with `cpf` between `start` and `end`.
    pub async fn obtain_employee_ids(
        &self,
        cpf: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<ProtocolResult> {
        let envelope = self.prepare_employee_ids(cpf, start, end)?;
        self.transport
            .invoke(Operation::EmployeeEventIds, &envelope)
            .await
    }

    /// Signed and validated download request, without transmitting it.
    pub fn prepare_download_by_ids<I, S>(&self, event_ids: I) -> Result<XmlElement>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let employer = self.employer.as_ref().ok_or_else(|| missing("employer identity"))?;
        let envelope = self.envelopes().download_by_ids(employer, event_ids);
        self.seal_envelope(Operation::DownloadByIds, &envelope)
    }

    /// Request the download of the events with the given ids.
    pub async fn download_events_by_ids<I, S>(&self, event_ids: I) -> Result<ProtocolResult>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let envelope = self.prepare_download_by_ids(event_ids)?;
        self.transport
            .invoke(Operation::DownloadByIds, &envelope)
            .await
    }

    fn envelopes(&self) -> EnvelopeBuilder<'_> {
        EnvelopeBuilder::new(self.schemas.versions())
    }

    fn seal_envelope(&self, operation: Operation, envelope: &XmlElement) -> Result<XmlElement> {
        let credential = self.credential.as_deref().ok_or_else(|| missing("credential"))?;
        let signed = self.signatures.sign(envelope, Some(credential))?;
        self.schemas
            .validate(&signed, DocumentKind::Envelope(operation))?;
        Ok(signed)
    }
}

impl std::fmt::Debug for WsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsClient")
            .field("employer", &self.employer)
            .field("sender", &self.sender)
            .field("credential", &self.credential.is_some())
            .field("batch_size", &self.batch.len())
            .field("state", &self.state())
            .field("transport", &self.transport)
            .finish()
    }
}

fn seal_event(
    signatures: &SignatureGate,
    schemas: &SchemaGate,
    event: RawEvent,
    id: &EventId,
    credential: &Credential,
) -> Result<SignedEvent> {
    let mut document = event.into_document();
    if let Some(body) = document.first_element_mut() {
        body.set_attr("Id", id.as_str());
    }

    let signed = signatures.sign(&document, Some(credential))?;
    schemas.validate(&signed, DocumentKind::Event)?;
    Ok(SignedEvent::new(id.clone(), signed))
}

fn missing(what: &str) -> EsocialError {
    EsocialError::Configuration(format!("no {what} configured"))
}
