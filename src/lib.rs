//! Client for the Brazilian eSocial employer web services.
//!
//! Accumulates signed event documents into batches, sends them, retrieves
//! their processing results and queries or downloads previously filed
//! events. Every outbound document is signed (where the service requires it)
//! and schema-checked before it leaves the process.
//!
//! # Features
//!
//! - Session-unique event ids (`ID<tpInsc><nrInsc><timestamp><seq>`)
//! - Enveloped XML-DSig signing (C14N 1.0, SHA-256, RSA-SHA256) with
//!   post-signing verification
//! - Structural validation of events and operation envelopes
//! - Batches of up to 50 events
//! - SOAP 1.1 over mutual TLS, with SOAP faults surfaced as typed errors
//! - Production and restricted-production endpoints, individually overridable
//!
//! # Example
//!
//! ```ignore
//! use esocial_client::{ClientConfig, WsClient};
//!
//! let config = ClientConfig::from_file("esocial.yaml")?;
//! let mut client = WsClient::from_config(&config)?;
//! client.add_event_xml(&std::fs::read_to_string("S-2220.xml")?)?;
//! let result = client.send_events_batch(1).await?;
//! println!("protocol: {:?}", result.protocol_number());
//! client.clear_batch();
//! ```

pub mod batch;
pub mod client;
pub mod config;
pub mod credential;
pub mod envelope;
pub mod error;
pub mod identity;
pub mod ids;
pub mod schema;
pub mod signature;
pub mod transport;
pub mod xml;

pub use batch::{BatchAccumulator, SignedEvent, DEFAULT_MAX_BATCH_SIZE};
pub use client::{BatchState, RawEvent, WsClient, WsClientBuilder};
pub use config::ClientConfig;
pub use credential::Credential;
pub use envelope::{Operation, SchemaVersions};
pub use error::{ErrorKind, EsocialError, Violation, ViolationCode};
pub use identity::{Identity, RegistrationType};
pub use ids::EventId;
pub use transport::{Endpoints, ProtocolResult, Target};
pub use xml::XmlElement;
