//! Batch of signed events awaiting transmission.

use crate::error::{EsocialError, Result};
use crate::identity::Identity;
use crate::ids::{EventId, IdentifierAssigner};
use crate::xml::XmlElement;

/// Default maximum number of events per batch envelope.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 50;

/// An event document that carries its id, has been signed and has passed
/// schema validation. Only the client constructs these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedEvent {
    id: EventId,
    document: XmlElement,
}

impl SignedEvent {
    pub(crate) fn new(id: EventId, document: XmlElement) -> Self {
        Self { id, document }
    }

    pub fn id(&self) -> &EventId {
        &self.id
    }

    /// Signed event document (root `eSocial`).
    pub fn document(&self) -> &XmlElement {
        &self.document
    }
}

/// Ordered, capacity-bounded batch plus the id history of the session.
///
/// Both are cleared together: ids restart at sequence `00001` only when the
/// batch they were issued for is gone.
#[derive(Debug)]
pub struct BatchAccumulator {
    events: Vec<SignedEvent>,
    ids: IdentifierAssigner,
    capacity: usize,
}

impl BatchAccumulator {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Vec::with_capacity(capacity.min(DEFAULT_MAX_BATCH_SIZE)),
            ids: IdentifierAssigner::new(),
            capacity,
        }
    }

    /// Issue the next event id for `identity`.
    pub fn next_id(&mut self, identity: &Identity) -> EventId {
        self.ids.assign(identity)
    }

    /// Give back an id whose event was rejected before it reached the batch.
    pub fn release_id(&mut self, id: &EventId) {
        self.ids.release(id);
    }

    /// Append an event, failing when the batch is already full.
    pub fn append(&mut self, event: SignedEvent) -> Result<()> {
        self.ensure_capacity()?;
        self.events.push(event);
        Ok(())
    }

    /// Fail with `CapacityExceeded` if another event would not fit.
    pub fn ensure_capacity(&self) -> Result<()> {
        if self.is_full() {
            return Err(EsocialError::CapacityExceeded {
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    /// Empty the batch and the id history.
    pub fn clear(&mut self) {
        self.events.clear();
        self.ids.clear();
    }

    /// Events in insertion order.
    pub fn events(&self) -> &[SignedEvent] {
        &self.events
    }

    /// Ids issued since the last clear.
    pub fn issued_ids(&self) -> &[EventId] {
        self.ids.history()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.events.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for BatchAccumulator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BATCH_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn event(batch: &mut BatchAccumulator) -> SignedEvent {
        let employer = Identity::cnpj("12345678901234").unwrap();
        let id = batch.next_id(&employer);
        let document = XmlElement::new("eSocial")
            .with_child(XmlElement::new("evtMonit").with_attr("Id", id.as_str()));
        SignedEvent::new(id, document)
    }

    #[test]
    fn test_append_preserves_order() {
        let mut batch = BatchAccumulator::new(3);
        let first = event(&mut batch);
        let second = event(&mut batch);
        batch.append(first.clone()).unwrap();
        batch.append(second.clone()).unwrap();
        assert_eq!(batch.events(), &[first, second]);
    }

    #[test]
    fn test_capacity_exceeded_only_when_full() {
        let mut batch = BatchAccumulator::new(2);
        for _ in 0..2 {
            let e = event(&mut batch);
            batch.append(e).unwrap();
        }
        assert!(batch.is_full());

        let extra = event(&mut batch);
        let err = batch.append(extra).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CapacityExceeded);
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn test_clear_empties_events_and_ids() {
        let mut batch = BatchAccumulator::default();
        let e = event(&mut batch);
        batch.append(e).unwrap();
        assert_eq!(batch.issued_ids().len(), 1);

        batch.clear();
        assert!(batch.is_empty());
        assert!(batch.issued_ids().is_empty());

        batch.clear();
        assert!(batch.is_empty());
        assert!(batch.issued_ids().is_empty());
    }

    #[test]
    fn test_release_id() {
        let mut batch = BatchAccumulator::default();
        let e = event(&mut batch);
        batch.release_id(e.id());
        assert!(batch.issued_ids().is_empty());
    }

    #[test]
    fn test_default_capacity() {
        assert_eq!(BatchAccumulator::default().capacity(), DEFAULT_MAX_BATCH_SIZE);
    }
}
