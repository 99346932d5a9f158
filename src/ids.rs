//! Event identifiers and their per-session assignment.
//!
//! An id is `ID` + `tpInsc` + the employer number right-padded with `0` to
//! 14 characters + a `YYYYMMDDHHMMSS` timestamp + a 5-digit sequence. The
//! sequence counts how many ids this session produced for the same prefix,
//! so two ids requested within one second get `00001` and `00002`.

use crate::identity::Identity;
use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Total length of an event id.
pub const EVENT_ID_LEN: usize = 36;

const PREFIX_LEN: usize = EVENT_ID_LEN - SEQUENCE_DIGITS;
const SEQUENCE_DIGITS: usize = 5;
const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Raised when a string is not a well-formed event id.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid event id {value:?}: {reason}")]
pub struct InvalidEventId {
    pub value: String,
    pub reason: &'static str,
}

/// A validated event identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EventId(String);

impl EventId {
    /// Parse and validate an id received from elsewhere.
    pub fn parse(value: impl Into<String>) -> Result<Self, InvalidEventId> {
        let value = value.into();
        let reject = |reason| InvalidEventId {
            value: value.clone(),
            reason,
        };

        if value.len() != EVENT_ID_LEN {
            return Err(reject("expected 36 characters"));
        }
        if !value.starts_with("ID") {
            return Err(reject("must start with \"ID\""));
        }
        let digits = &value[2..];
        if !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(reject("must be digits after \"ID\""));
        }
        if !matches!(&digits[..1], "1" | "2") {
            return Err(reject("registration type must be 1 or 2"));
        }
        if NaiveDateTime::parse_from_str(&value[17..31], TIMESTAMP_FORMAT).is_err() {
            return Err(reject("timestamp is not a valid date and time"));
        }
        if &value[31..] == "00000" {
            return Err(reject("sequence starts at 00001"));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Everything but the trailing sequence.
    pub fn prefix(&self) -> &str {
        &self.0[..PREFIX_LEN]
    }

    /// Timestamp portion, second resolution.
    pub fn timestamp(&self) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(&self.0[17..31], TIMESTAMP_FORMAT).ok()
    }

    /// Sequence within the prefix (1-based).
    pub fn sequence(&self) -> u32 {
        self.0[PREFIX_LEN..].parse().unwrap_or_default()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for EventId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for EventId {
    type Error = InvalidEventId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<EventId> for String {
    fn from(id: EventId) -> Self {
        id.0
    }
}

impl std::str::FromStr for EventId {
    type Err = InvalidEventId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Hands out event ids and remembers every id issued in this session.
#[derive(Debug, Default)]
pub struct IdentifierAssigner {
    history: Vec<EventId>,
    counts: HashMap<String, u32>,
}

impl IdentifierAssigner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign an id stamped with the current local time.
    pub fn assign(&mut self, identity: &Identity) -> EventId {
        self.assign_at(identity, Local::now().naive_local())
    }

    /// Assign an id stamped with `at` (truncated to the second).
    pub fn assign_at(&mut self, identity: &Identity, at: NaiveDateTime) -> EventId {
        let prefix = format!(
            "ID{}{:0<14}{}",
            identity.registration_type().code(),
            identity.effective_number(),
            at.format(TIMESTAMP_FORMAT)
        );
        let count = self.counts.entry(prefix.clone()).or_insert(0);
        *count += 1;
        let id = EventId(format!("{prefix}{:0>5}", *count));
        self.history.push(id.clone());
        id
    }

    /// Take back `id` if it is the most recent one issued, so a rejected
    /// event does not consume a sequence number.
    pub fn release(&mut self, id: &EventId) -> bool {
        if self.history.last() != Some(id) {
            return false;
        }
        self.history.pop();
        if let Some(count) = self.counts.get_mut(id.prefix()) {
            *count -= 1;
            if *count == 0 {
                self.counts.remove(id.prefix());
            }
        }
        true
    }

    /// Every id issued since the last clear, in order.
    pub fn history(&self) -> &[EventId] {
        &self.history
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Forget the session history; sequences restart at `00001`.
    pub fn clear(&mut self) {
        self.history.clear();
        self.counts.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2019, 3, 21)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_id_layout() {
        let employer = Identity::cnpj("12345678901234").unwrap();
        let mut ids = IdentifierAssigner::new();
        let id = ids.assign_at(&employer, at(14, 18, 24));
        assert_eq!(id.as_str(), "ID1123456780000002019032114182400001");
        assert_eq!(id.as_str().len(), EVENT_ID_LEN);
        assert_eq!(id.sequence(), 1);
        assert_eq!(id.timestamp(), Some(at(14, 18, 24)));
    }

    #[test]
    fn test_full_number_and_cpf_padding() {
        let mut ids = IdentifierAssigner::new();
        let full = Identity::cnpj("12345678901234").unwrap().with_full_number(true);
        assert_eq!(
            ids.assign_at(&full, at(0, 0, 0)).as_str(),
            "ID1123456789012342019032100000000001"
        );
        let cpf = Identity::cpf("09887219967").unwrap();
        assert_eq!(
            ids.assign_at(&cpf, at(0, 0, 0)).as_str(),
            "ID2098872199670002019032100000000001"
        );
    }

    #[test]
    fn test_same_second_increments_sequence() {
        let employer = Identity::cnpj("12345678901234").unwrap();
        let mut ids = IdentifierAssigner::new();
        let issued: Vec<EventId> = (0..5).map(|_| ids.assign_at(&employer, at(9, 0, 0))).collect();

        for (n, id) in issued.iter().enumerate() {
            assert_eq!(id.sequence(), n as u32 + 1);
            assert_eq!(id.prefix(), issued[0].prefix());
        }
        assert!(issued.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(ids.len(), 5);
    }

    #[test]
    fn test_new_second_restarts_sequence() {
        let employer = Identity::cnpj("12345678901234").unwrap();
        let mut ids = IdentifierAssigner::new();
        ids.assign_at(&employer, at(9, 0, 0));
        ids.assign_at(&employer, at(9, 0, 0));
        let next = ids.assign_at(&employer, at(9, 0, 1));
        assert_eq!(next.sequence(), 1);
    }

    #[test]
    fn test_clear_restarts_sequence() {
        let employer = Identity::cnpj("12345678901234").unwrap();
        let mut ids = IdentifierAssigner::new();
        ids.assign_at(&employer, at(9, 0, 0));
        ids.clear();
        ids.clear();
        assert!(ids.is_empty());
        assert_eq!(ids.assign_at(&employer, at(9, 0, 0)).sequence(), 1);
    }

    #[test]
    fn test_release_most_recent() {
        let employer = Identity::cnpj("12345678901234").unwrap();
        let mut ids = IdentifierAssigner::new();
        let first = ids.assign_at(&employer, at(9, 0, 0));
        let second = ids.assign_at(&employer, at(9, 0, 0));

        assert!(!ids.release(&first));
        assert!(ids.release(&second));
        assert_eq!(ids.history(), &[first]);
        assert_eq!(ids.assign_at(&employer, at(9, 0, 0)).sequence(), 2);
    }

    #[test]
    fn test_parse() {
        let id = EventId::parse("ID1123456780000002019032114182400001").unwrap();
        assert_eq!(id.sequence(), 1);

        assert!(EventId::parse("ID112345678").is_err());
        assert!(EventId::parse("XX1123456780000002019032114182400001").is_err());
        assert!(EventId::parse("ID3123456780000002019032114182400001").is_err());
        assert!(EventId::parse("ID1123456780000002019133114182400001").is_err());
        assert!(EventId::parse("ID1123456780000002019032114182400000").is_err());
        assert!("ID11234567800000020190321141824000a1".parse::<EventId>().is_err());
    }
}
