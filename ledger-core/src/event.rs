//! Domain events and their raw log encoding
//!
//! Every accepted transition emits one or more events. They are written to
//! the log as [`RawLogEntry`] values: a topic (SHA-256 of the event
//! signature) plus the bincode encoding of the payload. Consumers dispatch on
//! the topic to decode them back into a [`LedgerEvent`].

use crate::{
    crypto::hash_bytes,
    types::{Address, EvidenceRef, LogPosition, LotId, LotStatus, Role, TxHash},
    Error, Result,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A lot was registered by a producer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotRegistered {
    pub lot_id: LotId,
    pub product_name: String,
    pub producer: Address,
    pub origin: String,
    pub evidence_ref: EvidenceRef,
}

/// A supply chain participant updated a lot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotStatusUpdated {
    pub lot_id: LotId,
    pub new_status: LotStatus,
    pub evidence_ref: EvidenceRef,
    pub updater: Address,
}

/// A regulator recalled a lot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotRecalled {
    pub lot_id: LotId,
    pub regulator: Address,
}

/// Lot custody moved; `from` is `None` on registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipTransferred {
    pub lot_id: LotId,
    pub from: Option<Address>,
    pub to: Address,
}

/// A role was granted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleGranted {
    pub role: Role,
    pub account: Address,
    pub granter: Address,
}

/// A role was revoked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRevoked {
    pub role: Role,
    pub account: Address,
    pub revoker: Address,
}

/// Event emitted by an accepted transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum LedgerEvent {
    LotRegistered(LotRegistered),
    LotStatusUpdated(LotStatusUpdated),
    LotRecalled(LotRecalled),
    OwnershipTransferred(OwnershipTransferred),
    RoleGranted(RoleGranted),
    RoleRevoked(RoleRevoked),
}

/// Event discriminant, one topic per kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    LotRegistered,
    LotStatusUpdated,
    LotRecalled,
    OwnershipTransferred,
    RoleGranted,
    RoleRevoked,
}

impl EventKind {
    /// All kinds
    pub const ALL: [EventKind; 6] = [
        EventKind::LotRegistered,
        EventKind::LotStatusUpdated,
        EventKind::LotRecalled,
        EventKind::OwnershipTransferred,
        EventKind::RoleGranted,
        EventKind::RoleRevoked,
    ];

    /// Canonical signature the topic is derived from
    pub fn signature(&self) -> &'static str {
        match self {
            EventKind::LotRegistered => "LotRegistered(uint256,string,address,string,string)",
            EventKind::LotStatusUpdated => "LotStatusUpdated(uint256,uint8,string,address)",
            EventKind::LotRecalled => "LotRecalled(uint256,address)",
            EventKind::OwnershipTransferred => "OwnershipTransferred(uint256,address,address)",
            EventKind::RoleGranted => "RoleGranted(uint8,address,address)",
            EventKind::RoleRevoked => "RoleRevoked(uint8,address,address)",
        }
    }

    /// Short name stored alongside projected rows
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::LotRegistered => "LotRegistered",
            EventKind::LotStatusUpdated => "LotStatusUpdated",
            EventKind::LotRecalled => "LotRecalled",
            EventKind::OwnershipTransferred => "OwnershipTransferred",
            EventKind::RoleGranted => "RoleGranted",
            EventKind::RoleRevoked => "RoleRevoked",
        }
    }

    /// Log topic
    pub fn topic(&self) -> [u8; 32] {
        hash_bytes(self.signature().as_bytes())
    }

    /// Reverse topic lookup
    pub fn from_topic(topic: &[u8; 32]) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.topic() == *topic)
    }
}

impl LedgerEvent {
    /// Discriminant
    pub fn kind(&self) -> EventKind {
        match self {
            LedgerEvent::LotRegistered(_) => EventKind::LotRegistered,
            LedgerEvent::LotStatusUpdated(_) => EventKind::LotStatusUpdated,
            LedgerEvent::LotRecalled(_) => EventKind::LotRecalled,
            LedgerEvent::OwnershipTransferred(_) => EventKind::OwnershipTransferred,
            LedgerEvent::RoleGranted(_) => EventKind::RoleGranted,
            LedgerEvent::RoleRevoked(_) => EventKind::RoleRevoked,
        }
    }

    /// Lot the event refers to, if any
    pub fn lot_id(&self) -> Option<LotId> {
        match self {
            LedgerEvent::LotRegistered(e) => Some(e.lot_id),
            LedgerEvent::LotStatusUpdated(e) => Some(e.lot_id),
            LedgerEvent::LotRecalled(e) => Some(e.lot_id),
            LedgerEvent::OwnershipTransferred(e) => Some(e.lot_id),
            LedgerEvent::RoleGranted(_) | LedgerEvent::RoleRevoked(_) => None,
        }
    }

    /// Encode payload bytes for the log
    pub fn encode_payload(&self) -> Result<Vec<u8>> {
        let data = match self {
            LedgerEvent::LotRegistered(e) => bincode::serialize(e)?,
            LedgerEvent::LotStatusUpdated(e) => bincode::serialize(e)?,
            LedgerEvent::LotRecalled(e) => bincode::serialize(e)?,
            LedgerEvent::OwnershipTransferred(e) => bincode::serialize(e)?,
            LedgerEvent::RoleGranted(e) => bincode::serialize(e)?,
            LedgerEvent::RoleRevoked(e) => bincode::serialize(e)?,
        };
        Ok(data)
    }

    /// Decode a payload given its topic
    pub fn decode(topic: &[u8; 32], data: &[u8]) -> Result<Self> {
        let kind = EventKind::from_topic(topic)
            .ok_or_else(|| Error::Decode(format!("unknown topic 0x{}", hex::encode(topic))))?;

        let malformed =
            |e: bincode::Error| Error::Decode(format!("malformed {} payload: {}", kind.name(), e));

        let event = match kind {
            EventKind::LotRegistered => {
                LedgerEvent::LotRegistered(bincode::deserialize(data).map_err(malformed)?)
            }
            EventKind::LotStatusUpdated => {
                LedgerEvent::LotStatusUpdated(bincode::deserialize(data).map_err(malformed)?)
            }
            EventKind::LotRecalled => {
                LedgerEvent::LotRecalled(bincode::deserialize(data).map_err(malformed)?)
            }
            EventKind::OwnershipTransferred => {
                LedgerEvent::OwnershipTransferred(bincode::deserialize(data).map_err(malformed)?)
            }
            EventKind::RoleGranted => {
                LedgerEvent::RoleGranted(bincode::deserialize(data).map_err(malformed)?)
            }
            EventKind::RoleRevoked => {
                LedgerEvent::RoleRevoked(bincode::deserialize(data).map_err(malformed)?)
            }
        };

        Ok(event)
    }
}

/// One entry of the append-only event log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLogEntry {
    /// Position in the log
    pub position: LogPosition,
    /// Transaction that emitted the entry
    pub tx_hash: TxHash,
    /// SHA-256 of the event signature
    pub topic: [u8; 32],
    /// Bincode payload
    pub data: Vec<u8>,
    /// Time the transaction was accepted
    pub timestamp: DateTime<Utc>,
}

impl RawLogEntry {
    /// Build a log entry for an event
    pub fn encode(
        position: LogPosition,
        tx_hash: TxHash,
        event: &LedgerEvent,
        timestamp: DateTime<Utc>,
    ) -> Result<Self> {
        Ok(Self {
            position,
            tx_hash,
            topic: event.kind().topic(),
            data: event.encode_payload()?,
            timestamp,
        })
    }

    /// Decode the payload into a typed event
    pub fn decode(&self) -> Result<LedgerEvent> {
        LedgerEvent::decode(&self.topic, &self.data)
    }
}
