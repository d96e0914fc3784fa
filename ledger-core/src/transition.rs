//! Lot state machine
//!
//! Turns a caller's [`Command`] into a [`Plan`]: the records to write and the
//! events to emit. Planning only reads state, so a rejected command leaves
//! nothing behind. The actor commits an accepted plan as one atomic batch.
//!
//! Status changes are deliberately permissive: an update may move a lot to
//! any of `InTransit`, `OnShelf` or `Recalled` from any prior status, and a
//! recall may be repeated, appending another entry each time.

use crate::{
    event::{
        LedgerEvent, LotRecalled, LotRegistered, LotStatusUpdated, OwnershipTransferred,
        RoleGranted, RoleRevoked,
    },
    roles::{authorize, Operation},
    types::{Address, EvidenceRef, HistoryEntry, LotId, LotRecord, LotStatus, Role, RoleSet, TxHash},
    Error, Result,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Mutation requested by a caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    RegisterLot {
        product_name: String,
        origin: String,
        evidence_ref: EvidenceRef,
    },
    UpdateLot {
        lot_id: LotId,
        evidence_ref: EvidenceRef,
        new_status: LotStatus,
    },
    TriggerRecall {
        lot_id: LotId,
    },
    AssignDistributor {
        account: Address,
    },
    AssignRetailer {
        account: Address,
    },
    GrantRole {
        role: Role,
        account: Address,
    },
    RevokeRole {
        role: Role,
        account: Address,
    },
}

impl Command {
    /// Operation used for the capability check
    pub fn operation(&self) -> Operation {
        match self {
            Command::RegisterLot { .. } => Operation::RegisterLot,
            Command::UpdateLot { .. } => Operation::UpdateLot,
            Command::TriggerRecall { .. } => Operation::TriggerRecall,
            Command::AssignDistributor { .. } => Operation::AssignDistributor,
            Command::AssignRetailer { .. } => Operation::AssignRetailer,
            Command::GrantRole { .. } => Operation::GrantRole,
            Command::RevokeRole { .. } => Operation::RevokeRole,
        }
    }
}

/// Read access the planner needs
pub trait StateView {
    /// Stored lot header
    fn lot_record(&self, lot_id: LotId) -> Result<Option<LotRecord>>;

    /// Roles held by an address
    fn roles_of(&self, address: &Address) -> Result<RoleSet>;
}

/// History entry to append at a given sequence number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryAppend {
    pub lot_id: LotId,
    pub seq: u32,
    pub entry: HistoryEntry,
}

/// Writes and events of one accepted command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub lots: Vec<LotRecord>,
    pub history: Vec<HistoryAppend>,
    pub roles: Vec<(Address, RoleSet)>,
    pub events: Vec<LedgerEvent>,
    /// Lot id consumed by a registration
    pub allocated_lot: Option<LotId>,
}

/// Validate `command` against current state and plan its effects
pub fn plan<V: StateView + ?Sized>(
    view: &V,
    caller: &Address,
    command: &Command,
    next_lot_id: LotId,
    tx_hash: TxHash,
    now: DateTime<Utc>,
) -> Result<Plan> {
    let caller_roles = view.roles_of(caller)?;
    authorize(caller, caller_roles, command.operation())?;

    match command {
        Command::RegisterLot {
            product_name,
            origin,
            evidence_ref,
        } => plan_register(caller, product_name, origin, evidence_ref, next_lot_id, tx_hash, now),
        Command::UpdateLot {
            lot_id,
            evidence_ref,
            new_status,
        } => plan_update(view, caller, *lot_id, evidence_ref, *new_status, tx_hash, now),
        Command::TriggerRecall { lot_id } => plan_recall(view, caller, *lot_id, tx_hash, now),
        Command::AssignDistributor { account } => {
            plan_grant(view, caller, Role::Distributor, account)
        }
        Command::AssignRetailer { account } => plan_grant(view, caller, Role::Retailer, account),
        Command::GrantRole { role, account } => plan_grant(view, caller, *role, account),
        Command::RevokeRole { role, account } => plan_revoke(view, caller, *role, account),
    }
}

fn plan_register(
    producer: &Address,
    product_name: &str,
    origin: &str,
    evidence_ref: &EvidenceRef,
    lot_id: LotId,
    tx_hash: TxHash,
    now: DateTime<Utc>,
) -> Result<Plan> {
    if product_name.trim().is_empty() {
        return Err(Error::Validation("product name must not be empty".to_string()));
    }
    if origin.trim().is_empty() {
        return Err(Error::Validation("origin must not be empty".to_string()));
    }

    let record = LotRecord {
        id: lot_id,
        product_name: product_name.to_string(),
        origin: origin.to_string(),
        producer: producer.clone(),
        current_owner: producer.clone(),
        status: LotStatus::Created,
        created_at: now,
        updated_at: now,
        history_len: 1,
    };

    let entry = HistoryEntry {
        timestamp: now,
        evidence_ref: evidence_ref.clone(),
        status: LotStatus::Created,
        actor: producer.clone(),
        tx_hash,
    };

    Ok(Plan {
        lots: vec![record],
        history: vec![HistoryAppend {
            lot_id,
            seq: 0,
            entry,
        }],
        roles: vec![],
        events: vec![
            LedgerEvent::OwnershipTransferred(OwnershipTransferred {
                lot_id,
                from: None,
                to: producer.clone(),
            }),
            LedgerEvent::LotRegistered(LotRegistered {
                lot_id,
                product_name: product_name.to_string(),
                producer: producer.clone(),
                origin: origin.to_string(),
                evidence_ref: evidence_ref.clone(),
            }),
        ],
        allocated_lot: Some(lot_id),
    })
}

fn plan_update<V: StateView + ?Sized>(
    view: &V,
    updater: &Address,
    lot_id: LotId,
    evidence_ref: &EvidenceRef,
    new_status: LotStatus,
    tx_hash: TxHash,
    now: DateTime<Utc>,
) -> Result<Plan> {
    if !new_status.is_updatable_target() {
        return Err(Error::Validation(format!(
            "status {} cannot be set by an update",
            new_status
        )));
    }

    let mut record = view.lot_record(lot_id)?.ok_or(Error::LotNotFound(lot_id))?;
    let previous_owner = record.current_owner.clone();
    let (seq, timestamp) = advance(&mut record, now)?;
    record.status = new_status;
    record.current_owner = updater.clone();

    let mut events = Vec::with_capacity(2);
    if previous_owner != *updater {
        events.push(LedgerEvent::OwnershipTransferred(OwnershipTransferred {
            lot_id,
            from: Some(previous_owner),
            to: updater.clone(),
        }));
    }
    events.push(LedgerEvent::LotStatusUpdated(LotStatusUpdated {
        lot_id,
        new_status,
        evidence_ref: evidence_ref.clone(),
        updater: updater.clone(),
    }));

    Ok(Plan {
        lots: vec![record],
        history: vec![HistoryAppend {
            lot_id,
            seq,
            entry: HistoryEntry {
                timestamp,
                evidence_ref: evidence_ref.clone(),
                status: new_status,
                actor: updater.clone(),
                tx_hash,
            },
        }],
        roles: vec![],
        events,
        allocated_lot: None,
    })
}

fn plan_recall<V: StateView + ?Sized>(
    view: &V,
    regulator: &Address,
    lot_id: LotId,
    tx_hash: TxHash,
    now: DateTime<Utc>,
) -> Result<Plan> {
    let mut record = view.lot_record(lot_id)?.ok_or(Error::LotNotFound(lot_id))?;
    let (seq, timestamp) = advance(&mut record, now)?;
    record.status = LotStatus::Recalled;

    Ok(Plan {
        lots: vec![record],
        history: vec![HistoryAppend {
            lot_id,
            seq,
            entry: HistoryEntry {
                timestamp,
                evidence_ref: EvidenceRef::recall(),
                status: LotStatus::Recalled,
                actor: regulator.clone(),
                tx_hash,
            },
        }],
        roles: vec![],
        events: vec![LedgerEvent::LotRecalled(LotRecalled {
            lot_id,
            regulator: regulator.clone(),
        })],
        allocated_lot: None,
    })
}

/// Reserve the next history slot; timestamps never go backwards within a lot
fn advance(record: &mut LotRecord, now: DateTime<Utc>) -> Result<(u32, DateTime<Utc>)> {
    let seq = record.history_len;
    record.history_len = seq
        .checked_add(1)
        .ok_or_else(|| Error::Validation(format!("history of lot {} is full", record.id)))?;
    let timestamp = now.max(record.updated_at);
    record.updated_at = timestamp;
    Ok((seq, timestamp))
}

fn plan_grant<V: StateView + ?Sized>(
    view: &V,
    granter: &Address,
    role: Role,
    account: &Address,
) -> Result<Plan> {
    if account.is_empty() {
        return Err(Error::Validation("grantee address must not be empty".to_string()));
    }

    let mut roles = view.roles_of(account)?;
    if !roles.insert(role) {
        return Err(Error::Validation(format!("{} already holds {}", account, role)));
    }

    Ok(Plan {
        roles: vec![(account.clone(), roles)],
        events: vec![LedgerEvent::RoleGranted(RoleGranted {
            role,
            account: account.clone(),
            granter: granter.clone(),
        })],
        ..Plan::default()
    })
}

fn plan_revoke<V: StateView + ?Sized>(
    view: &V,
    revoker: &Address,
    role: Role,
    account: &Address,
) -> Result<Plan> {
    let mut roles = view.roles_of(account)?;
    if !roles.remove(role) {
        return Err(Error::Validation(format!("{} does not hold {}", account, role)));
    }

    Ok(Plan {
        roles: vec![(account.clone(), roles)],
        events: vec![LedgerEvent::RoleRevoked(RoleRevoked {
            role,
            account: account.clone(),
            revoker: revoker.clone(),
        })],
        ..Plan::default()
    })
}

/// Grant Admin to the configured bootstrap address unless it already holds it
pub fn plan_admin_bootstrap<V: StateView + ?Sized>(view: &V, admin: &Address) -> Result<Option<Plan>> {
    if admin.is_empty() {
        return Err(Error::Validation("admin address must not be empty".to_string()));
    }

    let mut roles = view.roles_of(admin)?;
    if !roles.insert(Role::Admin) {
        return Ok(None);
    }

    Ok(Some(Plan {
        roles: vec![(admin.clone(), roles)],
        events: vec![LedgerEvent::RoleGranted(RoleGranted {
            role: Role::Admin,
            account: admin.clone(),
            granter: admin.clone(),
        })],
        ..Plan::default()
    }))
}
