//! Capability checks
//!
//! Every mutating operation names the roles allowed to perform it. Role
//! grants follow a two-level delegation chain: producers appoint
//! distributors, distributors appoint retailers, and only an admin may grant
//! or revoke arbitrary roles.

use crate::{
    types::{Address, Role, RoleSet},
    Error, Result,
};

/// Mutating ledger operation, for capability lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    RegisterLot,
    UpdateLot,
    TriggerRecall,
    AssignDistributor,
    AssignRetailer,
    GrantRole,
    RevokeRole,
}

impl Operation {
    /// Label used in logs and metrics
    pub fn name(&self) -> &'static str {
        match self {
            Operation::RegisterLot => "register_lot",
            Operation::UpdateLot => "update_lot",
            Operation::TriggerRecall => "trigger_recall",
            Operation::AssignDistributor => "assign_distributor",
            Operation::AssignRetailer => "assign_retailer",
            Operation::GrantRole => "grant_role",
            Operation::RevokeRole => "revoke_role",
        }
    }

    /// Roles that may perform the operation (any one suffices)
    pub fn required_roles(&self) -> &'static [Role] {
        match self {
            Operation::RegisterLot => &[Role::Producer],
            Operation::UpdateLot => &[Role::Producer, Role::Distributor, Role::Retailer],
            Operation::TriggerRecall => &[Role::Regulator],
            Operation::AssignDistributor => &[Role::Producer],
            Operation::AssignRetailer => &[Role::Distributor],
            Operation::GrantRole | Operation::RevokeRole => &[Role::Admin],
        }
    }
}

/// Reject the caller unless it holds one of the operation's roles
pub fn authorize(caller: &Address, held: RoleSet, operation: Operation) -> Result<()> {
    let required = operation.required_roles();
    if held.contains_any(required) {
        Ok(())
    } else {
        Err(Error::unauthorized(caller, required))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(roles: &[Role]) -> RoleSet {
        let mut set = RoleSet::empty();
        for r in roles {
            set.insert(*r);
        }
        set
    }

    #[test]
    fn test_register_requires_producer() {
        let caller = Address::new("0xp");
        assert!(authorize(&caller, set(&[Role::Producer]), Operation::RegisterLot).is_ok());
        for role in [Role::Admin, Role::Distributor, Role::Retailer, Role::Regulator] {
            let err = authorize(&caller, set(&[role]), Operation::RegisterLot).unwrap_err();
            assert!(matches!(err, Error::Unauthorized { .. }));
        }
    }

    #[test]
    fn test_update_accepts_chain_roles() {
        let caller = Address::new("0xc");
        for role in [Role::Producer, Role::Distributor, Role::Retailer] {
            assert!(authorize(&caller, set(&[role]), Operation::UpdateLot).is_ok());
        }
        assert!(authorize(&caller, set(&[Role::Regulator]), Operation::UpdateLot).is_err());
        assert!(authorize(&caller, RoleSet::empty(), Operation::UpdateLot).is_err());
    }

    #[test]
    fn test_delegation_chain() {
        let caller = Address::new("0xc");
        assert!(authorize(&caller, set(&[Role::Producer]), Operation::AssignDistributor).is_ok());
        assert!(authorize(&caller, set(&[Role::Producer]), Operation::AssignRetailer).is_err());
        assert!(authorize(&caller, set(&[Role::Distributor]), Operation::AssignRetailer).is_ok());
        assert!(authorize(&caller, set(&[Role::Admin]), Operation::AssignDistributor).is_err());
        assert!(authorize(&caller, set(&[Role::Admin]), Operation::GrantRole).is_ok());
    }
}
