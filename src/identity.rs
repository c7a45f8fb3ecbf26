//! Acting-employee identity consumed by the board.

use crate::board::models::{EmployeeId, OwnershipScope};

/// Supplies who is looking at the board and whether their role pins the
/// ownership scope to their own leads.
pub trait IdentityProvider: Send + Sync {
    fn acting_employee(&self) -> Option<EmployeeId>;

    fn scope_forced(&self) -> bool;

    /// Scope the board starts with.
    fn initial_scope(&self) -> OwnershipScope {
        match (self.scope_forced(), self.acting_employee()) {
            (true, Some(employee)) => OwnershipScope::OwnedBy(employee),
            _ => OwnershipScope::All,
        }
    }
}

/// Fixed identity, usually built from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity {
    pub employee_id: Option<EmployeeId>,
    pub force_own_scope: bool,
}

impl StaticIdentity {
    pub fn new(employee_id: Option<EmployeeId>, force_own_scope: bool) -> Self {
        Self {
            employee_id,
            force_own_scope,
        }
    }
}

impl IdentityProvider for StaticIdentity {
    fn acting_employee(&self) -> Option<EmployeeId> {
        self.employee_id.clone()
    }

    fn scope_forced(&self) -> bool {
        self.force_own_scope && self.employee_id.is_some()
    }
}
