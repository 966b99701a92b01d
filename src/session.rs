//! Binding of an authenticated identity to its staff profile.

use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Role, Staff};
use crate::store::Store;

/// The explicit caller context passed into every data-access call.
///
/// A caller whose identity has no staff row is roleless: authenticated, but
/// admitted by no policy other than reading its own (absent) profile.
#[derive(Debug, Clone)]
pub struct Caller {
    identity: Uuid,
    staff: Option<Staff>,
    role: Option<Role>,
}

impl Caller {
    pub fn new(identity: Uuid, staff: Option<Staff>) -> Self {
        let role = staff.as_ref().map(|s| s.role);
        Caller { identity, staff, role }
    }

    pub fn roleless(identity: Uuid) -> Self {
        Caller::new(identity, None)
    }

    /// Caller holding `role` without a backing staff row; used to evaluate
    /// policies in isolation.
    pub fn with_role(identity: Uuid, role: Role) -> Self {
        Caller {
            identity,
            staff: None,
            role: Some(role),
        }
    }

    pub fn identity(&self) -> Uuid {
        self.identity
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn staff(&self) -> Option<&Staff> {
        self.staff.as_ref()
    }

    pub fn staff_id(&self) -> Option<Uuid> {
        self.staff.as_ref().map(|s| s.id)
    }
}

/// Resolve `identity` to a caller. Zero bound staff rows is not an error.
pub fn resolve(store: &dyn Store, identity: Uuid) -> Result<Caller> {
    let staff = store.find_staff_by_user(identity)?;
    match &staff {
        Some(profile) => debug!(%identity, staff_id = %profile.id, role = %profile.role, "identity resolved"),
        None => debug!(%identity, "identity has no staff profile; treating as roleless"),
    }
    Ok(Caller::new(identity, staff))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewStaff;
    use crate::store::MemoryStore;

    #[test]
    fn unbound_identity_resolves_to_roleless_caller() {
        let store = MemoryStore::new();
        let caller = resolve(&store, Uuid::new_v4()).unwrap();
        assert_eq!(caller.role(), None);
        assert!(caller.staff().is_none());
    }

    #[test]
    fn bound_identity_carries_role_and_staff_id() {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();
        let staff = store
            .insert_staff(NewStaff {
                user_id,
                full_name: "Grace Hopper".into(),
                role: Role::Nurse,
                specialization: None,
                phone: None,
                email: "grace@example.org".into(),
                license_number: None,
            })
            .unwrap();

        let caller = resolve(&store, user_id).unwrap();
        assert_eq!(caller.role(), Some(Role::Nurse));
        assert_eq!(caller.staff_id(), Some(staff.id));
        assert_eq!(caller.identity(), user_id);
    }
}
