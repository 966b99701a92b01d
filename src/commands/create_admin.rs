//! Create admin command for hospital-ehr
//!
//! Staff rows can only be created by an admin, so the first admin is
//! written straight through the store, outside the policy layer.

use anyhow::{anyhow, Context, Result};
use tracing::info;
use uuid::Uuid;

use crate::models::{NewStaff, Role, Staff};
use crate::store::Store;

/// Insert an admin staff profile bound to `user_id`.
///
/// Fails if the identity already has a profile.
pub fn create_admin(store: &dyn Store, user_id: Uuid, full_name: &str, email: &str) -> Result<Staff> {
    if full_name.trim().is_empty() {
        return Err(anyhow!("Admin name must not be blank"));
    }
    if email.trim().is_empty() {
        return Err(anyhow!("Admin email must not be blank"));
    }

    let staff = store
        .insert_staff(NewStaff {
            user_id,
            full_name: full_name.to_string(),
            role: Role::Admin,
            specialization: None,
            phone: None,
            email: email.to_string(),
            license_number: None,
        })
        .with_context(|| format!("Failed to create admin profile for identity {}", user_id))?;

    info!(staff_id = %staff.id, %user_id, "Created admin '{}'", staff.full_name);
    Ok(staff)
}

/// Return the profile bound to `user_id`, creating an admin profile if the
/// identity has none. An existing profile is returned as-is, whatever its role.
pub fn ensure_admin(store: &dyn Store, user_id: Uuid, full_name: &str, email: &str) -> Result<Staff> {
    match store
        .find_staff_by_user(user_id)
        .context("Failed to look up bootstrap admin")?
    {
        Some(existing) => {
            if existing.role != Role::Admin {
                tracing::warn!(
                    %user_id,
                    role = %existing.role,
                    "bootstrap identity already has a non-admin profile"
                );
            }
            Ok(existing)
        }
        None => create_admin(store, user_id, full_name, email),
    }
}
