//! Row-level access policies.
//!
//! The list below mirrors the `CREATE POLICY` statements in the schema
//! migration. Policies are permissive: an operation is allowed when any
//! policy for its table and operation admits the caller. Roles are
//! additive, so every policy names `admin` explicitly instead of relying
//! on an ordering between roles.

use std::fmt;

use serde::Serialize;
use uuid::Uuid;

use crate::models::Role;
use crate::session::Caller;

/// Tables protected by a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Staff,
    Patients,
    Appointments,
    MedicalRecords,
    Vitals,
    Prescriptions,
    LabResults,
}

impl Table {
    pub const ALL: [Table; 7] = [
        Table::Staff,
        Table::Patients,
        Table::Appointments,
        Table::MedicalRecords,
        Table::Vitals,
        Table::Prescriptions,
        Table::LabResults,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Staff => "staff",
            Table::Patients => "patients",
            Table::Appointments => "appointments",
            Table::MedicalRecords => "medical_records",
            Table::Vitals => "vitals",
            Table::Prescriptions => "prescriptions",
            Table::LabResults => "lab_results",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Select,
    Insert,
    Update,
}

impl Operation {
    pub const ALL: [Operation; 3] = [Operation::Select, Operation::Insert, Operation::Update];
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Select => "select",
            Operation::Insert => "insert",
            Operation::Update => "update",
        })
    }
}

/// A row type stored in a policy-protected table.
pub trait Guarded {
    const TABLE: Table;

    /// Identity the row is bound to, for policies that admit the row's owner.
    fn bound_identity(&self) -> Option<Uuid> {
        None
    }
}

/// Who a policy admits.
#[derive(Debug, Clone, Copy)]
pub enum Grant {
    /// Any caller holding a staff role
    AnyStaff,
    /// Any staff caller, or the identity the row is bound to
    AnyStaffOrSelf,
    /// Callers holding one of the listed roles
    Roles(&'static [Role]),
}

impl Grant {
    fn admits(&self, caller: &Caller, row_identity: Option<Uuid>) -> bool {
        match self {
            Grant::AnyStaff => caller.role().is_some(),
            Grant::AnyStaffOrSelf => {
                caller.role().is_some() || row_identity == Some(caller.identity())
            }
            Grant::Roles(roles) => caller.role().is_some_and(|role| roles.contains(&role)),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Policy {
    pub name: &'static str,
    pub table: Table,
    pub operations: &'static [Operation],
    pub grant: Grant,
}

const SELECT: &[Operation] = &[Operation::Select];
const INSERT: &[Operation] = &[Operation::Insert];
const UPDATE: &[Operation] = &[Operation::Update];
const MANAGE: &[Operation] = &[Operation::Select, Operation::Insert, Operation::Update];

use Role::{Admin, Doctor, LabTechnician, Nurse, Receptionist};

pub const POLICIES: &[Policy] = &[
    Policy { name: "staff_select", table: Table::Staff, operations: SELECT, grant: Grant::AnyStaffOrSelf },
    Policy { name: "staff_manage", table: Table::Staff, operations: MANAGE, grant: Grant::Roles(&[Admin]) },
    Policy { name: "patients_select", table: Table::Patients, operations: SELECT, grant: Grant::AnyStaff },
    Policy {
        name: "patients_insert",
        table: Table::Patients,
        operations: INSERT,
        grant: Grant::Roles(&[Receptionist, Admin]),
    },
    Policy {
        name: "patients_update",
        table: Table::Patients,
        operations: UPDATE,
        grant: Grant::Roles(&[Receptionist, Admin]),
    },
    Policy { name: "appointments_select", table: Table::Appointments, operations: SELECT, grant: Grant::AnyStaff },
    Policy {
        name: "appointments_manage",
        table: Table::Appointments,
        operations: MANAGE,
        grant: Grant::Roles(&[Receptionist, Doctor, Admin]),
    },
    Policy {
        name: "medical_records_select",
        table: Table::MedicalRecords,
        operations: SELECT,
        grant: Grant::Roles(&[Doctor, Nurse, Admin]),
    },
    Policy {
        name: "medical_records_insert",
        table: Table::MedicalRecords,
        operations: INSERT,
        grant: Grant::Roles(&[Doctor, Admin]),
    },
    Policy {
        name: "medical_records_update",
        table: Table::MedicalRecords,
        operations: UPDATE,
        grant: Grant::Roles(&[Doctor, Admin]),
    },
    Policy { name: "vitals_select", table: Table::Vitals, operations: SELECT, grant: Grant::AnyStaff },
    Policy {
        name: "vitals_manage",
        table: Table::Vitals,
        operations: MANAGE,
        grant: Grant::Roles(&[Nurse, Doctor, Admin]),
    },
    Policy { name: "prescriptions_select", table: Table::Prescriptions, operations: SELECT, grant: Grant::AnyStaff },
    Policy {
        name: "prescriptions_insert",
        table: Table::Prescriptions,
        operations: INSERT,
        grant: Grant::Roles(&[Doctor, Admin]),
    },
    Policy { name: "lab_results_select", table: Table::LabResults, operations: SELECT, grant: Grant::AnyStaff },
    Policy {
        name: "lab_results_insert",
        table: Table::LabResults,
        operations: INSERT,
        grant: Grant::Roles(&[Doctor, Admin]),
    },
    Policy {
        name: "lab_results_update",
        table: Table::LabResults,
        operations: UPDATE,
        grant: Grant::Roles(&[LabTechnician, Doctor, Admin]),
    },
];

/// Decide whether `caller` may perform `operation` on a row of `table`.
///
/// `row_identity` is the identity the row is bound to (only staff rows have
/// one); pass `None` for role-level checks made before a row is known.
pub fn is_allowed(caller: &Caller, table: Table, operation: Operation, row_identity: Option<Uuid>) -> bool {
    POLICIES
        .iter()
        .filter(|p| p.table == table && p.operations.contains(&operation))
        .any(|p| p.grant.admits(caller, row_identity))
}

/// Row-aware form of [`is_allowed`].
pub fn permits<R: Guarded>(caller: &Caller, operation: Operation, row: &R) -> bool {
    is_allowed(caller, R::TABLE, operation, row.bound_identity())
}

/// Keep only the rows `caller` may select.
pub fn visible<R: Guarded>(caller: &Caller, rows: Vec<R>) -> Vec<R> {
    rows.into_iter()
        .filter(|row| permits(caller, Operation::Select, row))
        .collect()
}
