pub mod create_admin;

pub use create_admin::{create_admin, ensure_admin};
