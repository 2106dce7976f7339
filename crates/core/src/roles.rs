//! Well-known role name constants.
//!
//! Operator tokens carry one of these in their `role` claim.

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_STAFF: &str = "staff";
