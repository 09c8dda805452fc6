//! API-compatible types.
//!
//! The types in this module are serialised in an API-friendly way, e.g.:
//!
//! - IDs are serialised as hex strings.
//! - Datetimes are serialised as RFC 3339 strings.

pub mod admin;
pub mod auth;
pub mod ballot;
pub mod election;
pub mod group;
pub mod id;
pub mod invitation;
pub mod pagination;
pub mod receipt;
pub mod results;
pub mod voter;
