//! Infrastructure adapters behind the domain ports.

pub mod bridge;
pub mod sqlite;
