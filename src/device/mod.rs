pub mod manager;
pub mod models;

pub use manager::{ConnectionManager, PortLease};
pub use models::*;
