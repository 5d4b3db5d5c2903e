use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who owns the physical port right now
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConnectionState {
    Unbound,
    Monitoring { port_name: String },
    Flashing { port_name: String },
}

impl ConnectionState {
    pub fn port_name(&self) -> Option<&str> {
        match self {
            ConnectionState::Unbound => None,
            ConnectionState::Monitoring { port_name } | ConnectionState::Flashing { port_name } => {
                Some(port_name)
            }
        }
    }

    pub fn is_monitoring(&self) -> bool {
        matches!(self, ConnectionState::Monitoring { .. })
    }
}

/// The device the operator chose, kept across handoffs so the same port can
/// be reopened after flashing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BoundPort {
    pub port_name: String,
    pub baud_rate: u32,
    pub bound_at: DateTime<Utc>,
}

impl BoundPort {
    pub fn new(port_name: String, baud_rate: u32) -> Self {
        Self {
            port_name,
            baud_rate,
            bound_at: Utc::now(),
        }
    }
}
