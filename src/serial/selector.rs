use std::io::{BufRead, Write};

use async_trait::async_trait;

use super::interface::discover_ports;

#[derive(Debug, thiserror::Error)]
pub enum SelectionError {
    /// The operator dismissed the prompt
    #[error("Port selection cancelled")]
    Cancelled,

    /// There was nothing to choose from
    #[error("No serial ports found")]
    NoCandidates,

    #[error("Port selection failed: {0}")]
    Io(String),
}

/// Operator-driven choice of a physical port
#[async_trait]
pub trait PortSelector: Send + Sync {
    async fn select_port(&self) -> Result<String, SelectionError>;
}

/// Always answers with a preconfigured port
pub struct FixedPortSelector {
    port_name: String,
}

impl FixedPortSelector {
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
        }
    }
}

#[async_trait]
impl PortSelector for FixedPortSelector {
    async fn select_port(&self) -> Result<String, SelectionError> {
        Ok(self.port_name.clone())
    }
}

/// Lists discovered ports on stderr and reads the choice from stdin
#[derive(Debug, Default)]
pub struct PromptPortSelector;

#[async_trait]
impl PortSelector for PromptPortSelector {
    async fn select_port(&self) -> Result<String, SelectionError> {
        let ports = discover_ports().map_err(|e| SelectionError::Io(e.to_string()))?;
        if ports.is_empty() {
            return Err(SelectionError::NoCandidates);
        }

        tokio::task::spawn_blocking(move || {
            let mut stderr = std::io::stderr();
            for (index, port) in ports.iter().enumerate() {
                let label = port.product.as_deref().unwrap_or("unknown device");
                let _ = writeln!(
                    stderr,
                    "  [{}] {} ({}, {:04X}:{:04X})",
                    index + 1,
                    port.port_name,
                    label,
                    port.vid,
                    port.pid
                );
            }
            let _ = write!(stderr, "Select a port (empty to cancel): ");
            let _ = stderr.flush();

            let mut line = String::new();
            std::io::stdin()
                .lock()
                .read_line(&mut line)
                .map_err(|e| SelectionError::Io(e.to_string()))?;

            parse_choice(line.trim(), ports.len())
                .map(|index| ports[index].port_name.clone())
        })
        .await
        .map_err(|e| SelectionError::Io(e.to_string()))?
    }
}

/// Map a 1-based answer onto an index; empty or `q` cancels
fn parse_choice(answer: &str, count: usize) -> Result<usize, SelectionError> {
    if answer.is_empty() || answer.eq_ignore_ascii_case("q") {
        return Err(SelectionError::Cancelled);
    }
    match answer.parse::<usize>() {
        Ok(n) if n >= 1 && n <= count => Ok(n - 1),
        _ => Err(SelectionError::Cancelled),
    }
}
