pub mod commands;
pub mod config;
pub mod device;
pub mod error;
pub mod flash;
pub mod serial;
pub mod session;
pub mod status;
pub mod update;

pub use config::UpdaterConfig;
pub use error::{ErrorKind, NotReadyReason, UpdaterError};
pub use session::{Collaborators, UpdaterSession};
