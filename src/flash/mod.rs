pub mod driver;
pub mod esp;
pub mod orchestrator;
pub mod progress;

pub use driver::{
    DriverError, DriverFactory, FlashDriver, FlashGeometry, FlashSegment, ProgressFn, WriteRequest,
    DEFAULT_FLASH_OFFSET,
};
pub use esp::EspflashFactory;
pub use orchestrator::{FlashOrchestrator, FlashPhase, FlashReport, SUCCESS_MESSAGE};
pub use progress::{progress_percent, FlashProgress, ProgressTracker};
