pub mod fetcher;
pub mod models;
pub mod resolver;
pub mod service;

pub use fetcher::{relay_url, BinaryFetcher};
pub use models::{Asset, DownloadProgress, FirmwareImage, ReleaseInfo, UpdateError, UpdateResult};
pub use resolver::{select_firmware_asset, ReleaseResolver};
pub use service::{FirmwareSource, UpdateService};
