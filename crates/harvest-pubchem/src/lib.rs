//! Harvest PubChem - compound record harvesting
//!
//! Walks the CID space (or a predefined CID list), stores each PUG-View
//! record in an append log, and projects the log into compound and
//! description tables.
//!
//! # Example
//!
//! ```ignore
//! use harvest_pubchem::{DownloadConfig, download};
//!
//! let config = DownloadConfig {
//!     max_cid: 5000,
//!     ..Default::default()
//! };
//! let summary = download(&config, stop, progress)?;
//! println!("Fetched {} compounds", summary.succeeded);
//! ```

pub mod client;
pub mod config;
pub mod runner;
pub mod source;
pub mod transform;

// Re-exports
pub use client::PubChemClient;
pub use config::{DownloadConfig, ParseConfig};
pub use runner::{download, download_with, parse};
pub use source::{Cid, CidSource};
pub use transform::CompoundProjection;
