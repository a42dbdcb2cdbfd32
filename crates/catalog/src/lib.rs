//! Operator-owned catalog of tool-server configurations.
//!
//! The catalog is an ordered list of [`ServerRecord`]s persisted as a
//! versioned JSON export bundle. The same bundle format is used to move
//! configurations between machines.
//!
//! # Example
//!
//! ```no_run
//! use catalog::{ImportMode, ServerCatalog};
//! use mcp::ServerConfig;
//!
//! # fn example() -> catalog::Result<()> {
//! let mut catalog = ServerCatalog::load("toolbridge-servers.json")?;
//! catalog.upsert(ServerConfig::stdio("fs", "Filesystem", "mcp-server-filesystem"));
//! catalog.save("toolbridge-servers.json")?;
//!
//! let bundle = std::fs::read_to_string("shared-servers.json")?;
//! let summary = catalog.import(&bundle, ImportMode::Merge)?;
//! println!("imported {}, skipped {}", summary.imported, summary.skipped);
//! # Ok(())
//! # }
//! ```

mod catalog;
mod error;

pub use catalog::{
    BUNDLE_VERSION, ExportBundle, ImportMode, ImportSummary, ServerCatalog, ServerRecord,
};
pub use error::{Error, Result};
