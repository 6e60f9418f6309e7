// src/maintenance/mod.rs

//! Maintenance tool persistence
//!
//! A maintenance tool is a copy of the base executable with the installed
//! state appended, so later runs can uninstall, update or reinstall without
//! contacting a repository. The appended data is:
//!
//! ```text
//! [executable][role marker][operation log (CBOR)][metadata (CBOR)]
//! [footer: exe_len, ops_offset, ops_len, meta_offset, meta_len, crc32, role marker, cookie]
//! ```
//!
//! Every footer field is a little-endian `u64`. The CRC covers the operation
//! log and metadata blocks.

mod layout;
mod writer;

pub use layout::{BinaryLayout, FOOTER_LEN, MaintenanceMetadata, parse_layout, read_layout};
pub use writer::{MaintenanceToolWriter, remove_maintenance_tool};
