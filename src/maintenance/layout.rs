// src/maintenance/layout.rs

//! Binary layout encoding and parsing

use crate::error::{Error, Result};
use crate::installed::{InstalledRegistry, LocalPackage, RegistryDocument};
use crate::operation::Operation;
use crate::role::{MAGIC_COOKIE, Role};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Current metadata format version
pub const FORMAT_VERSION: u8 = 1;

/// Number of `u64` fields in the footer
const FOOTER_FIELDS: usize = 8;

/// Footer size in bytes
pub const FOOTER_LEN: usize = FOOTER_FIELDS * 8;

/// Size of the role marker written right after the executable
const MARKER_LEN: u64 = 8;

/// Package records without their operations (CBOR-encoded)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceMetadata {
    pub format_version: u8,
    /// RFC 3339 timestamp of the write
    pub created: String,
    /// Version of the library that wrote the layout
    pub generator: String,
    #[serde(default)]
    pub packages: BTreeMap<String, LocalPackage>,
}

impl MaintenanceMetadata {
    /// Metadata for `registry`, with operations stripped
    pub fn from_registry(registry: &InstalledRegistry) -> Self {
        let packages = registry
            .packages()
            .iter()
            .map(|(name, package)| {
                let mut package = package.clone();
                package.operations.clear();
                (name.clone(), package)
            })
            .collect();

        Self {
            format_version: FORMAT_VERSION,
            created: chrono::Utc::now().to_rfc3339(),
            generator: env!("CARGO_PKG_VERSION").to_string(),
            packages,
        }
    }
}

/// Decoded contents of a maintenance tool
#[derive(Debug, Clone)]
pub struct BinaryLayout {
    pub role: Role,
    /// Length of the original executable at the start of the file
    pub exe_len: u64,
    /// Every recorded operation, ordered by sequence number
    pub operations: Vec<Operation>,
    pub metadata: MaintenanceMetadata,
}

impl BinaryLayout {
    /// Rebuild the installed registry this layout was written from
    ///
    /// Operations go back to the package that owns them. Operations without
    /// an owner, or whose owner has no package record, become session-owned.
    pub fn into_registry(self, path: impl Into<PathBuf>) -> InstalledRegistry {
        let mut doc = RegistryDocument {
            packages: self.metadata.packages,
            detached_operations: Vec::new(),
        };

        for op in self.operations {
            let owner = op.component().to_string();
            match doc.packages.get_mut(&owner) {
                Some(package) => package.operations.push(op),
                None => {
                    if !owner.is_empty() {
                        warn!(
                            "Operation {} belongs to unknown package {}, keeping it detached",
                            op.sequence, owner
                        );
                    }
                    doc.detached_operations.push(op);
                }
            }
        }

        InstalledRegistry::from_document(path, doc)
    }
}

fn cbor_encode<T: Serialize>(value: &T, what: &str) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf)
        .map_err(|e| Error::PersistenceFailed(format!("Failed to encode {}: {}", what, e)))?;
    Ok(buf)
}

/// Encode the bytes appended after an executable of `exe_len` bytes
pub(crate) fn encode_payload(
    role: Role,
    registry: &InstalledRegistry,
    exe_len: u64,
) -> Result<Vec<u8>> {
    let operations = registry.all_operations();
    let metadata = MaintenanceMetadata::from_registry(registry);

    let ops = cbor_encode(&operations, "operation log")?;
    let meta = cbor_encode(&metadata, "metadata")?;

    let ops_offset = exe_len + MARKER_LEN;
    let meta_offset = ops_offset + ops.len() as u64;

    let mut covered = Vec::with_capacity(ops.len() + meta.len());
    covered.extend_from_slice(&ops);
    covered.extend_from_slice(&meta);
    let crc = crc32fast::hash(&covered);

    let mut out = Vec::with_capacity(MARKER_LEN as usize + covered.len() + FOOTER_LEN);
    out.extend_from_slice(&role.marker().to_le_bytes());
    out.extend_from_slice(&covered);
    for field in [
        exe_len,
        ops_offset,
        ops.len() as u64,
        meta_offset,
        meta.len() as u64,
        u64::from(crc),
        role.marker(),
        MAGIC_COOKIE,
    ] {
        out.extend_from_slice(&field.to_le_bytes());
    }

    debug!(
        "Encoded {} operations and {} packages for {}",
        operations.len(),
        metadata.packages.len(),
        role
    );
    Ok(out)
}

fn footer(data: &[u8]) -> Option<[u64; FOOTER_FIELDS]> {
    let start = data.len().checked_sub(FOOTER_LEN)?;
    let mut fields = [0u64; FOOTER_FIELDS];
    for (i, chunk) in data[start..].chunks_exact(8).enumerate() {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(chunk);
        fields[i] = u64::from_le_bytes(bytes);
    }
    (fields[7] == MAGIC_COOKIE).then_some(fields)
}

/// Length of the plain executable inside `data`
///
/// A file that already carries a layout reports its original `exe_len`;
/// anything else is all executable.
pub(crate) fn executable_len(data: &[u8]) -> u64 {
    match footer(data) {
        Some(fields) if fields[0] <= data.len() as u64 => fields[0],
        _ => data.len() as u64,
    }
}

fn slice(data: &[u8], offset: u64, len: u64) -> Result<&[u8]> {
    let start = usize::try_from(offset)
        .map_err(|_| Error::InvalidLayout(format!("Offset {} out of range", offset)))?;
    let end = offset
        .checked_add(len)
        .and_then(|e| usize::try_from(e).ok())
        .filter(|e| *e <= data.len())
        .ok_or_else(|| {
            Error::InvalidLayout(format!("Block {}+{} exceeds file size", offset, len))
        })?;
    Ok(&data[start..end])
}

/// Parse a layout from the full contents of a maintenance tool
pub fn parse_layout(data: &[u8]) -> Result<BinaryLayout> {
    let [exe_len, ops_offset, ops_len, meta_offset, meta_len, crc, marker, _] = footer(data)
        .ok_or_else(|| Error::InvalidLayout("Missing magic cookie".to_string()))?;

    let payload_end = (data.len() - FOOTER_LEN) as u64;
    if exe_len.checked_add(MARKER_LEN) != Some(ops_offset)
        || ops_offset.checked_add(ops_len) != Some(meta_offset)
        || meta_offset.checked_add(meta_len) != Some(payload_end)
    {
        return Err(Error::InvalidLayout(format!(
            "Inconsistent offsets (exe {}, ops {}+{}, meta {}+{}, payload end {})",
            exe_len, ops_offset, ops_len, meta_offset, meta_len, payload_end
        )));
    }

    let mut inline = [0u8; 8];
    inline.copy_from_slice(slice(data, exe_len, MARKER_LEN)?);
    if u64::from_le_bytes(inline) != marker {
        return Err(Error::InvalidLayout(
            "Role marker does not match footer".to_string(),
        ));
    }
    let role = Role::from_marker(marker)?;

    let covered = slice(data, ops_offset, ops_len + meta_len)?;
    let actual = crc32fast::hash(covered);
    if u64::from(actual) != crc {
        return Err(Error::InvalidLayout(format!(
            "CRC mismatch: expected {:08x}, got {:08x}",
            crc, actual
        )));
    }

    let mut operations: Vec<Operation> = ciborium::from_reader(slice(data, ops_offset, ops_len)?)
        .map_err(|e| Error::InvalidLayout(format!("Failed to decode operation log: {}", e)))?;
    operations.sort_by_key(|op| op.sequence);

    let metadata: MaintenanceMetadata =
        ciborium::from_reader(slice(data, meta_offset, meta_len)?)
            .map_err(|e| Error::InvalidLayout(format!("Failed to decode metadata: {}", e)))?;

    Ok(BinaryLayout {
        role,
        exe_len,
        operations,
        metadata,
    })
}

/// Read and validate the layout of the maintenance tool at `path`
pub fn read_layout(path: &Path) -> Result<BinaryLayout> {
    let data = fs::read(path)
        .map_err(|e| Error::NotFound(format!("{}: {}", path.display(), e)))?;
    let layout = parse_layout(&data)?;
    debug!(
        "Read {} layout from {} ({} operations)",
        layout.role,
        path.display(),
        layout.operations.len()
    );
    Ok(layout)
}
