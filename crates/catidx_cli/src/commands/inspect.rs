//! Inspect command implementation.

use catidx_core::{codec, CoreResult, PartKind, PartStore};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Part store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Part file path.
    pub path: String,
    /// File size in bytes.
    pub total_size: u64,
    /// Number of keys known to the key compressor.
    pub compressed_keys: usize,
    /// Number of parts per kind name.
    pub kinds: BTreeMap<String, usize>,
    /// Every stored part, in address order.
    pub parts: Vec<PartInfo>,
}

/// One stored part.
#[derive(Debug, Serialize)]
pub struct PartInfo {
    /// Kind name.
    pub kind: String,
    /// Storage part id.
    pub id: u64,
    /// Owning entity index for keyed parts.
    pub owner: u32,
    /// Envelope size in bytes.
    pub size: usize,
    /// Body layout version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_version: Option<u8>,
    /// Uncompressed logical key, if the part has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Decoding error, if the part could not be read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = super::open_existing(path)?;
    let result = inspect(path, &store)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Collects the description of every stored part.
pub fn inspect(path: &Path, store: &PartStore) -> CoreResult<InspectResult> {
    let mut result = InspectResult {
        path: path.display().to_string(),
        total_size: store.size()?,
        compressed_keys: store.compressor().len(),
        kinds: BTreeMap::new(),
        parts: Vec::new(),
    };

    for address in store.addresses()? {
        let kind = PartKind::from_byte(address.kind).map_or("unknown", PartKind::name);
        *result.kinds.entry(kind.to_string()).or_insert(0) += 1;

        let bytes = store.read_raw(address)?.unwrap_or_default();
        let mut info = PartInfo {
            kind: kind.to_string(),
            id: address.id,
            owner: (address.id >> 32) as u32,
            size: bytes.len(),
            body_version: None,
            key: None,
            error: None,
        };
        match codec::decode_envelope(&bytes) {
            Ok((envelope, _)) => info.body_version = Some(envelope.body_version),
            Err(err) => info.error = Some(err.to_string()),
        }
        if info.error.is_none() {
            match store.get_any(address) {
                Ok(part) => {
                    info.key = part.and_then(|part| part.source_key()).map(|key| key.to_string());
                }
                Err(err) => info.error = Some(err.to_string()),
            }
        }
        result.parts.push(info);
    }

    Ok(result)
}

fn print_text_output(result: &InspectResult) {
    println!("catidx Part Store Inspection");
    println!("============================");
    println!();
    println!("Path: {}", result.path);
    println!("Size: {}", format_size(result.total_size));
    println!("Compressed keys: {}", result.compressed_keys);
    println!();
    println!("Parts by kind:");
    for (kind, count) in &result.kinds {
        println!("  {kind:<28} {count}");
    }
    println!();
    println!("Parts:");
    for part in &result.parts {
        let key = part.key.as_deref().unwrap_or("-");
        println!(
            "  {:<28} {:>20}  {:>8} bytes  v{}  {}",
            part.kind,
            part.id,
            part.size,
            part.body_version.map_or_else(|| "?".to_string(), |v| v.to_string()),
            key
        );
        if let Some(error) = &part.error {
            println!("    ERROR: {error}");
        }
    }
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} bytes")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
