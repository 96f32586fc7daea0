//! Verify command implementation.

use catidx_core::{CatalogIndex, CoreResult, EntityIndex, PartKind, PartStore, Scope};
use std::path::Path;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of parts decoded.
    pub parts_checked: usize,
    /// Number of catalog directories reloaded.
    pub catalog_indexes_checked: usize,
    /// Number of entity indexes reloaded.
    pub entity_indexes_checked: usize,
    /// Recorded states worth a look, such as chain conflicts.
    pub warnings: Vec<String>,
    /// List of errors found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying part store at {:?}", path);
    println!();

    let store = super::open_existing(path)?;
    let result = verify(&store)?;
    print_result(&result);

    println!();
    if result.is_ok() {
        println!("✓ Part store verification passed");
        Ok(())
    } else {
        println!("✗ Part store verification failed");
        Err("Verification failed".into())
    }
}

/// Decodes every part, then reloads every directory and checks the
/// invariants of the reconstructed indexes.
pub fn verify(store: &PartStore) -> CoreResult<VerifyResult> {
    let mut result = VerifyResult::default();
    let addresses = store.addresses()?;

    for address in &addresses {
        result.parts_checked += 1;
        if let Err(err) = store.get_any(*address) {
            result.errors.push(format!("{address}: {err}"));
        }
    }

    for scope in Scope::ALL {
        match CatalogIndex::load(scope, store) {
            Ok(_) => result.catalog_indexes_checked += 1,
            Err(err) => result.errors.push(format!("catalog index {scope:?}: {err}")),
        }
    }

    let directories = addresses
        .iter()
        .filter(|address| address.kind == PartKind::EntityIndex.as_byte());
    for address in directories {
        let Ok(primary_key) = u32::try_from(address.id) else {
            result
                .errors
                .push(format!("{address}: entity index id exceeds 32 bits"));
            continue;
        };
        match EntityIndex::load(primary_key, store) {
            Ok(index) => {
                result.entity_indexes_checked += 1;
                check_entity_index(&index, &mut result);
            }
            Err(err) => result.errors.push(format!("entity index {primary_key}: {err}")),
        }
    }

    tracing::debug!(
        parts = result.parts_checked,
        entity_indexes = result.entity_indexes_checked,
        errors = result.errors.len(),
        "verified part store"
    );
    Ok(result)
}

fn check_entity_index(index: &EntityIndex, result: &mut VerifyResult) {
    let pk = index.primary_key();

    if let Some(hierarchy) = index.hierarchy() {
        let report = hierarchy.report();
        if !report.partitioned {
            result.errors.push(format!(
                "entity index {pk}: hierarchy nodes are not partitioned into reachable and orphans"
            ));
        }
        if report.orphans > 0 {
            result
                .warnings
                .push(format!("entity index {pk}: {} orphan hierarchy nodes", report.orphans));
        }
    }

    for sort in index.sort_indexes() {
        if !sort.is_consistent() {
            result.errors.push(format!(
                "entity index {pk}: sort index {} does not match its value blocks",
                sort.attribute_key()
            ));
        }
    }

    for chain in index.chain_indexes() {
        let report = chain.report();
        if !report.conflicts.is_empty() || !report.orphans.is_empty() {
            result.warnings.push(format!(
                "entity index {pk}: chain {} has {} heads, conflicts {:?}, orphans {:?}",
                chain.attribute_key(),
                report.heads,
                report.conflicts,
                report.orphans
            ));
        }
    }
}

fn print_result(result: &VerifyResult) {
    println!(
        "  parts: {}, catalog indexes: {}, entity indexes: {}",
        result.parts_checked, result.catalog_indexes_checked, result.entity_indexes_checked
    );
    for warning in &result.warnings {
        println!("    WARNING: {}", warning);
    }
    for error in &result.errors {
        println!("    ERROR: {}", error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catidx_core::{AttributeIndexKey, AttributeKey, EntityIndexKey, ValueKind};

    fn populated_store() -> PartStore {
        let store = PartStore::in_memory();
        let catalog = CatalogIndex::new(Scope::Live);
        catalog
            .register_unique(&AttributeKey::new("sku"), ValueKind::Text, "S".into(), 1, None, 1)
            .unwrap();
        catalog.persist(&store).unwrap();

        let mut index = EntityIndex::new(2, EntityIndexKey::global(Scope::Live));
        index.insert_entity(1);
        index.insert_entity(2);
        let hierarchy = index.hierarchy_mut();
        hierarchy.set_hierarchy_for(1, None, 0).unwrap();
        hierarchy.set_hierarchy_for(2, Some(9), 0).unwrap();
        let chain = index.chain_index_mut(&AttributeIndexKey::new("order"));
        chain.upsert_predecessor(1, None).unwrap();
        chain.upsert_predecessor(2, Some(5)).unwrap();
        index.persist(&store).unwrap();
        store
    }

    #[test]
    fn healthy_store_passes() {
        let result = verify(&populated_store()).unwrap();
        assert!(result.is_ok(), "{:?}", result.errors);
        assert_eq!(result.catalog_indexes_checked, 2);
        assert_eq!(result.entity_indexes_checked, 1);
        assert_eq!(result.warnings.len(), 2);
    }

    #[test]
    fn missing_child_is_reported() {
        let store = populated_store();
        assert!(store.remove(PartKind::Hierarchy.address(2)).unwrap());

        let result = verify(&store).unwrap();
        assert!(!result.is_ok());
        assert_eq!(result.entity_indexes_checked, 0);
        assert!(result.errors[0].contains("entity index 2"));
    }
}
