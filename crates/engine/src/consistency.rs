//! Consistency check of a scan store against its change stream
//!
//! Compares every `(entity, token)` association the store reports with what
//! the authoritative change stream supplies.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokenscan_core::{EntityId, FullStoreChangeStream, RangeTree, Result, TokenId};

use crate::all_entries::AllEntriesReader;

/// Differences between the store and the change stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsistencyReport {
    /// Entities supplied by the change stream
    pub entities_checked: u64,
    /// Associations in the change stream but not in the store
    pub missing: Vec<(EntityId, TokenId)>,
    /// Associations in the store but not in the change stream
    pub unexpected: Vec<(EntityId, TokenId)>,
}

impl ConsistencyReport {
    /// True when store and change stream agree
    pub fn is_consistent(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty()
    }
}

/// Compare the contents of `tree` with `stream`
pub fn check_consistency(
    tree: Arc<dyn RangeTree>,
    stream: &dyn FullStoreChangeStream,
) -> Result<ConsistencyReport> {
    let mut expected: BTreeSet<(EntityId, TokenId)> = BTreeSet::new();
    let entities_checked = stream.apply_to(&mut |entity, tokens| {
        expected.extend(tokens.iter().map(|&token| (entity, token)));
        Ok(())
    })?;

    let mut actual: BTreeSet<(EntityId, TokenId)> = BTreeSet::new();
    for range in AllEntriesReader::new(tree) {
        let range = range?;
        for entity in range.entities() {
            actual.extend(range.tokens(entity).iter().map(|&token| (entity, token)));
        }
    }

    Ok(ConsistencyReport {
        entities_checked,
        missing: expected.difference(&actual).copied().collect(),
        unexpected: actual.difference(&expected).copied().collect(),
    })
}
