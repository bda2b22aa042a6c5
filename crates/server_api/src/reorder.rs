//! Reordering of collection entries under a live `(collection, order)`
//! uniqueness constraint.
//!
//! A permutation is written in two phases inside one transaction. Phase one
//! moves every named entry to a distinct negative quarantine value, which no
//! live entry can hold. Phase two writes the requested orders, all of which
//! were vacated by phase one or were free to begin with. Either both phases
//! commit or the transaction is rolled back.

use std::collections::{BTreeMap, HashMap, HashSet};

use shared::{
    domain::{is_live_order, CollectionId, EntryId, EntryOrder, MAX_ENTRY_ORDER},
    error::{ApiError, ErrorCode},
};
use storage::{EntryOrderUnit, EntryPatch, Storage, StoredEntry};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ReorderError {
    #[error("collection {0} not found")]
    CollectionNotFound(CollectionId),
    #[error("entryOrders must not be empty")]
    EmptyRequest,
    #[error("entry {0} is listed more than once")]
    DuplicateEntry(EntryId),
    #[error("entry {0} does not exist")]
    UnknownEntry(EntryId),
    #[error("entry {entry_id} does not belong to collection {collection_id}")]
    ForeignEntry {
        entry_id: EntryId,
        collection_id: CollectionId,
    },
    #[error("order {order} for entry {entry_id} is outside 0..={}", MAX_ENTRY_ORDER)]
    OrderOutOfRange { entry_id: EntryId, order: i64 },
    #[error("order {order} would be held by both {held_by} and {requested_by}")]
    OrderCollision {
        order: i64,
        held_by: EntryId,
        requested_by: EntryId,
    },
    #[error("storage failure: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl From<ReorderError> for ApiError {
    fn from(value: ReorderError) -> Self {
        let code = match &value {
            ReorderError::CollectionNotFound(_) => ErrorCode::NotFound,
            ReorderError::Storage(_) => ErrorCode::StorageFailure,
            _ => ErrorCode::InvalidRequest,
        };
        ApiError::new(code, value.to_string())
    }
}

/// Placeholder order for the entry at `position` in a request during phase one.
pub const fn quarantine_order(position: usize) -> i64 {
    -(position as i64) - 1
}

/// Checks a requested permutation against the collection's current entries
/// before anything is written.
///
/// `current` holds every entry of the collection; `found` holds whatever the
/// requested ids resolved to across all collections. The resulting ordering,
/// with untouched entries at their current orders, must be collision free.
pub fn validate_permutation(
    collection_id: CollectionId,
    current: &[StoredEntry],
    found: &[StoredEntry],
    requested: &[EntryOrder],
) -> Result<(), ReorderError> {
    if requested.is_empty() {
        return Err(ReorderError::EmptyRequest);
    }

    let mut seen = HashSet::with_capacity(requested.len());
    for placement in requested {
        if !seen.insert(placement.entry_id) {
            return Err(ReorderError::DuplicateEntry(placement.entry_id));
        }
    }

    let found: HashMap<EntryId, CollectionId> = found
        .iter()
        .map(|entry| (entry.entry_id, entry.collection_id))
        .collect();
    let members: HashSet<EntryId> = current.iter().map(|entry| entry.entry_id).collect();
    for placement in requested {
        match found.get(&placement.entry_id) {
            None => return Err(ReorderError::UnknownEntry(placement.entry_id)),
            Some(owner) if *owner != collection_id || !members.contains(&placement.entry_id) => {
                return Err(ReorderError::ForeignEntry {
                    entry_id: placement.entry_id,
                    collection_id,
                });
            }
            Some(_) => {}
        }
        if !is_live_order(placement.new_order) {
            return Err(ReorderError::OrderOutOfRange {
                entry_id: placement.entry_id,
                order: placement.new_order,
            });
        }
    }

    let mut resulting: BTreeMap<i64, EntryId> = current
        .iter()
        .filter(|entry| !seen.contains(&entry.entry_id))
        .map(|entry| (entry.order, entry.entry_id))
        .collect();
    for placement in requested {
        if let Some(held_by) = resulting.insert(placement.new_order, placement.entry_id) {
            return Err(ReorderError::OrderCollision {
                order: placement.new_order,
                held_by,
                requested_by: placement.entry_id,
            });
        }
    }

    Ok(())
}

/// Applies entry permutations for one storage handle. Ownership is checked by
/// the caller before `reorder` runs.
pub struct ReorderCoordinator<'a> {
    storage: &'a Storage,
}

impl<'a> ReorderCoordinator<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    /// Moves each named entry to its requested order and returns the whole
    /// collection ascending by order. On any error no order has changed.
    pub async fn reorder(
        &self,
        collection_id: CollectionId,
        entry_orders: &[EntryOrder],
    ) -> Result<Vec<StoredEntry>, ReorderError> {
        self.apply(collection_id, entry_orders, None).await
    }

    /// Moves one entry and patches its display fields in the same
    /// transaction. Either both land or neither does.
    pub async fn move_and_patch(
        &self,
        collection_id: CollectionId,
        entry_id: EntryId,
        new_order: i64,
        patch: EntryPatch<'_>,
    ) -> Result<Vec<StoredEntry>, ReorderError> {
        let placement = [EntryOrder {
            entry_id,
            new_order,
        }];
        self.apply(collection_id, &placement, Some((entry_id, patch)))
            .await
    }

    async fn apply(
        &self,
        collection_id: CollectionId,
        entry_orders: &[EntryOrder],
        patch: Option<(EntryId, EntryPatch<'_>)>,
    ) -> Result<Vec<StoredEntry>, ReorderError> {
        self.storage
            .find_collection_by_id(collection_id)
            .await?
            .ok_or(ReorderError::CollectionNotFound(collection_id))?;
        if entry_orders.is_empty() {
            return Err(ReorderError::EmptyRequest);
        }

        let entry_ids: Vec<EntryId> = entry_orders.iter().map(|p| p.entry_id).collect();
        let found = self.storage.find_entries_by_ids(&entry_ids).await?;
        let current = self.storage.list_entries(collection_id).await?;
        validate_permutation(collection_id, &current, &found, entry_orders)?;

        let mut unit = self.storage.begin_entry_order_unit(collection_id).await?;
        if let Err(err) = write_unit(&mut unit, entry_orders, patch).await {
            let written = unit.writes();
            if let Err(rollback_err) = unit.rollback().await {
                warn!(%collection_id, error = %format!("{rollback_err:#}"), "reorder rollback failed");
            }
            warn!(%collection_id, written, error = %format!("{err:#}"), "reorder aborted");
            return Err(err.into());
        }
        unit.commit().await?;

        info!(%collection_id, entries = entry_orders.len(), "reordered collection entries");
        Ok(self.storage.list_entries(collection_id).await?)
    }
}

async fn write_unit(
    unit: &mut EntryOrderUnit,
    entry_orders: &[EntryOrder],
    patch: Option<(EntryId, EntryPatch<'_>)>,
) -> anyhow::Result<()> {
    for (position, placement) in entry_orders.iter().enumerate() {
        unit.update_entry_order(placement.entry_id, quarantine_order(position))
            .await?;
    }
    debug!(collection_id = %unit.collection_id(), "quarantine phase written");

    for placement in entry_orders {
        unit.update_entry_order(placement.entry_id, placement.new_order)
            .await?;
    }

    if let Some((entry_id, patch)) = patch.filter(|(_, patch)| !patch.is_empty()) {
        unit.update_entry_fields(entry_id, patch).await?;
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/reorder_tests.rs"]
mod tests;
