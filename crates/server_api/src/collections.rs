use shared::{
    domain::{
        is_live_order, CollectionId, CollectionKind, ComicId, EntryId, EntryOrder, UserId,
        MAX_ENTRY_ORDER,
    },
    error::{ApiError, ErrorCode},
    protocol::{
        AddEntryRequest, CollectionDetail, CollectionSummary, CreateCollectionRequest,
        EntrySummary, Page, PageRequest, UpdateEntryRequest,
    },
};
use storage::{is_unique_violation, EntryPatch, NewEntry};
use tracing::info;

use crate::{
    collection_summary, ensure_known_user, ensure_owner, entry_summary, internal,
    load_collection, reorder::ReorderCoordinator, validate_title, ApiContext,
};

pub async fn create_collection(
    ctx: &ApiContext,
    caller: UserId,
    req: CreateCollectionRequest,
) -> Result<CollectionSummary, ApiError> {
    ensure_known_user(ctx, caller).await?;
    let title = validate_title(&req.title)?;
    let description = req
        .description
        .as_deref()
        .map(str::trim)
        .filter(|text| !text.is_empty());

    let collection = ctx
        .storage
        .create_collection(req.kind, caller, title, description)
        .await
        .map_err(internal)?;
    info!(
        collection_id = %collection.collection_id,
        kind = %collection.kind,
        owner_id = %caller,
        "collection created"
    );
    Ok(collection_summary(collection))
}

pub async fn get_collection(
    ctx: &ApiContext,
    collection_id: CollectionId,
    kind: Option<CollectionKind>,
) -> Result<CollectionDetail, ApiError> {
    let collection = load_collection(ctx, collection_id, kind).await?;
    let entries = ctx
        .storage
        .list_entries(collection_id)
        .await
        .map_err(internal)?;
    Ok(CollectionDetail {
        collection: collection_summary(collection),
        entries: entries.into_iter().map(entry_summary).collect(),
    })
}

pub async fn list_collections(
    ctx: &ApiContext,
    owner_id: Option<UserId>,
    kind: Option<CollectionKind>,
    page: PageRequest,
) -> Result<Page<CollectionSummary>, ApiError> {
    let collections = ctx
        .storage
        .list_collections(owner_id, kind, page)
        .await
        .map_err(internal)?;
    Ok(collections.map(collection_summary))
}

pub async fn delete_collection(
    ctx: &ApiContext,
    caller: UserId,
    collection_id: CollectionId,
    kind: Option<CollectionKind>,
) -> Result<(), ApiError> {
    load_collection(ctx, collection_id, kind).await?;
    ensure_owner(ctx, collection_id, caller).await?;
    let deleted = ctx
        .storage
        .delete_collection(collection_id)
        .await
        .map_err(internal)?;
    if !deleted {
        return Err(ApiError::not_found(format!(
            "collection {collection_id} not found"
        )));
    }
    info!(%collection_id, "collection deleted");
    Ok(())
}

pub async fn list_entries(
    ctx: &ApiContext,
    collection_id: CollectionId,
    kind: Option<CollectionKind>,
) -> Result<Vec<EntrySummary>, ApiError> {
    load_collection(ctx, collection_id, kind).await?;
    let entries = ctx
        .storage
        .list_entries(collection_id)
        .await
        .map_err(internal)?;
    Ok(entries.into_iter().map(entry_summary).collect())
}

/// Adds an entry at the requested order, or after the current last entry.
/// A missing collection is an invalid request here, not a missing resource.
pub async fn add_entry(
    ctx: &ApiContext,
    caller: UserId,
    collection_id: CollectionId,
    kind: Option<CollectionKind>,
    req: AddEntryRequest,
) -> Result<EntrySummary, ApiError> {
    load_collection(ctx, collection_id, kind)
        .await
        .map_err(|err| match err.code {
            ErrorCode::NotFound => {
                ApiError::invalid(format!("collection {collection_id} does not exist"))
            }
            _ => err,
        })?;
    ensure_owner(ctx, collection_id, caller).await?;

    let title = validate_title(&req.title)?;
    let order = match req.order {
        Some(order) => {
            if !is_live_order(order) {
                return Err(ApiError::invalid(format!(
                    "order must be between 0 and {MAX_ENTRY_ORDER}"
                )));
            }
            let taken = ctx
                .storage
                .order_in_use(collection_id, order)
                .await
                .map_err(internal)?;
            if taken {
                return Err(ApiError::invalid(format!(
                    "order {order} is already used in collection {collection_id}"
                )));
            }
            order
        }
        None => {
            let next = ctx
                .storage
                .next_entry_order(collection_id)
                .await
                .map_err(internal)?;
            if !is_live_order(next) {
                return Err(ApiError::invalid("collection has no order left to append to"));
            }
            next
        }
    };
    if let Some(comic_id) = req.comic_id {
        ensure_comic_reference(ctx, comic_id).await?;
    }

    let entry = ctx
        .storage
        .insert_entry(
            collection_id,
            NewEntry {
                title,
                image_url: non_blank(req.image_url.as_deref()),
                comic_id: req.comic_id,
                order: Some(order),
            },
        )
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                ApiError::invalid("order is already used in this collection")
            } else {
                internal(err)
            }
        })?;
    info!(%collection_id, entry_id = %entry.entry_id, order = entry.order, "entry added");
    Ok(entry_summary(entry))
}

/// Patches display fields. An order change goes through the reorder
/// coordinator as a single placement, committed together with the patch.
pub async fn update_entry(
    ctx: &ApiContext,
    caller: UserId,
    collection_id: CollectionId,
    kind: Option<CollectionKind>,
    entry_id: EntryId,
    req: UpdateEntryRequest,
) -> Result<EntrySummary, ApiError> {
    load_collection(ctx, collection_id, kind).await?;
    ensure_owner(ctx, collection_id, caller).await?;
    let existing = ctx
        .storage
        .find_entry(collection_id, entry_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found(format!("entry {entry_id} not found")))?;

    let title = req.title.as_deref().map(validate_title).transpose()?;
    if let Some(comic_id) = req.comic_id {
        ensure_comic_reference(ctx, comic_id).await?;
    }

    let patch = EntryPatch {
        title,
        image_url: non_blank(req.image_url.as_deref()),
        comic_id: req.comic_id,
    };
    if let Some(order) = req.order.filter(|order| *order != existing.order) {
        ReorderCoordinator::new(&ctx.storage)
            .move_and_patch(collection_id, entry_id, order, patch)
            .await?;
    } else if !patch.is_empty() {
        ctx.storage
            .update_entry_fields(collection_id, entry_id, patch)
            .await
            .map_err(internal)?;
    }

    let entry = ctx
        .storage
        .find_entry(collection_id, entry_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found(format!("entry {entry_id} not found")))?;
    Ok(entry_summary(entry))
}

/// Removes an entry. Remaining entries keep their orders.
pub async fn delete_entry(
    ctx: &ApiContext,
    caller: UserId,
    collection_id: CollectionId,
    kind: Option<CollectionKind>,
    entry_id: EntryId,
) -> Result<(), ApiError> {
    load_collection(ctx, collection_id, kind).await?;
    ensure_owner(ctx, collection_id, caller).await?;
    let deleted = ctx
        .storage
        .delete_entry(collection_id, entry_id)
        .await
        .map_err(internal)?;
    if !deleted {
        return Err(ApiError::not_found(format!("entry {entry_id} not found")));
    }
    info!(%collection_id, %entry_id, "entry deleted");
    Ok(())
}

/// Owner-only permutation of a collection's entries. Returns the full
/// collection ascending by order.
pub async fn reorder_entries(
    ctx: &ApiContext,
    caller: UserId,
    collection_id: CollectionId,
    kind: Option<CollectionKind>,
    entry_orders: &[EntryOrder],
) -> Result<Vec<EntrySummary>, ApiError> {
    load_collection(ctx, collection_id, kind).await?;
    ensure_owner(ctx, collection_id, caller).await?;
    let entries = ReorderCoordinator::new(&ctx.storage)
        .reorder(collection_id, entry_orders)
        .await?;
    Ok(entries.into_iter().map(entry_summary).collect())
}

async fn ensure_comic_reference(
    ctx: &ApiContext,
    comic_id: ComicId,
) -> Result<(), ApiError> {
    let comic = ctx.storage.find_comic(comic_id).await.map_err(internal)?;
    if comic.is_none() {
        return Err(ApiError::invalid(format!("comic {comic_id} does not exist")));
    }
    Ok(())
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

#[cfg(test)]
#[path = "tests/collections_tests.rs"]
mod tests;
