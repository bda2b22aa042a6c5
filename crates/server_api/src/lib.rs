use shared::{
    domain::{CollectionId, CollectionKind, UserId},
    error::{ApiError, ErrorCode},
    protocol::{CollectionSummary, ComicRef, ComicSummary, EntrySummary, ReviewSummary},
};
use storage::{Storage, StoredCollection, StoredComic, StoredEntry, StoredReview};
use tracing::error;

mod collections;
mod reorder;
mod reviews;

pub use collections::{
    add_entry, create_collection, delete_collection, delete_entry, get_collection,
    list_collections, list_entries, reorder_entries, update_entry,
};
pub use reorder::{quarantine_order, validate_permutation, ReorderCoordinator, ReorderError};
pub use reviews::{create_review, delete_review, get_comic, list_comics, list_reviews};

pub const MAX_TITLE_CHARS: usize = 200;
pub const MAX_REVIEW_BODY_CHARS: usize = 5000;

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
}

impl ApiContext {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }
}

/// Loads a collection for a request addressed to it. A collection requested
/// through a kind-scoped route that does not match is treated as missing.
async fn load_collection(
    ctx: &ApiContext,
    collection_id: CollectionId,
    kind: Option<CollectionKind>,
) -> Result<StoredCollection, ApiError> {
    ctx.storage
        .find_collection_by_id(collection_id)
        .await
        .map_err(internal)?
        .filter(|collection| kind.map_or(true, |kind| collection.kind == kind))
        .ok_or_else(|| ApiError::not_found(format!("collection {collection_id} not found")))
}

async fn ensure_owner(
    ctx: &ApiContext,
    collection_id: CollectionId,
    caller: UserId,
) -> Result<(), ApiError> {
    let owner = ctx
        .storage
        .is_owner(collection_id, caller)
        .await
        .map_err(internal)?;
    if !owner {
        return Err(ApiError::forbidden(
            "only the collection owner may change it",
        ));
    }
    Ok(())
}

async fn ensure_known_user(ctx: &ApiContext, caller: UserId) -> Result<(), ApiError> {
    let known = ctx.storage.user_exists(caller).await.map_err(internal)?;
    if !known {
        return Err(ApiError::new(ErrorCode::Unauthorized, "unknown user"));
    }
    Ok(())
}

fn validate_title(title: &str) -> Result<&str, ApiError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(ApiError::invalid("title cannot be empty"));
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(ApiError::invalid(format!(
            "title exceeds {MAX_TITLE_CHARS} characters"
        )));
    }
    Ok(title)
}

fn collection_summary(collection: StoredCollection) -> CollectionSummary {
    CollectionSummary {
        id: collection.collection_id,
        kind: collection.kind,
        owner_id: collection.owner_id,
        title: collection.title,
        description: collection.description,
        created_at: collection.created_at,
        updated_at: collection.updated_at,
    }
}

fn entry_summary(entry: StoredEntry) -> EntrySummary {
    EntrySummary {
        id: entry.entry_id,
        collection_id: entry.collection_id,
        order: entry.order,
        title: entry.title,
        image_url: entry.image_url,
        comic: entry.comic.map(|comic| ComicRef {
            id: comic.comic_id,
            title: comic.title,
            cover_url: comic.cover_url,
        }),
    }
}

fn comic_summary(comic: StoredComic) -> ComicSummary {
    ComicSummary {
        id: comic.comic_id,
        title: comic.title,
        cover_url: comic.cover_url,
        rating_average: comic.rating_average,
        rating_count: comic.rating_count,
    }
}

fn review_summary(review: StoredReview) -> ReviewSummary {
    ReviewSummary {
        id: review.review_id,
        comic_id: review.comic_id,
        author_id: review.author_id,
        rating: review.rating,
        body: review.body,
        created_at: review.created_at,
    }
}

fn internal(err: anyhow::Error) -> ApiError {
    error!(error = %format!("{err:#}"), "storage failure");
    ApiError::new(ErrorCode::StorageFailure, err.to_string())
}

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;
