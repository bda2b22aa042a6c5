use shared::domain::{CollectionId, CollectionKind, EntryId, UserId};
use storage::{NewEntry, Storage};

use crate::ApiContext;

pub(crate) struct Fixture {
    pub ctx: ApiContext,
    pub owner: UserId,
    pub stranger: UserId,
    pub collection: CollectionId,
    pub entries: Vec<EntryId>,
}

/// A collection owned by `owner` holding one entry per title at orders 0, 1, 2...
pub(crate) async fn collection_with_entries(kind: CollectionKind, titles: &[&str]) -> Fixture {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let owner = storage.create_user("owner").await.expect("owner");
    let stranger = storage.create_user("stranger").await.expect("stranger");
    let collection = storage
        .create_collection(kind, owner, "fixture", None)
        .await
        .expect("collection");

    let mut entries = Vec::with_capacity(titles.len());
    for title in titles {
        let entry = storage
            .insert_entry(
                collection.collection_id,
                NewEntry {
                    title,
                    image_url: None,
                    comic_id: None,
                    order: None,
                },
            )
            .await
            .expect("entry");
        entries.push(entry.entry_id);
    }

    Fixture {
        ctx: ApiContext::new(storage),
        owner,
        stranger,
        collection: collection.collection_id,
        entries,
    }
}

/// Fresh read of (entry, order) pairs ascending by order.
pub(crate) async fn orders(ctx: &ApiContext, collection: CollectionId) -> Vec<(EntryId, i64)> {
    ctx.storage
        .list_entries(collection)
        .await
        .expect("entries")
        .into_iter()
        .map(|entry| (entry.entry_id, entry.order))
        .collect()
}
