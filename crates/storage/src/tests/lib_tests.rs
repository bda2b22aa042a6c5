use super::*;
use shared::{
    domain::{CollectionKind, ComicId, EntryId},
    protocol::PageRequest,
};

async fn storage_with_owner() -> (Storage, UserId) {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let owner = storage.create_user("alice").await.expect("user");
    (storage, owner)
}

fn entry(title: &str) -> NewEntry<'_> {
    NewEntry {
        title,
        image_url: None,
        comic_id: None,
        order: None,
    }
}

#[tokio::test]
async fn health_check_succeeds_for_live_pool() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.health_check().await.expect("health check");
}

#[tokio::test]
async fn creates_database_file_when_missing() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let db_path = temp_root.path().join("nested").join("storage.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let storage = Storage::new(&database_url).await.expect("db");
    drop(storage);

    assert!(
        db_path.exists(),
        "database file should exist: {}",
        db_path.display()
    );
}

#[tokio::test]
async fn create_user_is_idempotent_per_username() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let first = storage.create_user("reader").await.expect("user");
    let second = storage.create_user("reader").await.expect("user again");
    assert_eq!(first, second);

    let found = storage.find_user(first).await.expect("find").expect("some");
    assert_eq!(found.username, "reader");
    assert!(storage.user_exists(first).await.expect("exists"));
    assert!(!storage
        .user_exists(UserId::generate())
        .await
        .expect("exists"));
}

#[tokio::test]
async fn appended_entries_take_the_next_order() {
    let (storage, owner) = storage_with_owner().await;
    let list = storage
        .create_collection(CollectionKind::List, owner, "Best of 1986", None)
        .await
        .expect("collection");

    let first = storage
        .insert_entry(list.collection_id, entry("Watchmen"))
        .await
        .expect("first");
    let second = storage
        .insert_entry(list.collection_id, entry("The Dark Knight Returns"))
        .await
        .expect("second");
    assert_eq!(first.order, 0);
    assert_eq!(second.order, 1);

    let explicit = storage
        .insert_entry(
            list.collection_id,
            NewEntry {
                order: Some(10),
                ..entry("Maus")
            },
        )
        .await
        .expect("explicit");
    assert_eq!(explicit.order, 10);

    let after_gap = storage
        .insert_entry(list.collection_id, entry("Daredevil: Born Again"))
        .await
        .expect("after gap");
    assert_eq!(after_gap.order, 11);
}

#[tokio::test]
async fn append_after_highest_possible_order_fails_without_corrupting() {
    let (storage, owner) = storage_with_owner().await;
    let list = storage
        .create_collection(CollectionKind::List, owner, "Edge", None)
        .await
        .expect("collection");
    storage
        .insert_entry(
            list.collection_id,
            NewEntry {
                order: Some(i64::MAX),
                ..entry("last")
            },
        )
        .await
        .expect("explicit max");

    storage
        .next_entry_order(list.collection_id)
        .await
        .expect_err("no order after i64::MAX");
    storage
        .insert_entry(list.collection_id, entry("one more"))
        .await
        .expect_err("append has nowhere to go");

    let entries = storage
        .list_entries(list.collection_id)
        .await
        .expect("collection still readable");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].order, i64::MAX);
}

#[tokio::test]
async fn duplicate_order_is_reported_as_unique_violation() {
    let (storage, owner) = storage_with_owner().await;
    let list = storage
        .create_collection(CollectionKind::List, owner, "Dupes", None)
        .await
        .expect("collection");
    storage
        .insert_entry(list.collection_id, entry("One"))
        .await
        .expect("first");

    let err = storage
        .insert_entry(
            list.collection_id,
            NewEntry {
                order: Some(0),
                ..entry("Two")
            },
        )
        .await
        .expect_err("order 0 is taken");
    assert!(is_unique_violation(&err));
}

#[tokio::test]
async fn entries_join_referenced_comic() {
    let (storage, owner) = storage_with_owner().await;
    let comic = storage
        .create_comic("Saga #1", Some("https://img.example/saga-1.jpg"))
        .await
        .expect("comic");
    let roadmap = storage
        .create_collection(CollectionKind::Roadmap, owner, "Start here", None)
        .await
        .expect("collection");
    storage
        .insert_entry(
            roadmap.collection_id,
            NewEntry {
                comic_id: Some(comic),
                ..entry("Chapter one")
            },
        )
        .await
        .expect("entry");

    let entries = storage
        .list_entries(roadmap.collection_id)
        .await
        .expect("entries");
    let joined = entries[0].comic.as_ref().expect("comic ref");
    assert_eq!(joined.comic_id, comic);
    assert_eq!(joined.title, "Saga #1");
}

#[tokio::test]
async fn find_entries_by_ids_spans_collections() {
    let (storage, owner) = storage_with_owner().await;
    let a = storage
        .create_collection(CollectionKind::List, owner, "A", None)
        .await
        .expect("a");
    let b = storage
        .create_collection(CollectionKind::List, owner, "B", None)
        .await
        .expect("b");
    let in_a = storage.insert_entry(a.collection_id, entry("a1")).await.expect("a1");
    let in_b = storage.insert_entry(b.collection_id, entry("b1")).await.expect("b1");

    let found = storage
        .find_entries_by_ids(&[in_a.entry_id, in_b.entry_id, EntryId::generate()])
        .await
        .expect("lookup");
    assert_eq!(found.len(), 2);
    assert!(found
        .iter()
        .any(|e| e.entry_id == in_b.entry_id && e.collection_id == b.collection_id));
    assert!(storage.find_entries_by_ids(&[]).await.expect("empty").is_empty());
}

#[tokio::test]
async fn order_unit_commits_permutation() {
    let (storage, owner) = storage_with_owner().await;
    let list = storage
        .create_collection(CollectionKind::List, owner, "Swap", None)
        .await
        .expect("collection");
    let first = storage.insert_entry(list.collection_id, entry("x")).await.expect("x");
    let second = storage.insert_entry(list.collection_id, entry("y")).await.expect("y");

    let mut unit = storage
        .begin_entry_order_unit(list.collection_id)
        .await
        .expect("unit");
    unit.update_entry_order(first.entry_id, -1).await.expect("q1");
    unit.update_entry_order(second.entry_id, -2).await.expect("q2");
    unit.update_entry_order(first.entry_id, 1).await.expect("c1");
    unit.update_entry_order(second.entry_id, 0).await.expect("c2");
    assert_eq!(unit.writes(), 4);
    unit.commit().await.expect("commit");

    let entries = storage.list_entries(list.collection_id).await.expect("entries");
    let ids: Vec<_> = entries.iter().map(|e| e.entry_id).collect();
    assert_eq!(ids, vec![second.entry_id, first.entry_id]);
}

#[tokio::test]
async fn order_unit_rolls_back_on_request() {
    let (storage, owner) = storage_with_owner().await;
    let list = storage
        .create_collection(CollectionKind::List, owner, "Undo", None)
        .await
        .expect("collection");
    let only = storage.insert_entry(list.collection_id, entry("x")).await.expect("x");

    let mut unit = storage
        .begin_entry_order_unit(list.collection_id)
        .await
        .expect("unit");
    unit.update_entry_order(only.entry_id, 7).await.expect("write");
    unit.rollback().await.expect("rollback");

    let reread = storage
        .find_entry(list.collection_id, only.entry_id)
        .await
        .expect("find")
        .expect("some");
    assert_eq!(reread.order, 0);
}

#[tokio::test]
async fn order_unit_field_patch_rolls_back_with_orders() {
    let (storage, owner) = storage_with_owner().await;
    let list = storage
        .create_collection(CollectionKind::List, owner, "Together", None)
        .await
        .expect("collection");
    let only = storage
        .insert_entry(list.collection_id, entry("before"))
        .await
        .expect("entry");

    let mut unit = storage
        .begin_entry_order_unit(list.collection_id)
        .await
        .expect("unit");
    unit.update_entry_order(only.entry_id, 4).await.expect("order");
    unit.update_entry_fields(
        only.entry_id,
        EntryPatch {
            title: Some("after"),
            ..EntryPatch::default()
        },
    )
    .await
    .expect("patch");
    assert_eq!(unit.writes(), 2);
    unit.rollback().await.expect("rollback");

    let reread = storage
        .find_entry(list.collection_id, only.entry_id)
        .await
        .expect("find")
        .expect("some");
    assert_eq!((reread.title.as_str(), reread.order), ("before", 0));
}

#[tokio::test]
async fn order_unit_rejects_entries_of_other_collections() {
    let (storage, owner) = storage_with_owner().await;
    let a = storage
        .create_collection(CollectionKind::List, owner, "A", None)
        .await
        .expect("a");
    let b = storage
        .create_collection(CollectionKind::Roadmap, owner, "B", None)
        .await
        .expect("b");
    let foreign = storage.insert_entry(b.collection_id, entry("b1")).await.expect("b1");

    let mut unit = storage
        .begin_entry_order_unit(a.collection_id)
        .await
        .expect("unit");
    unit.update_entry_order(foreign.entry_id, 3)
        .await
        .expect_err("entry belongs to b");
    unit.rollback().await.expect("rollback");
}

#[tokio::test]
async fn deleting_entry_leaves_gap() {
    let (storage, owner) = storage_with_owner().await;
    let list = storage
        .create_collection(CollectionKind::List, owner, "Gaps", None)
        .await
        .expect("collection");
    let _a = storage.insert_entry(list.collection_id, entry("a")).await.expect("a");
    let b = storage.insert_entry(list.collection_id, entry("b")).await.expect("b");
    let _c = storage.insert_entry(list.collection_id, entry("c")).await.expect("c");

    assert!(storage
        .delete_entry(list.collection_id, b.entry_id)
        .await
        .expect("delete"));
    assert!(!storage
        .delete_entry(list.collection_id, b.entry_id)
        .await
        .expect("second delete"));

    let orders: Vec<_> = storage
        .list_entries(list.collection_id)
        .await
        .expect("entries")
        .into_iter()
        .map(|e| e.order)
        .collect();
    assert_eq!(orders, vec![0, 2]);
}

#[tokio::test]
async fn deleting_collection_cascades_to_entries() {
    let (storage, owner) = storage_with_owner().await;
    let list = storage
        .create_collection(CollectionKind::List, owner, "Temp", None)
        .await
        .expect("collection");
    let e = storage.insert_entry(list.collection_id, entry("a")).await.expect("a");

    assert!(storage
        .delete_collection(list.collection_id)
        .await
        .expect("delete"));
    assert!(storage
        .find_entries_by_ids(&[e.entry_id])
        .await
        .expect("lookup")
        .is_empty());
}

#[tokio::test]
async fn update_entry_fields_keeps_unset_fields() {
    let (storage, owner) = storage_with_owner().await;
    let list = storage
        .create_collection(CollectionKind::List, owner, "Edits", None)
        .await
        .expect("collection");
    let e = storage
        .insert_entry(
            list.collection_id,
            NewEntry {
                image_url: Some("https://img.example/a.png"),
                ..entry("Before")
            },
        )
        .await
        .expect("entry");

    let patched = storage
        .update_entry_fields(
            list.collection_id,
            e.entry_id,
            EntryPatch {
                title: Some("After"),
                ..EntryPatch::default()
            },
        )
        .await
        .expect("patch");
    assert!(patched);

    let reread = storage
        .find_entry(list.collection_id, e.entry_id)
        .await
        .expect("find")
        .expect("some");
    assert_eq!(reread.title, "After");
    assert_eq!(reread.image_url.as_deref(), Some("https://img.example/a.png"));
}

#[tokio::test]
async fn lists_collections_filtered_and_paginated() {
    let (storage, owner) = storage_with_owner().await;
    let other = storage.create_user("bob").await.expect("bob");
    for i in 0..3 {
        storage
            .create_collection(CollectionKind::List, owner, &format!("list {i}"), None)
            .await
            .expect("list");
    }
    storage
        .create_collection(CollectionKind::Roadmap, owner, "roadmap", None)
        .await
        .expect("roadmap");
    storage
        .create_collection(CollectionKind::List, other, "bob's", None)
        .await
        .expect("other");

    let page = storage
        .list_collections(
            Some(owner),
            Some(CollectionKind::List),
            PageRequest::from_query(Some(1), Some(2)),
        )
        .await
        .expect("page");
    assert_eq!(page.total, 3);
    assert_eq!(page.items.len(), 2);
    assert!(page.has_next);

    let all = storage
        .list_collections(None, None, PageRequest::default())
        .await
        .expect("all");
    assert_eq!(all.total, 5);
}

#[tokio::test]
async fn ownership_check_matches_creator_only() {
    let (storage, owner) = storage_with_owner().await;
    let stranger = storage.create_user("mallory").await.expect("user");
    let list = storage
        .create_collection(CollectionKind::List, owner, "Mine", None)
        .await
        .expect("collection");

    assert!(storage.is_owner(list.collection_id, owner).await.expect("owner"));
    assert!(!storage
        .is_owner(list.collection_id, stranger)
        .await
        .expect("stranger"));
}

#[tokio::test]
async fn review_ratings_maintain_running_average() {
    let (storage, author) = storage_with_owner().await;
    let second_author = storage.create_user("bob").await.expect("bob");
    let comic = storage.create_comic("Bone", None).await.expect("comic");

    let first = storage
        .create_review(comic, author, 5, "classic")
        .await
        .expect("first review");
    storage
        .create_review(comic, second_author, 2, "not for me")
        .await
        .expect("second review");

    let rated = storage.find_comic(comic).await.expect("find").expect("some");
    assert_eq!(rated.rating_count, 2);
    assert!((rated.rating_average - 3.5).abs() < f64::EPSILON);

    let removed = storage
        .delete_review(first.review_id)
        .await
        .expect("delete")
        .expect("existed");
    assert_eq!(removed.rating, 5);
    let rated = storage.find_comic(comic).await.expect("find").expect("some");
    assert_eq!(rated.rating_count, 1);
    assert!((rated.rating_average - 2.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn removing_last_review_resets_average() {
    let (storage, author) = storage_with_owner().await;
    let comic = storage.create_comic("Hellboy", None).await.expect("comic");
    let review = storage
        .create_review(comic, author, 4, "great")
        .await
        .expect("review");

    storage
        .delete_review(review.review_id)
        .await
        .expect("delete")
        .expect("existed");
    assert!(storage
        .delete_review(review.review_id)
        .await
        .expect("second delete")
        .is_none());

    let rated = storage.find_comic(comic).await.expect("find").expect("some");
    assert_eq!(rated.rating_count, 0);
    assert_eq!(rated.rating_average, 0.0);
}

#[tokio::test]
async fn second_review_by_same_author_is_unique_violation() {
    let (storage, author) = storage_with_owner().await;
    let comic = storage.create_comic("Sandman", None).await.expect("comic");
    storage
        .create_review(comic, author, 5, "first")
        .await
        .expect("review");

    let err = storage
        .create_review(comic, author, 1, "again")
        .await
        .expect_err("duplicate");
    assert!(is_unique_violation(&err));
    assert!(storage.has_review(comic, author).await.expect("has"));

    let rated = storage.find_comic(comic).await.expect("find").expect("some");
    assert_eq!(rated.rating_count, 1);
}

#[tokio::test]
async fn lists_comics_by_title() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let z = storage.create_comic("Zatanna", None).await.expect("z");
    let a = storage.create_comic("akira", None).await.expect("a");

    let page = storage
        .list_comics(PageRequest::default())
        .await
        .expect("comics");
    let ids: Vec<ComicId> = page.items.iter().map(|c| c.comic_id).collect();
    assert_eq!(ids, vec![a, z]);
}
