use shared::domain::CollectionKind;
use storage::{NewEntry, Storage};

#[tokio::test]
async fn failed_order_write_leaves_committed_orders_untouched() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let owner = storage.create_user("atomic-owner").await.expect("user");
    let list = storage
        .create_collection(CollectionKind::List, owner, "atomic", None)
        .await
        .expect("collection");

    let mut entries = Vec::new();
    for title in ["first", "second", "third"] {
        entries.push(
            storage
                .insert_entry(
                    list.collection_id,
                    NewEntry {
                        title,
                        image_url: None,
                        comic_id: None,
                        order: None,
                    },
                )
                .await
                .expect("entry"),
        );
    }

    // Storage refuses any write of order 0 from here on.
    sqlx::query(
        "CREATE TRIGGER refuse_order_zero
         BEFORE UPDATE OF order_index ON collection_entries
         WHEN NEW.order_index = 0
         BEGIN
            SELECT RAISE(ABORT, 'injected storage failure');
         END",
    )
    .execute(storage.pool())
    .await
    .expect("trigger");

    let mut unit = storage
        .begin_entry_order_unit(list.collection_id)
        .await
        .expect("unit");
    for (position, entry) in entries.iter().enumerate() {
        unit.update_entry_order(entry.entry_id, -(position as i64) - 1)
            .await
            .expect("quarantine");
    }
    unit.update_entry_order(entries[0].entry_id, 1)
        .await
        .expect("first commit write");
    unit.update_entry_order(entries[1].entry_id, 2)
        .await
        .expect("second commit write");
    unit.update_entry_order(entries[2].entry_id, 0)
        .await
        .expect_err("third write hits the injected failure");
    unit.rollback().await.expect("rollback");

    let orders: Vec<_> = storage
        .list_entries(list.collection_id)
        .await
        .expect("entries")
        .into_iter()
        .map(|e| (e.entry_id, e.order))
        .collect();
    assert_eq!(
        orders,
        vec![
            (entries[0].entry_id, 0),
            (entries[1].entry_id, 1),
            (entries[2].entry_id, 2),
        ]
    );
}
