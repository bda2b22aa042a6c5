use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, QueryBuilder, Row, Sqlite, Transaction};

use shared::{
    domain::{CollectionId, CollectionKind, ComicId, EntryId, UserId},
    protocol::{Page, PageRequest},
};

use crate::{count_to_u64, parse_id, parse_optional_id, Storage};

macro_rules! entry_select {
    () => {
        "SELECT e.id, e.collection_id, e.order_index, e.title, e.image_url,
                c.id AS comic_id, c.title AS comic_title, c.cover_url AS comic_cover_url
         FROM collection_entries e
         LEFT JOIN comics c ON c.id = e.comic_id"
    };
}

const PATCH_ENTRY_FIELDS: &str = "UPDATE collection_entries
     SET title = COALESCE(?, title),
         image_url = COALESCE(?, image_url),
         comic_id = COALESCE(?, comic_id),
         updated_at = CURRENT_TIMESTAMP
     WHERE collection_id = ? AND id = ?";

#[derive(Debug, Clone)]
pub struct StoredCollection {
    pub collection_id: CollectionId,
    pub kind: CollectionKind,
    pub owner_id: UserId,
    pub title: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredComicRef {
    pub comic_id: ComicId,
    pub title: String,
    pub cover_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntry {
    pub entry_id: EntryId,
    pub collection_id: CollectionId,
    pub order: i64,
    pub title: String,
    pub image_url: Option<String>,
    pub comic: Option<StoredComicRef>,
}

#[derive(Debug, Clone, Copy)]
pub struct NewEntry<'a> {
    pub title: &'a str,
    pub image_url: Option<&'a str>,
    pub comic_id: Option<ComicId>,
    /// `None` appends after the current highest order.
    pub order: Option<i64>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EntryPatch<'a> {
    pub title: Option<&'a str>,
    pub image_url: Option<&'a str>,
    pub comic_id: Option<ComicId>,
}

impl EntryPatch<'_> {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.image_url.is_none() && self.comic_id.is_none()
    }
}

/// Transaction scoped to the entry orders of one collection.
///
/// Every `update_entry_order` lands in the same SQLite transaction; nothing is
/// visible to other connections until `commit`. Dropping the unit without
/// committing rolls back.
pub struct EntryOrderUnit {
    collection_id: CollectionId,
    tx: Transaction<'static, Sqlite>,
    writes: usize,
}

impl EntryOrderUnit {
    pub fn collection_id(&self) -> CollectionId {
        self.collection_id
    }

    pub fn writes(&self) -> usize {
        self.writes
    }

    pub async fn update_entry_order(&mut self, entry_id: EntryId, order: i64) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE collection_entries
             SET order_index = ?, updated_at = CURRENT_TIMESTAMP
             WHERE id = ? AND collection_id = ?",
        )
        .bind(order)
        .bind(entry_id.to_string())
        .bind(self.collection_id.to_string())
        .execute(&mut *self.tx)
        .await
        .with_context(|| format!("failed to set order {order} on entry {entry_id}"))?
        .rows_affected();

        if updated == 0 {
            bail!(
                "entry {entry_id} is not part of collection {}",
                self.collection_id
            );
        }
        self.writes += 1;
        Ok(())
    }

    /// Patches display fields inside the unit, so they commit or roll back
    /// together with the order writes.
    pub async fn update_entry_fields(
        &mut self,
        entry_id: EntryId,
        patch: EntryPatch<'_>,
    ) -> Result<()> {
        let updated = sqlx::query(PATCH_ENTRY_FIELDS)
            .bind(patch.title)
            .bind(patch.image_url)
            .bind(patch.comic_id.map(|id| id.to_string()))
            .bind(self.collection_id.to_string())
            .bind(entry_id.to_string())
            .execute(&mut *self.tx)
            .await
            .with_context(|| format!("failed to patch entry {entry_id}"))?
            .rows_affected();

        if updated == 0 {
            bail!(
                "entry {entry_id} is not part of collection {}",
                self.collection_id
            );
        }
        self.writes += 1;
        Ok(())
    }

    pub async fn commit(mut self) -> Result<()> {
        sqlx::query("UPDATE collections SET updated_at = CURRENT_TIMESTAMP WHERE id = ?")
            .bind(self.collection_id.to_string())
            .execute(&mut *self.tx)
            .await?;
        self.tx
            .commit()
            .await
            .context("failed to commit entry order transaction")
    }

    pub async fn rollback(self) -> Result<()> {
        self.tx
            .rollback()
            .await
            .context("failed to roll back entry order transaction")
    }
}

impl Storage {
    pub async fn create_collection(
        &self,
        kind: CollectionKind,
        owner_id: UserId,
        title: &str,
        description: Option<&str>,
    ) -> Result<StoredCollection> {
        let row = sqlx::query(
            "INSERT INTO collections (id, kind, owner_user_id, title, description)
             VALUES (?, ?, ?, ?, ?)
             RETURNING id, kind, owner_user_id, title, description, created_at, updated_at",
        )
        .bind(CollectionId::generate().to_string())
        .bind(kind.as_str())
        .bind(owner_id.to_string())
        .bind(title)
        .bind(description)
        .fetch_one(&self.pool)
        .await?;
        collection_from_row(&row)
    }

    pub async fn find_collection_by_id(
        &self,
        collection_id: CollectionId,
    ) -> Result<Option<StoredCollection>> {
        let row = sqlx::query(
            "SELECT id, kind, owner_user_id, title, description, created_at, updated_at
             FROM collections
             WHERE id = ?",
        )
        .bind(collection_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(collection_from_row).transpose()
    }

    /// Lists collections newest first, optionally narrowed by owner and kind.
    pub async fn list_collections(
        &self,
        owner_id: Option<UserId>,
        kind: Option<CollectionKind>,
        page: PageRequest,
    ) -> Result<Page<StoredCollection>> {
        let owner = owner_id.map(|id| id.to_string());
        let kind = kind.map(CollectionKind::as_str);

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM collections
             WHERE (?1 IS NULL OR owner_user_id = ?1) AND (?2 IS NULL OR kind = ?2)",
        )
        .bind(owner.as_deref())
        .bind(kind)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query(
            "SELECT id, kind, owner_user_id, title, description, created_at, updated_at
             FROM collections
             WHERE (?1 IS NULL OR owner_user_id = ?1) AND (?2 IS NULL OR kind = ?2)
             ORDER BY created_at DESC, id ASC
             LIMIT ?3 OFFSET ?4",
        )
        .bind(owner.as_deref())
        .bind(kind)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        let items = rows
            .iter()
            .map(collection_from_row)
            .collect::<Result<Vec<_>>>()?;
        Ok(Page::new(items, page, count_to_u64(total)))
    }

    /// Removes the collection and, through the foreign key cascade, its entries.
    pub async fn delete_collection(&self, collection_id: CollectionId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM collections WHERE id = ?")
            .bind(collection_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn is_owner(&self, collection_id: CollectionId, user_id: UserId) -> Result<bool> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM collections WHERE id = ? AND owner_user_id = ?")
                .bind(collection_id.to_string())
                .bind(user_id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        Ok(found.is_some())
    }

    /// All entries of a collection, ascending by order.
    pub async fn list_entries(&self, collection_id: CollectionId) -> Result<Vec<StoredEntry>> {
        let rows = sqlx::query(concat!(
            entry_select!(),
            " WHERE e.collection_id = ? ORDER BY e.order_index ASC"
        ))
        .bind(collection_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(entry_from_row).collect()
    }

    /// Looks entries up by id regardless of which collection they belong to.
    /// Unknown ids are simply absent from the result.
    pub async fn find_entries_by_ids(&self, entry_ids: &[EntryId]) -> Result<Vec<StoredEntry>> {
        if entry_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut query = QueryBuilder::<Sqlite>::new(concat!(entry_select!(), " WHERE e.id IN ("));
        let mut ids = query.separated(", ");
        for entry_id in entry_ids {
            ids.push_bind(entry_id.to_string());
        }
        ids.push_unseparated(")");

        let rows = query.build().fetch_all(&self.pool).await?;
        rows.iter().map(entry_from_row).collect()
    }

    pub async fn find_entry(
        &self,
        collection_id: CollectionId,
        entry_id: EntryId,
    ) -> Result<Option<StoredEntry>> {
        let row = sqlx::query(concat!(
            entry_select!(),
            " WHERE e.collection_id = ? AND e.id = ?"
        ))
        .bind(collection_id.to_string())
        .bind(entry_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(entry_from_row).transpose()
    }

    pub async fn order_in_use(&self, collection_id: CollectionId, order: i64) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM collection_entries WHERE collection_id = ? AND order_index = ?",
        )
        .bind(collection_id.to_string())
        .bind(order)
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }

    /// The order an appended entry would get: one past the highest order in
    /// the collection, or 0 when it is empty. Fails instead of wrapping.
    pub async fn next_entry_order(&self, collection_id: CollectionId) -> Result<i64> {
        let highest: Option<i64> = sqlx::query_scalar(
            "SELECT MAX(order_index) FROM collection_entries WHERE collection_id = ?",
        )
        .bind(collection_id.to_string())
        .fetch_one(&self.pool)
        .await?;
        match highest {
            None => Ok(0),
            Some(highest) => highest
                .checked_add(1)
                .with_context(|| {
                    format!("no order left after {highest} in collection {collection_id}")
                }),
        }
    }

    pub async fn insert_entry(
        &self,
        collection_id: CollectionId,
        entry: NewEntry<'_>,
    ) -> Result<StoredEntry> {
        let order = match entry.order {
            Some(order) => order,
            None => self.next_entry_order(collection_id).await?,
        };
        let entry_id = EntryId::generate();
        sqlx::query(
            "INSERT INTO collection_entries (id, collection_id, order_index, title, image_url, comic_id)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(entry_id.to_string())
        .bind(collection_id.to_string())
        .bind(order)
        .bind(entry.title)
        .bind(entry.image_url)
        .bind(entry.comic_id.map(|id| id.to_string()))
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to insert entry into collection {collection_id}"))?;

        self.find_entry(collection_id, entry_id)
            .await?
            .with_context(|| format!("entry {entry_id} vanished after insert"))
    }

    /// Applies the non-order fields of a patch. Returns false when the entry
    /// does not exist in the collection.
    pub async fn update_entry_fields(
        &self,
        collection_id: CollectionId,
        entry_id: EntryId,
        patch: EntryPatch<'_>,
    ) -> Result<bool> {
        let updated = sqlx::query(PATCH_ENTRY_FIELDS)
            .bind(patch.title)
            .bind(patch.image_url)
            .bind(patch.comic_id.map(|id| id.to_string()))
            .bind(collection_id.to_string())
            .bind(entry_id.to_string())
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(updated > 0)
    }

    /// Deletes one entry. Siblings keep their order values.
    pub async fn delete_entry(&self, collection_id: CollectionId, entry_id: EntryId) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM collection_entries WHERE collection_id = ? AND id = ?")
            .bind(collection_id.to_string())
            .bind(entry_id.to_string())
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }

    pub async fn begin_entry_order_unit(
        &self,
        collection_id: CollectionId,
    ) -> Result<EntryOrderUnit> {
        let tx = self
            .pool
            .begin()
            .await
            .context("failed to open entry order transaction")?;
        Ok(EntryOrderUnit {
            collection_id,
            tx,
            writes: 0,
        })
    }
}

fn collection_from_row(row: &SqliteRow) -> Result<StoredCollection> {
    let kind: String = row.try_get("kind")?;
    Ok(StoredCollection {
        collection_id: parse_id(&row.try_get::<String, _>("id")?)?,
        kind: kind.parse()?,
        owner_id: parse_id(&row.try_get::<String, _>("owner_user_id")?)?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn entry_from_row(row: &SqliteRow) -> Result<StoredEntry> {
    let comic = match parse_optional_id::<ComicId>(row, "comic_id")? {
        Some(comic_id) => Some(StoredComicRef {
            comic_id,
            title: row.try_get("comic_title")?,
            cover_url: row.try_get("comic_cover_url")?,
        }),
        None => None,
    };

    Ok(StoredEntry {
        entry_id: parse_id(&row.try_get::<String, _>("id")?)?,
        collection_id: parse_id(&row.try_get::<String, _>("collection_id")?)?,
        order: row.try_get("order_index")?,
        title: row.try_get("title")?,
        image_url: row.try_get("image_url")?,
        comic,
    })
}
