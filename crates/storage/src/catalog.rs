use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use shared::{
    domain::{ComicId, ReviewId, UserId},
    protocol::{Page, PageRequest},
};

use crate::{count_to_u64, parse_id, Storage};

#[derive(Debug, Clone, PartialEq)]
pub struct StoredComic {
    pub comic_id: ComicId,
    pub title: String,
    pub cover_url: Option<String>,
    pub rating_average: f64,
    pub rating_count: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredReview {
    pub review_id: ReviewId,
    pub comic_id: ComicId,
    pub author_id: UserId,
    pub rating: i64,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl Storage {
    pub async fn create_comic(&self, title: &str, cover_url: Option<&str>) -> Result<ComicId> {
        let comic_id = ComicId::generate();
        sqlx::query("INSERT INTO comics (id, title, cover_url) VALUES (?, ?, ?)")
            .bind(comic_id.to_string())
            .bind(title)
            .bind(cover_url)
            .execute(&self.pool)
            .await?;
        Ok(comic_id)
    }

    pub async fn find_comic(&self, comic_id: ComicId) -> Result<Option<StoredComic>> {
        let row = sqlx::query(
            "SELECT id, title, cover_url, rating_average, rating_count FROM comics WHERE id = ?",
        )
        .bind(comic_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(comic_from_row).transpose()
    }

    pub async fn list_comics(&self, page: PageRequest) -> Result<Page<StoredComic>> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM comics")
            .fetch_one(&self.pool)
            .await?;
        let rows = sqlx::query(
            "SELECT id, title, cover_url, rating_average, rating_count
             FROM comics
             ORDER BY lower(title) ASC, id ASC
             LIMIT ? OFFSET ?",
        )
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        let items = rows.iter().map(comic_from_row).collect::<Result<Vec<_>>>()?;
        Ok(Page::new(items, page, count_to_u64(total)))
    }

    /// Stores a review and folds its rating into the comic's running average
    /// in the same transaction.
    pub async fn create_review(
        &self,
        comic_id: ComicId,
        author_id: UserId,
        rating: i64,
        body: &str,
    ) -> Result<StoredReview> {
        let review_id = ReviewId::generate();
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "INSERT INTO reviews (id, comic_id, author_user_id, rating, body)
             VALUES (?, ?, ?, ?, ?)
             RETURNING id, comic_id, author_user_id, rating, body, created_at",
        )
        .bind(review_id.to_string())
        .bind(comic_id.to_string())
        .bind(author_id.to_string())
        .bind(rating)
        .bind(body)
        .fetch_one(&mut *tx)
        .await
        .with_context(|| format!("failed to insert review for comic {comic_id}"))?;
        let review = review_from_row(&row)?;

        sqlx::query(
            "UPDATE comics
             SET rating_average = (rating_average * rating_count + ?) / (rating_count + 1),
                 rating_count = rating_count + 1
             WHERE id = ?",
        )
        .bind(rating as f64)
        .bind(comic_id.to_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(review)
    }

    pub async fn find_review(&self, review_id: ReviewId) -> Result<Option<StoredReview>> {
        let row = sqlx::query(
            "SELECT id, comic_id, author_user_id, rating, body, created_at FROM reviews WHERE id = ?",
        )
        .bind(review_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(review_from_row).transpose()
    }

    pub async fn has_review(&self, comic_id: ComicId, author_id: UserId) -> Result<bool> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM reviews WHERE comic_id = ? AND author_user_id = ?")
                .bind(comic_id.to_string())
                .bind(author_id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        Ok(found.is_some())
    }

    /// Deletes a review and backs its rating out of the comic's running average.
    /// The last review resets the average to zero.
    pub async fn delete_review(&self, review_id: ReviewId) -> Result<Option<StoredReview>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "DELETE FROM reviews WHERE id = ?
             RETURNING id, comic_id, author_user_id, rating, body, created_at",
        )
        .bind(review_id.to_string())
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };
        let review = review_from_row(&row)?;

        sqlx::query(
            "UPDATE comics
             SET rating_average = CASE
                    WHEN rating_count <= 1 THEN 0.0
                    ELSE (rating_average * rating_count - ?) / (rating_count - 1)
                 END,
                 rating_count = MAX(rating_count - 1, 0)
             WHERE id = ?",
        )
        .bind(review.rating as f64)
        .bind(review.comic_id.to_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(review))
    }

    pub async fn list_reviews_for_comic(
        &self,
        comic_id: ComicId,
        page: PageRequest,
    ) -> Result<Page<StoredReview>> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM reviews WHERE comic_id = ?")
            .bind(comic_id.to_string())
            .fetch_one(&self.pool)
            .await?;
        let rows = sqlx::query(
            "SELECT id, comic_id, author_user_id, rating, body, created_at
             FROM reviews
             WHERE comic_id = ?
             ORDER BY created_at DESC, id ASC
             LIMIT ? OFFSET ?",
        )
        .bind(comic_id.to_string())
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        let items = rows.iter().map(review_from_row).collect::<Result<Vec<_>>>()?;
        Ok(Page::new(items, page, count_to_u64(total)))
    }
}

fn comic_from_row(row: &SqliteRow) -> Result<StoredComic> {
    Ok(StoredComic {
        comic_id: parse_id(&row.try_get::<String, _>("id")?)?,
        title: row.try_get("title")?,
        cover_url: row.try_get("cover_url")?,
        rating_average: row.try_get("rating_average")?,
        rating_count: row.try_get("rating_count")?,
    })
}

fn review_from_row(row: &SqliteRow) -> Result<StoredReview> {
    Ok(StoredReview {
        review_id: parse_id(&row.try_get::<String, _>("id")?)?,
        comic_id: parse_id(&row.try_get::<String, _>("comic_id")?)?,
        author_id: parse_id(&row.try_get::<String, _>("author_user_id")?)?,
        rating: row.try_get("rating")?,
        body: row.try_get("body")?,
        created_at: row.try_get("created_at")?,
    })
}
