use shared::{
    domain::{ComicId, ReviewId, UserId},
    error::ApiError,
    protocol::{ComicSummary, CreateReviewRequest, Page, PageRequest, ReviewSummary},
};
use storage::is_unique_violation;
use tracing::info;

use crate::{
    comic_summary, ensure_known_user, internal, review_summary, ApiContext,
    MAX_REVIEW_BODY_CHARS,
};

pub async fn list_comics(
    ctx: &ApiContext,
    page: PageRequest,
) -> Result<Page<ComicSummary>, ApiError> {
    let comics = ctx.storage.list_comics(page).await.map_err(internal)?;
    Ok(comics.map(comic_summary))
}

pub async fn get_comic(ctx: &ApiContext, comic_id: ComicId) -> Result<ComicSummary, ApiError> {
    ctx.storage
        .find_comic(comic_id)
        .await
        .map_err(internal)?
        .map(comic_summary)
        .ok_or_else(|| ApiError::not_found(format!("comic {comic_id} not found")))
}

pub async fn list_reviews(
    ctx: &ApiContext,
    comic_id: ComicId,
    page: PageRequest,
) -> Result<Page<ReviewSummary>, ApiError> {
    get_comic(ctx, comic_id).await?;
    let reviews = ctx
        .storage
        .list_reviews_for_comic(comic_id, page)
        .await
        .map_err(internal)?;
    Ok(reviews.map(review_summary))
}

/// One review per author per comic; the comic's rating average moves with it.
pub async fn create_review(
    ctx: &ApiContext,
    caller: UserId,
    comic_id: ComicId,
    req: CreateReviewRequest,
) -> Result<ReviewSummary, ApiError> {
    ensure_known_user(ctx, caller).await?;
    if !(1..=5).contains(&req.rating) {
        return Err(ApiError::invalid("rating must be between 1 and 5"));
    }
    let body = req.body.trim();
    if body.is_empty() {
        return Err(ApiError::invalid("review body cannot be empty"));
    }
    if body.chars().count() > MAX_REVIEW_BODY_CHARS {
        return Err(ApiError::invalid(format!(
            "review body exceeds {MAX_REVIEW_BODY_CHARS} characters"
        )));
    }
    get_comic(ctx, comic_id).await?;

    let already = ctx
        .storage
        .has_review(comic_id, caller)
        .await
        .map_err(internal)?;
    if already {
        return Err(ApiError::invalid("you have already reviewed this comic"));
    }

    let review = ctx
        .storage
        .create_review(comic_id, caller, req.rating, body)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                ApiError::invalid("you have already reviewed this comic")
            } else {
                internal(err)
            }
        })?;
    info!(%comic_id, review_id = %review.review_id, rating = review.rating, "review created");
    Ok(review_summary(review))
}

pub async fn delete_review(
    ctx: &ApiContext,
    caller: UserId,
    review_id: ReviewId,
) -> Result<(), ApiError> {
    let review = ctx
        .storage
        .find_review(review_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found(format!("review {review_id} not found")))?;
    if review.author_id != caller {
        return Err(ApiError::forbidden("only the author may delete a review"));
    }

    ctx.storage
        .delete_review(review_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found(format!("review {review_id} not found")))?;
    info!(comic_id = %review.comic_id, %review_id, "review deleted");
    Ok(())
}

#[cfg(test)]
#[path = "tests/reviews_tests.rs"]
mod tests;
