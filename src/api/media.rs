use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::State;

use crate::api::ApiError;
use crate::config::AppConfig;
use crate::media::is_video_url;
use crate::models::media::{
    BatchRequest, BatchResponse, ClassifyResponse, PrefetchResponse, ResolvedUrlResponse,
    SessionRequest,
};
use crate::presign::SessionToken;
use crate::resolver::{unique_refs, MediaResolver, ResolverStats};

#[derive(Debug, FromForm)]
pub struct RefQuery {
    #[field(name = "ref")]
    pub reference: Option<String>,
}

#[derive(Debug, FromForm)]
pub struct ClassifyQuery {
    pub url: Option<String>,
}

#[get("/resolve?<query..>")]
pub async fn resolve(query: RefQuery, resolver: &State<MediaResolver>) -> Json<ResolvedUrlResponse> {
    let url = resolver.resolve(query.reference.as_deref()).await;
    Json(ResolvedUrlResponse { url, cache_age: None })
}

#[get("/cached?<query..>")]
pub fn cached(query: RefQuery, resolver: &State<MediaResolver>) -> Json<ResolvedUrlResponse> {
    let reference = query.reference.as_deref();
    let cache_age = resolver.cache_entry(reference).map(|entry| entry.age_secs());
    let url = resolver.resolve_cached(reference);
    Json(ResolvedUrlResponse { url, cache_age })
}

#[post("/resolve/batch", format = "json", data = "<request>")]
pub async fn resolve_batch(
    request: Json<BatchRequest>,
    resolver: &State<MediaResolver>,
    config: &State<AppConfig>,
) -> Result<Json<BatchResponse>, ApiError> {
    check_batch_size(&request.refs, config)?;

    let urls = resolver.resolve_batch(&request.refs).await;
    log::debug!("Resolved {}/{} batch references", urls.len(), request.refs.len());
    Ok(Json(BatchResponse { urls }))
}

#[post("/prefetch", format = "json", data = "<request>")]
pub fn prefetch(
    request: Json<BatchRequest>,
    resolver: &State<MediaResolver>,
    config: &State<AppConfig>,
) -> Result<(Status, Json<PrefetchResponse>), ApiError> {
    check_batch_size(&request.refs, config)?;

    let queued = resolver.prefetch(&request.refs);
    Ok((Status::Accepted, Json(PrefetchResponse { queued })))
}

#[get("/classify?<query..>")]
pub fn classify(query: ClassifyQuery) -> Result<Json<ClassifyResponse>, ApiError> {
    let url = query.url.ok_or(ApiError::MissingParameter("url"))?;
    Ok(Json(ClassifyResponse {
        is_video: is_video_url(&url),
    }))
}

#[put("/session", format = "json", data = "<request>")]
pub fn set_session(request: Json<SessionRequest>, token: &State<SessionToken>) -> Status {
    token.set(request.into_inner().token);
    log::info!("Session token replaced");
    Status::NoContent
}

#[delete("/session")]
pub fn clear_session(token: &State<SessionToken>) -> Status {
    token.clear();
    log::info!("Session token cleared, presign requests are sent unauthenticated");
    Status::NoContent
}

#[get("/stats")]
pub fn stats(resolver: &State<MediaResolver>) -> Json<ResolverStats> {
    Json(resolver.stats())
}

// Duplicates and empty entries never turn into exchanges, so only unique keys count.
fn check_batch_size(refs: &[String], config: &AppConfig) -> Result<(), ApiError> {
    let size = unique_refs(refs).len();
    if size > config.max_batch_size {
        return Err(ApiError::BatchTooLarge {
            size,
            max: config.max_batch_size,
        });
    }
    Ok(())
}
