use actix_web::http::StatusCode;
use actix_web::{delete, get, post, put, web, HttpRequest, HttpResponse, Responder};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::clients::auth::{
    AuthClient, ProviderResponse, ProviderSignInRequest, SignInRequest, SignUpRequest,
};
use crate::clients::storage::StorageClient;
use crate::database::Database;
use crate::error::ServiceError;
use crate::models::{
    ApiResponse, Business, CreateBusinessRequest, DeleteImageRequest, FlagReviewRequest,
    RespondReviewRequest, SearchPage, SubmitReviewRequest, UpdateBusinessRequest,
};
use crate::reviews;
use crate::search::{self, SearchFilters};
use crate::subscription;

fn extract_actor_id(req: &HttpRequest) -> Result<Uuid, String> {
    req.headers()
        .get("X-Actor-Id")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| "Missing or invalid X-Actor-Id header".to_string())
}

fn extract_header_or_default(req: &HttpRequest, name: &str) -> String {
    req.headers()
        .get(name)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn extract_bearer_token(req: &HttpRequest) -> Result<String, String> {
    req.headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.to_string())
        .ok_or_else(|| "Missing Authorization bearer token".to_string())
}

/// Map a service failure to its HTTP status with the user-facing message.
fn failure(err: ServiceError) -> HttpResponse {
    let status = err.status_code();
    match &err {
        ServiceError::Upstream(detail) => log::error!("Upstream dependency failed: {detail}"),
        _ if status.is_server_error() => log::error!("Request failed: {err:?}"),
        _ => {}
    }
    HttpResponse::build(status).json(ApiResponse::<()>::error(err.to_string()))
}

/// Relay an identity-provider reply verbatim.
fn relay(reply: ProviderResponse) -> HttpResponse {
    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::BAD_GATEWAY);
    HttpResponse::build(status).json(reply.body)
}

// ============================================================================
// HEALTH CHECK
// ============================================================================

#[get("/health")]
pub async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "service": "directorio-local-service",
        "timestamp": chrono::Utc::now()
    }))
}

// ============================================================================
// AUTH (thin proxy to the identity provider)
// ============================================================================

#[post("/api/auth/signin")]
pub async fn sign_in(
    auth: web::Data<AuthClient>,
    payload: web::Json<SignInRequest>,
) -> impl Responder {
    match auth.sign_in(&payload.into_inner()).await {
        Ok(reply) => relay(reply),
        Err(err) => failure(ServiceError::Upstream(err)),
    }
}

#[post("/api/auth/signup")]
pub async fn sign_up(
    auth: web::Data<AuthClient>,
    payload: web::Json<SignUpRequest>,
) -> impl Responder {
    match auth.sign_up(&payload.into_inner()).await {
        Ok(reply) => relay(reply),
        Err(err) => failure(ServiceError::Upstream(err)),
    }
}

#[post("/api/auth/oauth")]
pub async fn sign_in_with_provider(
    auth: web::Data<AuthClient>,
    payload: web::Json<ProviderSignInRequest>,
) -> impl Responder {
    match auth.sign_in_with_provider(&payload.into_inner()).await {
        Ok(reply) => relay(reply),
        Err(err) => failure(ServiceError::Upstream(err)),
    }
}

#[post("/api/auth/signout")]
pub async fn sign_out(req: HttpRequest, auth: web::Data<AuthClient>) -> impl Responder {
    let token = match extract_bearer_token(&req) {
        Ok(token) => token,
        Err(err) => return HttpResponse::BadRequest().json(ApiResponse::<()>::error(err)),
    };
    match auth.sign_out(&token).await {
        Ok(reply) => relay(reply),
        Err(err) => failure(ServiceError::Upstream(err)),
    }
}

#[post("/api/auth/verification-email")]
pub async fn send_verification_email(
    req: HttpRequest,
    auth: web::Data<AuthClient>,
) -> impl Responder {
    let token = match extract_bearer_token(&req) {
        Ok(token) => token,
        Err(err) => return HttpResponse::BadRequest().json(ApiResponse::<()>::error(err)),
    };
    match auth.send_verification_email(&token).await {
        Ok(reply) => relay(reply),
        Err(err) => failure(ServiceError::Upstream(err)),
    }
}

/// Profile lookup with lazy creation. First access provisions the default
/// free-tier subscription.
#[get("/api/auth/profile")]
pub async fn get_profile(req: HttpRequest, db: web::Data<Database>) -> impl Responder {
    let actor_id = match extract_actor_id(&req) {
        Ok(id) => id,
        Err(err) => return HttpResponse::BadRequest().json(ApiResponse::<()>::error(err)),
    };
    let email = extract_header_or_default(&req, "X-Actor-Email");
    let name = extract_header_or_default(&req, "X-Actor-Name");

    match db.get_or_create_user_profile(actor_id, &email, &name).await {
        Ok(profile) => HttpResponse::Ok().json(ApiResponse::success(profile)),
        Err(err) => failure(ServiceError::Database(err)),
    }
}

// ============================================================================
// BUSINESS LISTINGS
// ============================================================================

#[post("/api/business")]
pub async fn create_business(
    req: HttpRequest,
    db: web::Data<Database>,
    payload: web::Json<CreateBusinessRequest>,
) -> impl Responder {
    let actor_id = match extract_actor_id(&req) {
        Ok(id) => id,
        Err(err) => return HttpResponse::BadRequest().json(ApiResponse::<()>::error(err)),
    };

    let body = payload.into_inner();
    if let Err(e) = body.validate() {
        return HttpResponse::BadRequest()
            .json(ApiResponse::<()>::error(format!("Validation failed: {}", e)));
    }
    if let Err(message) = body.validate_business_rules() {
        return failure(ServiceError::Validation(message));
    }

    // The subscription tier caps how many listings the actor may own.
    let email = extract_header_or_default(&req, "X-Actor-Email");
    let name = extract_header_or_default(&req, "X-Actor-Name");
    let profile = match db.get_or_create_user_profile(actor_id, &email, &name).await {
        Ok(profile) => profile,
        Err(err) => return failure(ServiceError::Database(err)),
    };
    if let Some(max) = subscription::max_businesses(&profile.subscription) {
        let owned = match db.count_businesses_for_owner(actor_id).await {
            Ok(count) => count,
            Err(err) => return failure(ServiceError::Database(err)),
        };
        if owned >= i64::from(max) {
            return failure(ServiceError::Validation(
                "Has alcanzado el límite de negocios de tu plan".into(),
            ));
        }
    }

    let new_business = body.into_new_business(actor_id);
    match db.create_business(new_business).await {
        Ok(business) => HttpResponse::Created().json(ApiResponse::success(business)),
        Err(err) => failure(ServiceError::Database(err)),
    }
}

// Registered before the `{business_id}` routes so "mine" is not parsed as
// an id.
#[get("/api/business/mine")]
pub async fn list_my_businesses(req: HttpRequest, db: web::Data<Database>) -> impl Responder {
    let actor_id = match extract_actor_id(&req) {
        Ok(id) => id,
        Err(err) => return HttpResponse::BadRequest().json(ApiResponse::<()>::error(err)),
    };
    match db.list_businesses_for_owner(actor_id).await {
        Ok(businesses) => HttpResponse::Ok().json(ApiResponse::success(businesses)),
        Err(err) => failure(ServiceError::Database(err)),
    }
}

#[get("/api/business/{business_id}")]
pub async fn get_business(db: web::Data<Database>, business_id: web::Path<Uuid>) -> impl Responder {
    let business_id = business_id.into_inner();
    match db.get_business(business_id).await {
        Ok(Some(business)) => HttpResponse::Ok().json(ApiResponse::success(business)),
        Ok(None) => failure(ServiceError::BusinessNotFound),
        Err(err) => failure(ServiceError::Database(err)),
    }
}

#[put("/api/business/{business_id}")]
pub async fn update_business(
    req: HttpRequest,
    db: web::Data<Database>,
    business_id: web::Path<Uuid>,
    payload: web::Json<UpdateBusinessRequest>,
) -> impl Responder {
    let actor_id = match extract_actor_id(&req) {
        Ok(id) => id,
        Err(err) => return HttpResponse::BadRequest().json(ApiResponse::<()>::error(err)),
    };

    let business_id = business_id.into_inner();
    let body = payload.into_inner();

    if let Err(e) = body.validate() {
        return HttpResponse::BadRequest()
            .json(ApiResponse::<()>::error(format!("Validation failed: {}", e)));
    }
    if let Err(message) = body.validate_business_rules() {
        return failure(ServiceError::Validation(message));
    }

    let mut existing = match db.get_business(business_id).await {
        Ok(Some(business)) => business,
        Ok(None) => return failure(ServiceError::BusinessNotFound),
        Err(err) => return failure(ServiceError::Database(err)),
    };
    if existing.owner_id != actor_id {
        return failure(ServiceError::NotOwner);
    }

    body.apply_to_existing(&mut existing);

    match db.update_business(existing).await {
        Ok(updated) => HttpResponse::Ok().json(ApiResponse::success(updated)),
        Err(err) => failure(ServiceError::Database(err)),
    }
}

#[delete("/api/business/{business_id}")]
pub async fn delete_business(
    req: HttpRequest,
    db: web::Data<Database>,
    storage: web::Data<StorageClient>,
    business_id: web::Path<Uuid>,
) -> impl Responder {
    let actor_id = match extract_actor_id(&req) {
        Ok(id) => id,
        Err(err) => return HttpResponse::BadRequest().json(ApiResponse::<()>::error(err)),
    };

    let business_id = business_id.into_inner();
    let business = match db.get_business(business_id).await {
        Ok(Some(business)) => business,
        Ok(None) => return failure(ServiceError::BusinessNotFound),
        Err(err) => return failure(ServiceError::Database(err)),
    };
    if business.owner_id != actor_id {
        return failure(ServiceError::NotOwner);
    }

    // Blob cleanup is best-effort; a stale image must not block the delete.
    for image_url in &business.images {
        if let Err(err) = storage.delete(image_url).await {
            log::error!("Failed to delete image {image_url}: {err}");
        }
    }

    match db.delete_business(business_id).await {
        Ok(true) => HttpResponse::NoContent().finish(),
        Ok(false) => failure(ServiceError::BusinessNotFound),
        Err(err) => failure(ServiceError::Database(err)),
    }
}

// ============================================================================
// LISTING IMAGES
// ============================================================================

#[post("/api/business/{business_id}/images")]
pub async fn upload_image(
    req: HttpRequest,
    db: web::Data<Database>,
    storage: web::Data<StorageClient>,
    business_id: web::Path<Uuid>,
    payload: web::Bytes,
) -> impl Responder {
    let actor_id = match extract_actor_id(&req) {
        Ok(id) => id,
        Err(err) => return HttpResponse::BadRequest().json(ApiResponse::<()>::error(err)),
    };
    let file_name = extract_header_or_default(&req, "X-File-Name");
    if file_name.is_empty() {
        return HttpResponse::BadRequest()
            .json(ApiResponse::<()>::error("Missing X-File-Name header".into()));
    }
    if payload.is_empty() {
        return failure(ServiceError::Validation(
            "El archivo de imagen está vacío".into(),
        ));
    }

    let business_id = business_id.into_inner();
    let mut business = match db.get_business(business_id).await {
        Ok(Some(business)) => business,
        Ok(None) => return failure(ServiceError::BusinessNotFound),
        Err(err) => return failure(ServiceError::Database(err)),
    };
    if business.owner_id != actor_id {
        return failure(ServiceError::NotOwner);
    }

    // Image count is capped by the owner's subscription tier.
    let email = extract_header_or_default(&req, "X-Actor-Email");
    let name = extract_header_or_default(&req, "X-Actor-Name");
    let profile = match db.get_or_create_user_profile(actor_id, &email, &name).await {
        Ok(profile) => profile,
        Err(err) => return failure(ServiceError::Database(err)),
    };
    if let Some(max) = subscription::max_images(&profile.subscription) {
        if business.images.len() as u32 >= max {
            return failure(ServiceError::Validation(
                "Has alcanzado el límite de fotos de tu plan".into(),
            ));
        }
    }

    let path = StorageClient::image_path(business_id, &file_name);
    let progress_path = path.clone();
    let progress = Box::new(move |percent: f32| {
        log::debug!("Uploading {progress_path}: {percent:.0}%");
    });
    let url = match storage.upload(&path, payload.to_vec(), Some(progress)).await {
        Ok(url) => url,
        Err(err) => return failure(ServiceError::Upstream(err)),
    };

    business.images.push(url);
    business.updated_at = Utc::now();
    match db.update_business(business).await {
        Ok(updated) => HttpResponse::Created().json(ApiResponse::success(updated)),
        Err(err) => failure(ServiceError::Database(err)),
    }
}

#[delete("/api/business/{business_id}/images")]
pub async fn delete_image(
    req: HttpRequest,
    db: web::Data<Database>,
    storage: web::Data<StorageClient>,
    business_id: web::Path<Uuid>,
    payload: web::Json<DeleteImageRequest>,
) -> impl Responder {
    let actor_id = match extract_actor_id(&req) {
        Ok(id) => id,
        Err(err) => return HttpResponse::BadRequest().json(ApiResponse::<()>::error(err)),
    };

    let business_id = business_id.into_inner();
    let url = payload.into_inner().url;

    let mut business = match db.get_business(business_id).await {
        Ok(Some(business)) => business,
        Ok(None) => return failure(ServiceError::BusinessNotFound),
        Err(err) => return failure(ServiceError::Database(err)),
    };
    if business.owner_id != actor_id {
        return failure(ServiceError::NotOwner);
    }

    if !business.remove_image(&url) {
        return failure(ServiceError::Validation("La imagen no existe".into()));
    }

    // The row update is the fatal step; the blob delete after it is
    // best-effort.
    business.updated_at = Utc::now();
    let updated = match db.update_business(business).await {
        Ok(updated) => updated,
        Err(err) => return failure(ServiceError::Database(err)),
    };

    if let Err(err) = storage.delete(&url).await {
        log::error!("Failed to delete image {url}: {err}");
    }

    HttpResponse::Ok().json(ApiResponse::success(updated))
}

// ============================================================================
// SEARCH
// ============================================================================

#[derive(Deserialize)]
pub struct SearchQuery {
    pub term: Option<String>,
    pub category: Option<String>,
    pub province: Option<String>,
    pub city: Option<String>,
    pub page_size: Option<u32>,
    pub cursor: Option<DateTime<Utc>>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[get("/api/search")]
pub async fn search_businesses(
    db: web::Data<Database>,
    query: web::Query<SearchQuery>,
) -> impl Responder {
    let query = query.into_inner();
    let page_size = query.page_size.unwrap_or(12).clamp(1, 50) as usize;
    let filters = SearchFilters {
        category: non_empty(query.category),
        province: non_empty(query.province),
        city: non_empty(query.city),
    };

    let page = if let Some(term) = non_empty(query.term) {
        // No full-text index on the store: scan, match in memory, truncate.
        // The cursor of a term search is best-effort only.
        match db.list_all_businesses().await {
            Ok(all) => {
                let items = search::filter_page(all, &term, &filters, page_size);
                let next_cursor = items.last().map(|b| b.created_at);
                SearchPage { items, next_cursor }
            }
            Err(err) => return failure(ServiceError::Database(err)),
        }
    } else {
        // Store-side pagination; equality filters run afterwards, so a page
        // may come back short even when more matches exist.
        match db.list_businesses_page(page_size as i64, query.cursor).await {
            Ok(raw_page) => {
                let next_cursor = raw_page.last().map(|b| b.created_at);
                let items: Vec<Business> = raw_page
                    .into_iter()
                    .filter(|b| search::matches_filters(b, &filters))
                    .collect();
                SearchPage { items, next_cursor }
            }
            Err(err) => return failure(ServiceError::Database(err)),
        }
    };

    HttpResponse::Ok().json(ApiResponse::success(page))
}

// ============================================================================
// REVIEWS
// ============================================================================

#[post("/api/review/{business_id}")]
pub async fn submit_review(
    req: HttpRequest,
    db: web::Data<Database>,
    business_id: web::Path<Uuid>,
    payload: web::Json<SubmitReviewRequest>,
) -> impl Responder {
    let actor_id = match extract_actor_id(&req) {
        Ok(id) => id,
        Err(err) => return HttpResponse::BadRequest().json(ApiResponse::<()>::error(err)),
    };

    let business_id = business_id.into_inner();
    let body = payload.into_inner();

    let result = db
        .mutate_business_reviews(business_id, |business| {
            reviews::submit_review(business, actor_id, body.rating, &body.tags, Utc::now())
                .map(|_| ())
        })
        .await;

    match result {
        Ok(business) => HttpResponse::Created().json(ApiResponse::success(business)),
        Err(err) => failure(err),
    }
}

#[post("/api/review/{business_id}/{review_id}/response")]
pub async fn respond_to_review(
    req: HttpRequest,
    db: web::Data<Database>,
    path: web::Path<(Uuid, Uuid)>,
    payload: web::Json<RespondReviewRequest>,
) -> impl Responder {
    let actor_id = match extract_actor_id(&req) {
        Ok(id) => id,
        Err(err) => return HttpResponse::BadRequest().json(ApiResponse::<()>::error(err)),
    };

    let (business_id, review_id) = path.into_inner();
    let body = payload.into_inner();
    if let Err(e) = body.validate() {
        return HttpResponse::BadRequest()
            .json(ApiResponse::<()>::error(format!("Validation failed: {}", e)));
    }

    let result = db
        .mutate_business_reviews(business_id, |business| {
            if business.owner_id != actor_id {
                return Err(ServiceError::NotOwner);
            }
            reviews::respond_to_review(business, review_id, body.text.clone(), Utc::now())
        })
        .await;

    match result {
        Ok(business) => HttpResponse::Ok().json(ApiResponse::success(business)),
        Err(err) => failure(err),
    }
}

#[post("/api/review/{business_id}/{review_id}/flag")]
pub async fn flag_review(
    req: HttpRequest,
    db: web::Data<Database>,
    path: web::Path<(Uuid, Uuid)>,
    payload: web::Json<FlagReviewRequest>,
) -> impl Responder {
    if let Err(err) = extract_actor_id(&req) {
        return HttpResponse::BadRequest().json(ApiResponse::<()>::error(err));
    }

    let (business_id, review_id) = path.into_inner();
    let body = payload.into_inner();
    if let Err(e) = body.validate() {
        return HttpResponse::BadRequest()
            .json(ApiResponse::<()>::error(format!("Validation failed: {}", e)));
    }

    let result = db
        .mutate_business_reviews(business_id, |business| {
            reviews::flag_review(business, review_id, body.reason.clone(), Utc::now())
        })
        .await;

    match result {
        Ok(business) => HttpResponse::Ok().json(ApiResponse::success(business)),
        Err(err) => failure(err),
    }
}

#[delete("/api/review/{business_id}/{review_id}")]
pub async fn delete_review(
    req: HttpRequest,
    db: web::Data<Database>,
    path: web::Path<(Uuid, Uuid)>,
) -> impl Responder {
    let actor_id = match extract_actor_id(&req) {
        Ok(id) => id,
        Err(err) => return HttpResponse::BadRequest().json(ApiResponse::<()>::error(err)),
    };

    let (business_id, review_id) = path.into_inner();

    let result = db
        .mutate_business_reviews(business_id, |business| {
            // Only the listing owner moderates its reviews.
            if business.owner_id != actor_id {
                return Err(ServiceError::NotOwner);
            }
            reviews::delete_review(business, review_id, Utc::now())
        })
        .await;

    match result {
        Ok(business) => HttpResponse::Ok().json(ApiResponse::success(business)),
        Err(err) => failure(err),
    }
}
