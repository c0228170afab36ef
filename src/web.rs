use crate::{
    app::Services,
    auth,
    eid::Eid,
    errors::{ApiError, Issue},
    jobs::{JobMetadata, JobOperation, JobSource},
    listings::{ListingCreate, ListingStore, ListingUpdate},
    pages,
    users::{Role, User, UserStore, UserView},
};
use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{Html, IntoResponse},
    routing::{get, patch, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::{str::FromStr, sync::Arc};
use tokio::signal;
use tower_http::set_header::SetResponseHeaderLayer;

async fn start_app(services: Services) {
    let services = Arc::new(services);

    let signal = shutdown_signal(services.clone());

    async fn shutdown_signal(services: Arc<Services>) {
        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
        };

        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        tokio::select! {
            _ = ctrl_c => {}
            _ = terminate => {}
        }

        log::warn!("shutting down, draining embedding workers");
        tokio::task::block_in_place(|| services.shutdown());
    }

    let (host, port) = {
        let config = services.config.read().expect("config lock poisoned");
        (config.host.clone(), config.port)
    };

    let app = router(services);

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind listen address");
    log::info!("listening on {addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(signal)
        .await
        .expect("server error");
}

pub fn router(services: Arc<Services>) -> Router {
    Router::new()
        // directory API
        .route("/api", get(api_banner))
        .route("/yellow-books", get(list_listings).post(create_listing))
        .route("/yellow-books/:id", get(get_listing))
        // admin API
        .route("/admin/users", get(admin_list_users))
        .route("/admin/users/:id/role", patch(admin_update_role))
        .route(
            "/admin/yellow-books/:id",
            patch(admin_update_listing).delete(admin_delete_listing),
        )
        .route("/admin/embeddings/bulk", post(admin_bulk_embeddings))
        .route("/admin/jobs/:job_id", get(admin_job_status))
        // assistant + auth + cache invalidation
        .route("/api/ai/yellow-books/search", post(ai_search))
        .route("/auth/signin", post(sign_in))
        .route("/revalidate", post(revalidate))
        // server-rendered pages
        .route("/", get(home_page))
        .route("/listings/:id", get(listing_page))
        .route("/search", get(search_page))
        .route("/assistant", get(assistant_page))
        .route("/admin", get(admin_page))
        .route("/signin", get(signin_page))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(services)
}

pub fn start_daemon(services: Services) {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build runtime")
        .block_on(async { start_app(services).await });
}

#[derive(Debug)]
struct HttpError(ApiError);

impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        match self.0 {
            ApiError::NotFound => (
                StatusCode::NOT_FOUND,
                json!({"error": self.0.to_string()}).to_string(),
            ),
            ApiError::Validation(issues) => (
                StatusCode::BAD_REQUEST,
                json!({"error": "Invalid input", "details": issues}).to_string(),
            ),
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                json!({"error": self.0.to_string()}).to_string(),
            ),
            ApiError::Forbidden => (
                StatusCode::FORBIDDEN,
                json!({"error": self.0.to_string()}).to_string(),
            ),
            ApiError::Reqwest(_) | ApiError::IO(_) | ApiError::Other(_) => {
                log::error!("{:?}", self.0);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({"error": "Internal server error"}).to_string(),
                )
            }
        }
        .into_response()
    }
}

impl<E> From<E> for HttpError
where
    E: Into<ApiError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

/// Resolve the bearer credential and check the admin capability once,
/// before the protected handler body runs.
fn require_admin(services: &Services, headers: &HeaderMap) -> Result<User, ApiError> {
    let header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;
    let token = auth::extract_bearer_token(header).ok_or(ApiError::Unauthorized)?;

    let user = services
        .users
        .find_by_token(token)?
        .ok_or(ApiError::Unauthorized)?;

    if user.role != Role::Admin {
        return Err(ApiError::Forbidden);
    }

    Ok(user)
}

async fn api_banner() -> Json<serde_json::Value> {
    Json(json!({"message": "Yellowbook API"}))
}

#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    search: Option<String>,
}

async fn list_listings(
    State(services): State<Arc<Services>>,
    Query(query): Query<ListQuery>,
) -> Result<axum::Json<serde_json::Value>, HttpError> {
    tokio::task::block_in_place(move || {
        let listings = services.listings.search(query.search.as_deref())?;
        Ok(Json(serde_json::to_value(listings).map_err(anyhow::Error::from)?))
    })
}

async fn get_listing(
    State(services): State<Arc<Services>>,
    Path(id): Path<String>,
) -> Result<axum::Json<serde_json::Value>, HttpError> {
    tokio::task::block_in_place(move || {
        let listing = services
            .listings
            .get(&Eid::from(id))?
            .ok_or(ApiError::NotFound)?;
        Ok(Json(serde_json::to_value(listing).map_err(anyhow::Error::from)?))
    })
}

async fn create_listing(
    State(services): State<Arc<Services>>,
    Json(payload): Json<ListingCreate>,
) -> Result<(StatusCode, axum::Json<serde_json::Value>), HttpError> {
    log::debug!("payload: {payload:?}");

    tokio::task::block_in_place(move || {
        let new = payload.validate().map_err(ApiError::validation)?;

        // Two-phase write: the listing is persisted first; a failed
        // enqueue is logged and the request still succeeds, since the
        // listing itself is durable and can be re-embedded later.
        let listing = services.listings.create(new)?;

        let ticket = match services.queue.enqueue(
            listing.id.clone(),
            JobOperation::Create,
            JobMetadata::new("system", JobSource::Api),
        ) {
            Ok(ticket) => Some(ticket),
            Err(err) => {
                log::error!("failed to enqueue embedding job for {}: {err}", listing.id);
                None
            }
        };

        let mut body = serde_json::to_value(&listing).map_err(anyhow::Error::from)?;
        body["_embeddingJob"] = json!(ticket);

        Ok((StatusCode::CREATED, Json(body)))
    })
}

async fn admin_list_users(
    State(services): State<Arc<Services>>,
    headers: HeaderMap,
) -> Result<axum::Json<Vec<UserView>>, HttpError> {
    tokio::task::block_in_place(move || {
        require_admin(&services, &headers)?;

        let users = services.users.list()?;
        Ok(Json(users.iter().map(UserView::from).collect()))
    })
}

#[derive(Debug, Deserialize)]
struct RoleUpdateRequest {
    role: String,
}

async fn admin_update_role(
    State(services): State<Arc<Services>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(payload): Json<RoleUpdateRequest>,
) -> Result<axum::Json<UserView>, HttpError> {
    tokio::task::block_in_place(move || {
        require_admin(&services, &headers)?;

        // Strict enumeration check; anything else leaves the stored role
        // untouched.
        let role = Role::from_str(&payload.role).map_err(|_| {
            ApiError::validation(vec![Issue::new(
                "role",
                "role must be exactly \"user\" or \"admin\"",
            )])
        })?;

        let user = services
            .users
            .set_role(&Eid::from(id), role)?
            .ok_or(ApiError::NotFound)?;

        Ok(Json(UserView::from(&user)))
    })
}

async fn admin_update_listing(
    State(services): State<Arc<Services>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(payload): Json<ListingUpdate>,
) -> Result<axum::Json<serde_json::Value>, HttpError> {
    tokio::task::block_in_place(move || {
        let admin = require_admin(&services, &headers)?;

        let payload = payload.validate().map_err(ApiError::validation)?;

        let id = Eid::from(id);
        let listing = services
            .listings
            .update(&id, payload)?
            .ok_or(ApiError::NotFound)?;

        // Edited text invalidates the stored vector; re-embed at normal
        // priority. Same two-phase contract as creation.
        let ticket = match services.queue.enqueue(
            id,
            JobOperation::Update,
            JobMetadata::new(&admin.email, JobSource::Admin),
        ) {
            Ok(ticket) => Some(ticket),
            Err(err) => {
                log::error!("failed to enqueue embedding job for {}: {err}", listing.id);
                None
            }
        };

        let mut body = serde_json::to_value(&listing).map_err(anyhow::Error::from)?;
        body["_embeddingJob"] = json!(ticket);

        Ok(Json(body))
    })
}

async fn admin_delete_listing(
    State(services): State<Arc<Services>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<axum::Json<serde_json::Value>, HttpError> {
    tokio::task::block_in_place(move || {
        let admin = require_admin(&services, &headers)?;

        let id = Eid::from(id);
        if !services.listings.delete(&id)? {
            return Err(HttpError(ApiError::NotFound));
        }

        log::info!("listing {id} deleted by {}", admin.email);
        Ok(Json(json!({"message": format!("Listing {id} deleted")})))
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BulkEmbeddingsRequest {
    #[serde(default)]
    business_ids: Vec<String>,
}

async fn admin_bulk_embeddings(
    State(services): State<Arc<Services>>,
    headers: HeaderMap,
    Json(payload): Json<BulkEmbeddingsRequest>,
) -> Result<axum::Json<serde_json::Value>, HttpError> {
    tokio::task::block_in_place(move || {
        let admin = require_admin(&services, &headers)?;

        if payload.business_ids.is_empty() {
            return Err(HttpError(ApiError::validation(vec![Issue::new(
                "businessIds",
                "businessIds must be a non-empty list",
            )])));
        }

        let mut accepted = vec![];
        for business_id in payload.business_ids {
            let id = Eid::from(business_id.clone());

            if services.listings.get(&id)?.is_none() {
                accepted.push(json!({
                    "businessId": business_id,
                    "accepted": false,
                    "reason": "listing not found",
                }));
                continue;
            }

            match services.queue.enqueue(
                id,
                JobOperation::Bulk,
                JobMetadata::new(&admin.email, JobSource::Admin),
            ) {
                Ok(ticket) => accepted.push(json!({
                    "businessId": business_id,
                    "accepted": true,
                    "jobId": ticket.job_id,
                    "status": ticket.status,
                })),
                Err(err) => {
                    log::error!("bulk enqueue failed for {business_id}: {err}");
                    accepted.push(json!({
                        "businessId": business_id,
                        "accepted": false,
                        "reason": "enqueue failed",
                    }));
                }
            }
        }

        Ok(Json(json!({"jobs": accepted})))
    })
}

async fn admin_job_status(
    State(services): State<Arc<Services>>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
) -> Result<axum::Json<serde_json::Value>, HttpError> {
    tokio::task::block_in_place(move || {
        require_admin(&services, &headers)?;

        let snapshot = services.queue.snapshot(&job_id).ok_or(ApiError::NotFound)?;
        Ok(Json(serde_json::to_value(snapshot).map_err(anyhow::Error::from)?))
    })
}

#[derive(Debug, Deserialize)]
struct AiSearchRequest {
    #[serde(default)]
    query: String,
}

async fn ai_search(
    State(services): State<Arc<Services>>,
    Json(payload): Json<AiSearchRequest>,
) -> Result<axum::Json<serde_json::Value>, HttpError> {
    tokio::task::block_in_place(move || {
        let query = payload.query.trim();
        if query.is_empty() {
            return Err(HttpError(ApiError::validation(vec![Issue::new(
                "query",
                "query must not be empty",
            )])));
        }

        let response = services.assistant.search(query)?;
        Ok(Json(serde_json::to_value(response).map_err(anyhow::Error::from)?))
    })
}

#[derive(Debug, Deserialize)]
struct SignInRequest {
    email: String,
    name: Option<String>,
}

/// Exchange an identity-provider profile for a bearer token. First
/// sign-in creates the account with role `user`.
async fn sign_in(
    State(services): State<Arc<Services>>,
    Json(payload): Json<SignInRequest>,
) -> Result<axum::Json<serde_json::Value>, HttpError> {
    tokio::task::block_in_place(move || {
        if payload.email.trim().is_empty() || !payload.email.contains('@') {
            return Err(HttpError(ApiError::validation(vec![Issue::new(
                "email",
                "email must be a well-formed address",
            )])));
        }

        let (user, token) = services.users.sign_in(payload.email.trim(), payload.name)?;
        log::info!("user {} signed in", user.email);

        Ok(Json(json!({
            "token": token,
            "user": UserView::from(&user),
        })))
    })
}

#[derive(Debug, Deserialize)]
struct RevalidateRequest {
    #[serde(default)]
    secret: String,
}

/// On-demand cache invalidation: clears the assistant answer cache when
/// the shared secret matches.
async fn revalidate(
    State(services): State<Arc<Services>>,
    Json(payload): Json<RevalidateRequest>,
) -> Result<axum::Json<serde_json::Value>, HttpError> {
    tokio::task::block_in_place(move || {
        let expected = services
            .config
            .read()
            .ok()
            .and_then(|c| c.revalidate_secret.clone())
            .ok_or(ApiError::Unauthorized)?;

        if !auth::validate_token(&payload.secret, &expected) {
            return Err(HttpError(ApiError::Unauthorized));
        }

        services.assistant.clear_cache();
        Ok(Json(json!({"revalidated": true, "timestamp": Utc::now()})))
    })
}

async fn home_page(
    State(services): State<Arc<Services>>,
) -> Result<Html<String>, HttpError> {
    tokio::task::block_in_place(move || {
        let listings = services.listings.search(None)?;
        Ok(Html(pages::home(&listings)))
    })
}

async fn listing_page(
    State(services): State<Arc<Services>>,
    Path(id): Path<String>,
) -> Result<Html<String>, HttpError> {
    tokio::task::block_in_place(move || {
        let listing = services
            .listings
            .get(&Eid::from(id))?
            .ok_or(ApiError::NotFound)?;
        Ok(Html(pages::listing_detail(&listing)))
    })
}

#[derive(Debug, Default, Deserialize)]
struct SearchPageQuery {
    q: Option<String>,
}

async fn search_page(
    State(services): State<Arc<Services>>,
    Query(query): Query<SearchPageQuery>,
) -> Result<Html<String>, HttpError> {
    tokio::task::block_in_place(move || {
        let results = match query.q.as_deref() {
            Some(q) if !q.trim().is_empty() => services.listings.search(Some(q))?,
            _ => vec![],
        };
        Ok(Html(pages::search(query.q.as_deref().unwrap_or(""), &results)))
    })
}

async fn assistant_page() -> Html<String> {
    Html(pages::assistant())
}

async fn admin_page() -> Html<String> {
    Html(pages::admin_dashboard())
}

async fn signin_page() -> Html<String> {
    Html(pages::sign_in())
}
