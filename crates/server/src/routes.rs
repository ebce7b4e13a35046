//! Route configuration.

use crate::auth::auth_middleware;
use crate::handlers;
use crate::request_id::request_id_middleware;
use crate::s3xml;
use crate::state::AppState;
use axum::Router;
use axum::body::Body;
use axum::http::{Response, StatusCode, header};
use axum::middleware;
use axum::routing::get;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

/// Convert an uncaught panic into a generic S3 XML error.
fn handle_panic(err: Box<dyn std::any::Any + Send + 'static>) -> Response<Body> {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("panic");
    tracing::error!(detail, "request handler panicked");

    let body = s3xml::error_document(
        "InternalError",
        "We encountered an internal error. Please try again.",
        None,
        None,
    );
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(header::CONTENT_TYPE, "application/xml")
        .body(Body::from(body))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Probes (unauthenticated; see the auth middleware's open paths).
        .route("/healthz", get(handlers::health))
        .route("/readyz", get(handlers::ready))
        // Service level.
        .route(
            "/",
            get(handlers::buckets::list_buckets).fallback(handlers::method_not_allowed),
        )
        // Bucket level: create/delete, ListObjectsV2 and the lifecycle
        // sub-resource are dispatched on query parameters.
        .route(
            "/{bucket}",
            get(handlers::buckets::bucket_get)
                .put(handlers::buckets::bucket_put)
                .delete(handlers::buckets::bucket_delete)
                .fallback(handlers::method_not_allowed),
        )
        // Object level.
        .route(
            "/{bucket}/{*key}",
            get(handlers::objects::get_object)
                .head(handlers::objects::head_object)
                .put(handlers::objects::put_object)
                .delete(handlers::objects::delete_object)
                .fallback(handlers::method_not_allowed),
        )
        // Layers run outermost-last: trace -> panic guard -> request id ->
        // auth -> handler.
        .layer(middleware::from_fn_with_state::<_, AppState, (axum::extract::State<AppState>, axum::extract::Request)>(
            state.clone(),
            auth_middleware,
        ))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
