//! Request id middleware.
//!
//! Every response carries `x-amz-request-id`. The id is also held in a task
//! local for the duration of the request so error responses can embed it in
//! the XML body.

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;

tokio::task_local! {
    static REQUEST_ID: String;
}

/// Header carrying the request id.
pub const REQUEST_ID_HEADER: &str = "x-amz-request-id";

/// The current request's id, when called from within a request scope.
pub fn current_request_id() -> Option<String> {
    REQUEST_ID.try_with(|id| id.clone()).ok()
}

/// Generate a request id, run the request inside its scope, and stamp the
/// response header.
pub async fn request_id_middleware(req: Request, next: Next) -> Response {
    let id = silo_core::id::new_request_id();
    let mut response = REQUEST_ID.scope(id.clone(), next.run(req)).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
