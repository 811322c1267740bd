use axum::{extract::Request, http::header::CONTENT_TYPE, http::HeaderValue, middleware::Next, response::Response};

/// Peers and scripts often post envelopes without a content type; treat
/// every POST/PUT body as JSON.
pub async fn normalize_content_type(mut request: Request, next: Next) -> Response {
    if request.method() == axum::http::Method::POST || request.method() == axum::http::Method::PUT {
        request
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }
    next.run(request).await
}

/// Stamp every response with the node that served it.
pub async fn node_id_header(node_id: String, request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&node_id) {
        response.headers_mut().insert("x-roundsync-node", value);
    }
    response
}
