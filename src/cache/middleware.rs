//! Request boundary middleware.
//!
//! Opens a [`RequestScope`] for every request, exposes the
//! [`RequestContext`] as a request extension and flushes the request tag
//! once the handler has produced its response. Failed responses are logged
//! with the [`ErrorReport`] their handler attached, tagged with the request.

use axum::{body::Body, extract::State, http::Request, middleware::Next, response::Response};
use tracing::{error, instrument, warn};

use crate::application::error::ErrorReport;

use super::scope::{RequestContext, RequestScope};

#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn request_scope_layer(
    State(scope): State<RequestScope>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let ctx = scope.begin();
    request.extensions_mut().insert(ctx.clone());
    let mut response = scope.run(ctx.clone(), next.run(request)).await;
    report_failure(&ctx, &mut response);
    response
}

fn report_failure(ctx: &RequestContext, response: &mut Response) {
    let status = response.status();
    if !(status.is_client_error() || status.is_server_error()) {
        return;
    }
    let (source, messages) = match response.extensions_mut().remove::<ErrorReport>() {
        Some(report) => (report.source, report.messages),
        None => ("unknown", Vec::new()),
    };
    let detail = messages
        .first()
        .cloned()
        .unwrap_or_else(|| "no diagnostic available".to_string());

    if status.is_server_error() {
        error!(
            target = "tagstash::http::response",
            status = status.as_u16(),
            request_tag = ctx.tag(),
            source = source,
            detail = %detail,
            chain = ?messages,
            "request failed",
        );
    } else {
        warn!(
            target = "tagstash::http::response",
            status = status.as_u16(),
            request_tag = ctx.tag(),
            source = source,
            detail = %detail,
            chain = ?messages,
            "client request error",
        );
    }
}
