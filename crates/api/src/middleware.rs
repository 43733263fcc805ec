use std::time::Duration;

use axum::{
    extract::{Request, State},
    http::{Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, info, warn};

pub async fn request_logging(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = std::time::Instant::now();

    let response = next.run(request).await;
    let duration = start.elapsed();

    // 心跳非常频繁，只在debug级别记录
    if uri.path().starts_with("/cluster/") {
        debug!(
            "{} {} - 状态: {} - 耗时: {:?}",
            method,
            uri,
            response.status(),
            duration
        );
    } else {
        info!(
            "完成请求处理: {} {} - 状态: {} - 耗时: {:?}",
            method,
            uri,
            response.status(),
            duration
        );
    }

    metrics::histogram!("archivist.http.request.duration", "method" => method.to_string())
        .record(duration.as_secs_f64());

    response
}

pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any)
}

pub fn trace_layer(
) -> TraceLayer<tower_http::classify::SharedClassifier<tower_http::classify::ServerErrorsAsFailures>>
{
    TraceLayer::new_for_http()
}

/// 超过配置时间未完成的请求返回408
pub async fn request_timeout(
    State(timeout): State<Duration>,
    request: Request,
    next: Next,
) -> Response {
    match tokio::time::timeout(timeout, next.run(request)).await {
        Ok(response) => response,
        Err(_) => {
            warn!("请求处理超时: {:?}", timeout);
            (StatusCode::REQUEST_TIMEOUT, "request timeout").into_response()
        }
    }
}
