//! Local HTTP fixtures for async tests

use std::collections::HashMap;
use std::net::SocketAddr;

use axum::extract::Query;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;

use crate::source::{normalize, SubscriptionUrl};

/// Bind an ephemeral port and serve `router` in the background
pub async fn spawn(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// Subscription URL on a spawned fixture
pub fn sub_url(addr: SocketAddr, token: &str) -> SubscriptionUrl {
    normalize(&format!(
        "http://{}/api/v1/client/subscribe?token={}",
        addr, token
    ))
    .unwrap()
}

/// Panel answering `raw` for the plain variant and `structured` for `flag=clash`
pub fn panel_router(raw: (StatusCode, String), structured: (StatusCode, String)) -> Router {
    Router::new().route(
        "/api/v1/client/subscribe",
        get(move |Query(query): Query<HashMap<String, String>>| {
            let raw = raw.clone();
            let structured = structured.clone();
            async move {
                if query.get("flag").map(String::as_str) == Some("clash") {
                    structured
                } else {
                    raw
                }
            }
        }),
    )
}

/// Panel that serves the same body for every variant
pub fn static_panel(status: StatusCode, body: &str) -> Router {
    let reply = (status, body.to_string());
    panel_router(reply.clone(), reply)
}
