//! URL configurations served by the live server
//!
//! Each named configuration is an axum [`Router`]. Requests are dispatched
//! to the router named by the [`UrlConf`] at the time the request arrives,
//! so a test that swaps the URL configuration changes what the server
//! answers without restarting it.

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Router;
use dbscope_core::UrlConf;
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceExt;
use tracing::debug;

/// Named routers, keyed by URL configuration name
#[derive(Clone, Default)]
pub struct UrlRoutes {
    routes: HashMap<String, Router>,
}

impl UrlRoutes {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `router` as the configuration `name`
    pub fn with(mut self, name: impl Into<String>, router: Router) -> Self {
        self.routes.insert(name.into(), router);
        self
    }

    /// Router for configuration `name`
    pub fn get(&self, name: &str) -> Option<&Router> {
        self.routes.get(name)
    }

    /// Registered configuration names
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.routes.keys().cloned().collect();
        names.sort();
        names
    }
}

#[derive(Clone)]
struct Dispatch {
    urlconf: Arc<UrlConf>,
    routes: Arc<UrlRoutes>,
}

/// Application that forwards every request to the active configuration
pub fn dispatcher(urlconf: Arc<UrlConf>, routes: Arc<UrlRoutes>) -> Router {
    Router::new()
        .fallback(dispatch)
        .with_state(Dispatch { urlconf, routes })
}

async fn dispatch(State(state): State<Dispatch>, request: Request) -> Response {
    let active = state.urlconf.current();
    let router = active.as_deref().and_then(|name| state.routes.get(name)).cloned();
    debug!(
        target: "dbscope::liveserver",
        method = %request.method(),
        uri = %request.uri(),
        urlconf = ?active,
        "Dispatching request"
    );
    match router {
        Some(router) => match router.oneshot(request).await {
            Ok(response) => response,
            Err(never) => match never {},
        },
        None => (
            StatusCode::NOT_FOUND,
            format!("no routes for url configuration {:?}", active),
        )
            .into_response(),
    }
}
