//! Shared test utilities for the integration suites.
//!
//! Import via `mod common;`.

#![allow(dead_code)]

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use dbscope::liveserver::factory;
use dbscope::{
    AccessGate, Migration, SessionOptions, Settings, SqliteBackend, TestSession, UrlConf,
    UrlRoutes, DEFAULT_ALIAS,
};
use std::sync::{Arc, Once};
use tempfile::TempDir;

// ============================================================================
// Initialization
// ============================================================================

static INIT_TRACING: Once = Once::new();

/// Route `tracing` output through the test harness; `RUST_LOG` selects.
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub const SETTINGS: &str = r#"
root_urlconf = "shop.urls"

[databases.default]
engine = "sqlite"
name = "shop"
"#;

pub fn migrations() -> Vec<Migration> {
    vec![
        Migration::new(
            "0001_orders",
            "CREATE TABLE orders (id INTEGER PRIMARY KEY AUTOINCREMENT, item TEXT NOT NULL)",
        ),
        Migration::new(
            "0002_order_lines",
            "CREATE TABLE order_lines (
                order_id INTEGER NOT NULL REFERENCES orders(id),
                qty INTEGER NOT NULL
            )",
        ),
    ]
}

// ============================================================================
// Harness - session over SQLite files in a temporary directory
// ============================================================================

/// A session plus the resources it lives on. Fields drop in order, so the
/// session finishes before the directory disappears.
pub struct Harness {
    pub session: TestSession<SqliteBackend>,
    pub backend: Arc<SqliteBackend>,
    pub urlconf: Arc<UrlConf>,
    pub dir: TempDir,
}

impl Harness {
    pub fn new(options: SessionOptions) -> Self {
        Self::in_dir(TempDir::new().unwrap(), options)
    }

    pub fn in_dir(dir: TempDir, options: SessionOptions) -> Self {
        Self::build(dir, options, migrations())
    }

    pub fn build(dir: TempDir, options: SessionOptions, migrations: Vec<Migration>) -> Self {
        init_tracing();
        let settings = Settings::from_toml_str(SETTINGS).unwrap();
        let gate = Arc::new(AccessGate::new());
        let backend = Arc::new(
            SqliteBackend::from_settings(&settings, gate.clone(), dir.path())
                .unwrap()
                .with_migrations(migrations),
        );
        let urlconf = Arc::new(UrlConf::new(settings.root_urlconf.clone()));
        let session = TestSession::new(backend.clone(), gate, options)
            .with_urlconf(urlconf.clone())
            .with_live_server(factory(urlconf.clone(), routes(backend.clone())));
        Self {
            session,
            backend,
            urlconf,
            dir,
        }
    }

    pub fn test_db_exists(&self, name: &str) -> bool {
        self.dir.path().join(format!("{}.sqlite3", name)).exists()
    }
}

// ============================================================================
// Data helpers
// ============================================================================

pub fn insert_order(backend: &SqliteBackend, item: &str) -> dbscope::Result<()> {
    backend.with_connection(DEFAULT_ALIAS, |conn| {
        conn.execute("INSERT INTO orders (item) VALUES (?1)", [item])
            .map(|_| ())
    })
}

pub fn order_count(backend: &SqliteBackend) -> dbscope::Result<i64> {
    backend.with_connection(DEFAULT_ALIAS, |conn| {
        conn.query_row("SELECT COUNT(*) FROM orders", [], |row| row.get(0))
    })
}

// ============================================================================
// Live server routes
// ============================================================================

/// `shop.urls` counts orders through its own connection; `admin.urls`
/// answers the same path with a fixed body.
pub fn routes(backend: Arc<SqliteBackend>) -> UrlRoutes {
    let shop = Router::new()
        .route("/orders/count", get(count_orders))
        .with_state(backend);
    let admin = Router::new().route("/orders/count", get(|| async { "admin" }));
    UrlRoutes::new().with("shop.urls", shop).with("admin.urls", admin)
}

async fn count_orders(
    State(backend): State<Arc<SqliteBackend>>,
) -> Result<String, (StatusCode, String)> {
    let internal = |e: String| (StatusCode::INTERNAL_SERVER_ERROR, e);
    let conn = backend
        .open_worker_connection(DEFAULT_ALIAS)
        .map_err(|e| internal(e.to_string()))?;
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM orders", [], |row| row.get(0))
        .map_err(|e| internal(e.to_string()))?;
    Ok(count.to_string())
}

pub fn get_text(url: &str) -> (u16, String) {
    let response = reqwest::blocking::get(url).unwrap();
    let status = response.status().as_u16();
    (status, response.text().unwrap())
}
