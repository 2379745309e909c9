//! Test session: the object a test harness holds for a whole run
//!
//! A session closes the access gate when it is created and reopens it in
//! [`TestSession::finish`]. In between, every test goes through
//! [`TestSession::run`], which:
//!
//! - serializes tests, so one test at a time touches the databases
//! - sets up the test databases the first time a test needs them
//! - starts the live server the first time a test asks for it
//! - swaps the URL configuration for tests with a `urls` marker
//! - runs the body in the scope its declaration selects
//!
//! Database setup happens at most once. If it fails, every later database
//! test fails with the same [`Error::SessionSetup`].

use crate::creation::SetupRecord;
use crate::gate::AccessGate;
use crate::lifecycle::DatabaseLifecycle;
use crate::scope::{ScopeState, TestScopeController};
use dbscope_core::{
    DatabaseBackend, Error, LiveServer, LiveServerAddress, LiveServerFactory, Marker, Result,
    SessionOptions, TestDeclaration, UrlConf,
};
use parking_lot::Mutex;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

enum DatabaseState {
    Pending,
    Ready(DatabaseLifecycle),
    Failed(String),
    Finished,
}

/// One test run against one backend
pub struct TestSession<B: DatabaseBackend + ?Sized> {
    backend: Arc<B>,
    gate: Arc<AccessGate>,
    options: SessionOptions,
    urlconf: Arc<UrlConf>,
    controller: TestScopeController<B>,
    databases: Mutex<DatabaseState>,
    live_server: Mutex<Option<Box<dyn LiveServer>>>,
    live_server_factory: Option<LiveServerFactory>,
    test_lock: Mutex<()>,
    finished: AtomicBool,
}

impl<B: DatabaseBackend + ?Sized> TestSession<B> {
    /// Start a session. The gate is closed until [`TestSession::finish`].
    ///
    /// `gate` must be the gate `backend` checks before connecting.
    pub fn new(backend: Arc<B>, gate: Arc<AccessGate>, options: SessionOptions) -> Self {
        gate.disable();
        info!(
            target: "dbscope::session",
            connections = backend.connections().len(),
            reuse_db = options.reuse_db,
            create_db = options.create_db,
            worker = ?options.worker,
            "Test session started"
        );
        Self {
            controller: TestScopeController::new(backend.clone(), gate.clone()),
            backend,
            gate,
            options,
            urlconf: Arc::new(UrlConf::new(None)),
            databases: Mutex::new(DatabaseState::Pending),
            live_server: Mutex::new(None),
            live_server_factory: None,
            test_lock: Mutex::new(()),
            finished: AtomicBool::new(false),
        }
    }

    /// Share `urlconf` with the live server and the tests
    pub fn with_urlconf(mut self, urlconf: Arc<UrlConf>) -> Self {
        self.urlconf = urlconf;
        self
    }

    /// Build the live server with `factory` when a test first needs it
    pub fn with_live_server(mut self, factory: LiveServerFactory) -> Self {
        self.live_server_factory = Some(factory);
        self
    }

    /// Backend the session drives
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// The session's access gate
    pub fn gate(&self) -> &Arc<AccessGate> {
        &self.gate
    }

    /// Options the session was started with
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Active URL configuration
    pub fn urlconf(&self) -> &Arc<UrlConf> {
        &self.urlconf
    }

    /// Whether the test databases have been set up successfully
    pub fn databases_ready(&self) -> bool {
        matches!(*self.databases.lock(), DatabaseState::Ready(_))
    }

    /// What database setup did, once it has run
    pub fn setup_record(&self) -> Option<SetupRecord> {
        match &*self.databases.lock() {
            DatabaseState::Ready(lifecycle) => Some(lifecycle.record().clone()),
            _ => None,
        }
    }

    /// Set up the test databases unless already done.
    ///
    /// Waits for a running test to finish, so no test sees the gate opened
    /// for setup.
    ///
    /// # Errors
    ///
    /// Returns the setup failure, on this call and on every later one.
    pub fn setup_databases(&self) -> Result<()> {
        let _serial = self.test_lock.lock();
        self.ensure_databases()
    }

    /// URL of the live server, starting it (and the test databases) on
    /// first use. Waits for a running test to finish; a test body gets the
    /// URL from [`TestContext::live_server_url`] instead.
    ///
    /// # Errors
    ///
    /// Fails when no live server is configured, the address cannot be
    /// parsed, or no candidate port can be bound.
    pub fn live_server_url(&self) -> Result<String> {
        let _serial = self.test_lock.lock();
        self.ensure_live_server()
    }

    // Callers hold `test_lock`.
    fn ensure_databases(&self) -> Result<()> {
        let mut state = self.databases.lock();
        match &*state {
            DatabaseState::Ready(_) => Ok(()),
            DatabaseState::Failed(reason) => Err(Error::SessionSetup {
                reason: reason.clone(),
            }),
            DatabaseState::Finished => Err(finished_error()),
            DatabaseState::Pending => {
                match DatabaseLifecycle::setup(&*self.backend, &self.gate, &self.options) {
                    Ok(lifecycle) => {
                        *state = DatabaseState::Ready(lifecycle);
                        Ok(())
                    }
                    Err(e) => {
                        let reason = match &e {
                            Error::SessionSetup { reason } => reason.clone(),
                            other => other.to_string(),
                        };
                        *state = DatabaseState::Failed(reason);
                        Err(e)
                    }
                }
            }
        }
    }

    // Callers hold `test_lock`.
    fn ensure_live_server(&self) -> Result<String> {
        self.ensure_databases()?;
        let mut slot = self.live_server.lock();
        if slot.is_none() {
            let factory = self
                .live_server_factory
                .as_ref()
                .ok_or_else(|| Error::LiveServer("no live server configured".to_string()))?;
            let address = LiveServerAddress::parse(&self.options.live_server_address())?;
            let mut server = factory(&address)?;
            server.start()?;
            info!(target: "dbscope::session", address = %address, url = ?server.url(), "Live server started");
            *slot = Some(server);
        }
        slot.as_ref()
            .and_then(|server| server.url())
            .ok_or_else(|| Error::LiveServer("live server has no url".to_string()))
    }

    /// Run one test described by `declaration`.
    ///
    /// Returns the body's value, or the error that kept the body from
    /// running (setup failure, live server failure) or that the scope's
    /// cleanup raised. A panicking body is resumed after cleanup.
    pub fn run<T>(
        &self,
        declaration: &TestDeclaration,
        body: impl FnOnce(&TestContext<'_, B>) -> T,
    ) -> Result<T> {
        let _serial = self.test_lock.lock();
        if self.finished.load(Ordering::SeqCst) {
            return Err(finished_error());
        }
        if declaration.wants_database() {
            self.ensure_databases()?;
        }
        let live_server_url = if declaration.live_server {
            Some(self.ensure_live_server()?)
        } else {
            None
        };

        let previous_urls = declaration
            .url_config
            .as_ref()
            .map(|modstr| self.urlconf.replace(Some(modstr.clone())));

        let context = TestContext {
            session: self,
            live_server_url,
        };
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.controller.run(declaration, || body(&context))
        }));

        if let Some(previous) = previous_urls {
            self.urlconf.replace(previous);
        }
        match outcome {
            Ok(result) => result,
            Err(payload) => resume_unwind(payload),
        }
    }

    /// Validate `markers` and run the test they describe.
    ///
    /// # Errors
    ///
    /// Malformed markers fail with [`Error::MarkerValidation`] before
    /// anything else happens.
    pub fn run_marked<T>(
        &self,
        markers: &[Marker],
        body: impl FnOnce(&TestContext<'_, B>) -> T,
    ) -> Result<T> {
        let declaration = TestDeclaration::from_markers(markers)?;
        self.run(&declaration, body)
    }

    /// Whether [`TestSession::finish`] has run
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Run the session-end finalizers: stop the live server, drop the test
    /// databases when they are not kept, reopen the gate.
    ///
    /// Runs once; later calls return `Ok(())`. Every finalizer runs even if
    /// an earlier one fails, and the first failure is returned.
    pub fn finish(&self) -> Result<()> {
        if self.finished.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let _serial = self.test_lock.lock();
        let mut first_error: Option<Error> = None;

        if let Some(mut server) = self.live_server.lock().take() {
            if let Err(e) = server.stop() {
                warn!(target: "dbscope::session", error = %e, "Failed to stop live server");
                first_error.get_or_insert(e);
            }
        }

        let state = std::mem::replace(&mut *self.databases.lock(), DatabaseState::Finished);
        if let DatabaseState::Ready(mut lifecycle) = state {
            if let Err(e) = lifecycle.finalize(&*self.backend, &self.gate) {
                warn!(target: "dbscope::session", error = %e, "Failed to tear down test databases");
                first_error.get_or_insert(e);
            }
        }

        self.gate.restore();
        info!(target: "dbscope::session", ok = first_error.is_none(), "Test session finished");
        first_error.map_or(Ok(()), Err)
    }
}

impl<B: DatabaseBackend + ?Sized> Drop for TestSession<B> {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            warn!(target: "dbscope::session", error = %e, "Session finish on drop failed");
        }
    }
}

fn finished_error() -> Error {
    Error::SessionSetup {
        reason: "session already finished".to_string(),
    }
}

/// What a running test can see of its session
pub struct TestContext<'a, B: DatabaseBackend + ?Sized> {
    session: &'a TestSession<B>,
    live_server_url: Option<String>,
}

impl<B: DatabaseBackend + ?Sized> TestContext<'_, B> {
    /// The session's backend
    pub fn backend(&self) -> &B {
        &self.session.backend
    }

    /// The session's access gate
    pub fn gate(&self) -> &AccessGate {
        &self.session.gate
    }

    /// Scope the test runs in
    pub fn state(&self) -> ScopeState {
        self.session.controller.state()
    }

    /// Live server URL, for tests that asked for one
    pub fn live_server_url(&self) -> Option<&str> {
        self.live_server_url.as_deref()
    }

    /// URL configuration active for this test
    pub fn urlconf(&self) -> Option<String> {
        self.session.urlconf.current()
    }
}
