//! Live HTTP server on a background thread
//!
//! The listening socket is bound on the caller's thread, walking the port
//! candidates of the address specification until one is free. Serving then
//! moves to a dedicated thread with its own tokio runtime, so the test
//! thread can block on HTTP requests to it. Connections that arrive before
//! the runtime is up wait in the socket backlog.

use crate::routes::{dispatcher, UrlRoutes};
use dbscope_core::{Error, LiveServer, LiveServerAddress, LiveServerFactory, Result, UrlConf};
use std::io;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::oneshot;
use tracing::{debug, error, info};

struct Running {
    local_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<Result<()>>>,
}

/// axum-based [`LiveServer`]
pub struct AxumLiveServer {
    address: LiveServerAddress,
    urlconf: Arc<UrlConf>,
    routes: Arc<UrlRoutes>,
    running: Option<Running>,
}

impl AxumLiveServer {
    /// Server for `address`, answering with the router `urlconf` selects
    pub fn new(address: LiveServerAddress, urlconf: Arc<UrlConf>, routes: UrlRoutes) -> Self {
        Self {
            address,
            urlconf,
            routes: Arc::new(routes),
            running: None,
        }
    }

    /// Address specification the server binds from
    pub fn address(&self) -> &LiveServerAddress {
        &self.address
    }

    /// Bound socket address, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.local_addr)
    }

    /// Whether the server is serving
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    fn bind(&self) -> Result<TcpListener> {
        let host = self.address.bind_host();
        for port in self.address.candidates() {
            match TcpListener::bind((host, port)) {
                Ok(listener) => return Ok(listener),
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::AddrInUse | io::ErrorKind::PermissionDenied
                    ) =>
                {
                    debug!(target: "dbscope::liveserver", port, error = %e, "Port unavailable");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(Error::LiveServer(format!(
            "no free port in {}",
            self.address
        )))
    }
}

impl LiveServer for AxumLiveServer {
    fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            return Ok(());
        }
        let listener = self.bind()?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let app = dispatcher(self.urlconf.clone(), self.routes.clone());
        let (shutdown, signal) = oneshot::channel::<()>();
        let thread = std::thread::Builder::new()
            .name("dbscope-liveserver".to_string())
            .spawn(move || -> Result<()> {
                let runtime = tokio::runtime::Builder::new_multi_thread()
                    .worker_threads(2)
                    .enable_all()
                    .build()?;
                runtime.block_on(async move {
                    let listener = tokio::net::TcpListener::from_std(listener)?;
                    axum::serve(listener, app)
                        .with_graceful_shutdown(async move {
                            let _ = signal.await;
                        })
                        .await?;
                    Ok::<(), Error>(())
                })
            })?;

        info!(target: "dbscope::liveserver", addr = %local_addr, "Live server listening");
        self.running = Some(Running {
            local_addr,
            shutdown: Some(shutdown),
            thread: Some(thread),
        });
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let Some(mut running) = self.running.take() else {
            return Ok(());
        };
        if let Some(shutdown) = running.shutdown.take() {
            let _ = shutdown.send(());
        }
        let result = match running.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| Error::LiveServer("live server thread panicked".to_string()))
                .and_then(|served| served),
            None => Ok(()),
        };
        match &result {
            Ok(()) => info!(target: "dbscope::liveserver", addr = %running.local_addr, "Live server stopped"),
            Err(e) => error!(target: "dbscope::liveserver", error = %e, "Live server stopped with an error"),
        }
        result
    }

    fn url(&self) -> Option<String> {
        self.running
            .as_ref()
            .map(|r| format!("http://{}:{}", self.address.host(), r.local_addr.port()))
    }
}

impl Drop for AxumLiveServer {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!(target: "dbscope::liveserver", error = %e, "Failed to stop live server on drop");
        }
    }
}

/// Factory for a session: every server shares `urlconf` and `routes`
pub fn factory(urlconf: Arc<UrlConf>, routes: UrlRoutes) -> LiveServerFactory {
    Box::new(move |address: &LiveServerAddress| {
        Ok(Box::new(AxumLiveServer::new(
            address.clone(),
            urlconf.clone(),
            routes.clone(),
        )) as Box<dyn LiveServer>)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhausted_range_is_error() {
        let taken = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = taken.local_addr().unwrap().port();
        let address = LiveServerAddress::parse(&format!("127.0.0.1:{}", port)).unwrap();

        let mut server = AxumLiveServer::new(address, Arc::new(UrlConf::default()), UrlRoutes::new());
        let err = server.start().unwrap_err();
        assert!(matches!(err, Error::LiveServer(_)));
        assert!(server.url().is_none());
    }

    #[test]
    fn test_start_stop_idempotent() {
        let address = LiveServerAddress::parse("127.0.0.1:0").unwrap();
        let mut server = AxumLiveServer::new(address, Arc::new(UrlConf::default()), UrlRoutes::new());

        server.start().unwrap();
        let url = server.url().unwrap();
        server.start().unwrap();
        assert_eq!(server.url().unwrap(), url);
        assert!(url.starts_with("http://127.0.0.1:"));

        server.stop().unwrap();
        server.stop().unwrap();
        assert!(!server.is_running());
    }
}
