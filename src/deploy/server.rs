//! Listeners: request routing, the HTTPS decision tree, and the HTTP→HTTPS
//! redirect.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{Request, State},
    http::{StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use axum_server::Handle;
use axum_server::tls_rustls::{RustlsConfig, from_tcp_rustls};
use tokio::task::JoinSet;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use super::assets;
use super::config::{CertPaths, DeployConfig, ListenPlan};
use super::proxy::{BackendProxy, is_api_path};
use crate::errors::{ProxyError, SupervisorError};

/// Knobs that come from project settings rather than the deployment record.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub bind_ip: IpAddr,
    pub api_prefix: String,
    pub proxy_timeout: Duration,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            api_prefix: "/api".to_string(),
            proxy_timeout: Duration::from_secs(30),
        }
    }
}

/// Read-only state shared by every request. Built once at startup.
#[derive(Debug)]
pub struct ServerState {
    pub proxy: BackendProxy,
    pub static_root: PathBuf,
    pub api_prefix: String,
}

impl ServerState {
    pub fn new(config: &DeployConfig, settings: &ServerSettings) -> Result<Self, ProxyError> {
        install_crypto_provider();
        Ok(Self {
            proxy: BackendProxy::new(config.api_port, settings.proxy_timeout)?,
            static_root: config.dist_dir.clone(),
            api_prefix: settings.api_prefix.clone(),
        })
    }
}

/// Router that proxies API paths and serves everything else from the bundle.
pub fn build_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .fallback(route_request)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn route_request(State(state): State<Arc<ServerState>>, req: Request) -> Response {
    if is_api_path(req.uri().path(), &state.api_prefix) {
        return state.proxy.forward_or_bad_gateway(req).await;
    }
    assets::serve(&state.static_root, req.uri().path()).await
}

/// Strip the port from a `Host` header value (IPv6 literals keep brackets).
fn host_without_port(host: &str) -> &str {
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    host.split(':').next().unwrap_or(host)
}

/// `https://` URL for the same host and path on the secure port.
pub fn https_location(host: &str, https_port: u16, uri: &Uri) -> String {
    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let host = host_without_port(host);
    if https_port == 443 {
        format!("https://{}{}", host, path_and_query)
    } else {
        format!("https://{}:{}{}", host, https_port, path_and_query)
    }
}

/// Router that answers every request with a 301 to the HTTPS listener.
pub fn redirect_router(https_port: u16, fallback_host: String) -> Router {
    let fallback_host = Arc::new(fallback_host);
    Router::new().fallback(move |req: Request| {
        let fallback_host = fallback_host.clone();
        async move {
            let host = req
                .headers()
                .get(header::HOST)
                .and_then(|h| h.to_str().ok())
                .unwrap_or(fallback_host.as_str());
            let location = https_location(host, https_port, req.uri());
            (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, location)]).into_response()
        }
    })
}

/// Scheme a listener speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
    /// Plaintext listener that only redirects to HTTPS
    Redirect,
}

impl std::fmt::Display for Scheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scheme::Http => write!(f, "http"),
            Scheme::Https => write!(f, "https"),
            Scheme::Redirect => write!(f, "http (redirect)"),
        }
    }
}

/// A TLS listener whose certificate loaded and whose socket is bound, but
/// which is not serving yet.
pub struct SecureListener {
    listener: std::net::TcpListener,
    tls: RustlsConfig,
}

impl SecureListener {
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

/// First phase of HTTPS startup: load the key pair and bind the port.
///
/// Any failure here (bad PEM, port in use) is returned so the caller can
/// choose the plaintext fallback.
pub async fn try_secure(addr: SocketAddr, certs: &CertPaths) -> std::io::Result<SecureListener> {
    install_crypto_provider();
    let tls = RustlsConfig::from_pem_file(&certs.cert, &certs.key).await?;
    let listener = std::net::TcpListener::bind(addr)?;
    listener.set_nonblocking(true)?;
    Ok(SecureListener { listener, tls })
}

/// Select the process-wide rustls crypto provider. Safe to call repeatedly.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

fn bind_plain(addr: SocketAddr) -> Result<std::net::TcpListener, SupervisorError> {
    let listener = std::net::TcpListener::bind(addr)
        .map_err(|source| SupervisorError::BindFailed { addr, source })?;
    listener
        .set_nonblocking(true)
        .map_err(|source| SupervisorError::BindFailed { addr, source })?;
    Ok(listener)
}

/// One bound listener.
#[derive(Debug, Clone)]
pub struct ListenerInfo {
    pub addr: SocketAddr,
    pub scheme: Scheme,
}

/// The set of running listeners and their shutdown handles.
pub struct RunningServer {
    listeners: Vec<ListenerInfo>,
    handles: Vec<Handle>,
    tasks: JoinSet<(SocketAddr, std::io::Result<()>)>,
    /// Set when HTTPS was configured but could not start.
    pub tls_fallback: bool,
}

impl RunningServer {
    fn new() -> Self {
        Self {
            listeners: Vec::new(),
            handles: Vec::new(),
            tasks: JoinSet::new(),
            tls_fallback: false,
        }
    }

    pub fn listeners(&self) -> &[ListenerInfo] {
        &self.listeners
    }

    pub fn addr(&self, scheme: Scheme) -> Option<SocketAddr> {
        self.listeners
            .iter()
            .find(|l| l.scheme == scheme)
            .map(|l| l.addr)
    }

    fn serve_plain(&mut self, listener: std::net::TcpListener, app: Router, scheme: Scheme) {
        let addr = listener.local_addr().unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 0)));
        let handle = Handle::new();
        let server = axum_server::from_tcp(listener).handle(handle.clone());
        self.tasks
            .spawn(async move { (addr, server.serve(app.into_make_service()).await) });
        info!("Listening on {} ({})", addr, scheme);
        self.handles.push(handle);
        self.listeners.push(ListenerInfo { addr, scheme });
    }

    fn serve_secure(&mut self, secure: SecureListener, app: Router) {
        let addr = secure
            .local_addr()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 0)));
        let handle = Handle::new();
        let server = from_tcp_rustls(secure.listener, secure.tls).handle(handle.clone());
        self.tasks
            .spawn(async move { (addr, server.serve(app.into_make_service()).await) });
        info!("Listening on {} (https)", addr);
        self.handles.push(handle);
        self.listeners.push(ListenerInfo {
            addr,
            scheme: Scheme::Https,
        });
    }

    /// Resolves when any listener stops on its own.
    pub async fn stopped(&mut self) -> SupervisorError {
        match self.tasks.join_next().await {
            Some(Ok((addr, Ok(())))) => SupervisorError::ListenerFailed {
                addr,
                source: std::io::Error::other("listener exited"),
            },
            Some(Ok((addr, Err(source)))) => SupervisorError::ListenerFailed { addr, source },
            Some(Err(join_err)) => SupervisorError::ListenerFailed {
                addr: SocketAddr::from(([0, 0, 0, 0], 0)),
                source: std::io::Error::other(join_err.to_string()),
            },
            None => std::future::pending().await,
        }
    }

    /// Stop accepting, let in-flight requests finish within `grace`, then
    /// wait for every listener task.
    pub async fn shutdown(mut self, grace: Duration) {
        for handle in &self.handles {
            handle.graceful_shutdown(Some(grace));
        }
        while let Some(result) = self.tasks.join_next().await {
            match result {
                Ok((addr, Err(e))) => warn!("Listener {} stopped with error: {}", addr, e),
                Ok((addr, Ok(()))) => info!("Listener {} stopped", addr),
                Err(e) => warn!("Listener task failed: {}", e),
            }
        }
    }
}

/// Open the listeners described by `plan`.
///
/// `redirect_host` is used in `Location` headers when a request carries no
/// `Host` header.
pub async fn start(
    plan: &ListenPlan,
    state: Arc<ServerState>,
    bind_ip: IpAddr,
    redirect_host: &str,
) -> Result<RunningServer, SupervisorError> {
    let app = build_router(state);
    let mut server = RunningServer::new();

    match plan {
        ListenPlan::Plain { port } => {
            let listener = bind_plain(SocketAddr::new(bind_ip, *port))?;
            server.serve_plain(listener, app, Scheme::Http);
        }
        ListenPlan::Secure {
            https_port,
            http_port,
            redirect,
            certs,
        } => match try_secure(SocketAddr::new(bind_ip, *https_port), certs).await {
            Ok(secure) => {
                let secure_port = secure.local_addr().map(|a| a.port()).unwrap_or(*https_port);
                server.serve_secure(secure, app);
                if *redirect {
                    let listener = bind_plain(SocketAddr::new(bind_ip, *http_port))?;
                    server.serve_plain(
                        listener,
                        redirect_router(secure_port, redirect_host.to_string()),
                        Scheme::Redirect,
                    );
                }
            }
            Err(e) => {
                warn!(
                    "HTTPS listener failed to start ({}); falling back to plain HTTP on port {}. \
                     Traffic will NOT be encrypted.",
                    e, http_port
                );
                let listener = bind_plain(SocketAddr::new(bind_ip, *http_port))?;
                server.serve_plain(listener, app, Scheme::Http);
                server.tls_fallback = true;
            }
        },
    }

    Ok(server)
}
