//! Deployment runtime: one public entry point that serves the UI bundle,
//! proxies API traffic to a supervised backend, and terminates TLS.
//!
//! ```text
//!  client ──> :web_port / :443 ──┬── /api/... ──> BackendProxy ──> localhost:api_port
//!                                └── other   ──> assets::serve(dist/)
//!  client ──> :80 (domain + TLS) ──> 301 https://host/...
//! ```
//!
//! | Module       | Responsibility                                         |
//! |--------------|--------------------------------------------------------|
//! | `config`     | `DeployFile`, overrides, `DeployConfig`, `ListenPlan`  |
//! | `assets`     | Static files with SPA fallback                         |
//! | `proxy`      | Request forwarding and 502 mapping                     |
//! | `server`     | Router, listeners, HTTPS fallback, redirect            |
//! | `supervisor` | Backend child process and shutdown sequencing          |

pub mod assets;
pub mod config;
pub mod proxy;
pub mod server;
pub mod supervisor;

pub use config::{DeployConfig, DeployFile, DeployOverrides, DeploymentMode, ListenPlan};
pub use server::{RunningServer, Scheme, ServerSettings, ServerState};
pub use supervisor::{BackendCommand, Supervisor};
