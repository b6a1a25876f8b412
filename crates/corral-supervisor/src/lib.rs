//! # corral-supervisor
//!
//! Dependency-aware process supervisor for local development environments.
//!
//! A project declares one-shot **tasks** (migrations, codegen) and
//! long-running **services** (databases, dev servers) in `corral.toml`.
//! The supervisor starts them in dependency order, waits for each service's
//! health check before starting its dependents, restarts failing services
//! with exponential backoff, and stops everything in reverse order.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use corral_supervisor::{Daemon, DaemonOptions, ProjectConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ProjectConfig::parse(r#"
//!     [[tasks]]
//!     name = "migrate"
//!     command = "./migrate.sh"
//!
//!     [[services]]
//!     name = "web"
//!     command = "npm run dev"
//!     depends_on = ["migrate"]
//!     health_check = { type = "port", port = 3000 }
//! "#)?;
//!
//! let daemon = Daemon::launch(config, DaemonOptions::new(".", None)).await?;
//! daemon.wait().await;
//! # Ok(())
//! # }
//! ```

pub mod types;
pub mod error;
pub mod config;
pub mod resolver;
pub mod restart;
pub mod state;
pub mod logs;
pub mod output;
pub mod runner;
pub mod health;
pub mod supervisor;
pub mod snapshot;
pub mod protocol;
pub mod control;
pub mod daemon;

pub use types::*;
pub use config::{DaemonSettings, ProjectConfig, DEFAULT_CONFIG_FILE};
pub use error::{ConfigError, EntityError, ResolveError, StartupError};
pub use resolver::DependencyGraph;
pub use supervisor::{PidTable, StartReport, Supervisor, SupervisorConfig};
pub use protocol::{Command, Response};
pub use daemon::{Daemon, DaemonOptions};
