// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Heist sidecar agent.
//!
//! Watches a `VaultClientConfig`, renders the templates it carries against
//! Vault and keeps the results on disk:
//!
//! - [`cache`]: read-through cache for KV reads and certificate issuance
//! - [`render`]: template rendering with the `kvSecret`, `caField` and `certField` helpers
//! - [`agent`] and [`watcher`]: the current snapshot and the loop that keeps it current
//! - [`syncer`]: projection of the snapshot onto the filesystem
//! - [`server`]: the `/live`, `/ready` and `/shutdown` control endpoints

pub mod agent;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod paths;
pub mod render;
pub mod server;
pub mod signal;
pub mod snapshot;
pub mod syncer;
pub mod watcher;

pub use agent::{Agent, AgentOptions, Secret, StatusKind, SyncStatus};
pub use cache::SecretCache;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AgentArgs, AgentSettings, Cli, Command, ConfigError, LogFormat};
pub use error::{AgentError, AgentResult, ErrorKind};
pub use server::{ControlServer, ServerOptions};
pub use signal::stop_on_signal;
pub use syncer::{sync_when_ready, FileSyncer, ReadyState, SyncOptions};
