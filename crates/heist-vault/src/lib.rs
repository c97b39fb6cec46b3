// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Vault client for the heist sidecar agent.
//!
//! Covers the small slice of the Vault HTTP API the agent needs:
//!
//! - KV v2 reads (`GET /v1/<mount>/data/<path>`)
//! - PKI issuance (`POST /v1/<mount>/issue/<role>`)
//! - Kubernetes auth login (`POST /v1/auth/<mount>/login`)
//!
//! Consumers talk to Vault through the [`VaultApi`] trait so the agent can be
//! exercised against in-memory fakes. Sessions are created by a
//! [`VaultConnector`], which performs the initial login for a given
//! [`VaultEndpoint`].
//!
//! # Example
//!
//! ```ignore
//! use heist_vault::{HttpVaultConnector, VaultConnector, VaultEndpoint};
//!
//! let connector = HttpVaultConnector::new(None, heist_vault::DEFAULT_JWT_PATH);
//! let vault = connector
//!     .connect(&VaultEndpoint {
//!         address: "https://vault.vault.svc:8200".into(),
//!         role: "my-app".into(),
//!         ..Default::default()
//!     })
//!     .await?;
//! let secret = vault.read_kv("secret", "my-app/db").await?;
//! ```

pub mod client;
pub mod endpoint;
pub mod error;
pub mod token;
pub mod types;

pub use client::{HttpVaultClient, VaultApi, VaultAuth};
pub use endpoint::{HttpVaultConnector, VaultConnector, VaultEndpoint, DEFAULT_AUTH_MOUNT_PATH};
pub use error::{VaultError, VaultResult};
pub use token::VaultToken;
pub use types::{IssueCertificateOptions, IssuedCertificate, KvSecret};

/// Default location of the projected service account token inside a pod.
pub const DEFAULT_JWT_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";
