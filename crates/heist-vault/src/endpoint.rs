// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Vault endpoint identity and session construction.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::client::{HttpVaultClient, VaultApi, VaultAuth};
use crate::error::VaultResult;
use crate::token::VaultToken;

/// Auth mount used when a config does not name one.
pub const DEFAULT_AUTH_MOUNT_PATH: &str = "kubernetes";

/// The settings that decide whether two configs can share a Vault session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VaultEndpoint {
	pub address: String,
	pub role: String,
	pub ca_certs: Vec<String>,
	pub auth_mount_path: String,
}

impl VaultEndpoint {
	/// The Kubernetes auth mount, falling back to [`DEFAULT_AUTH_MOUNT_PATH`].
	pub fn auth_mount_path(&self) -> &str {
		let mount = self.auth_mount_path.trim_matches('/');
		if mount.is_empty() {
			DEFAULT_AUTH_MOUNT_PATH
		} else {
			mount
		}
	}
}

/// Creates authenticated Vault sessions.
///
/// This trait allows for easy mocking in tests.
#[async_trait]
pub trait VaultConnector: Send + Sync {
	/// Build a client for `endpoint` and log in.
	async fn connect(&self, endpoint: &VaultEndpoint) -> VaultResult<Arc<dyn VaultApi>>;
}

/// Connector producing [`HttpVaultClient`]s.
///
/// Uses the static token when one is configured, otherwise Kubernetes auth
/// with the service account JWT read from `jwt_path`.
#[derive(Clone)]
pub struct HttpVaultConnector {
	static_token: Option<VaultToken>,
	jwt_path: PathBuf,
}

impl HttpVaultConnector {
	pub fn new(static_token: Option<VaultToken>, jwt_path: impl Into<PathBuf>) -> Self {
		Self {
			static_token: static_token.filter(|token| !token.is_empty()),
			jwt_path: jwt_path.into(),
		}
	}

	fn auth_for(&self, endpoint: &VaultEndpoint) -> VaultAuth {
		match &self.static_token {
			Some(token) => VaultAuth::Token(token.clone()),
			None => VaultAuth::Kubernetes {
				mount_path: endpoint.auth_mount_path().to_string(),
				role: endpoint.role.clone(),
				jwt_path: self.jwt_path.clone(),
			},
		}
	}
}

#[async_trait]
impl VaultConnector for HttpVaultConnector {
	async fn connect(&self, endpoint: &VaultEndpoint) -> VaultResult<Arc<dyn VaultApi>> {
		let client = HttpVaultClient::new(endpoint, self.auth_for(endpoint))?;
		client.login().await?;
		info!(
			address = %endpoint.address,
			role = %endpoint.role,
			static_token = self.static_token.is_some(),
			"Established vault session"
		);
		Ok(Arc::new(client))
	}
}

impl std::fmt::Debug for HttpVaultConnector {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("HttpVaultConnector")
			.field("static_token", &self.static_token.is_some())
			.field("jwt_path", &self.jwt_path)
			.finish()
	}
}
