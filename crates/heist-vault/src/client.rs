// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Vault HTTP client implementation.

use async_trait::async_trait;
use reqwest::StatusCode;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

use crate::endpoint::VaultEndpoint;
use crate::error::{VaultError, VaultResult};
use crate::token::VaultToken;
use crate::types::{
	ErrorBody, IssueCertificateOptions, IssueRequest, IssueResponse, IssuedCertificate,
	KvReadResponse, KvSecret, LoginRequest, LoginResponse,
};

const VAULT_TOKEN_HEADER: &str = "X-Vault-Token";
const MAX_ERROR_BODY_LEN: usize = 200;

/// Operations the agent performs against Vault.
///
/// This trait allows for easy mocking in tests.
#[async_trait]
pub trait VaultApi: Send + Sync {
	/// Read the latest version of a KV v2 secret.
	async fn read_kv(&self, engine_path: &str, secret_path: &str) -> VaultResult<KvSecret>;

	/// Issue a new certificate from a PKI role.
	async fn issue_certificate(
		&self,
		engine_path: &str,
		role: &str,
		options: &IssueCertificateOptions,
	) -> VaultResult<IssuedCertificate>;
}

/// How the client obtains its token.
#[derive(Clone)]
pub enum VaultAuth {
	/// A fixed token supplied by the operator.
	Token(VaultToken),
	/// Kubernetes auth using the pod's service account JWT.
	Kubernetes {
		mount_path: String,
		role: String,
		jwt_path: PathBuf,
	},
}

impl VaultAuth {
	fn can_refresh(&self) -> bool {
		matches!(self, VaultAuth::Kubernetes { .. })
	}
}

/// [`VaultApi`] implementation backed by reqwest.
pub struct HttpVaultClient {
	http_client: reqwest::Client,
	address: String,
	auth: VaultAuth,
	token: RwLock<Option<VaultToken>>,
}

impl HttpVaultClient {
	/// Build a client for `endpoint`. No request is made until the first call
	/// or an explicit [`HttpVaultClient::login`].
	pub fn new(endpoint: &VaultEndpoint, auth: VaultAuth) -> VaultResult<Self> {
		let address = endpoint.address.trim().trim_end_matches('/').to_string();
		if address.is_empty() {
			return Err(VaultError::Configuration("vault address is empty".into()));
		}
		if !address.starts_with("http://") && !address.starts_with("https://") {
			return Err(VaultError::Configuration(format!(
				"vault address must start with http:// or https://, got {address}"
			)));
		}

		let mut builder = reqwest::Client::builder().redirect(reqwest::redirect::Policy::none());

		for pem in endpoint.ca_certs.iter().filter(|pem| !pem.trim().is_empty()) {
			let certs = reqwest::Certificate::from_pem_bundle(pem.as_bytes()).map_err(|e| {
				VaultError::Configuration(format!("invalid CA certificate: {e}"))
			})?;
			if certs.is_empty() {
				return Err(VaultError::Configuration(
					"CA certificate entry contains no PEM certificates".into(),
				));
			}
			for cert in certs {
				builder = builder.add_root_certificate(cert);
			}
		}

		let http_client = builder.build().map_err(|e| {
			VaultError::Configuration(format!("failed to create HTTP client: {e}"))
		})?;

		Ok(Self {
			http_client,
			address,
			auth,
			token: RwLock::new(None),
		})
	}

	/// Acquire a token, replacing any cached one.
	#[instrument(skip(self), fields(address = %self.address))]
	pub async fn login(&self) -> VaultResult<()> {
		let token = self.authenticate().await?;
		*self.token.write().await = Some(token);
		Ok(())
	}

	async fn authenticate(&self) -> VaultResult<VaultToken> {
		match &self.auth {
			VaultAuth::Token(token) => {
				if token.is_empty() {
					return Err(VaultError::Auth("static vault token is empty".into()));
				}
				Ok(token.clone())
			}
			VaultAuth::Kubernetes {
				mount_path,
				role,
				jwt_path,
			} => self.kubernetes_login(mount_path, role, jwt_path).await,
		}
	}

	async fn kubernetes_login(
		&self,
		mount_path: &str,
		role: &str,
		jwt_path: &Path,
	) -> VaultResult<VaultToken> {
		let jwt = VaultToken::new(
			tokio::fs::read_to_string(jwt_path)
				.await
				.map_err(|source| VaultError::ServiceAccountToken {
					path: jwt_path.display().to_string(),
					source,
				})?
				.trim()
				.to_string(),
		);

		let url = format!("{}/v1/auth/{}/login", self.address, trim_path(mount_path));
		debug!(url = %url, role = %role, "Logging in to vault with kubernetes auth");

		let response = self
			.http_client
			.post(&url)
			.json(&LoginRequest {
				role,
				jwt: jwt.expose(),
			})
			.send()
			.await?;

		let status = response.status();
		if !status.is_success() {
			let message = error_message(response).await;
			warn!(status = %status, "Vault kubernetes login failed");
			return Err(VaultError::Auth(format!("HTTP {status}: {message}")));
		}

		let body: LoginResponse = response
			.json()
			.await
			.map_err(|e| VaultError::InvalidResponse(e.to_string()))?;

		let token = body
			.auth
			.map(|auth| VaultToken::new(auth.client_token))
			.filter(|token| !token.is_empty())
			.ok_or_else(|| VaultError::Auth("login response carried no client token".into()))?;

		Ok(token)
	}

	async fn current_token(&self) -> VaultResult<VaultToken> {
		if let Some(token) = self.token.read().await.as_ref() {
			return Ok(token.clone());
		}
		let token = self.authenticate().await?;
		*self.token.write().await = Some(token.clone());
		Ok(token)
	}

	/// Send an authenticated request. A 403 triggers one fresh login and one
	/// retry when the auth method can produce a new token.
	async fn execute<F>(&self, operation: &str, build: F) -> VaultResult<reqwest::Response>
	where
		F: Fn() -> reqwest::RequestBuilder + Send + Sync,
	{
		let mut reauthenticated = false;
		loop {
			let token = self.current_token().await?;
			let response = build()
				.header(VAULT_TOKEN_HEADER, token.expose())
				.send()
				.await?;

			let status = response.status();
			if status.is_success() {
				return Ok(response);
			}

			if status == StatusCode::FORBIDDEN && !reauthenticated && self.auth.can_refresh() {
				warn!(operation = %operation, "Vault rejected token, logging in again");
				self.login().await?;
				reauthenticated = true;
				continue;
			}

			let message = error_message(response).await;
			return Err(VaultError::Status {
				operation: operation.to_string(),
				status: status.as_u16(),
				message,
			});
		}
	}
}

#[async_trait]
impl VaultApi for HttpVaultClient {
	#[instrument(skip(self), fields(address = %self.address))]
	async fn read_kv(&self, engine_path: &str, secret_path: &str) -> VaultResult<KvSecret> {
		let url = format!(
			"{}/v1/{}/data/{}",
			self.address,
			trim_path(engine_path),
			trim_path(secret_path)
		);
		let operation = format!("kv read {engine_path}/{secret_path}");

		let response = self
			.execute(&operation, || self.http_client.get(&url))
			.await?;

		let body: KvReadResponse = response
			.json()
			.await
			.map_err(|e| VaultError::InvalidResponse(e.to_string()))?;

		Ok(body.into_secret())
	}

	#[instrument(skip(self, options), fields(address = %self.address))]
	async fn issue_certificate(
		&self,
		engine_path: &str,
		role: &str,
		options: &IssueCertificateOptions,
	) -> VaultResult<IssuedCertificate> {
		let url = format!(
			"{}/v1/{}/issue/{}",
			self.address,
			trim_path(engine_path),
			trim_path(role)
		);
		let operation = format!("pki issue {engine_path}/{role}");
		let request = IssueRequest::from(options);

		let response = self
			.execute(&operation, || self.http_client.post(&url).json(&request))
			.await?;

		let body: IssueResponse = response
			.json()
			.await
			.map_err(|e| VaultError::InvalidResponse(e.to_string()))?;

		let data = body
			.data
			.ok_or_else(|| VaultError::InvalidResponse("issue response carried no data".into()))?;
		if data.certificate.is_empty() {
			return Err(VaultError::InvalidResponse(
				"issue response carried no certificate".into(),
			));
		}

		Ok(data.into())
	}
}

impl std::fmt::Debug for HttpVaultClient {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("HttpVaultClient")
			.field("address", &self.address)
			.field(
				"has_cached_token",
				&self.token.try_read().map(|t| t.is_some()).unwrap_or(false),
			)
			.finish()
	}
}

fn trim_path(path: &str) -> &str {
	path.trim_matches('/')
}

/// Best-effort extraction of Vault's `{"errors": [...]}` envelope.
async fn error_message(response: reqwest::Response) -> String {
	let body = response.text().await.unwrap_or_default();
	match serde_json::from_str::<ErrorBody>(&body) {
		Ok(parsed) if !parsed.errors.is_empty() => {
			sanitize_body_for_error(&parsed.errors.join("; "), MAX_ERROR_BODY_LEN)
		}
		_ => sanitize_body_for_error(&body, MAX_ERROR_BODY_LEN),
	}
}

fn sanitize_body_for_error(body: &str, max_len: usize) -> String {
	let sanitized: String = body
		.chars()
		.filter(|c| !c.is_control() || *c == ' ')
		.take(max_len)
		.collect();
	if body.chars().count() > max_len {
		format!("{sanitized}...")
	} else {
		sanitized
	}
}
