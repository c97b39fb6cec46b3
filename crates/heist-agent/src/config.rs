// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Command line and environment configuration.

use clap::{Parser, Subcommand, ValueEnum};
use heist_vault::{VaultToken, DEFAULT_JWT_PATH};
use std::path::PathBuf;
use thiserror::Error;

use crate::server::DEFAULT_ADDRESS;

#[derive(Error, Debug)]
pub enum ConfigError {
	#[error("missing required option: {0}")]
	MissingValue(String),

	#[error("invalid value for {name}: {message}")]
	InvalidValue { name: String, message: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Heist sidecar agent - projects Vault secrets into the pod filesystem
#[derive(Parser, Debug)]
#[command(name = "heist-agent", version, about, long_about = None)]
pub struct Cli {
	#[command(flatten)]
	pub agent: AgentArgs,

	#[command(subcommand)]
	pub command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
	/// Run the agent and its control server until shut down
	Serve,
	/// Wait for the client config, write all secrets once and exit
	Sync,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
	#[default]
	Json,
	Pretty,
}

#[derive(clap::Args, Clone)]
pub struct AgentArgs {
	/// Listen address of the control server
	#[arg(long, env = "ADDRESS", default_value = DEFAULT_ADDRESS, global = true)]
	pub address: String,

	/// Namespace of the VaultClientConfig to watch
	#[arg(long, env = "CLIENT_CONFIG_NAMESPACE", global = true)]
	pub client_config_namespace: Option<String>,

	/// Name of the VaultClientConfig to watch
	#[arg(long, env = "CLIENT_CONFIG_NAME", global = true)]
	pub client_config_name: Option<String>,

	/// Directory the secrets are written to
	#[arg(long, env = "SECRET_BASE_PATH", default_value = "/heist", global = true)]
	pub secret_base_path: PathBuf,

	/// Kubernetes API server URL, overriding the kubeconfig
	#[arg(long, env = "KUBERNETES_MASTER_URL", global = true)]
	pub kubernetes_master_url: Option<String>,

	/// Kubeconfig file; in-cluster config is used when unset
	#[arg(long, env = "KUBERNETES_CONFIG_PATH", global = true)]
	pub kubernetes_config_path: Option<PathBuf>,

	/// Static Vault token used instead of Kubernetes auth
	#[arg(long, env = "VAULT_TOKEN", hide_env_values = true, global = true)]
	pub vault_token: Option<String>,

	/// Service account token used for Kubernetes auth
	#[arg(long, env = "JWT_PATH", default_value = DEFAULT_JWT_PATH, global = true)]
	pub jwt_path: PathBuf,

	/// Append the issuing CA to full certificate chains
	#[arg(long, env = "FULL_CHAIN_INCLUDES_ISSUER", global = true)]
	pub full_chain_includes_issuer: bool,

	/// Log output format
	#[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Json, global = true)]
	pub log_format: LogFormat,
}

impl std::fmt::Debug for AgentArgs {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("AgentArgs")
			.field("address", &self.address)
			.field("client_config_namespace", &self.client_config_namespace)
			.field("client_config_name", &self.client_config_name)
			.field("secret_base_path", &self.secret_base_path)
			.field("kubernetes_master_url", &self.kubernetes_master_url)
			.field("kubernetes_config_path", &self.kubernetes_config_path)
			.field("vault_token", &self.vault_token.as_ref().map(|_| "[REDACTED]"))
			.field("jwt_path", &self.jwt_path)
			.field("full_chain_includes_issuer", &self.full_chain_includes_issuer)
			.field("log_format", &self.log_format)
			.finish()
	}
}

/// Validated settings the agent is built from.
#[derive(Debug, Clone)]
pub struct AgentSettings {
	pub address: String,
	pub namespace: String,
	pub name: String,
	pub base_path: PathBuf,
	pub kubernetes_master_url: Option<String>,
	pub kubernetes_config_path: Option<PathBuf>,
	pub vault_token: Option<VaultToken>,
	pub jwt_path: PathBuf,
	pub full_chain_includes_issuer: bool,
}

impl AgentArgs {
	pub fn into_settings(self) -> Result<AgentSettings> {
		let namespace = require(self.client_config_namespace, "client-config-namespace")?;
		let name = require(self.client_config_name, "client-config-name")?;

		let address = self.address.trim().to_string();
		if address.is_empty() {
			return Err(ConfigError::InvalidValue {
				name: "address".into(),
				message: "must not be empty".into(),
			});
		}

		if !self.secret_base_path.is_absolute() {
			return Err(ConfigError::InvalidValue {
				name: "secret-base-path".into(),
				message: format!("must be absolute, got {}", self.secret_base_path.display()),
			});
		}

		let kubernetes_master_url = non_empty(self.kubernetes_master_url);
		if let Some(url) = &kubernetes_master_url {
			if !url.starts_with("https://") && !url.starts_with("http://") {
				return Err(ConfigError::InvalidValue {
					name: "kubernetes-master-url".into(),
					message: "must start with http:// or https://".into(),
				});
			}
		}

		Ok(AgentSettings {
			address,
			namespace,
			name,
			base_path: self.secret_base_path,
			kubernetes_master_url,
			kubernetes_config_path: self
				.kubernetes_config_path
				.filter(|path| !path.as_os_str().is_empty()),
			vault_token: non_empty(self.vault_token).map(VaultToken::from),
			jwt_path: self.jwt_path,
			full_chain_includes_issuer: self.full_chain_includes_issuer,
		})
	}
}

fn non_empty(value: Option<String>) -> Option<String> {
	value
		.map(|v| v.trim().to_string())
		.filter(|v| !v.is_empty())
}

fn require(value: Option<String>, name: &str) -> Result<String> {
	non_empty(value).ok_or_else(|| ConfigError::MissingValue(name.to_string()))
}
