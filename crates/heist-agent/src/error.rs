// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the agent.

use heist_vault::VaultError;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by the agent, its syncer and its control server.
#[derive(Debug, Error)]
pub enum AgentError {
	/// No client config has been applied yet.
	#[error("client config not available: {0}")]
	ConfigUnavailable(String),

	/// A name referenced by a caller or a template is not in the current config.
	#[error("{kind} not found: {name}")]
	NotFound { kind: &'static str, name: String },

	/// A Vault request failed.
	#[error("vault request failed: {0}")]
	Upstream(#[from] VaultError),

	/// A Vault session could not be established.
	#[error("failed to create vault api instance: {0}")]
	AuthFailed(String),

	/// A template or config value could not be interpreted.
	#[error("malformed config: {0}")]
	ConfigMalformed(String),

	/// A filesystem operation failed.
	#[error("failed to {action} {}: {source}", .path.display())]
	Io {
		action: &'static str,
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	/// The control server could not be started.
	#[error("server error: {0}")]
	Server(String),

	/// The agent was constructed with unusable options.
	#[error("invalid agent options: {0}")]
	InvalidOptions(String),

	/// A background task panicked or was cancelled.
	#[error("background task failed: {0}")]
	Task(String),
}

impl AgentError {
	pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
		AgentError::NotFound {
			kind,
			name: name.into(),
		}
	}

	pub fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
		AgentError::Io {
			action,
			path: path.into(),
			source,
		}
	}

	/// The operator-facing category of this error.
	pub fn kind(&self) -> ErrorKind {
		match self {
			AgentError::ConfigUnavailable(_) => ErrorKind::ConfigUnavailable,
			AgentError::NotFound { .. } => ErrorKind::NotFound,
			AgentError::Upstream(err) if err.is_auth() => ErrorKind::AuthFailed,
			AgentError::Upstream(_) | AgentError::Io { .. } => ErrorKind::UpstreamUnavailable,
			AgentError::AuthFailed(_) => ErrorKind::AuthFailed,
			AgentError::ConfigMalformed(_) | AgentError::InvalidOptions(_) => {
				ErrorKind::ConfigMalformed
			}
			AgentError::Server(_) | AgentError::Task(_) => ErrorKind::Fatal,
		}
	}
}

/// Error categories surfaced to operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
	ConfigUnavailable,
	NotFound,
	UpstreamUnavailable,
	AuthFailed,
	ConfigMalformed,
	Fatal,
}

impl fmt::Display for ErrorKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			ErrorKind::ConfigUnavailable => "config_unavailable",
			ErrorKind::NotFound => "not_found",
			ErrorKind::UpstreamUnavailable => "upstream_unavailable",
			ErrorKind::AuthFailed => "auth_failed",
			ErrorKind::ConfigMalformed => "config_malformed",
			ErrorKind::Fatal => "fatal",
		};
		f.write_str(name)
	}
}

/// Result type for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;
