// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the Vault client.

use thiserror::Error;

/// Errors that can occur when talking to Vault.
#[derive(Debug, Error)]
pub enum VaultError {
	/// The HTTP request could not be completed.
	#[error("HTTP error: {0}")]
	Http(#[from] reqwest::Error),

	/// Vault answered with a non-success status code.
	#[error("vault returned HTTP {status} for {operation}: {message}")]
	Status {
		operation: String,
		status: u16,
		message: String,
	},

	/// Login failed or the token was rejected.
	#[error("vault authentication failed: {0}")]
	Auth(String),

	/// The service account token could not be read.
	#[error("failed to read service account token from {path}: {source}")]
	ServiceAccountToken {
		path: String,
		#[source]
		source: std::io::Error,
	},

	/// The response body did not have the expected shape.
	#[error("invalid response from vault: {0}")]
	InvalidResponse(String),

	/// The client could not be built from the given settings.
	#[error("configuration error: {0}")]
	Configuration(String),
}

impl VaultError {
	/// Returns true when the failure happened while acquiring or refreshing a token.
	pub fn is_auth(&self) -> bool {
		matches!(
			self,
			VaultError::Auth(_) | VaultError::ServiceAccountToken { .. }
		)
	}
}

/// Result type for Vault operations.
pub type VaultResult<T> = Result<T, VaultError>;
