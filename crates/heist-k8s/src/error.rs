// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;

/// Result type alias for cluster operations.
pub type K8sResult<T> = Result<T, K8sError>;

/// Errors that can occur while reading the client config from the cluster.
#[derive(Error, Debug)]
pub enum K8sError {
	#[error("K8s API error: {message}")]
	ApiError { message: String },

	#[error("K8s watch error: {message}")]
	WatchError { message: String },

	#[error("K8s client configuration error: {message}")]
	ConfigError { message: String },
}

impl From<kube::Error> for K8sError {
	fn from(err: kube::Error) -> Self {
		K8sError::ApiError {
			message: err.to_string(),
		}
	}
}

impl From<kube::config::KubeconfigError> for K8sError {
	fn from(err: kube::config::KubeconfigError) -> Self {
		K8sError::ConfigError {
			message: err.to_string(),
		}
	}
}

impl From<kube::config::InferConfigError> for K8sError {
	fn from(err: kube::config::InferConfigError) -> Self {
		K8sError::ConfigError {
			message: err.to_string(),
		}
	}
}
