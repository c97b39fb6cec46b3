// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::crd::VaultClientConfig;
use crate::error::K8sResult;

/// A change to the watched client config.
#[derive(Debug, Clone)]
pub enum ConfigEvent {
	/// The object was created or modified.
	Applied(VaultClientConfig),
	/// The object was deleted.
	Deleted(VaultClientConfig),
}

impl ConfigEvent {
	pub fn object(&self) -> &VaultClientConfig {
		match self {
			ConfigEvent::Applied(config) | ConfigEvent::Deleted(config) => config,
		}
	}
}

/// Stream of watch events. It ends when the underlying watch closes.
pub type ConfigEventStream = BoxStream<'static, K8sResult<ConfigEvent>>;

/// Where the agent reads its client config from.
///
/// This trait allows for easy mocking in tests.
#[async_trait]
pub trait ClientConfigSource: Send + Sync {
	/// Namespace of the watched object.
	fn namespace(&self) -> &str;

	/// Name of the watched object.
	fn name(&self) -> &str;

	/// Fetch the object. `Ok(None)` when it does not exist.
	async fn get(&self) -> K8sResult<Option<VaultClientConfig>>;

	/// Open a watch over the namespace the object lives in.
	///
	/// Events for other objects may be delivered; callers filter them.
	async fn watch(&self) -> K8sResult<ConfigEventStream>;
}
