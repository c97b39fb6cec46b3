// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use kube::api::{Api, WatchEvent, WatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use std::path::Path;
use tracing::{debug, instrument};

use crate::crd::VaultClientConfig;
use crate::error::{K8sError, K8sResult};
use crate::source::{ClientConfigSource, ConfigEvent, ConfigEventStream};

/// Build a cluster client.
///
/// With `kubeconfig_path` the given file is loaded; otherwise the config is
/// inferred (in-cluster service account, then `KUBECONFIG`, then
/// `~/.kube/config`). `master_url` overrides the cluster URL in either case.
pub async fn build_client(
	master_url: Option<&str>,
	kubeconfig_path: Option<&Path>,
) -> K8sResult<Client> {
	let mut config = match kubeconfig_path {
		Some(path) => {
			let kubeconfig = Kubeconfig::read_from(path)?;
			Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?
		}
		None => Config::infer().await?,
	};

	if let Some(url) = master_url.map(str::trim).filter(|url| !url.is_empty()) {
		config.cluster_url = url.parse::<http::Uri>().map_err(|e| K8sError::ConfigError {
			message: format!("invalid kubernetes master url {url}: {e}"),
		})?;
	}

	let client = Client::try_from(config)?;
	debug!("K8s client initialized");
	Ok(client)
}

/// Reads a single `VaultClientConfig` through the Kubernetes API.
pub struct KubeConfigSource {
	api: Api<VaultClientConfig>,
	namespace: String,
	name: String,
}

impl KubeConfigSource {
	pub fn new(client: Client, namespace: impl Into<String>, name: impl Into<String>) -> Self {
		let namespace = namespace.into();
		Self {
			api: Api::namespaced(client, &namespace),
			namespace,
			name: name.into(),
		}
	}
}

#[async_trait]
impl ClientConfigSource for KubeConfigSource {
	fn namespace(&self) -> &str {
		&self.namespace
	}

	fn name(&self) -> &str {
		&self.name
	}

	#[instrument(skip(self), fields(namespace = %self.namespace, name = %self.name))]
	async fn get(&self) -> K8sResult<Option<VaultClientConfig>> {
		Ok(self.api.get_opt(&self.name).await?)
	}

	#[instrument(skip(self), fields(namespace = %self.namespace, name = %self.name))]
	async fn watch(&self) -> K8sResult<ConfigEventStream> {
		let params = WatchParams::default().fields(&format!("metadata.name={}", self.name));
		let stream = self.api.watch(&params, "0").await?;
		debug!("Opened client config watch");
		Ok(translate_stream(stream))
	}
}

fn translate_stream<S>(stream: S) -> ConfigEventStream
where
	S: Stream<Item = Result<WatchEvent<VaultClientConfig>, kube::Error>> + Send + 'static,
{
	stream
		.filter_map(|event| async move { translate_event(event) })
		.boxed()
}

/// Maps a raw watch event. Bookmarks carry no object and are dropped.
fn translate_event(
	event: Result<WatchEvent<VaultClientConfig>, kube::Error>,
) -> Option<K8sResult<ConfigEvent>> {
	match event {
		Ok(WatchEvent::Added(config)) | Ok(WatchEvent::Modified(config)) => {
			Some(Ok(ConfigEvent::Applied(config)))
		}
		Ok(WatchEvent::Deleted(config)) => Some(Ok(ConfigEvent::Deleted(config))),
		Ok(WatchEvent::Bookmark(_)) => None,
		Ok(WatchEvent::Error(err)) => Some(Err(K8sError::WatchError {
			message: err.message,
		})),
		Err(err) => Some(Err(err.into())),
	}
}
