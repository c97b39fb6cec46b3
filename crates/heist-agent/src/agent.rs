// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The agent core.
//!
//! [`Agent`] holds the current snapshot of the watched client config and the
//! Vault session serving it. The file syncer and the control server only see
//! the methods on this type. [`Agent::run`](crate::watcher) keeps the
//! snapshot current; constructing an agent does not start it.

use heist_k8s::{ClientConfigSource, VaultClientConfig};
use heist_vault::VaultConnector;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::SecretCache;
use crate::clock::{Clock, SystemClock};
use crate::error::{AgentError, AgentResult};
use crate::paths::{
	check_output_path, client_config_path, parse_mode, resolve_output_path, DEFAULT_FILE_MODE,
};
use crate::render::{render_template, SnapshotHelpers};
use crate::snapshot::{duplicate_paths, endpoint_of, Snapshot};

const CLIENT_SECRET_NAME: &str = "heist.json";
const WAITING_FOR_FIRST_SYNC: &str = "waiting for the first config sync to complete";

/// Tunables for the agent and its watcher.
#[derive(Clone)]
pub struct AgentOptions {
	/// Root of the projected files.
	pub base_path: PathBuf,
	/// Watcher tick.
	pub poll_interval: Duration,
	/// Maximum age of the last full fetch before the watcher refetches.
	pub resync_interval: Duration,
	/// Append the issuing CA to `full_certificate_chain` when it is missing.
	pub full_chain_includes_issuer: bool,
	pub clock: Arc<dyn Clock>,
}

impl AgentOptions {
	pub fn new(base_path: impl Into<PathBuf>) -> Self {
		Self {
			base_path: base_path.into(),
			poll_interval: Duration::from_secs(5),
			resync_interval: Duration::from_secs(60),
			full_chain_includes_issuer: false,
			clock: Arc::new(SystemClock),
		}
	}
}

impl fmt::Debug for AgentOptions {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("AgentOptions")
			.field("base_path", &self.base_path)
			.field("poll_interval", &self.poll_interval)
			.field("resync_interval", &self.resync_interval)
			.field("full_chain_includes_issuer", &self.full_chain_includes_issuer)
			.finish_non_exhaustive()
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
	NotYetSynced,
	Synced,
	Stopped,
	Error,
}

impl fmt::Display for StatusKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			StatusKind::NotYetSynced => "not_yet_synced",
			StatusKind::Synced => "synced",
			StatusKind::Stopped => "stopped",
			StatusKind::Error => "error",
		};
		f.write_str(name)
	}
}

/// Agent status as reported to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
	pub kind: StatusKind,
	pub reason: String,
}

impl SyncStatus {
	fn new(kind: StatusKind, reason: impl Into<String>) -> Self {
		Self {
			kind,
			reason: reason.into(),
		}
	}
}

/// A rendered output file.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret {
	pub name: String,
	pub value: String,
	pub output_path: PathBuf,
	pub mode: u32,
}

impl fmt::Debug for Secret {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Secret")
			.field("name", &self.name)
			.field("value", &"[REDACTED]")
			.field("output_path", &self.output_path)
			.field("mode", &format_args!("{:04o}", self.mode))
			.finish()
	}
}

struct AgentState {
	snapshot: Option<Arc<Snapshot>>,
	status: SyncStatus,
	subscribers: Vec<mpsc::Sender<()>>,
}

struct Inner {
	source: Arc<dyn ClientConfigSource>,
	connector: Arc<dyn VaultConnector>,
	options: AgentOptions,
	state: Mutex<AgentState>,
	stop: CancellationToken,
}

/// Cheap to clone; all clones share one state.
#[derive(Clone)]
pub struct Agent {
	inner: Arc<Inner>,
}

impl Agent {
	pub fn new(
		source: Arc<dyn ClientConfigSource>,
		connector: Arc<dyn VaultConnector>,
		options: AgentOptions,
	) -> AgentResult<Self> {
		if source.namespace().is_empty() {
			return Err(AgentError::InvalidOptions(
				"client config namespace is required".to_string(),
			));
		}
		if source.name().is_empty() {
			return Err(AgentError::InvalidOptions(
				"client config name is required".to_string(),
			));
		}

		Ok(Self {
			inner: Arc::new(Inner {
				source,
				connector,
				options,
				state: Mutex::new(AgentState {
					snapshot: None,
					status: SyncStatus::new(StatusKind::NotYetSynced, WAITING_FOR_FIRST_SYNC),
					subscribers: Vec::new(),
				}),
				stop: CancellationToken::new(),
			}),
		})
	}

	fn state(&self) -> MutexGuard<'_, AgentState> {
		self.inner
			.state
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
	}

	fn current_snapshot(&self) -> AgentResult<Arc<Snapshot>> {
		let state = self.state();
		state
			.snapshot
			.clone()
			.ok_or_else(|| AgentError::ConfigUnavailable(state.status.reason.clone()))
	}

	pub(crate) fn source(&self) -> &Arc<dyn ClientConfigSource> {
		&self.inner.source
	}

	pub fn options(&self) -> &AgentOptions {
		&self.inner.options
	}

	pub fn base_path(&self) -> &Path {
		&self.inner.options.base_path
	}

	pub fn status(&self) -> SyncStatus {
		self.state().status.clone()
	}

	pub(crate) fn set_status(&self, status: SyncStatus) {
		let mut state = self.state();
		if state.status.kind != StatusKind::Stopped {
			state.status = status;
		}
	}

	/// Logical names of the templates, in template order.
	pub fn list_secrets(&self) -> AgentResult<Vec<String>> {
		Ok(self.current_snapshot()?.secret_names())
	}

	/// Render the template named `name`.
	pub async fn fetch_secret(&self, name: &str) -> AgentResult<Secret> {
		let snapshot = self.current_snapshot()?;
		let template = snapshot
			.template(name)
			.ok_or_else(|| AgentError::not_found("secret", name))?
			.clone();
		check_output_path(&template.path)?;

		let helpers = Arc::new(SnapshotHelpers::new(
			snapshot,
			tokio::runtime::Handle::current(),
			self.inner.options.full_chain_includes_issuer,
		));
		let source = template.template.clone();
		let value = tokio::task::spawn_blocking(move || render_template(&source, helpers))
			.await
			.map_err(|err| AgentError::Task(format!("render task for {name}: {err}")))??;

		Ok(Secret {
			name: name.to_string(),
			value,
			output_path: resolve_output_path(self.base_path(), &template.path),
			mode: parse_mode(&template.mode),
		})
	}

	/// The applied config without its templates, serialized for the workload.
	pub fn client_secret(&self) -> AgentResult<Secret> {
		let snapshot = self.state().snapshot.clone();
		let value = match snapshot {
			Some(snapshot) => to_tab_indented_json(&snapshot.spec.without_templates())?,
			None => String::new(),
		};

		Ok(Secret {
			name: CLIENT_SECRET_NAME.to_string(),
			value,
			output_path: client_config_path(self.base_path()),
			mode: DEFAULT_FILE_MODE,
		})
	}

	/// Register a one-slot inbox notified after every successful apply.
	pub fn subscribe(&self, inbox: mpsc::Sender<()>) {
		let mut state = self.state();
		state.subscribers.retain(|sender| !sender.is_closed());
		state.subscribers.push(inbox);
	}

	/// Request termination. Calling this more than once is harmless.
	pub fn stop(&self) {
		if !self.inner.stop.is_cancelled() {
			info!("stopping agent");
		}
		self.inner.stop.cancel();
		self.state().status = SyncStatus::new(StatusKind::Stopped, "agent was stopped");
	}

	pub fn is_stopped(&self) -> bool {
		self.inner.stop.is_cancelled()
	}

	/// Token cancelled by [`Agent::stop`].
	pub fn stop_token(&self) -> CancellationToken {
		self.inner.stop.clone()
	}

	/// Make `config` the current snapshot.
	pub async fn apply(&self, config: VaultClientConfig) {
		let spec = config.spec;
		let endpoint = endpoint_of(&spec);

		let previous = self.state().snapshot.clone();
		if let Some(previous) = &previous {
			if previous.spec == spec {
				debug!("client config unchanged");
				return;
			}
		}

		for path in duplicate_paths(&spec) {
			warn!(path, "duplicate template path in client config, the last occurrence is used");
		}

		let cache = match previous.filter(|previous| previous.endpoint == endpoint) {
			Some(previous) => previous.cache.clone(),
			None => match self.inner.connector.connect(&endpoint).await {
				Ok(vault) => Arc::new(SecretCache::new(vault, self.inner.options.clock.clone())),
				Err(err) => {
					let err = AgentError::AuthFailed(err.to_string());
					warn!(address = %endpoint.address, error = %err, "failed to apply client config");
					self.set_status(SyncStatus::new(StatusKind::Error, err.to_string()));
					return;
				}
			},
		};

		let mut state = self.state();
		if state.status.kind == StatusKind::Stopped {
			return;
		}
		state.snapshot = Some(Arc::new(Snapshot {
			spec,
			endpoint,
			cache,
		}));
		state.status = SyncStatus::new(StatusKind::Synced, "client config applied");
		state.subscribers.retain(|inbox| match inbox.try_send(()) {
			Ok(()) | Err(TrySendError::Full(())) => true,
			Err(TrySendError::Closed(())) => false,
		});
		info!(
			templates = state.snapshot.as_ref().map_or(0, |s| s.spec.templates.templates.len()),
			"applied client config"
		);
	}

	/// Drop the current snapshot. Files on disk are left alone.
	pub fn clear(&self, reason: &str) {
		let mut state = self.state();
		if state.status.kind == StatusKind::Stopped {
			return;
		}
		if state.snapshot.take().is_some() {
			info!(reason, "cleared client config");
		}
		state.status = SyncStatus::new(StatusKind::NotYetSynced, reason);
	}
}

impl fmt::Debug for Agent {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Agent")
			.field("namespace", &self.inner.source.namespace())
			.field("name", &self.inner.source.name())
			.field("status", &self.status())
			.finish_non_exhaustive()
	}
}

fn to_tab_indented_json<T: Serialize>(value: &T) -> AgentResult<String> {
	let mut out = Vec::new();
	let formatter = serde_json::ser::PrettyFormatter::with_indent(b"\t");
	let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
	value
		.serialize(&mut serializer)
		.map_err(|err| AgentError::ConfigMalformed(format!("failed to serialize client config: {err}")))?;
	String::from_utf8(out)
		.map_err(|err| AgentError::ConfigMalformed(format!("client config is not utf-8: {err}")))
}

#[cfg(test)]
pub(crate) mod tests {
	use super::*;
	use crate::error::ErrorKind;
	use async_trait::async_trait;
	use heist_k8s::{
		AgentTemplates, ConfigEventStream, K8sResult, KvSecretRef, ValueTemplate,
		VaultClientConfigSpec,
	};
	use heist_vault::{
		IssueCertificateOptions, IssuedCertificate, KvSecret, VaultApi, VaultEndpoint,
		VaultError, VaultResult,
	};
	use std::collections::HashMap;
	use std::sync::atomic::{AtomicUsize, Ordering};

	pub(crate) struct StaticSource;

	#[async_trait]
	impl ClientConfigSource for StaticSource {
		fn namespace(&self) -> &str {
			"apps"
		}

		fn name(&self) -> &str {
			"web"
		}

		async fn get(&self) -> K8sResult<Option<VaultClientConfig>> {
			Ok(None)
		}

		async fn watch(&self) -> K8sResult<ConfigEventStream> {
			Ok(Box::pin(futures::stream::pending()))
		}
	}

	#[derive(Default)]
	pub(crate) struct FakeVault {
		pub kv: Mutex<HashMap<String, HashMap<String, String>>>,
		pub kv_reads: AtomicUsize,
	}

	impl FakeVault {
		pub fn set(&self, path: &str, field: &str, value: &str) {
			self.kv
				.lock()
				.unwrap()
				.entry(path.to_string())
				.or_default()
				.insert(field.to_string(), value.to_string());
		}
	}

	#[async_trait]
	impl VaultApi for FakeVault {
		async fn read_kv(&self, _engine_path: &str, secret_path: &str) -> VaultResult<KvSecret> {
			self.kv_reads.fetch_add(1, Ordering::SeqCst);
			match self.kv.lock().unwrap().get(secret_path) {
				Some(fields) => Ok(KvSecret {
					fields: fields.clone(),
				}),
				None => Err(VaultError::Status {
					operation: "read kv secret".to_string(),
					status: 404,
					message: "not found".to_string(),
				}),
			}
		}

		async fn issue_certificate(
			&self,
			_engine_path: &str,
			_role: &str,
			_options: &IssueCertificateOptions,
		) -> VaultResult<IssuedCertificate> {
			Err(VaultError::InvalidResponse("no pki".to_string()))
		}
	}

	/// Hands out one shared vault per address and counts connections.
	#[derive(Default)]
	pub(crate) struct FakeConnector {
		pub vaults: Mutex<HashMap<String, Arc<FakeVault>>>,
		pub connects: AtomicUsize,
		pub fail: std::sync::atomic::AtomicBool,
	}

	impl FakeConnector {
		pub fn vault(&self, address: &str) -> Arc<FakeVault> {
			self.vaults
				.lock()
				.unwrap()
				.entry(address.to_string())
				.or_default()
				.clone()
		}
	}

	#[async_trait]
	impl VaultConnector for FakeConnector {
		async fn connect(&self, endpoint: &VaultEndpoint) -> VaultResult<Arc<dyn VaultApi>> {
			self.connects.fetch_add(1, Ordering::SeqCst);
			if self.fail.load(Ordering::SeqCst) {
				return Err(VaultError::Auth("permission denied".to_string()));
			}
			Ok(self.vault(&endpoint.address))
		}
	}

	pub(crate) fn config(address: &str, templates: &[(&str, &str, &str)]) -> VaultClientConfig {
		let spec = VaultClientConfigSpec {
			address: address.to_string(),
			role: "web".to_string(),
			kv_secrets: vec![KvSecretRef {
				name: "s".to_string(),
				engine_path: "kv".to_string(),
				secret_path: "app/s".to_string(),
				..Default::default()
			}],
			templates: AgentTemplates {
				templates: templates
					.iter()
					.map(|(path, mode, template)| ValueTemplate {
						path: path.to_string(),
						mode: mode.to_string(),
						template: template.to_string(),
					})
					.collect(),
				..Default::default()
			},
			..Default::default()
		};
		let mut config = VaultClientConfig::new("web", spec);
		config.metadata.namespace = Some("apps".to_string());
		config
	}

	pub(crate) fn agent(connector: Arc<FakeConnector>, base: &Path) -> Agent {
		Agent::new(Arc::new(StaticSource), connector, AgentOptions::new(base)).unwrap()
	}

	#[tokio::test]
	async fn starts_not_yet_synced() {
		let agent = agent(Arc::new(FakeConnector::default()), Path::new("/heist"));

		assert_eq!(agent.status().kind, StatusKind::NotYetSynced);
		let err = agent.list_secrets().unwrap_err();
		assert_eq!(err.kind(), ErrorKind::ConfigUnavailable);
		let err = agent.fetch_secret("db").await.unwrap_err();
		assert_eq!(err.kind(), ErrorKind::ConfigUnavailable);

		let client = agent.client_secret().unwrap();
		assert!(client.value.is_empty());
		assert_eq!(client.output_path, PathBuf::from("/heist/config.json"));
		assert_eq!(client.mode, 0o640);
	}

	#[test]
	fn rejects_missing_namespace() {
		struct Unnamed;

		#[async_trait]
		impl ClientConfigSource for Unnamed {
			fn namespace(&self) -> &str {
				""
			}
			fn name(&self) -> &str {
				"web"
			}
			async fn get(&self) -> K8sResult<Option<VaultClientConfig>> {
				Ok(None)
			}
			async fn watch(&self) -> K8sResult<ConfigEventStream> {
				Ok(Box::pin(futures::stream::empty()))
			}
		}

		let err = Agent::new(
			Arc::new(Unnamed),
			Arc::new(FakeConnector::default()),
			AgentOptions::new("/heist"),
		)
		.unwrap_err();
		assert!(matches!(err, AgentError::InvalidOptions(_)));
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn fetches_rendered_secrets() {
		let connector = Arc::new(FakeConnector::default());
		connector.vault("http://a").set("app/s", "pw", "hunter2");
		let agent = agent(connector, Path::new("/heist"));

		agent
			.apply(config(
				"http://a",
				&[
					("db", "", "{{ kvSecret \"s\" \"pw\" }}"),
					("/vault/secrets/env", "0400", "A"),
				],
			))
			.await;

		assert_eq!(agent.status().kind, StatusKind::Synced);
		assert_eq!(
			agent.list_secrets().unwrap(),
			vec!["db".to_string(), "/vault/secrets/env".to_string()]
		);

		let db = agent.fetch_secret("db").await.unwrap();
		assert_eq!(db.value, "hunter2");
		assert_eq!(db.output_path, PathBuf::from("/heist/secrets/db"));
		assert_eq!(db.mode, 0o640);

		let env = agent.fetch_secret("/vault/secrets/env").await.unwrap();
		assert_eq!(env.output_path, PathBuf::from("/vault/secrets/env"));
		assert_eq!(env.mode, 0o400);

		let err = agent.fetch_secret("nope").await.unwrap_err();
		assert_eq!(err.kind(), ErrorKind::NotFound);
	}

	#[tokio::test]
	async fn duplicate_paths_keep_first_position_and_last_content() {
		let agent = agent(Arc::new(FakeConnector::default()), Path::new("/heist"));
		agent
			.apply(config(
				"http://a",
				&[("a", "", "first"), ("b", "", "B"), ("a", "0600", "second")],
			))
			.await;

		assert_eq!(agent.list_secrets().unwrap(), vec!["a", "b"]);
		let secret = agent.fetch_secret("a").await.unwrap();
		assert_eq!(secret.value, "second");
		assert_eq!(secret.mode, 0o600);
	}

	#[tokio::test]
	async fn client_secret_omits_templates() {
		let agent = agent(Arc::new(FakeConnector::default()), Path::new("/heist"));
		agent
			.apply(config("http://a", &[("db", "", "{{ kvSecret \"s\" \"pw\" }}")]))
			.await;

		let client = agent.client_secret().unwrap();
		assert_eq!(client.name, "heist.json");
		let value: serde_json::Value = serde_json::from_str(&client.value).unwrap();
		assert_eq!(value["address"], "http://a");
		assert!(value.get("templates").is_none());
		assert!(client.value.contains("\n\t\"address\""));
	}

	#[tokio::test]
	async fn reuses_session_when_endpoint_is_unchanged() {
		let connector = Arc::new(FakeConnector::default());
		let agent = agent(connector.clone(), Path::new("/heist"));

		agent.apply(config("http://a", &[("a", "", "1")])).await;
		agent.apply(config("http://a", &[("a", "", "1")])).await;
		agent.apply(config("http://a", &[("a", "", "2")])).await;
		assert_eq!(connector.connects.load(Ordering::SeqCst), 1);

		agent.apply(config("http://b", &[("a", "", "2")])).await;
		assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn template_change_keeps_the_cache() {
		let connector = Arc::new(FakeConnector::default());
		let vault = connector.vault("http://a");
		vault.set("app/s", "pw", "hunter2");
		let agent = agent(connector.clone(), Path::new("/heist"));

		agent
			.apply(config("http://a", &[("db", "", "{{ kvSecret \"s\" \"pw\" }}")]))
			.await;
		assert_eq!(agent.fetch_secret("db").await.unwrap().value, "hunter2");

		agent
			.apply(config("http://a", &[("db", "", "pw={{ kvSecret \"s\" \"pw\" }}")]))
			.await;
		assert_eq!(agent.fetch_secret("db").await.unwrap().value, "pw=hunter2");
		assert_eq!(vault.kv_reads.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn failed_connect_keeps_previous_snapshot() {
		let connector = Arc::new(FakeConnector::default());
		let agent = agent(connector.clone(), Path::new("/heist"));
		agent.apply(config("http://a", &[("a", "", "1")])).await;

		connector.fail.store(true, Ordering::SeqCst);
		agent.apply(config("http://b", &[("b", "", "2")])).await;

		let status = agent.status();
		assert_eq!(status.kind, StatusKind::Error);
		assert!(status.reason.starts_with("failed to create vault api instance"));
		assert_eq!(agent.list_secrets().unwrap(), vec!["a"]);
	}

	#[tokio::test]
	async fn notifies_subscribers_without_blocking() {
		let agent = agent(Arc::new(FakeConnector::default()), Path::new("/heist"));
		let (tx, mut rx) = mpsc::channel(1);
		agent.subscribe(tx);

		agent.apply(config("http://a", &[("a", "", "1")])).await;
		agent.apply(config("http://a", &[("a", "", "2")])).await;

		assert!(rx.try_recv().is_ok());
		assert!(rx.try_recv().is_err());
	}

	#[tokio::test]
	async fn clear_drops_snapshot() {
		let agent = agent(Arc::new(FakeConnector::default()), Path::new("/heist"));
		agent.apply(config("http://a", &[("a", "", "1")])).await;

		agent.clear("client config was deleted");
		let status = agent.status();
		assert_eq!(status.kind, StatusKind::NotYetSynced);
		assert_eq!(status.reason, "client config was deleted");
		assert!(agent.list_secrets().is_err());
	}

	#[tokio::test]
	async fn template_paths_must_name_a_file() {
		let agent = agent(Arc::new(FakeConnector::default()), Path::new("/heist"));
		agent
			.apply(config("http://a", &[("", "", "x"), ("tls/", "", "y")]))
			.await;

		for name in ["", "tls/"] {
			let err = agent.fetch_secret(name).await.unwrap_err();
			assert_eq!(err.kind(), ErrorKind::ConfigMalformed, "{name:?}");
		}
	}

	#[tokio::test]
	async fn stop_is_idempotent_and_terminal() {
		let agent = agent(Arc::new(FakeConnector::default()), Path::new("/heist"));
		agent.stop();
		agent.stop();
		assert!(agent.is_stopped());
		assert_eq!(agent.status().kind, StatusKind::Stopped);

		agent.apply(config("http://a", &[("a", "", "1")])).await;
		assert_eq!(agent.status().kind, StatusKind::Stopped);
		assert!(agent.list_secrets().is_err());
	}
}
