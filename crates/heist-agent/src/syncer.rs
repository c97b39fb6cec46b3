// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Projects the agent's secrets onto the filesystem.
//!
//! A sync writes the client config record, then every rendered secret in
//! template order, then removes the files of secrets that are no longer
//! listed. A failed render aborts the sync: the failing secret keeps its
//! previous file and no orphan is removed. Each file is written to a
//! temporary sibling and renamed over the target.

use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::{Agent, Secret, StatusKind};
use crate::error::{AgentError, AgentResult};
use crate::paths::{effective_mode, format_mode, DIRECTORY_MODE};

/// Whether the last sync succeeded. Shared with the control server.
#[derive(Debug, Clone, Default)]
pub struct ReadyState(Arc<Mutex<bool>>);

impl ReadyState {
	pub fn is_ready(&self) -> bool {
		*self.0.lock().unwrap_or_else(PoisonError::into_inner)
	}

	pub fn set(&self, ready: bool) {
		*self.0.lock().unwrap_or_else(PoisonError::into_inner) = ready;
	}
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
	/// Retry delay after a failed sync, and the loop tick.
	pub poll_interval: Duration,
	/// Delay between successful syncs.
	pub sync_interval: Duration,
}

impl Default for SyncOptions {
	fn default() -> Self {
		Self {
			poll_interval: Duration::from_secs(5),
			sync_interval: Duration::from_secs(120),
		}
	}
}

pub struct FileSyncer {
	agent: Agent,
	ready: ReadyState,
	options: SyncOptions,
	written: HashMap<String, PathBuf>,
	next_sync_at: Instant,
}

impl FileSyncer {
	pub fn new(agent: Agent, ready: ReadyState, options: SyncOptions) -> Self {
		Self {
			agent,
			ready,
			options,
			written: HashMap::new(),
			next_sync_at: Instant::now(),
		}
	}

	/// Sync on every tick and every config update until `stop` fires.
	pub async fn run(mut self, stop: CancellationToken) {
		let (updates_tx, mut updates) = mpsc::channel(1);
		self.agent.subscribe(updates_tx);

		let mut ticker = time::interval(self.options.poll_interval);
		ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

		loop {
			tokio::select! {
				biased;

				_ = stop.cancelled() => break,

				Some(()) = updates.recv() => {
					self.next_sync_at = Instant::now();
					self.attempt().await;
				}

				_ = ticker.tick() => self.attempt().await,
			}
		}

		self.ready.set(false);
		debug!("file syncer stopped");
	}

	async fn attempt(&mut self) {
		let now = Instant::now();
		if now < self.next_sync_at {
			return;
		}

		match self.sync_once().await {
			Ok(()) => {
				self.next_sync_at = now + self.options.sync_interval;
				self.ready.set(true);
			}
			Err(err) => {
				warn!(error = %err, kind = %err.kind(), "sync failed");
				self.next_sync_at = now + self.options.poll_interval;
				self.ready.set(false);
			}
		}
	}

	/// Write every secret once. Stops before the next file operation once the
	/// agent is stopped.
	pub async fn sync_once(&mut self) -> AgentResult<()> {
		let client = self.agent.client_secret()?;
		self.ensure_running()?;
		write_secret(&client).await?;

		let names = self.agent.list_secrets()?;
		for name in &names {
			let secret = self.agent.fetch_secret(name).await?;

			self.ensure_running()?;
			if let Some(previous) = self.written.get(name) {
				if previous != &secret.output_path {
					remove_file(previous).await?;
				}
			}
			write_secret(&secret).await?;
			self.written.insert(name.clone(), secret.output_path);
		}

		let orphans: Vec<String> = self
			.written
			.keys()
			.filter(|name| !names.contains(name))
			.cloned()
			.collect();
		for name in orphans {
			self.ensure_running()?;
			if let Some(path) = self.written.remove(&name) {
				remove_file(&path).await?;
				info!(name, path = %path.display(), "removed secret");
			}
		}

		debug!(secrets = names.len(), "sync complete");
		Ok(())
	}

	fn ensure_running(&self) -> AgentResult<()> {
		if self.agent.is_stopped() {
			return Err(AgentError::Task("agent stopped during sync".to_string()));
		}
		Ok(())
	}
}

/// Wait for the first applied config, then sync once.
///
/// Used by the `sync` command to preload secrets before the workload starts.
pub async fn sync_when_ready(agent: Agent, poll_interval: Duration) -> AgentResult<()> {
	let stop = agent.stop_token();
	loop {
		match agent.status().kind {
			StatusKind::Synced => break,
			StatusKind::Stopped => {
				return Err(AgentError::Task(
					"agent stopped before the client config was synced".to_string(),
				))
			}
			kind => debug!(status = %kind, "waiting for client config"),
		}

		tokio::select! {
			_ = stop.cancelled() => {}
			_ = time::sleep(poll_interval) => {}
		}
	}

	let mut syncer = FileSyncer::new(agent, ReadyState::default(), SyncOptions::default());
	syncer.sync_once().await
}

async fn write_secret(secret: &Secret) -> AgentResult<()> {
	let path = &secret.output_path;
	let parent = path.parent().unwrap_or_else(|| Path::new("/"));
	create_parent(parent).await?;

	let file_name = path
		.file_name()
		.map(|name| name.to_string_lossy().into_owned())
		.unwrap_or_else(|| secret.name.clone());
	let temp_path = parent.join(format!(".{file_name}.tmp"));
	let mode = effective_mode(secret.mode);

	let result = async {
		let mut file = fs::OpenOptions::new()
			.write(true)
			.create(true)
			.truncate(true)
			.mode(mode)
			.open(&temp_path)
			.await?;
		file.write_all(secret.value.as_bytes()).await?;
		file.sync_all().await?;
		drop(file);
		fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(mode)).await?;
		fs::rename(&temp_path, path).await
	}
	.await;

	if let Err(err) = result {
		let _ = fs::remove_file(&temp_path).await;
		return Err(AgentError::io("write", path, err));
	}
	debug!(path = %path.display(), mode = %format_mode(mode), "wrote secret");
	Ok(())
}

async fn create_parent(dir: &Path) -> AgentResult<()> {
	let mut builder = fs::DirBuilder::new();
	builder.recursive(true).mode(DIRECTORY_MODE);
	builder
		.create(dir)
		.await
		.map_err(|err| AgentError::io("create directory", dir, err))
}

async fn remove_file(path: &Path) -> AgentResult<()> {
	match fs::remove_file(path).await {
		Ok(()) => Ok(()),
		Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
		Err(err) => Err(AgentError::io("remove", path, err)),
	}
}
