// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Keeps the agent's snapshot in step with the watched client config.

use futures::StreamExt;
use heist_k8s::{ConfigEvent, ConfigEventStream, VaultClientConfig};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::agent::{Agent, StatusKind, SyncStatus};

const CONFIG_MISSING: &str = "client config does not exist";
const CONFIG_DELETED: &str = "client config was deleted";

impl Agent {
	/// Watch the client config until [`Agent::stop`] is called.
	///
	/// Every tick (re)opens the watch if it is gone and refetches the object
	/// once the last full fetch is older than the resync interval. Watch
	/// events for other objects are ignored.
	pub async fn run(&self) {
		let stop = self.stop_token();
		let options = self.options().clone();
		let mut ticker = time::interval(options.poll_interval);
		ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

		let mut events: Option<ConfigEventStream> = None;
		let mut last_fetch: Option<Instant> = None;

		info!(
			namespace = self.source().namespace(),
			name = self.source().name(),
			"watching client config"
		);

		loop {
			tokio::select! {
				biased;

				_ = stop.cancelled() => break,

				_ = ticker.tick() => {
					if events.is_none() {
						match self.source().watch().await {
							Ok(stream) => {
								debug!("opened client config watch");
								events = Some(stream);
							}
							Err(err) => warn!(error = %err, "failed to watch client config"),
						}
					}

					let due = last_fetch.map_or(true, |at| at.elapsed() >= options.resync_interval);
					if due {
						self.refetch(&mut last_fetch).await;
					}
				}

				event = next_event(&mut events) => match event {
					Some(Ok(event)) => self.handle_event(event).await,
					Some(Err(err)) => {
						warn!(error = %err, "client config watch failed");
						events = None;
					}
					None => {
						debug!("client config watch ended");
						events = None;
					}
				},
			}
		}

		self.stop();
		info!("stopped watching client config");
	}

	async fn refetch(&self, last_fetch: &mut Option<Instant>) {
		match self.source().get().await {
			Ok(Some(config)) => {
				*last_fetch = Some(Instant::now());
				self.apply(config).await;
			}
			Ok(None) => {
				*last_fetch = Some(Instant::now());
				self.clear(CONFIG_MISSING);
			}
			Err(err) => {
				warn!(error = %err, "failed to fetch client config");
				if self.status().kind == StatusKind::NotYetSynced {
					self.set_status(SyncStatus {
						kind: StatusKind::NotYetSynced,
						reason: format!("failed to fetch client config: {err}"),
					});
				}
			}
		}
	}

	async fn handle_event(&self, event: ConfigEvent) {
		if !self.is_watched(event.object()) {
			return;
		}
		match event {
			ConfigEvent::Applied(config) => self.apply(config).await,
			ConfigEvent::Deleted(_) => self.clear(CONFIG_DELETED),
		}
	}

	fn is_watched(&self, config: &VaultClientConfig) -> bool {
		let source = self.source();
		config.metadata.name.as_deref() == Some(source.name())
			&& config
				.metadata
				.namespace
				.as_deref()
				.map_or(true, |namespace| namespace == source.namespace())
	}
}

async fn next_event(
	events: &mut Option<ConfigEventStream>,
) -> Option<heist_k8s::K8sResult<ConfigEvent>> {
	match events {
		Some(stream) => stream.next().await,
		None => std::future::pending().await,
	}
}
