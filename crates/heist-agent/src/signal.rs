// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Process signal handling.

use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

use crate::agent::Agent;

/// Turns SIGINT and SIGTERM into an agent stop. Returns early once the agent
/// is stopped some other way.
pub async fn stop_on_signal(agent: Agent) {
	let stop = agent.stop_token();
	let mut terminate = match signal(SignalKind::terminate()) {
		Ok(terminate) => terminate,
		Err(err) => {
			warn!(error = %err, "failed to install SIGTERM handler");
			tokio::select! {
				result = tokio::signal::ctrl_c() => {
					if result.is_ok() {
						info!("received SIGINT");
						agent.stop();
					}
				}
				_ = stop.cancelled() => {}
			}
			return;
		}
	};

	tokio::select! {
		_ = tokio::signal::ctrl_c() => info!("received SIGINT"),
		_ = terminate.recv() => info!("received SIGTERM"),
		_ = stop.cancelled() => return,
	}
	agent.stop();
}
