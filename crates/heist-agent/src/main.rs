// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use heist_agent::{
	stop_on_signal, sync_when_ready, Agent, AgentOptions, AgentSettings, Cli, Command,
	ControlServer, LogFormat, ServerOptions,
};
use heist_k8s::{build_client, KubeConfigSource};
use heist_vault::HttpVaultConnector;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const SYNC_WAIT_POLL: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();
	init_tracing(cli.agent.log_format);

	let settings = cli
		.agent
		.into_settings()
		.context("invalid configuration")?;
	info!(
		namespace = %settings.namespace,
		name = %settings.name,
		base_path = %settings.base_path.display(),
		static_token = settings.vault_token.is_some(),
		"starting heist-agent"
	);

	let agent = build_agent(&settings).await?;
	let watcher = tokio::spawn({
		let agent = agent.clone();
		async move { agent.run().await }
	});
	tokio::spawn(stop_on_signal(agent.clone()));

	let result = match cli.command {
		Command::Serve => {
			let server = ControlServer::new(agent.clone(), ServerOptions::default());
			server
				.listen_and_serve(&settings.address)
				.await
				.context("control server failed")
		}
		Command::Sync => {
			let result = sync_when_ready(agent.clone(), SYNC_WAIT_POLL)
				.await
				.context("one-shot sync failed");
			if result.is_ok() {
				info!("secrets written");
			}
			result
		}
	};

	agent.stop();
	if let Err(err) = watcher.await {
		warn!(error = %err, "config watcher task failed");
	}
	result
}

fn init_tracing(format: LogFormat) {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
	let registry = tracing_subscriber::registry().with(filter);
	match format {
		LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
		LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
	}
}

async fn build_agent(settings: &AgentSettings) -> Result<Agent> {
	let client = build_client(
		settings.kubernetes_master_url.as_deref(),
		settings.kubernetes_config_path.as_deref(),
	)
	.await
	.context("failed to create kubernetes client")?;
	let source = KubeConfigSource::new(client, &settings.namespace, &settings.name);
	let connector = HttpVaultConnector::new(settings.vault_token.clone(), &settings.jwt_path);

	let mut options = AgentOptions::new(&settings.base_path);
	options.full_chain_includes_issuer = settings.full_chain_includes_issuer;

	Agent::new(Arc::new(source), Arc::new(connector), options).context("failed to create agent")
}
