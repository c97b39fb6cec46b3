// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Control HTTP server: `/live`, `/ready` and `/shutdown`.
//!
//! The server owns the file syncer. Both stop on the agent's stop token;
//! `/shutdown` triggers it.

use axum::{extract::State, http::StatusCode, routing::any, Router};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::task::TaskTracker;
use tower::Service;
use tracing::{debug, info, warn};

use crate::agent::Agent;
use crate::error::{AgentError, AgentResult};
use crate::syncer::{FileSyncer, ReadyState, SyncOptions};

/// Listen address used when none is configured.
pub const DEFAULT_ADDRESS: &str = ":8080";

#[derive(Debug, Clone)]
pub struct ServerOptions {
	pub bind_attempts: u32,
	pub bind_backoff: Duration,
	pub header_read_timeout: Duration,
	pub sync: SyncOptions,
}

impl Default for ServerOptions {
	fn default() -> Self {
		Self {
			bind_attempts: 10,
			bind_backoff: Duration::from_secs(1),
			header_read_timeout: Duration::from_secs(60),
			sync: SyncOptions::default(),
		}
	}
}

/// State shared by the route handlers.
#[derive(Clone)]
pub struct ControlState {
	pub agent: Agent,
	pub ready: ReadyState,
}

pub fn router(state: ControlState) -> Router {
	Router::new()
		.route("/live", any(live))
		.route("/ready", any(ready))
		.route("/shutdown", any(shutdown))
		.with_state(state)
}

async fn live() -> StatusCode {
	StatusCode::OK
}

async fn ready(State(state): State<ControlState>) -> StatusCode {
	if state.ready.is_ready() {
		StatusCode::OK
	} else {
		StatusCode::INTERNAL_SERVER_ERROR
	}
}

async fn shutdown(State(state): State<ControlState>) -> StatusCode {
	info!("shutdown requested");
	state.agent.stop();
	StatusCode::OK
}

/// Expands the `:port` shorthand to all interfaces.
pub fn normalize_address(address: &str) -> String {
	match address.strip_prefix(':') {
		Some(port) => format!("0.0.0.0:{port}"),
		None => address.to_string(),
	}
}

pub struct ControlServer {
	agent: Agent,
	ready: ReadyState,
	options: ServerOptions,
	local_addr: Mutex<Option<SocketAddr>>,
	running: AtomicBool,
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
	fn drop(&mut self) {
		self.0.store(false, Ordering::SeqCst);
	}
}

impl ControlServer {
	pub fn new(agent: Agent, options: ServerOptions) -> Self {
		Self {
			agent,
			ready: ReadyState::default(),
			options,
			local_addr: Mutex::new(None),
			running: AtomicBool::new(false),
		}
	}

	pub fn ready_state(&self) -> ReadyState {
		self.ready.clone()
	}

	/// The bound address while the server is listening.
	pub fn local_addr(&self) -> Option<SocketAddr> {
		*self.local_addr.lock().unwrap_or_else(PoisonError::into_inner)
	}

	pub fn is_listening(&self) -> bool {
		self.local_addr().is_some()
	}

	fn set_local_addr(&self, addr: Option<SocketAddr>) {
		*self.local_addr.lock().unwrap_or_else(PoisonError::into_inner) = addr;
	}

	/// Serve until the agent is stopped.
	///
	/// Starts the file syncer, drains in-flight connections on stop and waits
	/// for the syncer before returning.
	pub async fn listen_and_serve(&self, address: &str) -> AgentResult<()> {
		if self
			.running
			.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
			.is_err()
		{
			return Err(AgentError::Server("server is already running".to_string()));
		}
		let _running = RunningGuard(&self.running);

		let address = normalize_address(address);
		let listener = self.bind(&address).await?;
		let local_addr = listener
			.local_addr()
			.map_err(|err| AgentError::Server(format!("failed to read local address: {err}")))?;
		self.set_local_addr(Some(local_addr));
		info!(addr = %local_addr, "control server listening");

		let stop = self.agent.stop_token();
		let syncer = tokio::spawn(
			FileSyncer::new(self.agent.clone(), self.ready.clone(), self.options.sync.clone())
				.run(stop.clone()),
		);

		let app = router(ControlState {
			agent: self.agent.clone(),
			ready: self.ready.clone(),
		});
		let connections = TaskTracker::new();

		loop {
			let (stream, peer) = tokio::select! {
				biased;

				_ = stop.cancelled() => break,

				accepted = listener.accept() => match accepted {
					Ok(accepted) => accepted,
					Err(err) => {
						warn!(error = %err, "failed to accept connection");
						continue;
					}
				},
			};

			let app = app.clone();
			let stop = stop.clone();
			let header_read_timeout = self.options.header_read_timeout;
			connections.spawn(async move {
				let service = service_fn(move |request: hyper::Request<Incoming>| {
					let mut app = app.clone();
					app.call(request)
				});
				let connection = http1::Builder::new()
					.timer(TokioTimer::new())
					.header_read_timeout(header_read_timeout)
					.serve_connection(TokioIo::new(stream), service);
				tokio::pin!(connection);

				let result = tokio::select! {
					result = connection.as_mut() => result,
					_ = stop.cancelled() => {
						connection.as_mut().graceful_shutdown();
						connection.await
					}
				};
				if let Err(err) = result {
					debug!(peer = %peer, error = %err, "connection closed with error");
				}
			});
		}

		drop(listener);
		self.set_local_addr(None);
		info!("control server stopped listening");

		connections.close();
		connections.wait().await;
		if let Err(err) = syncer.await {
			warn!(error = %err, "file syncer task failed");
		}
		self.ready.set(false);
		Ok(())
	}

	async fn bind(&self, address: &str) -> AgentResult<TcpListener> {
		let attempts = self.options.bind_attempts.max(1);
		let mut last_error = None;
		for attempt in 1..=attempts {
			match TcpListener::bind(address).await {
				Ok(listener) => return Ok(listener),
				Err(err) => {
					warn!(address, attempt, error = %err, "failed to bind control server");
					last_error = Some(err);
				}
			}
			if attempt < attempts {
				tokio::time::sleep(self.options.bind_backoff).await;
			}
		}

		let reason = last_error.map_or_else(String::new, |err| err.to_string());
		Err(AgentError::Server(format!(
			"failed to start listening on {address}, even after {attempts} retries: {reason}"
		)))
	}
}
