// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Read-through cache in front of Vault.
//!
//! KV reads are kept for a fixed minute. Issued certificates are kept until
//! half of their remaining lifetime has passed, so a renewed certificate is
//! always in place well before the old one expires.
//!
//! Each operation class has its own lock, held across the upstream call. Two
//! concurrent misses for the same class therefore issue one request between
//! them, and KV reads never wait on certificate issuance.

use chrono::{DateTime, TimeDelta, Utc};
use heist_vault::{IssueCertificateOptions, IssuedCertificate, KvSecret, VaultApi};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use x509_parser::parse_x509_certificate;

use crate::clock::Clock;
use crate::error::{AgentError, AgentResult};

const KEY_DELIMITER: char = '|';
const KV_TTL_SECONDS: i64 = 60;
const CERTIFICATE_FALLBACK_TTL_HOURS: i64 = 168;

struct CacheEntry<T> {
	value: T,
	expires_at: DateTime<Utc>,
}

impl<T: Clone> CacheEntry<T> {
	fn fresh(&self, now: DateTime<Utc>) -> Option<T> {
		(now < self.expires_at).then(|| self.value.clone())
	}
}

pub struct SecretCache {
	vault: Arc<dyn VaultApi>,
	clock: Arc<dyn Clock>,
	kv: Mutex<HashMap<String, CacheEntry<KvSecret>>>,
	certificates: Mutex<HashMap<String, CacheEntry<IssuedCertificate>>>,
}

impl SecretCache {
	pub fn new(vault: Arc<dyn VaultApi>, clock: Arc<dyn Clock>) -> Self {
		Self {
			vault,
			clock,
			kv: Mutex::new(HashMap::new()),
			certificates: Mutex::new(HashMap::new()),
		}
	}

	pub async fn read_kv(&self, engine_path: &str, secret_path: &str) -> AgentResult<KvSecret> {
		let key = cache_key(engine_path, secret_path)?;
		let mut entries = self.kv.lock().await;

		if let Some(entry) = entries.get(&key) {
			if let Some(secret) = entry.fresh(self.clock.now()) {
				return Ok(secret);
			}
			entries.remove(&key);
		}

		debug!(engine_path, secret_path, "KV cache miss");
		let secret = self.vault.read_kv(engine_path, secret_path).await?;
		entries.insert(
			key,
			CacheEntry {
				value: secret.clone(),
				expires_at: self.clock.now() + TimeDelta::seconds(KV_TTL_SECONDS),
			},
		);
		Ok(secret)
	}

	pub async fn issue_certificate(
		&self,
		engine_path: &str,
		role: &str,
		options: &IssueCertificateOptions,
	) -> AgentResult<IssuedCertificate> {
		let key = cache_key(engine_path, role)?;
		let mut entries = self.certificates.lock().await;

		if let Some(entry) = entries.get(&key) {
			if let Some(certificate) = entry.fresh(self.clock.now()) {
				return Ok(certificate);
			}
			entries.remove(&key);
		}

		debug!(engine_path, role, "Certificate cache miss");
		let certificate = self
			.vault
			.issue_certificate(engine_path, role, options)
			.await?;
		let expires_at = certificate_expiry(&certificate.certificate, self.clock.now());
		entries.insert(
			key,
			CacheEntry {
				value: certificate.clone(),
				expires_at,
			},
		);
		Ok(certificate)
	}
}

impl std::fmt::Debug for SecretCache {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SecretCache").finish_non_exhaustive()
	}
}

fn cache_key(first: &str, second: &str) -> AgentResult<String> {
	for part in [first, second] {
		if part.is_empty() || part.contains(KEY_DELIMITER) {
			return Err(AgentError::ConfigMalformed(format!(
				"invalid vault path {part:?}: must be non-empty and must not contain {KEY_DELIMITER:?}"
			)));
		}
	}
	Ok(format!("{first}{KEY_DELIMITER}{second}"))
}

/// Midpoint between now and the certificate's `notAfter`, or a week from
/// now when the PEM cannot be read.
fn certificate_expiry(pem: &str, now: DateTime<Utc>) -> DateTime<Utc> {
	match not_after(pem) {
		Some(not_after) => now + (not_after - now) / 2,
		None => {
			warn!("Could not parse issued certificate, caching it for a week");
			now + TimeDelta::hours(CERTIFICATE_FALLBACK_TTL_HOURS)
		}
	}
}

fn not_after(pem: &str) -> Option<DateTime<Utc>> {
	let block = ::pem::parse(pem.as_bytes()).ok()?;
	let (_, cert) = parse_x509_certificate(block.contents()).ok()?;
	DateTime::from_timestamp(cert.validity().not_after.timestamp(), 0)
}
