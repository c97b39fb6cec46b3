// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Request and response types for the Vault endpoints used by the agent.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Fields of a KV v2 secret.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct KvSecret {
	pub fields: HashMap<String, String>,
}

impl KvSecret {
	/// Value of `field`, or an empty string when the secret does not carry it.
	pub fn field(&self, field: &str) -> String {
		self.fields.get(field).cloned().unwrap_or_default()
	}
}

impl fmt::Debug for KvSecret {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let mut keys: Vec<&String> = self.fields.keys().collect();
		keys.sort();
		f.debug_struct("KvSecret").field("fields", &keys).finish()
	}
}

/// Options for issuing a certificate from a PKI role.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssueCertificateOptions {
	pub common_name: String,
	pub dns_sans: Vec<String>,
	pub ip_sans: Vec<String>,
	pub uri_sans: Vec<String>,
	pub other_sans: Vec<String>,
	/// Requested lifetime. `None` leaves the role default in place.
	pub ttl: Option<Duration>,
	pub exclude_cn_from_sans: bool,
}

/// A certificate issued by a PKI role.
#[derive(Clone, PartialEq, Eq)]
pub struct IssuedCertificate {
	pub certificate: String,
	pub issuing_ca: String,
	pub ca_chain: Vec<String>,
	pub private_key: String,
	pub private_key_type: String,
	pub serial_number: String,
}

impl IssuedCertificate {
	/// Leaf certificate followed by the intermediate chain, newline separated.
	pub fn chain(&self) -> String {
		std::iter::once(self.certificate.as_str())
			.chain(self.ca_chain.iter().map(String::as_str))
			.collect::<Vec<_>>()
			.join("\n")
	}
}

impl fmt::Debug for IssuedCertificate {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("IssuedCertificate")
			.field("serial_number", &self.serial_number)
			.field("ca_chain_len", &self.ca_chain.len())
			.field("private_key", &"[REDACTED]")
			.finish()
	}
}

/// Body of `POST /v1/<mount>/issue/<role>`.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub(crate) struct IssueRequest {
	common_name: String,
	#[serde(skip_serializing_if = "String::is_empty")]
	alt_names: String,
	#[serde(skip_serializing_if = "String::is_empty")]
	ip_sans: String,
	#[serde(skip_serializing_if = "String::is_empty")]
	uri_sans: String,
	#[serde(skip_serializing_if = "String::is_empty")]
	other_sans: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	ttl: Option<u64>,
	#[serde(skip_serializing_if = "std::ops::Not::not")]
	exclude_cn_from_sans: bool,
	format: &'static str,
}

impl From<&IssueCertificateOptions> for IssueRequest {
	fn from(options: &IssueCertificateOptions) -> Self {
		Self {
			common_name: options.common_name.clone(),
			alt_names: options.dns_sans.join(","),
			ip_sans: options.ip_sans.join(","),
			uri_sans: options.uri_sans.join(","),
			other_sans: options.other_sans.join(","),
			ttl: options
				.ttl
				.map(|ttl| ttl.as_secs())
				.filter(|seconds| *seconds > 0),
			exclude_cn_from_sans: options.exclude_cn_from_sans,
			format: "pem",
		}
	}
}

/// Body of `POST /v1/auth/<mount>/login`.
#[derive(Serialize)]
pub(crate) struct LoginRequest<'a> {
	pub role: &'a str,
	pub jwt: &'a str,
}

#[derive(Deserialize)]
pub(crate) struct LoginResponse {
	pub auth: Option<LoginAuth>,
}

#[derive(Deserialize)]
pub(crate) struct LoginAuth {
	#[serde(default)]
	pub client_token: String,
}

#[derive(Deserialize)]
pub(crate) struct KvReadResponse {
	pub data: Option<KvReadData>,
}

#[derive(Deserialize)]
pub(crate) struct KvReadData {
	#[serde(default)]
	pub data: Option<HashMap<String, serde_json::Value>>,
}

impl KvReadResponse {
	pub(crate) fn into_secret(self) -> KvSecret {
		let fields = self
			.data
			.and_then(|data| data.data)
			.unwrap_or_default()
			.into_iter()
			.map(|(key, value)| {
				let value = match value {
					serde_json::Value::String(s) => s,
					serde_json::Value::Null => String::new(),
					other => other.to_string(),
				};
				(key, value)
			})
			.collect();
		KvSecret { fields }
	}
}

#[derive(Deserialize)]
pub(crate) struct IssueResponse {
	pub data: Option<IssueData>,
}

#[derive(Deserialize)]
pub(crate) struct IssueData {
	#[serde(default)]
	pub certificate: String,
	#[serde(default)]
	pub issuing_ca: String,
	#[serde(default)]
	pub ca_chain: Vec<String>,
	#[serde(default)]
	pub private_key: String,
	#[serde(default)]
	pub private_key_type: String,
	#[serde(default)]
	pub serial_number: String,
}

impl From<IssueData> for IssuedCertificate {
	fn from(data: IssueData) -> Self {
		Self {
			certificate: data.certificate,
			issuing_ca: data.issuing_ca,
			ca_chain: data.ca_chain,
			private_key: data.private_key,
			private_key_type: data.private_key_type,
			serial_number: data.serial_number,
		}
	}
}

/// Vault error envelope: `{"errors": ["..."]}`.
#[derive(Deserialize)]
pub(crate) struct ErrorBody {
	#[serde(default)]
	pub errors: Vec<String>,
}
