// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The `VaultClientConfig` custom resource.
//!
//! A `VaultClientConfig` is written by the heist operator for each workload.
//! It tells the sidecar which Vault to talk to, which secrets the workload was
//! bound to and which files to render from them.
//!
//! ```yaml
//! apiVersion: heist.youniqx.com/v1alpha1
//! kind: VaultClientConfig
//! metadata:
//!   name: my-app
//!   namespace: default
//! spec:
//!   address: https://vault.vault.svc:8200
//!   role: default-my-app
//!   kvSecrets:
//!     - name: db
//!       enginePath: managed/kv
//!       secretPath: default/db
//!   templates:
//!     templates:
//!       - path: db-password
//!         template: '{{ kvSecret "db" "password" }}'
//! ```

use kube::CustomResource;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
	group = "heist.youniqx.com",
	version = "v1alpha1",
	kind = "VaultClientConfig",
	namespaced,
	schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct VaultClientConfigSpec {
	/// Vault address, e.g. `https://vault.vault.svc:8200`.
	#[serde(default, skip_serializing_if = "String::is_empty")]
	pub address: String,

	/// Kubernetes auth role the agent logs in with.
	#[serde(default, skip_serializing_if = "String::is_empty")]
	pub role: String,

	/// Extra CA certificates (PEM) to trust when talking to Vault.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub ca_certs: Vec<String>,

	#[serde(default, skip_serializing_if = "String::is_empty")]
	pub auth_mount_path: String,

	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub certificate_authorities: Vec<CertificateAuthorityRef>,

	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub kv_secrets: Vec<KvSecretRef>,

	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub certificates: Vec<CertificateRoleRef>,

	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub transit_keys: Vec<TransitKeyRef>,

	#[serde(default, skip_serializing_if = "AgentTemplates::is_empty")]
	pub templates: AgentTemplates,
}

impl VaultClientConfigSpec {
	pub fn kv_secret(&self, name: &str) -> Option<&KvSecretRef> {
		self.kv_secrets.iter().find(|kv| kv.name == name)
	}

	pub fn certificate_authority(&self, name: &str) -> Option<&CertificateAuthorityRef> {
		self.certificate_authorities.iter().find(|ca| ca.name == name)
	}

	pub fn certificate_role(&self, name: &str) -> Option<&CertificateRoleRef> {
		self.certificates.iter().find(|cert| cert.name == name)
	}

	/// Finds the certificate template `certField` refers to.
	///
	/// A template with a non-empty alias only answers to that alias. Templates
	/// without an alias answer to their certificate role name. Alias matches
	/// win over role matches.
	pub fn certificate_template(&self, name: &str) -> Option<&CertificateTemplate> {
		let templates = &self.templates.certificate_templates;
		templates
			.iter()
			.find(|t| !t.alias.is_empty() && t.alias == name)
			.or_else(|| {
				templates
					.iter()
					.find(|t| t.alias.is_empty() && t.certificate_role == name)
			})
	}

	/// The same config without its templates.
	pub fn without_templates(&self) -> Self {
		Self {
			templates: AgentTemplates::default(),
			..self.clone()
		}
	}
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CertificateAuthorityRef {
	#[serde(default)]
	pub name: String,
	#[serde(default, skip_serializing_if = "String::is_empty")]
	pub engine_path: String,
	#[serde(default)]
	pub kv_secrets: CertificateAuthorityKvSecrets,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub capabilities: Vec<CertificateAuthorityCapability>,
}

/// Where the operator stored the CA's public and private material.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CertificateAuthorityKvSecrets {
	#[serde(default)]
	pub engine_path: String,
	#[serde(default, rename = "publicSecret")]
	pub public_secret_path: String,
	#[serde(default, rename = "privateSecret")]
	pub private_secret_path: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KvSecretRef {
	#[serde(default)]
	pub name: String,
	#[serde(default)]
	pub engine_path: String,
	#[serde(default)]
	pub secret_path: String,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub capabilities: Vec<KvCapability>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRoleRef {
	#[serde(default)]
	pub name: String,
	#[serde(default)]
	pub engine_path: String,
	#[serde(default)]
	pub role_name: String,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub capabilities: Vec<CertificateCapability>,
}

/// Transit keys are carried for completeness; the agent never renders them.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TransitKeyRef {
	#[serde(default)]
	pub name: String,
	#[serde(default)]
	pub engine_path: String,
	#[serde(default)]
	pub key_name: String,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub capabilities: Vec<TransitKeyCapability>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AgentTemplates {
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub certificate_templates: Vec<CertificateTemplate>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub templates: Vec<ValueTemplate>,
}

impl AgentTemplates {
	pub fn is_empty(&self) -> bool {
		self.certificate_templates.is_empty() && self.templates.is_empty()
	}
}

/// One output file.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ValueTemplate {
	/// Output path. Relative paths land below `<base>/secrets/`. Doubles as
	/// the logical name of the rendered secret.
	#[serde(default)]
	pub path: String,
	/// Octal file mode such as `0640`.
	#[serde(default, skip_serializing_if = "String::is_empty")]
	pub mode: String,
	#[serde(default)]
	pub template: String,
}

/// Parameters for certificates requested through `certField`.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CertificateTemplate {
	#[serde(default, skip_serializing_if = "String::is_empty")]
	pub alias: String,
	#[serde(default)]
	pub certificate_role: String,
	#[serde(default, skip_serializing_if = "String::is_empty")]
	pub common_name: String,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub dns_sans: Vec<String>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub other_sans: Vec<String>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub ip_sans: Vec<String>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub uri_sans: Vec<String>,
	/// Requested lifetime as a duration string (`24h`, `1h30m`, `24h0m0s`).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub ttl: Option<String>,
	#[serde(
		default,
		rename = "excludeCNFromSans",
		skip_serializing_if = "std::ops::Not::not"
	)]
	pub exclude_cn_from_sans: bool,
}

impl CertificateTemplate {
	/// The parsed TTL. Unparsable values are logged and treated as unset.
	pub fn ttl(&self) -> Option<Duration> {
		let raw = self.ttl.as_deref()?.trim();
		if raw.is_empty() {
			return None;
		}
		match parse_duration(raw) {
			Ok(ttl) => Some(ttl),
			Err(e) => {
				warn!(ttl = %raw, error = %e, "Ignoring unparsable certificate ttl");
				None
			}
		}
	}
}

/// Parses a duration string as written into the resource.
///
/// Accepts compact forms such as `24h0m0s` as well as spaced ones such as
/// `1h 30m`. A bare `0` is a zero duration.
pub fn parse_duration(raw: &str) -> Result<Duration, humantime::DurationError> {
	if raw == "0" {
		return Ok(Duration::ZERO);
	}
	humantime::parse_duration(raw)
}

/// Capabilities are granted by the operator and only carried by the agent.
/// Values this version does not know are kept verbatim.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum KvCapability {
	Read,
	#[serde(untagged)]
	Other(String),
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CertificateAuthorityCapability {
	ReadPublic,
	ReadPrivate,
	#[serde(untagged)]
	Other(String),
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CertificateCapability {
	Issue,
	SignCsr,
	SignVerbatim,
	#[serde(untagged)]
	Other(String),
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransitKeyCapability {
	Encrypt,
	Decrypt,
	Datakey,
	Rewrap,
	Sign,
	Hmac,
	Verify,
	Read,
	#[serde(untagged)]
	Other(String),
}
