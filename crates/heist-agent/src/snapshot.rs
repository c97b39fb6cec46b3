// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use heist_k8s::{ValueTemplate, VaultClientConfigSpec};
use heist_vault::VaultEndpoint;
use std::collections::HashSet;
use std::sync::Arc;

use crate::cache::SecretCache;

/// An applied client config together with the cache of its Vault session.
pub struct Snapshot {
	pub spec: VaultClientConfigSpec,
	pub endpoint: VaultEndpoint,
	pub cache: Arc<SecretCache>,
}

impl Snapshot {
	/// Template names in order of first appearance.
	pub fn secret_names(&self) -> Vec<String> {
		let mut seen = HashSet::new();
		self.spec
			.templates
			.templates
			.iter()
			.filter(|template| seen.insert(template.path.as_str()))
			.map(|template| template.path.clone())
			.collect()
	}

	/// The template rendered for `name`. The last occurrence wins.
	pub fn template(&self, name: &str) -> Option<&ValueTemplate> {
		self.spec
			.templates
			.templates
			.iter()
			.rev()
			.find(|template| template.path == name)
	}
}

impl std::fmt::Debug for Snapshot {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Snapshot")
			.field("endpoint", &self.endpoint)
			.field("templates", &self.spec.templates.templates.len())
			.finish()
	}
}

pub fn endpoint_of(spec: &VaultClientConfigSpec) -> VaultEndpoint {
	VaultEndpoint {
		address: spec.address.clone(),
		role: spec.role.clone(),
		ca_certs: spec.ca_certs.clone(),
		auth_mount_path: spec.auth_mount_path.clone(),
	}
}

/// Template paths that appear more than once.
pub fn duplicate_paths(spec: &VaultClientConfigSpec) -> Vec<&str> {
	let mut seen = HashSet::new();
	let mut duplicates = Vec::new();
	for template in &spec.templates.templates {
		let path = template.path.as_str();
		if !seen.insert(path) && !duplicates.contains(&path) {
			duplicates.push(path);
		}
	}
	duplicates
}
