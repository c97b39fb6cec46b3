// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Output path and file mode rules.

use std::path::{Path, PathBuf};

use crate::error::{AgentError, AgentResult};

/// Mode used when a template does not request one, or requests garbage.
pub const DEFAULT_FILE_MODE: u32 = 0o640;

/// Bits the agent always keeps on the files it writes.
pub const OWNER_READ_WRITE: u32 = 0o600;

/// Mode for directories the agent creates.
pub const DIRECTORY_MODE: u32 = 0o755;

const SECRETS_DIR: &str = "secrets";
const CLIENT_CONFIG_FILE: &str = "config.json";

/// Parses an octal mode string. Empty or invalid input yields [`DEFAULT_FILE_MODE`].
pub fn parse_mode(raw: &str) -> u32 {
	let raw = raw.trim();
	if raw.is_empty() {
		return DEFAULT_FILE_MODE;
	}
	match u32::from_str_radix(raw, 8) {
		Ok(mode) if mode <= 0o7777 => mode,
		_ => DEFAULT_FILE_MODE,
	}
}

/// Formats a mode the way templates spell it, e.g. `0640`.
pub fn format_mode(mode: u32) -> String {
	format!("{mode:04o}")
}

/// The mode a file is actually written with.
pub fn effective_mode(requested: u32) -> u32 {
	requested | OWNER_READ_WRITE
}

/// Absolute template paths are used verbatim, relative ones land below
/// `<base>/secrets/`.
pub fn resolve_output_path(base: &Path, path: &str) -> PathBuf {
	let candidate = Path::new(path);
	if candidate.is_absolute() {
		candidate.to_path_buf()
	} else {
		base.join(SECRETS_DIR).join(candidate)
	}
}

/// Rejects template paths that cannot name a file.
pub fn check_output_path(path: &str) -> AgentResult<()> {
	if path.trim().is_empty() {
		return Err(AgentError::ConfigMalformed(
			"template path must not be empty".to_string(),
		));
	}
	if path.ends_with('/') {
		return Err(AgentError::ConfigMalformed(format!(
			"template path {path} names a directory"
		)));
	}
	Ok(())
}

pub fn client_config_path(base: &Path) -> PathBuf {
	base.join(CLIENT_CONFIG_FILE)
}
