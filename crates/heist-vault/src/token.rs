// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Vault token wrapper.

use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

const REDACTED: &str = "[REDACTED]";

/// A Vault client token.
///
/// The value is wiped from memory on drop and never shows up in `Debug` or
/// `Display` output. Call [`VaultToken::expose`] to get at the raw string.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct VaultToken(String);

impl VaultToken {
	pub fn new(token: impl Into<String>) -> Self {
		Self(token.into())
	}

	/// Access the raw token for use in a request header.
	pub fn expose(&self) -> &str {
		&self.0
	}

	pub fn is_empty(&self) -> bool {
		self.0.trim().is_empty()
	}
}

impl From<String> for VaultToken {
	fn from(token: String) -> Self {
		Self(token)
	}
}

impl fmt::Debug for VaultToken {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("VaultToken").field(&REDACTED).finish()
	}
}

impl fmt::Display for VaultToken {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(REDACTED)
	}
}
