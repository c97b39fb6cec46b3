// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Template rendering.
//!
//! Templates are rendered with minijinja. Three functions give access to the
//! secrets bound in the client config:
//!
//! - `kvSecret(name, field)`: a field of a KV secret
//! - `caField(name, field)`: material of a certificate authority
//! - `certField(alias_or_role, field)`: material of an issued certificate
//!
//! Templates written by the operator use the space separated call style
//! (`{{ kvSecret "db" "password" }}`). Such calls are rewritten into
//! parenthesised calls before rendering; everything else is passed through.

use heist_vault::IssueCertificateOptions;
use minijinja::{Environment, ErrorKind, UndefinedBehavior};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::runtime::Handle;

use crate::error::{AgentError, AgentResult};
use crate::snapshot::Snapshot;

const HELPERS: [&str; 3] = ["kvSecret", "caField", "certField"];

/// The functions templates may call.
///
/// Implementations are invoked from a blocking thread and may block.
pub trait TemplateHelpers: Send + Sync {
	fn kv_secret(&self, name: &str, field: &str) -> AgentResult<String>;
	fn ca_field(&self, name: &str, field: &str) -> AgentResult<String>;
	fn cert_field(&self, name: &str, field: &str) -> AgentResult<String>;
}

type FailureSlot = Arc<Mutex<Option<AgentError>>>;

/// Render `source` with `helpers`.
///
/// The first helper failure is returned as-is so callers can tell a missing
/// binding from a Vault outage. Other template errors are reported as
/// [`AgentError::ConfigMalformed`].
pub fn render_template(source: &str, helpers: Arc<dyn TemplateHelpers>) -> AgentResult<String> {
	let failure: FailureSlot = Arc::default();

	let mut env = Environment::new();
	env.set_keep_trailing_newline(true);
	env.set_undefined_behavior(UndefinedBehavior::Strict);
	register(&mut env, "kvSecret", &helpers, &failure, |h, name, field| {
		h.kv_secret(name, field)
	});
	register(&mut env, "caField", &helpers, &failure, |h, name, field| {
		h.ca_field(name, field)
	});
	register(&mut env, "certField", &helpers, &failure, |h, name, field| {
		h.cert_field(name, field)
	});

	let source = normalize_helper_calls(source);
	match env.render_str(&source, minijinja::context! {}) {
		Ok(rendered) => Ok(rendered),
		Err(err) => {
			let helper_failure = failure
				.lock()
				.unwrap_or_else(PoisonError::into_inner)
				.take();
			Err(helper_failure
				.unwrap_or_else(|| AgentError::ConfigMalformed(format!("template error: {err:#}"))))
		}
	}
}

fn register<F>(
	env: &mut Environment<'static>,
	name: &'static str,
	helpers: &Arc<dyn TemplateHelpers>,
	failure: &FailureSlot,
	call: F,
) where
	F: Fn(&dyn TemplateHelpers, &str, &str) -> AgentResult<String> + Send + Sync + 'static,
{
	let helpers = helpers.clone();
	let failure = failure.clone();
	env.add_function(
		name,
		move |secret: String, field: String| -> Result<String, minijinja::Error> {
			call(helpers.as_ref(), &secret, &field).map_err(|err| {
				let message = err.to_string();
				let mut slot = failure.lock().unwrap_or_else(PoisonError::into_inner);
				if slot.is_none() {
					*slot = Some(err);
				}
				minijinja::Error::new(ErrorKind::InvalidOperation, message)
			})
		},
	);
}

/// Rewrites `{{ fn "a" "b" }}` into `{{ fn("a", "b") }}` for the helper functions.
///
/// Only `{{ }}` carries meaning in operator templates, so block and comment
/// openers in the surrounding text are emitted as string expressions.
pub(crate) fn normalize_helper_calls(source: &str) -> String {
	let mut out = String::with_capacity(source.len() + 16);
	let mut rest = source;
	while let Some(start) = rest.find("{{") {
		let (text, after) = rest.split_at(start);
		push_literal(&mut out, text);
		out.push_str("{{");
		let after = &after[2..];
		match expression_end(after) {
			Some(end) => {
				out.push_str(&rewrite_expression(&after[..end]));
				rest = &after[end..];
			}
			None => {
				out.push_str(after);
				return out;
			}
		}
	}
	push_literal(&mut out, rest);
	out
}

fn push_literal(out: &mut String, text: &str) {
	let mut rest = text;
	while let Some(start) = rest.find('{') {
		let (before, after) = rest.split_at(start);
		out.push_str(before);
		match after.as_bytes().get(1) {
			Some(b'%') => {
				out.push_str(r#"{{ "{%" }}"#);
				rest = &after[2..];
			}
			Some(b'#') => {
				out.push_str(r#"{{ "{#" }}"#);
				rest = &after[2..];
			}
			_ => {
				out.push('{');
				rest = &after[1..];
			}
		}
	}
	out.push_str(rest);
}

/// Offset of the closing `}}`, ignoring braces inside string literals.
fn expression_end(expr: &str) -> Option<usize> {
	let bytes = expr.as_bytes();
	let mut quote: Option<u8> = None;
	let mut i = 0;
	while i < bytes.len() {
		let b = bytes[i];
		match quote {
			Some(q) if b == b'\\' && q != b'`' => i += 1,
			Some(q) if b == q => quote = None,
			Some(_) => {}
			None if matches!(b, b'"' | b'\'' | b'`') => quote = Some(b),
			None if b == b'}' && bytes.get(i + 1) == Some(&b'}') => return Some(i),
			None => {}
		}
		i += 1;
	}
	None
}

fn rewrite_expression(expr: &str) -> String {
	let body = expr.trim_start_matches(|c: char| c == '-' || c.is_whitespace());
	let prefix = &expr[..expr.len() - body.len()];

	let ident_len = body
		.find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
		.unwrap_or(body.len());
	let ident = &body[..ident_len];
	if !HELPERS.contains(&ident) {
		return expr.to_string();
	}

	let mut cursor = &body[ident_len..];
	let mut args = Vec::new();
	loop {
		let trimmed = cursor.trim_start();
		if trimmed.len() == cursor.len() {
			break;
		}
		match take_string_literal(trimmed) {
			Some((literal, remaining)) => {
				args.push(literal);
				cursor = remaining;
			}
			None => break,
		}
	}

	if args.is_empty() {
		return expr.to_string();
	}
	format!("{prefix}{ident}({}){cursor}", args.join(", "))
}

/// Splits a leading `"..."` or `` `...` `` literal off `input`.
fn take_string_literal(input: &str) -> Option<(String, &str)> {
	if let Some(raw) = input.strip_prefix('`') {
		let end = raw.find('`')?;
		let literal = serde_json::to_string(&raw[..end]).ok()?;
		return Some((literal, &raw[end + 1..]));
	}

	let inner = input.strip_prefix('"')?;
	let bytes = inner.as_bytes();
	let mut i = 0;
	while i < bytes.len() {
		match bytes[i] {
			b'\\' => i += 2,
			b'"' => {
				let end = i + 2;
				return Some((input[..end].to_string(), &input[end..]));
			}
			_ => i += 1,
		}
	}
	None
}

/// Helpers resolving names against an applied snapshot.
pub struct SnapshotHelpers {
	snapshot: Arc<Snapshot>,
	runtime: Handle,
	full_chain_includes_issuer: bool,
}

impl SnapshotHelpers {
	pub fn new(snapshot: Arc<Snapshot>, runtime: Handle, full_chain_includes_issuer: bool) -> Self {
		Self {
			snapshot,
			runtime,
			full_chain_includes_issuer,
		}
	}
}

enum CaSecret {
	Public,
	Private,
}

enum CertificatePart {
	Certificate,
	Chain,
	FullChain,
	PrivateKey,
}

impl TemplateHelpers for SnapshotHelpers {
	fn kv_secret(&self, name: &str, field: &str) -> AgentResult<String> {
		let kv = self
			.snapshot
			.spec
			.kv_secret(name)
			.ok_or_else(|| AgentError::not_found("kv secret", name))?;
		let secret = self
			.runtime
			.block_on(self.snapshot.cache.read_kv(&kv.engine_path, &kv.secret_path))?;
		Ok(secret.field(field))
	}

	fn ca_field(&self, name: &str, field: &str) -> AgentResult<String> {
		let (which, kv_field) = match field {
			"certificate" => (CaSecret::Public, "certificate"),
			"cert_chain" => (CaSecret::Public, "certificate_chain"),
			"full_certificate_chain" | "full_cert_chain" => {
				(CaSecret::Public, "full_certificate_chain")
			}
			"issuer" => (CaSecret::Public, "issuer"),
			"serial_number" => (CaSecret::Public, "serial_number"),
			"private_key" => (CaSecret::Private, "private_key"),
			"private_key_type" => (CaSecret::Private, "private_key_type"),
			other => {
				return Err(AgentError::ConfigMalformed(format!(
					"unknown caField field {other:?}"
				)))
			}
		};

		let ca = self
			.snapshot
			.spec
			.certificate_authority(name)
			.ok_or_else(|| AgentError::not_found("certificate authority", name))?;
		let secret_path = match which {
			CaSecret::Public => &ca.kv_secrets.public_secret_path,
			CaSecret::Private => &ca.kv_secrets.private_secret_path,
		};
		let secret = self
			.runtime
			.block_on(self.snapshot.cache.read_kv(&ca.kv_secrets.engine_path, secret_path))?;
		Ok(secret.field(kv_field))
	}

	fn cert_field(&self, name: &str, field: &str) -> AgentResult<String> {
		let part = match field {
			"certificate" => CertificatePart::Certificate,
			"cert_chain" => CertificatePart::Chain,
			"full_certificate_chain" | "full_cert_chain" => CertificatePart::FullChain,
			"private_key" => CertificatePart::PrivateKey,
			other => {
				return Err(AgentError::ConfigMalformed(format!(
					"unknown certField field {other:?}"
				)))
			}
		};

		let spec = &self.snapshot.spec;
		let template = spec
			.certificate_template(name)
			.ok_or_else(|| AgentError::not_found("certificate template", name))?;
		let role = spec
			.certificate_role(&template.certificate_role)
			.ok_or_else(|| AgentError::not_found("certificate", &template.certificate_role))?;

		let options = IssueCertificateOptions {
			common_name: template.common_name.clone(),
			dns_sans: template.dns_sans.clone(),
			ip_sans: template.ip_sans.clone(),
			uri_sans: template.uri_sans.clone(),
			other_sans: template.other_sans.clone(),
			ttl: template.ttl(),
			exclude_cn_from_sans: template.exclude_cn_from_sans,
		};
		let certificate = self.runtime.block_on(self.snapshot.cache.issue_certificate(
			&role.engine_path,
			&role.role_name,
			&options,
		))?;

		Ok(match part {
			CertificatePart::Certificate => certificate.certificate,
			CertificatePart::Chain => certificate.chain(),
			CertificatePart::FullChain => {
				let chain = certificate.chain();
				let issuer = certificate.issuing_ca.trim();
				if self.full_chain_includes_issuer
					&& !issuer.is_empty()
					&& !certificate.ca_chain.iter().any(|ca| ca.trim() == issuer)
				{
					format!("{chain}\n{issuer}")
				} else {
					chain
				}
			}
			CertificatePart::PrivateKey => certificate.private_key,
		})
	}
}
