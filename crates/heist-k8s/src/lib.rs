// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Cluster access for the heist sidecar agent.
//!
//! This crate provides:
//! - The [`VaultClientConfig`] custom resource the agent consumes
//! - The [`ClientConfigSource`] abstraction over get/watch of that resource
//! - [`KubeConfigSource`], the production implementation using kube-rs

pub mod crd;
pub mod error;
pub mod kube_source;
pub mod source;

pub use crd::{
	AgentTemplates, CertificateAuthorityKvSecrets, CertificateAuthorityRef, CertificateRoleRef,
	CertificateTemplate, KvSecretRef, TransitKeyRef, ValueTemplate, VaultClientConfig,
	VaultClientConfigSpec,
};
pub use error::{K8sError, K8sResult};
pub use kube_source::{build_client, KubeConfigSource};
pub use source::{ClientConfigSource, ConfigEvent, ConfigEventStream};
