//! Package resolution against the public npm and PyPI registries, plus the
//! quality gate that keeps drive-by packages from being spawned.
//!
//! Both registries are probed with short timeouts; verdicts are cached for
//! the process lifetime so the POST ingress path stays cheap.

mod quality;

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Context as _;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info};
use url::Url;

use hatchway_core::{Ecosystem, GatewayError, is_remote_url, parse_package};

pub use quality::QualityGateConfig;

#[derive(Debug, Clone)]
pub struct RegistryOptions {
    pub npm_base: Url,
    pub npm_downloads_base: Url,
    pub pypi_base: Url,
    pub probe_timeout: Duration,
    pub quality: QualityGateConfig,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            npm_base: Url::parse("https://registry.npmjs.org").expect("static url"),
            npm_downloads_base: Url::parse("https://api.npmjs.org").expect("static url"),
            pypi_base: Url::parse("https://pypi.org").expect("static url"),
            probe_timeout: Duration::from_secs(5),
            quality: QualityGateConfig::default(),
        }
    }
}

/// Outcome of resolving a package name against the registries.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub ecosystem: Ecosystem,
    /// Raw registry metadata; empty object for npm (the probe only needs the
    /// status), the `/pypi/{name}/json` document for PyPI.
    pub metadata: Value,
}

/// Cached admissibility verdict. Entries live for the process lifetime.
#[derive(Debug, Clone)]
enum Verdict {
    Admitted { ecosystem: Ecosystem },
    NotFound,
    Rejected { reason: String },
}

pub struct RegistryClient {
    http: reqwest::Client,
    opts: RegistryOptions,
    cache: RwLock<HashMap<String, Verdict>>,
}

impl RegistryClient {
    pub fn new(opts: RegistryOptions) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(opts.probe_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("build registry http client")?;
        Ok(Self {
            http,
            opts,
            cache: RwLock::new(HashMap::new()),
        })
    }

    /// Resolve and quality-gate a package identifier, consulting the verdict
    /// cache first. Returns the ecosystem on admission.
    pub async fn admit(&self, identifier: &str) -> Result<Ecosystem, GatewayError> {
        if is_remote_url(identifier) {
            return Err(GatewayError::RemoteServerNotSupported);
        }

        let full_name = parse_package(identifier).full_name;

        if let Some(verdict) = self.cache.read().get(&full_name) {
            return match verdict {
                Verdict::Admitted { ecosystem } => Ok(*ecosystem),
                Verdict::NotFound => Err(GatewayError::PackageNotFound(full_name)),
                Verdict::Rejected { reason } => {
                    Err(GatewayError::QualityCheckFailed(reason.clone()))
                }
            };
        }

        let resolution = match self.resolve(identifier).await {
            Ok(r) => r,
            Err(err @ GatewayError::PackageNotFound(_)) => {
                self.cache
                    .write()
                    .insert(full_name.clone(), Verdict::NotFound);
                return Err(err);
            }
            Err(other) => return Err(other),
        };

        match self.quality_gate(&full_name, &resolution).await {
            Ok(()) => {
                info!(package = %full_name, ecosystem = %resolution.ecosystem, "package admitted");
                self.cache.write().insert(
                    full_name,
                    Verdict::Admitted {
                        ecosystem: resolution.ecosystem,
                    },
                );
                Ok(resolution.ecosystem)
            }
            Err(reason) => {
                info!(package = %full_name, reason = %reason, "package rejected by quality gate");
                self.cache.write().insert(
                    full_name,
                    Verdict::Rejected {
                        reason: reason.clone(),
                    },
                );
                Err(GatewayError::QualityCheckFailed(reason))
            }
        }
    }

    /// Identify the ecosystem by probing npm first, then PyPI.
    pub async fn resolve(&self, identifier: &str) -> Result<Resolution, GatewayError> {
        if is_remote_url(identifier) {
            return Err(GatewayError::RemoteServerNotSupported);
        }

        let full_name = parse_package(identifier).full_name;

        if self.probe_npm(&full_name).await {
            return Ok(Resolution {
                ecosystem: Ecosystem::Node,
                metadata: Value::Object(Default::default()),
            });
        }

        if let Some(metadata) = self.probe_pypi(&full_name).await {
            return Ok(Resolution {
                ecosystem: Ecosystem::Python,
                metadata,
            });
        }

        Err(GatewayError::PackageNotFound(full_name))
    }

    /// Apply the cheap admissibility heuristics. `Err` carries the reason.
    pub async fn quality_gate(&self, full_name: &str, resolution: &Resolution) -> Result<(), String> {
        match resolution.ecosystem {
            Ecosystem::Node => {
                let downloads = self.npm_monthly_downloads(full_name).await;
                quality::check_npm(&self.opts.quality, downloads)
            }
            Ecosystem::Python => quality::check_pypi(&self.opts.quality, &resolution.metadata),
        }
    }

    /// Drop every cached verdict.
    pub fn flush(&self) {
        self.cache.write().clear();
    }

    async fn probe_npm(&self, full_name: &str) -> bool {
        // Scoped names keep their `@` but the inner slash must be escaped.
        let url = format!(
            "{}/{}",
            self.opts.npm_base.as_str().trim_end_matches('/'),
            full_name.replace('/', "%2F")
        );
        match self.http.get(&url).send().await {
            Ok(resp) => {
                debug!(package = %full_name, status = %resp.status(), "npm probe");
                resp.status().is_success()
            }
            Err(err) => {
                debug!(package = %full_name, error = %err, "npm probe failed");
                false
            }
        }
    }

    async fn probe_pypi(&self, full_name: &str) -> Option<Value> {
        let url = format!(
            "{}/pypi/{}/json",
            self.opts.pypi_base.as_str().trim_end_matches('/'),
            full_name
        );
        match self.http.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!(package = %full_name, "pypi probe hit");
                resp.json::<Value>().await.ok()
            }
            Ok(resp) => {
                debug!(package = %full_name, status = %resp.status(), "pypi probe miss");
                None
            }
            Err(err) => {
                debug!(package = %full_name, error = %err, "pypi probe failed");
                None
            }
        }
    }

    async fn npm_monthly_downloads(&self, full_name: &str) -> Option<u64> {
        let url = format!(
            "{}/downloads/point/last-month/{}",
            self.opts.npm_downloads_base.as_str().trim_end_matches('/'),
            full_name
        );
        let resp = self.http.get(&url).send().await.ok()?;
        if !resp.status().is_success() {
            return None;
        }
        let body = resp.json::<Value>().await.ok()?;
        body.get("downloads").and_then(Value::as_u64)
    }
}
