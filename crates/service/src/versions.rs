//! Component version registry.
//!
//! Seeded once at startup with Rollar's own versions and facts about the host,
//! then kept fresh by a scheduled call to the application's versions endpoint.

use std::sync::Arc;

use common::api::ApiClient;
use common::env::{self, OsFamily};
use common::ROLLAR_VERSION;
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::scheduler::{JobHandle, Scheduler};

/// Endpoint that makes the web API re-check online versions.
pub const REFRESH_PATH: &str = "/api/versions?method=check";

/// Oldest compiler release the project supports.
pub const MIN_RUST_VERSION: (u64, u64) = (1, 75);

/// `rustc --version` output captured at build time.
pub const RUSTC_VERSION: &str = env!("ROLLAR_RUSTC_VERSION");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Core,
    Environment,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionEntry {
    pub name: String,
    pub version: String,
    pub category: Category,
}

/// Facts about the running host.
#[derive(Debug, Clone)]
pub struct EnvironmentFacts {
    pub rustc: String,
    pub os: OsFamily,
    pub elevated: bool,
    pub docker: bool,
}

impl EnvironmentFacts {
    pub fn detect() -> Self {
        Self {
            rustc: RUSTC_VERSION.to_string(),
            os: OsFamily::current(),
            elevated: env::is_elevated(),
            docker: env::is_docker(),
        }
    }

    /// Semantic version out of `rustc 1.82.0 (f6e511eec 2024-10-15)`.
    pub fn rust_version(&self) -> Option<semver::Version> {
        let token = self.rustc.split_whitespace().find(|t| t.starts_with(|c: char| c.is_ascii_digit()))?;
        semver::Version::parse(token).ok()
    }

    /// Operator-facing warnings for this host. An unparsable compiler version
    /// is not reported.
    pub fn warnings(&self) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(v) = self.rust_version() {
            if (v.major, v.minor) < MIN_RUST_VERSION {
                out.push(format!(
                    "Rollar requires Rust {}.{}+; built with {}. Do NOT expect support for older toolchains.",
                    MIN_RUST_VERSION.0, MIN_RUST_VERSION.1, v
                ));
            }
        }
        match self.os {
            OsFamily::Linux | OsFamily::MacOs if self.elevated => {
                out.push("Do not run Rollar with root privileges.".to_string())
            }
            OsFamily::Windows if self.elevated => out.push("Do not run Rollar as Administrator.".to_string()),
            OsFamily::Other => out.push("Uncommon Operating System, use at your own risk.".to_string()),
            _ => {}
        }
        out
    }
}

#[derive(Clone)]
pub struct VersionRegistry {
    entries: Arc<DashMap<String, VersionEntry>>,
    web_version: String,
}

impl VersionRegistry {
    /// Empty registry; `web_version` is the paired front-end's version.
    pub fn new(web_version: impl Into<String>) -> Self {
        Self { entries: Arc::new(DashMap::new()), web_version: web_version.into() }
    }

    /// Registry seeded with core versions and detected environment facts.
    pub fn bootstrap(web_version: impl Into<String>) -> Self {
        let registry = Self::new(web_version);
        registry.register_core_versions();
        registry.register_environment_facts();
        registry
    }

    /// Insert or replace the entry for `name`.
    pub fn register_version(&self, name: &str, version: &str, category: Category) {
        debug!(?category, %name, %version, "registering version");
        self.entries.insert(
            name.to_string(),
            VersionEntry { name: name.to_string(), version: version.to_string(), category },
        );
    }

    pub fn register_core_versions(&self) {
        self.register_version("Rollar", ROLLAR_VERSION, Category::Core);
        self.register_version("Rollar_web", &self.web_version, Category::Core);
    }

    pub fn register_environment_facts(&self) {
        self.register_environment(&EnvironmentFacts::detect());
    }

    pub fn register_environment(&self, facts: &EnvironmentFacts) {
        self.register_version("Rust", &facts.rustc, Category::Environment);
        self.register_version("Operating System", facts.os.name(), Category::Environment);
        self.register_version("Docker", if facts.docker { "true" } else { "false" }, Category::Environment);
        for w in facts.warnings() {
            warn!("{w}");
        }
    }

    /// Register the periodic refresh. Each run dispatches a GET to
    /// [`REFRESH_PATH`] on the async runtime and returns at once; the
    /// response is not read back into the registry.
    pub fn schedule_refresh(&self, scheduler: &Scheduler, api: ApiClient) -> JobHandle {
        let handle = scheduler
            .every(2)
            .to(3)
            .hours()
            .name("versions-refresh")
            .schedule(move || {
                api.spawn_get(REFRESH_PATH);
                Ok(())
            });
        info!(job = handle.id(), path = REFRESH_PATH, "version refresh scheduled");
        handle
    }

    pub fn get(&self, name: &str) -> Option<VersionEntry> {
        self.entries.get(name).map(|e| e.value().clone())
    }

    /// All entries sorted by name.
    pub fn list(&self) -> Vec<VersionEntry> {
        let mut all: Vec<_> = self.entries.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
