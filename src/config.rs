use crate::files::SymlinkPolicy;
use serde::Deserialize;
use serde_with::{serde_as, OneOrMany};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub roots: Roots,
    pub server: Server,
    pub auth: Auth,
    pub limits: Limits,
    pub logging: Logging,
}

#[serde_as]
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Roots {
    #[serde_as(as = "OneOrMany<_>")]
    pub allowed: Vec<PathBuf>,
    pub symlinks: SymlinkPolicy,
}
impl Default for Roots {
    fn default() -> Self {
        Self {
            allowed: vec![PathBuf::from("/data/sdd1"), PathBuf::from("/data/hdd1")],
            symlinks: SymlinkPolicy::Lexical,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Server {
    pub bind_addr: String,
    pub port: u16,
}
impl Default for Server {
    fn default() -> Self {
        Self { bind_addr: "0.0.0.0".to_string(), port: 8080 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Auth {
    pub username: String,
    pub password: String,
    pub username_file: Option<PathBuf>,
    pub password_file: Option<PathBuf>,
}
impl Default for Auth {
    fn default() -> Self {
        Self {
            username: "admin".to_string(),
            password: "changeme".to_string(),
            username_file: None,
            password_file: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Limits {
    pub max_upload_mb: usize,
    /// Cap on the source bytes read into one zip download.
    pub max_archive_mb: u64,
    pub requests_per_second: u32,
    pub burst: u32,
}
impl Default for Limits {
    fn default() -> Self {
        Self { max_upload_mb: 512, max_archive_mb: 1024, requests_per_second: 20, burst: 40 }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Logging {
    pub format: LogFormat,
    pub level: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self { format: LogFormat::Json, level: "info".to_string() }
    }
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)?;
        if path.extension().map(|e| e == "json").unwrap_or(false) {
            Ok(serde_json::from_str(&raw)?)
        } else {
            Ok(toml::from_str(&raw)?)
        }
    }

    /// Applies `ALLOWED_ROOTS`, `USERNAME[_FILE]` and `PASSWORD[_FILE]`.
    pub fn apply_env(&mut self) {
        self.apply_vars(|k| std::env::var(k).ok().filter(|v| !v.is_empty()));
    }

    pub(crate) fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(roots) = var("ALLOWED_ROOTS") {
            self.roots.allowed = parse_roots(&roots);
        }
        if let Some(u) = var("USERNAME") {
            self.auth.username = u;
        }
        if let Some(p) = var("PASSWORD") {
            self.auth.password = p;
        }
        if let Some(f) = var("USERNAME_FILE") {
            self.auth.username_file = Some(PathBuf::from(f));
        }
        if let Some(f) = var("PASSWORD_FILE") {
            self.auth.password_file = Some(PathBuf::from(f));
        }
        // Secret files win over inline values when readable.
        if let Some(u) = self.auth.username_file.as_deref().and_then(read_secret) {
            self.auth.username = u;
        }
        if let Some(p) = self.auth.password_file.as_deref().and_then(read_secret) {
            self.auth.password = p;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.roots.allowed.is_empty() {
            anyhow::bail!("no allowed roots configured");
        }
        for root in &self.roots.allowed {
            if !root.is_absolute() {
                anyhow::bail!("allowed root must be absolute: {}", root.display());
            }
            if !root.is_dir() {
                anyhow::bail!("allowed root does not exist or is not a directory: {}", root.display());
            }
        }
        if self.auth.username.trim().is_empty() { anyhow::bail!("username must not be empty"); }
        if self.auth.password.is_empty() { anyhow::bail!("password must not be empty"); }
        if self.limits.max_upload_mb == 0 { anyhow::bail!("max_upload_mb must be > 0"); }
        if self.limits.max_archive_mb == 0 { anyhow::bail!("max_archive_mb must be > 0"); }
        if self.limits.requests_per_second == 0 { anyhow::bail!("requests_per_second must be > 0"); }
        if self.limits.burst == 0 { anyhow::bail!("burst must be > 0"); }
        Ok(())
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.limits.max_upload_mb.saturating_mul(1024 * 1024)
    }

    pub fn max_archive_bytes(&self) -> u64 {
        self.limits.max_archive_mb.saturating_mul(1024 * 1024)
    }
}

pub(crate) fn parse_roots(raw: &str) -> Vec<PathBuf> {
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .collect()
}

fn read_secret(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}
