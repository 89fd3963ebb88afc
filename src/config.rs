use anyhow::{Context, Result};
use chrono::TimeDelta;
use provisioner::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use vaultkit::RotationSettings;
use vaultkit::naming::{EnvironmentReference, ServiceReference};

/// Get the config directory path
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".config").join("infrakit"))
}

/// Manifest path from the command line, or the default location
pub fn manifest_path(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) => {
            let expanded = shellexpand::tilde(&path.to_string_lossy()).into_owned();
            Ok(PathBuf::from(expanded))
        }
        None => Ok(config_dir()?.join("infrakit.toml")),
    }
}

// ============================================================================
// Manifest
// ============================================================================

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(default)]
    pub vault: VaultSection,
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub groups: Vec<GroupSpec>,
    #[serde(default)]
    pub certificates: Option<CertificateSection>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VaultSection {
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineSection {
    #[serde(default = "default_health_check_attempts")]
    pub health_check_attempts: u32,
    #[serde(default = "default_health_check_wait_secs")]
    pub health_check_wait_secs: u64,
}

fn default_health_check_attempts() -> u32 {
    15
}

fn default_health_check_wait_secs() -> u64 {
    5
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            health_check_attempts: default_health_check_attempts(),
            health_check_wait_secs: default_health_check_wait_secs(),
        }
    }
}

/// One resource group; mounts are added before policies
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupSpec {
    pub name: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub mounts: Vec<MountSpec>,
    #[serde(default)]
    pub policies: Vec<PolicySpec>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MountSpec {
    pub path: String,
    #[serde(rename = "type")]
    pub engine_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    /// References like `mount:kv` or `policy:reader`
    #[serde(default)]
    pub parents: Vec<String>,
    /// Gate dependent groups on Vault being healthy
    #[serde(default)]
    pub health_check: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicySpec {
    pub name: String,
    #[serde(default)]
    pub rules: Vec<RuleSpec>,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub health_check: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleSpec {
    pub path: String,
    pub capabilities: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CertificateSection {
    pub cloud: String,
    pub environment: String,
    #[serde(default = "default_min_lifetime_hours")]
    pub min_lifetime_hours: i64,
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
}

fn default_min_lifetime_hours() -> i64 {
    2
}

fn default_check_interval_secs() -> u64 {
    5
}

impl CertificateSection {
    pub fn environment_reference(&self) -> EnvironmentReference {
        EnvironmentReference::new(&self.cloud, &self.environment)
    }

    pub fn service(&self, service: &str) -> ServiceReference {
        self.environment_reference().service(service)
    }

    pub fn rotation_settings(&self) -> RotationSettings {
        RotationSettings {
            min_lifetime: TimeDelta::hours(self.min_lifetime_hours),
            check_interval: Duration::from_secs(self.check_interval_secs),
        }
    }
}

impl Manifest {
    /// Load and parse a manifest file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid manifest {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Vault address from the manifest, falling back to `fallback`
    pub fn vault_address(&self, fallback: Option<&str>) -> Option<String> {
        self.vault
            .address
            .clone()
            .or_else(|| fallback.map(ToString::to_string))
    }

    pub fn health_check_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.engine.health_check_attempts,
            Duration::from_secs(self.engine.health_check_wait_secs),
        )
    }

    pub fn certificates(&self) -> Result<&CertificateSection> {
        self.certificates
            .as_ref()
            .context("Manifest has no [certificates] section")
    }
}

// ============================================================================
// Tests
// ============================================================================
