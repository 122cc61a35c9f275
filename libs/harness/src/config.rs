//! Harness configuration.
//!
//! Layers, lowest first:
//! - built-in defaults
//! - an optional TOML file
//! - environment variables `VERITY__<SECTION>__<KEY>` (e.g.
//!   `VERITY__WAITS__POLL_INTERVAL_SECS=10`)

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use tracing::debug;
use verity_poll::PollPolicy;

use crate::cloud::Credentials;
use crate::error::{HarnessError, Result};
use crate::gates::GateTable;
use crate::orchestrator::{JujuCli, JujuVersion};
use crate::release::Release;
use crate::session::{PrincipalSpec, SessionSettings};

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "VERITY";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub orchestrator: OrchestratorSettings,
    pub deploy: DeploySettings,
    pub waits: WaitSettings,
    /// Series/OpenStack pair under test.
    pub release: Release,
    /// Admin credentials.
    pub credentials: Credentials,
    pub identity: IdentitySettings,
    /// Synthetic principal created for scoped checks.
    pub principal: PrincipalSpec,
    pub gates: GateTable,
    pub run: RunSettings,
    pub image: ImageSettings,
    pub volume: VolumeSettings,
}

/// Which orchestrator backend to drive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Juju,
    Simulated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    pub backend: Backend,
    /// Path to the `juju` binary.
    pub juju_binary: PathBuf,
    /// Model to target; the current model when unset.
    pub model: Option<String>,
    /// Major client version (2 or 3).
    pub juju_version: u8,
    pub command_timeout_secs: u64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            backend: Backend::Juju,
            juju_binary: PathBuf::from("juju"),
            model: None,
            juju_version: 3,
            command_timeout_secs: 600,
        }
    }
}

impl OrchestratorSettings {
    pub fn juju_cli(&self) -> JujuCli {
        let cli = JujuCli::new(&self.juju_binary)
            .with_version(JujuVersion::from_major(self.juju_version))
            .with_timeout(Duration::from_secs(self.command_timeout_secs));
        match &self.model {
            Some(model) => cli.with_model(model),
            None => cli,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploySettings {
    /// Topology file; the bundled scenario topology when unset.
    pub topology: Option<PathBuf>,
    /// Require idle agents for steady state.
    pub require_idle: bool,
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            topology: None,
            require_idle: true,
        }
    }
}

/// Wait budgets. Every wait polls at `poll_interval_secs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitSettings {
    pub poll_interval_secs: u64,
    pub convergence_timeout_secs: u64,
    pub relation_timeout_secs: u64,
    pub action_timeout_secs: u64,
    pub file_timeout_secs: u64,
    pub resource_timeout_secs: u64,
}

impl Default for WaitSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            convergence_timeout_secs: 1800,
            relation_timeout_secs: 60,
            action_timeout_secs: 300,
            file_timeout_secs: 300,
            resource_timeout_secs: 300,
        }
    }
}

impl WaitSettings {
    fn policy(&self, timeout_secs: u64) -> PollPolicy {
        PollPolicy::within(
            Duration::from_secs(timeout_secs),
            Duration::from_secs(self.poll_interval_secs),
        )
    }

    pub fn convergence(&self) -> PollPolicy {
        self.policy(self.convergence_timeout_secs)
    }

    pub fn relation(&self) -> PollPolicy {
        self.policy(self.relation_timeout_secs)
    }

    pub fn action(&self) -> PollPolicy {
        self.policy(self.action_timeout_secs)
    }

    pub fn file(&self) -> PollPolicy {
        self.policy(self.file_timeout_secs)
    }

    pub fn resource(&self) -> PollPolicy {
        self.policy(self.resource_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentitySettings {
    /// Explicit identity endpoint; derived from the identity unit when unset.
    pub url: Option<String>,
    /// Service whose first unit serves identity.
    pub service: String,
    pub port: u16,
}

impl Default for IdentitySettings {
    fn default() -> Self {
        Self {
            url: None,
            service: "keystone".to_string(),
            port: 5000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    /// Run every check instead of stopping at the first failure.
    pub keep_going: bool,
    /// Remove the deployed services once the run is over.
    pub teardown: bool,
}

/// Image used by the image pool sample check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageSettings {
    pub name: String,
    /// Local image file to upload; synthetic bytes when unset.
    pub path: Option<PathBuf>,
    /// Size of the synthetic payload.
    pub synthetic_size_kb: u64,
    pub disk_format: String,
    pub container_format: String,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            name: "cirros-image-1".to_string(),
            path: None,
            synthetic_size_kb: 1024,
            disk_format: "qcow2".to_string(),
            container_format: "bare".to_string(),
        }
    }
}

impl ImageSettings {
    /// Bytes to upload.
    pub async fn payload(&self) -> Result<Vec<u8>> {
        match &self.path {
            Some(path) => tokio::fs::read(path)
                .await
                .map_err(|e| HarnessError::Config(format!("cannot read image {}: {}", path.display(), e))),
            None => {
                let len = self
                    .synthetic_size_kb
                    .checked_mul(1024)
                    .and_then(|bytes| usize::try_from(bytes).ok())
                    .ok_or_else(|| {
                        HarnessError::Config(format!(
                            "synthetic image size {} KiB is too large",
                            self.synthetic_size_kb
                        ))
                    })?;
                Ok((0..len).map(|i| (i % 251) as u8).collect())
            }
        }
    }
}

/// Volume used by the volume pool sample check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeSettings {
    pub name: String,
    pub size_gb: u32,
}

impl Default for VolumeSettings {
    fn default() -> Self {
        Self {
            name: "demo-vol".to_string(),
            size_gb: 1,
        }
    }
}

impl HarnessConfig {
    /// Load defaults, then `path` (if given), then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, Environment::with_prefix(ENV_PREFIX))
    }

    fn load_with(path: Option<&Path>, environment: Environment) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            debug!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }
        builder = builder.add_source(
            environment
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: HarnessConfig = builder.build()?.try_deserialize()?;
        if config.waits.poll_interval_secs == 0 {
            return Err(HarnessError::Config(
                "waits.poll_interval_secs must be at least 1".to_string(),
            ));
        }
        Ok(config)
    }

    /// Settings for the admin session.
    pub fn session(&self) -> SessionSettings {
        SessionSettings {
            identity_url: self.identity.url.clone(),
            identity_service: self.identity.service.clone(),
            identity_port: self.identity.port,
            admin: self.credentials.clone(),
            resource_wait: self.waits.resource(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;
    use crate::gates::ENCRYPTION_CHECK;

    fn env(vars: &[(&str, &str)]) -> Environment {
        let source: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Environment::with_prefix(ENV_PREFIX).source(Some(source.into_iter().collect()))
    }

    #[test]
    fn test_defaults() {
        let config = HarnessConfig::load_with(None, env(&[])).unwrap();
        assert_eq!(config, HarnessConfig::default());
        assert_eq!(config.credentials.username, "admin");
        assert_eq!(config.identity.port, 5000);
        assert!(config.gates.skip_reason(ENCRYPTION_CHECK, Release::BionicStein).is_some());
        assert_eq!(config.waits.relation().interval, Duration::from_secs(5));
        assert_eq!(config.waits.relation().attempts(), 13);
    }

    #[test]
    fn test_file_then_environment() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
release = "trusty-liberty"

[orchestrator]
backend = "simulated"
model = "ceph-osd"

[waits]
poll_interval_secs = 2

[credentials]
password = "hunter2"

[[gates]]
check = "ceph processes"
skip_from = "bionic-rocky"
reason = "not applicable"
"#
        )
        .unwrap();

        let config = HarnessConfig::load_with(
            Some(file.path()),
            env(&[("VERITY__WAITS__POLL_INTERVAL_SECS", "3"), ("VERITY__RUN__KEEP_GOING", "true")]),
        )
        .unwrap();

        assert_eq!(config.release, Release::TrustyLiberty);
        assert_eq!(config.orchestrator.backend, Backend::Simulated);
        assert_eq!(config.orchestrator.model.as_deref(), Some("ceph-osd"));
        assert_eq!(config.waits.poll_interval_secs, 3);
        assert!(config.run.keep_going);
        assert_eq!(config.credentials.password, "hunter2");
        assert_eq!(config.credentials.username, "admin");
        assert_eq!(config.gates.gates().len(), 1);
        assert_eq!(config.session().admin.password, "hunter2");
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let err = HarnessConfig::load_with(None, env(&[("VERITY__WAITS__POLL_INTERVAL_SECS", "0")]))
            .unwrap_err();
        assert!(matches!(err, HarnessError::Config(_)));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = HarnessConfig::load_with(Some(Path::new("/nonexistent/verity.toml")), env(&[]))
            .unwrap_err();
        assert!(matches!(err, HarnessError::Config(_)));
    }

    #[tokio::test]
    async fn test_synthetic_image_payload() {
        let settings = ImageSettings {
            synthetic_size_kb: 2,
            ..ImageSettings::default()
        };
        assert_eq!(settings.payload().await.unwrap().len(), 2048);

        let huge = ImageSettings {
            synthetic_size_kb: u64::MAX,
            ..ImageSettings::default()
        };
        let err = huge.payload().await.unwrap_err();
        assert!(matches!(err, HarnessError::Config(ref m) if m.contains("too large")));
    }
}
