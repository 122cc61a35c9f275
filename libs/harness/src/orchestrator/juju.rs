//! Orchestrator backed by the `juju` command-line client.
//!
//! Every operation spawns the binary with a per-command timeout and parses
//! its JSON output. Unit-side operations (`stat`, file reads, relation data)
//! are shell commands executed on the unit.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info, warn};
use verity_topology::{ConfigOverlay, Endpoint, RelationSpec, ServiceSpec};

use super::{
    ActionId, ActionOutcome, ActionParams, ActionState, CommandOutput, FileStat, ModelStatus,
    Orchestrator, OrchestratorError, UnitStatus, WorkloadState,
};

/// Default per-command timeout.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

static ACTION_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:id:\s*"?|with task\s+)([0-9a-f][0-9a-f-]*)"#).expect("valid action id pattern")
});

/// Major client version; verbs differ between the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JujuVersion {
    Two,
    #[default]
    Three,
}

impl JujuVersion {
    /// Map a major version number, treating anything newer than 2 as 3.
    pub fn from_major(major: u8) -> Self {
        if major <= 2 {
            Self::Two
        } else {
            Self::Three
        }
    }

    fn exec_verb(&self) -> &'static str {
        match self {
            Self::Two => "run",
            Self::Three => "exec",
        }
    }

    fn relate_verb(&self) -> &'static str {
        match self {
            Self::Two => "add-relation",
            Self::Three => "integrate",
        }
    }
}

/// `juju` CLI client.
#[derive(Debug, Clone)]
pub struct JujuCli {
    binary: PathBuf,
    model: Option<String>,
    version: JujuVersion,
    timeout: Duration,
}

impl JujuCli {
    /// Create a client for the binary at `binary` (looked up on `PATH` if relative).
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            model: None,
            version: JujuVersion::default(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Target a specific model instead of the current one.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_version(mut self, version: JujuVersion) -> Self {
        self.version = version;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run a juju subcommand, returning its output whatever the exit code.
    async fn juju(&self, subcommand: &str, args: &[String]) -> Result<CommandOutput, OrchestratorError> {
        let mut full_args = vec![subcommand.to_string()];
        if let Some(model) = &self.model {
            full_args.push("-m".to_string());
            full_args.push(model.clone());
        }
        full_args.extend(args.iter().cloned());

        let rendered = format!("juju {}", full_args.join(" "));
        debug!(command = %rendered, "Running orchestrator command");

        let child = Command::new(&self.binary)
            .args(&full_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| OrchestratorError::Spawn {
                program: self.binary.display().to_string(),
                source,
            })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| OrchestratorError::Timeout {
                command: rendered.clone(),
                timeout: self.timeout,
            })?
            .map_err(|source| OrchestratorError::Spawn {
                program: self.binary.display().to_string(),
                source,
            })?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            code: output.status.code().unwrap_or(-1),
        })
    }

    /// Run a juju subcommand that must succeed, returning stdout.
    async fn juju_ok(&self, subcommand: &str, args: &[String]) -> Result<String, OrchestratorError> {
        let output = self.juju(subcommand, args).await?;
        if !output.success() {
            return Err(OrchestratorError::CommandFailed {
                command: format!("juju {} {}", subcommand, args.join(" ")),
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output.stdout)
    }

    /// Run on a unit and require success.
    async fn unit_ok(&self, unit: &str, command: &str) -> Result<String, OrchestratorError> {
        let output = self.run(unit, command).await?;
        if !output.success() {
            return Err(OrchestratorError::CommandFailed {
                command: format!("{} on {}", command, unit),
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl Orchestrator for JujuCli {
    async fn deploy(&self, spec: &ServiceSpec) -> Result<(), OrchestratorError> {
        let mut args = vec![spec.charm.clone(), spec.name.clone()];
        // Subordinate charms refuse an explicit unit count.
        if spec.units > 1 {
            args.push("-n".to_string());
            args.push(spec.units.to_string());
        }
        for (name, storage) in &spec.storage {
            args.push("--storage".to_string());
            args.push(format!("{}={}", name, storage));
        }
        for assignment in spec.config.assignments() {
            args.push("--config".to_string());
            args.push(assignment);
        }

        info!(service = %spec.name, charm = %spec.charm, units = spec.units, "Deploying service");
        self.juju_ok("deploy", &args).await?;
        Ok(())
    }

    async fn relate(&self, relation: &RelationSpec) -> Result<(), OrchestratorError> {
        let (a, b) = relation.endpoints();
        let args = vec![a.to_string(), b.to_string()];
        let output = self.juju(self.version.relate_verb(), &args).await?;

        if output.success() {
            info!(relation = %relation, "Related endpoints");
            return Ok(());
        }
        if output.stderr.contains("already exists") {
            debug!(relation = %relation, "Relation already present");
            return Ok(());
        }
        Err(OrchestratorError::CommandFailed {
            command: format!("juju {} {} {}", self.version.relate_verb(), a, b),
            code: output.code,
            stderr: output.stderr.trim().to_string(),
        })
    }

    async fn configure(&self, service: &str, overlay: &ConfigOverlay) -> Result<(), OrchestratorError> {
        if overlay.is_empty() {
            return Ok(());
        }
        let mut args = vec![service.to_string()];
        args.extend(overlay.assignments());

        info!(service, keys = overlay.len(), "Applying configuration");
        self.juju_ok("config", &args).await?;
        Ok(())
    }

    async fn status(&self) -> Result<ModelStatus, OrchestratorError> {
        let stdout = self.juju_ok("status", &["--format=json".to_string()]).await?;
        parse_status(&stdout)
    }

    async fn run(&self, unit: &str, command: &str) -> Result<CommandOutput, OrchestratorError> {
        let args = vec![
            "--unit".to_string(),
            unit.to_string(),
            "--".to_string(),
            command.to_string(),
        ];
        self.juju(self.version.exec_verb(), &args).await
    }

    async fn relation_data(
        &self,
        unit: &str,
        endpoint: &str,
        remote: &Endpoint,
    ) -> Result<Option<BTreeMap<String, String>>, OrchestratorError> {
        let ids = self.unit_ok(unit, &format!("relation-ids {}", endpoint)).await?;
        let remote_prefix = format!("{}/", remote.service());

        for rid in ids.split_whitespace() {
            let members = self.unit_ok(unit, &format!("relation-list -r {}", rid)).await?;
            if !members.split_whitespace().any(|m| m.starts_with(&remote_prefix)) {
                continue;
            }

            let command = format!("relation-get --format=json -r {} - {}", rid, unit);
            let raw = self.unit_ok(unit, &command).await?;
            return parse_relation_settings(&command, &raw).map(Some);
        }

        debug!(unit, endpoint, remote = %remote, "No matching relation yet");
        Ok(None)
    }

    async fn enqueue_action(
        &self,
        unit: &str,
        action: &str,
        params: &ActionParams,
    ) -> Result<ActionId, OrchestratorError> {
        let mut args = vec![unit.to_string(), action.to_string()];
        let subcommand = match self.version {
            JujuVersion::Two => "run-action",
            JujuVersion::Three => {
                args.push("--background".to_string());
                "run"
            }
        };
        args.extend(render_params(params));

        let stdout = self.juju_ok(subcommand, &args).await?;
        let id = parse_action_id(&stdout).ok_or_else(|| OrchestratorError::Parse {
            command: format!("juju {} {} {}", subcommand, unit, action),
            reason: format!("no action id in '{}'", stdout.trim()),
        })?;

        info!(unit, action, action_id = %id, "Enqueued action");
        Ok(id)
    }

    async fn action_outcome(&self, id: &ActionId) -> Result<ActionOutcome, OrchestratorError> {
        let subcommand = match self.version {
            JujuVersion::Two => "show-action-output",
            JujuVersion::Three => "show-task",
        };
        let stdout = self
            .juju_ok(subcommand, &[id.to_string(), "--format=json".to_string()])
            .await?;
        parse_action_outcome(id, &stdout)
    }

    async fn stat(&self, unit: &str, path: &str) -> Result<Option<FileStat>, OrchestratorError> {
        let command = format!("stat -c '%s %Y %F' {}", shell_quote(path));
        let output = self.run(unit, &command).await?;
        if !output.success() {
            return Ok(None);
        }
        parse_stat(&output.stdout)
            .map(Some)
            .ok_or_else(|| OrchestratorError::Parse {
                command,
                reason: format!("cannot parse '{}'", output.stdout.trim()),
            })
    }

    async fn read_file(&self, unit: &str, path: &str) -> Result<Option<String>, OrchestratorError> {
        let output = self.run(unit, &format!("cat {}", shell_quote(path))).await?;
        if output.success() {
            Ok(Some(output.stdout))
        } else {
            Ok(None)
        }
    }

    async fn remove(&self, service: &str) -> Result<(), OrchestratorError> {
        let mut args = vec![service.to_string()];
        if self.version == JujuVersion::Three {
            args.push("--no-prompt".to_string());
        }
        warn!(service, "Removing service");
        self.juju_ok("remove-application", &args).await?;
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawStatus {
    #[serde(default)]
    applications: BTreeMap<String, RawApplication>,
}

#[derive(Debug, Default, Deserialize)]
struct RawApplication {
    #[serde(default)]
    units: BTreeMap<String, RawUnit>,
}

#[derive(Debug, Default, Deserialize)]
struct RawUnit {
    #[serde(rename = "workload-status", default)]
    workload_status: RawStatusField,

    #[serde(rename = "juju-status", default)]
    juju_status: RawStatusField,

    #[serde(rename = "public-address", default)]
    public_address: Option<String>,

    #[serde(default)]
    leader: bool,

    #[serde(default)]
    subordinates: BTreeMap<String, RawUnit>,
}

#[derive(Debug, Default, Deserialize)]
struct RawStatusField {
    #[serde(default)]
    current: Option<String>,

    #[serde(default)]
    message: Option<String>,
}

fn to_unit_status(raw: &RawUnit, fallback_address: Option<&String>) -> UnitStatus {
    UnitStatus {
        workload: raw
            .workload_status
            .current
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(WorkloadState::Unknown),
        message: raw.workload_status.message.clone().unwrap_or_default(),
        agent_idle: raw.juju_status.current.as_deref() == Some("idle"),
        public_address: raw.public_address.clone().or_else(|| fallback_address.cloned()),
        leader: raw.leader,
    }
}

/// Parse `juju status --format=json`.
///
/// Subordinate units are listed under their principal; they are filed under
/// their own application here.
fn parse_status(json: &str) -> Result<ModelStatus, OrchestratorError> {
    let raw: RawStatus = serde_json::from_str(json).map_err(|e| OrchestratorError::Parse {
        command: "juju status".to_string(),
        reason: e.to_string(),
    })?;

    let mut model = ModelStatus::default();
    for name in raw.applications.keys() {
        model.services.entry(name.clone()).or_default();
    }

    for (app, application) in &raw.applications {
        for (unit_name, unit) in &application.units {
            model
                .services
                .entry(app.clone())
                .or_default()
                .insert(unit_name.clone(), to_unit_status(unit, None));

            for (sub_name, sub) in &unit.subordinates {
                let sub_app = sub_name.split('/').next().unwrap_or(sub_name).to_string();
                model
                    .services
                    .entry(sub_app)
                    .or_default()
                    .insert(sub_name.clone(), to_unit_status(sub, unit.public_address.as_ref()));
            }
        }
    }

    Ok(model)
}

fn parse_relation_settings(
    command: &str,
    raw: &str,
) -> Result<BTreeMap<String, String>, OrchestratorError> {
    let values: BTreeMap<String, serde_json::Value> =
        serde_json::from_str(raw.trim()).map_err(|e| OrchestratorError::Parse {
            command: command.to_string(),
            reason: e.to_string(),
        })?;

    Ok(values
        .into_iter()
        .map(|(k, v)| {
            let v = match v {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            (k, v)
        })
        .collect())
}

fn parse_action_id(stdout: &str) -> Option<ActionId> {
    ACTION_ID
        .captures(stdout)
        .and_then(|caps| caps.get(1))
        .map(|m| ActionId::new(m.as_str()))
}

#[derive(Debug, Deserialize)]
struct RawActionOutput {
    #[serde(default)]
    status: Option<String>,

    #[serde(default)]
    message: Option<String>,

    #[serde(default)]
    results: serde_json::Map<String, serde_json::Value>,
}

fn parse_action_outcome(id: &ActionId, json: &str) -> Result<ActionOutcome, OrchestratorError> {
    let raw: RawActionOutput = serde_json::from_str(json).map_err(|e| OrchestratorError::Parse {
        command: format!("show action {}", id),
        reason: e.to_string(),
    })?;

    let state = match raw.status.as_deref() {
        Some("completed") => ActionState::Completed,
        Some("failed") | Some("error") => ActionState::Failed,
        Some("cancelled") => ActionState::Cancelled,
        Some("aborted") => ActionState::Aborted,
        Some("running") | Some("aborting") => ActionState::Running,
        _ => ActionState::Pending,
    };

    let mut results = BTreeMap::new();
    flatten_results("", &raw.results, &mut results);

    Ok(ActionOutcome {
        id: id.clone(),
        state,
        results,
        message: raw.message,
    })
}

fn flatten_results(
    prefix: &str,
    map: &serde_json::Map<String, serde_json::Value>,
    out: &mut BTreeMap<String, String>,
) {
    for (key, value) in map {
        let key = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            serde_json::Value::Object(inner) => flatten_results(&key, inner, out),
            serde_json::Value::String(s) => {
                out.insert(key, s.clone());
            }
            other => {
                out.insert(key, other.to_string());
            }
        }
    }
}

fn render_params(params: &ActionParams) -> Vec<String> {
    params
        .iter()
        .map(|(key, value)| match value {
            serde_json::Value::String(s) => format!("{}={}", key, s),
            other => format!("{}={}", key, other),
        })
        .collect()
}

/// Parse `stat -c '%s %Y %F'` output.
fn parse_stat(stdout: &str) -> Option<FileStat> {
    let mut parts = stdout.trim().splitn(3, ' ');
    let size = parts.next()?.parse().ok()?;
    let epoch: i64 = parts.next()?.parse().ok()?;
    let kind = parts.next()?;
    Some(FileStat {
        size,
        mtime: DateTime::<Utc>::from_timestamp(epoch, 0)?,
        is_dir: kind == "directory",
    })
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS_JSON: &str = r#"{
        "model": {"name": "verity"},
        "applications": {
            "ceph-osd": {
                "charm": "ceph-osd",
                "units": {
                    "ceph-osd/0": {
                        "workload-status": {"current": "active", "message": "Unit is ready (1 OSD)"},
                        "juju-status": {"current": "idle"},
                        "public-address": "10.5.0.21",
                        "leader": true
                    },
                    "ceph-osd/1": {
                        "workload-status": {"current": "maintenance", "message": "installing"},
                        "juju-status": {"current": "executing"},
                        "public-address": "10.5.0.22"
                    }
                }
            },
            "cinder": {
                "units": {
                    "cinder/0": {
                        "workload-status": {"current": "active", "message": "Unit is ready"},
                        "juju-status": {"current": "idle"},
                        "public-address": "10.5.0.30",
                        "subordinates": {
                            "cinder-ceph/0": {
                                "workload-status": {"current": "active", "message": "Unit is ready"},
                                "juju-status": {"current": "idle"}
                            }
                        }
                    }
                }
            },
            "cinder-ceph": {"charm": "cinder-ceph"}
        }
    }"#;

    #[test]
    fn test_parse_status() {
        let model = parse_status(STATUS_JSON).unwrap();

        let osd0 = model.unit("ceph-osd/0").unwrap();
        assert_eq!(osd0.workload, WorkloadState::Active);
        assert!(osd0.agent_idle);
        assert!(osd0.leader);
        assert_eq!(osd0.public_address.as_deref(), Some("10.5.0.21"));

        let osd1 = model.unit("ceph-osd/1").unwrap();
        assert_eq!(osd1.workload, WorkloadState::Maintenance);
        assert!(!osd1.agent_idle);

        // Subordinate filed under its own application with the principal's address.
        let sub = model.services["cinder-ceph"].get("cinder-ceph/0").unwrap();
        assert_eq!(sub.public_address.as_deref(), Some("10.5.0.30"));
        assert_eq!(model.units().count(), 4);
    }

    #[test]
    fn test_parse_status_rejects_garbage() {
        assert!(matches!(
            parse_status("not json"),
            Err(OrchestratorError::Parse { .. })
        ));
    }

    #[test]
    fn test_parse_action_id() {
        assert_eq!(
            parse_action_id("Action queued with id: \"42\"\n").unwrap().as_str(),
            "42"
        );
        assert_eq!(
            parse_action_id("Scheduled operation 7 with task 8\nCheck operation status with 'juju show-operation 7'\n")
                .unwrap()
                .as_str(),
            "8"
        );
        assert!(parse_action_id("nothing here").is_none());
    }

    #[test]
    fn test_parse_action_outcome() {
        let id = ActionId::new("8");
        let outcome = parse_action_outcome(
            &id,
            r#"{"id": "8", "status": "completed", "results": {"Code": "0", "disks": {"osd": "/dev/vdb"}}}"#,
        )
        .unwrap();
        assert!(outcome.completed());
        assert_eq!(outcome.results["disks.osd"], "/dev/vdb");
        assert_eq!(outcome.results["Code"], "0");

        let failed = parse_action_outcome(
            &id,
            r#"{"id": "8", "status": "failed", "message": "Non-absolute paths are not allowed"}"#,
        )
        .unwrap();
        assert!(!failed.completed());
        assert!(failed.state.is_terminal());
        assert_eq!(
            failed.message.as_deref(),
            Some("Non-absolute paths are not allowed")
        );

        let pending = parse_action_outcome(&id, r#"{"id": "8", "status": "pending"}"#).unwrap();
        assert_eq!(pending.state, ActionState::Pending);
    }

    #[test]
    fn test_parse_stat() {
        let stat = parse_stat("4096 1539000000 directory\n").unwrap();
        assert!(stat.is_dir);
        assert_eq!(stat.size, 4096);
        assert_eq!(stat.mtime.timestamp(), 1_539_000_000);

        let file = parse_stat("220 1539000001 regular file").unwrap();
        assert!(!file.is_dir);
        assert!(parse_stat("stat: cannot stat").is_none());
    }

    #[test]
    fn test_render_params_and_quote() {
        let mut params = ActionParams::new();
        params.insert("devices".to_string(), serde_json::json!("/dev/vdb"));
        params.insert("i-really-mean-it".to_string(), serde_json::json!(true));
        assert_eq!(
            render_params(&params),
            vec!["devices=/dev/vdb", "i-really-mean-it=true"]
        );
        assert_eq!(shell_quote("/etc/ceph/ceph.conf"), "'/etc/ceph/ceph.conf'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_relation_settings_stringified() {
        let settings = parse_relation_settings(
            "relation-get",
            r#"{"auth": "none", "private-address": "10.5.0.5", "ready": true}"#,
        )
        .unwrap();
        assert_eq!(settings["auth"], "none");
        assert_eq!(settings["ready"], "true");
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let cli = JujuCli::new("/nonexistent/juju-binary").with_timeout(Duration::from_secs(5));
        let err = cli.status().await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Spawn { .. }));
    }
}
