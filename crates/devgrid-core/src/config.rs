//! devgrid.toml configuration parser.
//!
//! Every section is optional. The defaults reproduce the local installer
//! layout: Consul and Nomad agents, then the traefik, bindle and hippo jobs,
//! with hippo's `/healthz` endpoint as the final readiness gate.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};

use crate::duration::{require_duration, require_nonzero_duration};
use crate::types::{JobDescriptor, JobRole};

/// Default file name looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "devgrid.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DevgridConfig {
    pub cluster: ClusterConfig,
    pub discovery: DiscoveryConfig,
    pub scheduler: SchedulerConfig,
    pub jobs: JobsConfig,
    pub external_health: ExternalHealthConfig,
    pub polling: PollingConfig,
    pub termination: TerminationConfig,
}

/// What the pipeline does with already-started agents when a stage fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Stop every agent that was started.
    #[default]
    Teardown,
    /// Leave the agents running (after a successful bootstrap) so the failed
    /// job can be inspected; `stop` still reaches them.
    Keep,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Directory holding `etc/` agent configs and `job/` templates.
    pub installer_dir: PathBuf,
    /// Agent state and logs. Relative paths resolve against `installer_dir`.
    pub data_dir: PathBuf,
    pub on_failure: FailurePolicy,
    /// Shown when neither agent binary is installed.
    pub install_guide: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            installer_dir: PathBuf::from("."),
            data_dir: PathBuf::from("data"),
            on_failure: FailurePolicy::Teardown,
            install_guide: "https://github.com/fermyon/installer/tree/main/local".to_string(),
        }
    }
}

impl ClusterConfig {
    /// Resolve a path from the config against the installer directory.
    pub fn installer_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.installer_dir.join(path)
        }
    }

    pub fn data_path(&self) -> PathBuf {
        self.installer_path(&self.data_dir)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_path().join("logs")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub binary: String,
    pub display_name: String,
    pub config_file: PathBuf,
    /// Address the scheduler uses to reach the discovery agent.
    pub address: String,
    pub bootstrap_expect: u32,
    pub install_url: String,
    pub extra_args: Vec<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            binary: "consul".to_string(),
            display_name: "Consul".to_string(),
            config_file: PathBuf::from("etc/consul.hcl"),
            address: "127.0.0.1:8500".to_string(),
            bootstrap_expect: 1,
            install_url: "https://www.consul.io/docs/install".to_string(),
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub binary: String,
    pub display_name: String,
    pub config_file: PathBuf,
    pub install_url: String,
    /// Substring of the membership listing that marks the cluster as up.
    pub ready_token: String,
    /// Upper bound for a single scheduler CLI call (submit, status, members).
    pub command_timeout: Option<String>,
    pub extra_args: Vec<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            binary: "nomad".to_string(),
            display_name: "Nomad".to_string(),
            config_file: PathBuf::from("etc/nomad.hcl"),
            install_url: "https://www.nomadproject.io/docs/install".to_string(),
            ready_token: "alive".to_string(),
            command_timeout: Some("30s".to_string()),
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    pub name: String,
    pub template: PathBuf,
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    pub proxy: JobConfig,
    pub storage: JobConfig,
    pub registry: JobConfig,
}

impl Default for JobsConfig {
    fn default() -> Self {
        let os = host_os().to_string();
        let arch = host_arch().to_string();
        Self {
            proxy: JobConfig {
                name: "traefik".to_string(),
                template: PathBuf::from("job/traefik.nomad"),
                vars: BTreeMap::new(),
            },
            storage: JobConfig {
                name: "bindle".to_string(),
                template: PathBuf::from("job/bindle.nomad"),
                vars: BTreeMap::from([("os".to_string(), os.clone()), ("arch".to_string(), arch)]),
            },
            registry: JobConfig {
                name: "hippo".to_string(),
                template: PathBuf::from("job/hippo.nomad"),
                vars: BTreeMap::from([("os".to_string(), os)]),
            },
        }
    }
}

impl JobsConfig {
    pub fn get(&self, role: JobRole) -> &JobConfig {
        match role {
            JobRole::Proxy => &self.proxy,
            JobRole::Storage => &self.storage,
            JobRole::Registry => &self.registry,
        }
    }

    /// Build the descriptor for a role with its template resolved.
    pub fn descriptor(&self, role: JobRole, cluster: &ClusterConfig) -> JobDescriptor {
        let job = self.get(role);
        JobDescriptor {
            name: job.name.clone(),
            template: cluster.installer_path(&job.template),
            vars: job.vars.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalHealthConfig {
    pub enabled: bool,
    pub url: String,
    pub expect_body: String,
    pub request_timeout: String,
}

impl Default for ExternalHealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "http://hippo.local.fermyon.link/healthz".to_string(),
            expect_body: "Healthy".to_string(),
            request_timeout: "5s".to_string(),
        }
    }
}

/// Bounds for one readiness poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub interval: String,
    pub timeout: String,
    pub max_attempts: Option<u32>,
    /// Fail after more than this many probe errors in a row.
    pub max_consecutive_errors: Option<u32>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: "1s".to_string(),
            timeout: "5m".to_string(),
            max_attempts: None,
            max_consecutive_errors: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub membership: PollConfig,
    pub job_health: PollConfig,
    pub external_health: PollConfig,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            membership: PollConfig {
                timeout: "2m".to_string(),
                ..PollConfig::default()
            },
            job_health: PollConfig {
                max_consecutive_errors: Some(5),
                ..PollConfig::default()
            },
            external_health: PollConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminationConfig {
    pub initial_backoff: String,
    pub max_backoff: String,
    /// How long to wait for exit after the first accepted signal.
    pub grace: String,
    /// How long to wait after the forced kill.
    pub kill_grace: String,
    pub escalate_on_timeout: bool,
}

impl Default for TerminationConfig {
    fn default() -> Self {
        Self {
            initial_backoff: "50ms".to_string(),
            max_backoff: "1s".to_string(),
            grace: "10s".to_string(),
            kill_grace: "2s".to_string(),
            escalate_on_timeout: true,
        }
    }
}

impl DevgridConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: DevgridConfig = toml::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load an explicit config file, or `./devgrid.toml` if present, or the
    /// built-in defaults. Returns the path that was read, if any.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<(Self, Option<PathBuf>)> {
        if let Some(path) = explicit {
            return Ok((Self::from_file(path)?, Some(path.to_path_buf())));
        }
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.is_file() {
            return Ok((Self::from_file(&local)?, Some(local)));
        }
        Ok((Self::default(), None))
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Scaffold a config rooted at the given installer checkout.
    pub fn scaffold(installer_dir: &Path) -> Self {
        DevgridConfig {
            cluster: ClusterConfig {
                installer_dir: installer_dir.to_path_buf(),
                ..ClusterConfig::default()
            },
            ..DevgridConfig::default()
        }
    }

    /// Check everything that can be checked without touching the system.
    pub fn validate(&self) -> anyhow::Result<()> {
        let polls = [
            ("polling.membership", &self.polling.membership),
            ("polling.job_health", &self.polling.job_health),
            ("polling.external_health", &self.polling.external_health),
        ];
        for (section, poll) in polls {
            require_nonzero_duration(&format!("{section}.interval"), &poll.interval)?;
            require_nonzero_duration(&format!("{section}.timeout"), &poll.timeout)?;
        }

        let term = &self.termination;
        require_nonzero_duration("termination.initial_backoff", &term.initial_backoff)?;
        require_duration("termination.max_backoff", &term.max_backoff)?;
        require_duration("termination.grace", &term.grace)?;
        require_duration("termination.kill_grace", &term.kill_grace)?;
        require_duration(
            "external_health.request_timeout",
            &self.external_health.request_timeout,
        )?;
        if let Some(timeout) = &self.scheduler.command_timeout {
            require_duration("scheduler.command_timeout", timeout)?;
        }

        if self.discovery.binary.trim().is_empty() || self.scheduler.binary.trim().is_empty() {
            bail!("agent binaries must not be empty");
        }

        let mut names = HashSet::new();
        for role in JobRole::SEQUENCE {
            let job = self.jobs.get(role);
            if job.name.trim().is_empty() {
                bail!("jobs.{role}.name must not be empty");
            }
            if !names.insert(job.name.as_str()) {
                bail!("job name `{}` is used by more than one job", job.name);
            }
        }

        if self.external_health.enabled && !self.external_health.url.starts_with("http://") {
            bail!(
                "external_health.url must be a plain http:// URL, got {:?}",
                self.external_health.url
            );
        }
        Ok(())
    }
}

/// Scheduler-style OS name for the host.
pub fn host_os() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    }
}

/// Scheduler-style architecture name for the host.
pub fn host_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn defaults_are_valid() {
        let config = DevgridConfig::default();
        config.validate().unwrap();
        assert_eq!(config.discovery.binary, "consul");
        assert_eq!(config.scheduler.binary, "nomad");
        assert_eq!(config.jobs.proxy.name, "traefik");
        assert_eq!(config.polling.job_health.max_consecutive_errors, Some(5));
        assert_eq!(config.cluster.on_failure, FailurePolicy::Teardown);
    }

    #[test]
    fn parse_partial_file() {
        let toml_str = r#"
[cluster]
installer_dir = "/opt/installer"
on_failure = "keep"

[scheduler]
binary = "/usr/local/bin/nomad"

[jobs.registry]
name = "registry"
template = "job/registry.nomad"
vars = { os = "linux" }

[polling.membership]
timeout = "30s"
"#;
        let config: DevgridConfig = toml::from_str(toml_str).unwrap();
        config.validate().unwrap();
        assert_eq!(config.cluster.installer_dir, PathBuf::from("/opt/installer"));
        assert_eq!(config.cluster.on_failure, FailurePolicy::Keep);
        assert_eq!(config.scheduler.binary, "/usr/local/bin/nomad");
        assert_eq!(config.scheduler.ready_token, "alive");
        assert_eq!(config.jobs.registry.name, "registry");
        assert_eq!(config.jobs.proxy.name, "traefik");
        assert_eq!(config.polling.membership.timeout, "30s");
        assert_eq!(config.polling.membership.interval, "1s");
    }

    #[test]
    fn descriptor_resolves_template_against_installer_dir() {
        let config = DevgridConfig::scaffold(Path::new("/srv/installer"));
        let job = config.jobs.descriptor(JobRole::Storage, &config.cluster);
        assert_eq!(job.name, "bindle");
        assert_eq!(job.template, PathBuf::from("/srv/installer/job/bindle.nomad"));
        assert_eq!(job.vars.get("os").map(String::as_str), Some(host_os()));
        assert_eq!(job.vars.get("arch").map(String::as_str), Some(host_arch()));
    }

    #[test]
    fn data_dir_is_relative_to_installer() {
        let config = DevgridConfig::scaffold(Path::new("/srv/installer"));
        assert_eq!(config.cluster.data_path(), PathBuf::from("/srv/installer/data"));
        assert_eq!(config.cluster.log_dir(), PathBuf::from("/srv/installer/data/logs"));
    }

    #[test]
    fn invalid_duration_is_rejected() {
        let mut config = DevgridConfig::default();
        config.polling.job_health.timeout = "eventually".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("polling.job_health.timeout"));
    }

    #[test]
    fn zero_poll_bounds_are_rejected() {
        let mut config = DevgridConfig::default();
        config.polling.membership.interval = "0s".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("polling.membership.interval"));

        let mut config = DevgridConfig::default();
        config.polling.external_health.timeout = "0ms".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("polling.external_health.timeout"));

        let mut config = DevgridConfig::default();
        config.termination.initial_backoff = "0".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn oversized_durations_fail_validation() {
        let mut config = DevgridConfig::default();
        config.polling.job_health.timeout = "307445734561825861m".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("polling.job_health.timeout"));
    }

    #[test]
    fn duplicate_job_names_are_rejected() {
        let mut config = DevgridConfig::default();
        config.jobs.registry.name = "traefik".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn https_health_url_is_rejected() {
        let mut config = DevgridConfig::default();
        config.external_health.url = "https://hippo.example/healthz".to_string();
        assert!(config.validate().is_err());

        config.external_health.enabled = false;
        config.validate().unwrap();
    }

    #[test]
    fn scaffold_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let config = DevgridConfig::scaffold(dir.path());
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();

        let loaded = DevgridConfig::from_file(&path).unwrap();
        assert_eq!(loaded.cluster.installer_dir, dir.path());
        assert_eq!(loaded.jobs.storage, config.jobs.storage);
        assert_eq!(
            crate::parse_duration(&loaded.termination.grace),
            Some(Duration::from_secs(10))
        );
    }

    #[test]
    fn load_explicit_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        let err = DevgridConfig::load(Some(&missing)).unwrap_err();
        assert!(err.to_string().contains("nope.toml"));
    }
}
