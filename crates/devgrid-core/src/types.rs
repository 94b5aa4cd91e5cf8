//! Shared types used across devgrid crates.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// The two long-running agents a local cluster is made of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Service-discovery agent (Consul by default).
    Discovery,
    /// Workload scheduler agent (Nomad by default).
    Scheduler,
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentRole::Discovery => f.write_str("discovery agent"),
            AgentRole::Scheduler => f.write_str("scheduler agent"),
        }
    }
}

/// Position of a job in the fixed deployment sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobRole {
    /// Reverse proxy fronting the other services.
    Proxy,
    /// Artifact storage.
    Storage,
    /// Application registry.
    Registry,
}

impl JobRole {
    /// Deployment order. Each job depends on the ones before it.
    pub const SEQUENCE: [JobRole; 3] = [JobRole::Proxy, JobRole::Storage, JobRole::Registry];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobRole::Proxy => "proxy",
            JobRole::Storage => "storage",
            JobRole::Registry => "registry",
        }
    }
}

impl fmt::Display for JobRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A job to submit to the scheduler: a template file plus its variables.
///
/// Descriptors are opaque to devgrid; only the name is interpreted, to find
/// the job's row in the scheduler's status output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDescriptor {
    pub name: String,
    pub template: PathBuf,
    pub vars: BTreeMap<String, String>,
}

impl JobDescriptor {
    pub fn new(name: impl Into<String>, template: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            template: template.into(),
            vars: BTreeMap::new(),
        }
    }

    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }
}

/// Lifecycle of a bootstrapped cluster instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceState {
    NotStarted,
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl InstanceState {
    /// Whether this state occupies the single active-instance slot.
    pub fn is_occupied(&self) -> bool {
        matches!(
            self,
            InstanceState::Starting | InstanceState::Running | InstanceState::Stopping
        )
    }
}

/// Pipeline stage an error or event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Prerequisites,
    Bootstrap,
    Deploy(JobRole),
    ExternalHealth,
    Teardown,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Prerequisites => f.write_str("prerequisite check"),
            Stage::Bootstrap => f.write_str("cluster bootstrap"),
            Stage::Deploy(role) => write!(f, "{role} deployment"),
            Stage::ExternalHealth => f.write_str("external health check"),
            Stage::Teardown => f.write_str("teardown"),
        }
    }
}

/// Which agent binaries could not be found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MissingDependency {
    Discovery,
    Scheduler,
    Both,
}

impl MissingDependency {
    /// Classify presence checks. Returns `None` when both binaries exist.
    pub fn from_presence(discovery_present: bool, scheduler_present: bool) -> Option<Self> {
        match (discovery_present, scheduler_present) {
            (true, true) => None,
            (false, true) => Some(MissingDependency::Discovery),
            (true, false) => Some(MissingDependency::Scheduler),
            (false, false) => Some(MissingDependency::Both),
        }
    }

    /// Roles that need installing.
    pub fn roles(&self) -> &'static [AgentRole] {
        match self {
            MissingDependency::Discovery => &[AgentRole::Discovery],
            MissingDependency::Scheduler => &[AgentRole::Scheduler],
            MissingDependency::Both => &[AgentRole::Discovery, AgentRole::Scheduler],
        }
    }
}
