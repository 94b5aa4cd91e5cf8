//! Command lines for the discovery and scheduler agents.
//!
//! Everything devgrid asks of the agents goes through their CLIs; this
//! module is the only place that knows their flags.

use std::path::{Path, PathBuf};

use devgrid_core::{AgentRole, DevgridConfig, JobDescriptor};
use devgrid_exec::{CommandSpec, SpawnSpec};

/// Short name of an agent binary, used for its data and log paths.
fn agent_name(binary: &str) -> &str {
    Path::new(binary)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(binary)
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

pub fn binary(config: &DevgridConfig, role: AgentRole) -> &str {
    match role {
        AgentRole::Discovery => &config.discovery.binary,
        AgentRole::Scheduler => &config.scheduler.binary,
    }
}

pub fn display_name(config: &DevgridConfig, role: AgentRole) -> &str {
    match role {
        AgentRole::Discovery => &config.discovery.display_name,
        AgentRole::Scheduler => &config.scheduler.display_name,
    }
}

/// `<data_dir>/logs/<binary>.log`
pub fn log_path(config: &DevgridConfig, role: AgentRole) -> PathBuf {
    config
        .cluster
        .log_dir()
        .join(format!("{}.log", agent_name(binary(config, role))))
}

fn data_path(config: &DevgridConfig, role: AgentRole) -> PathBuf {
    config.cluster.data_path().join(agent_name(binary(config, role)))
}

/// `consul agent -dev -config-file <cfg> -bootstrap-expect 1 -data-dir <dir>`
pub fn discovery_agent(config: &DevgridConfig) -> SpawnSpec {
    let discovery = &config.discovery;
    let command = CommandSpec::new(&discovery.binary)
        .args(["agent", "-dev", "-config-file"])
        .arg(path_arg(&config.cluster.installer_path(&discovery.config_file)))
        .arg("-bootstrap-expect")
        .arg(discovery.bootstrap_expect.to_string())
        .arg("-data-dir")
        .arg(path_arg(&data_path(config, AgentRole::Discovery)))
        .args(&discovery.extra_args);
    SpawnSpec::new(command).with_log_file(log_path(config, AgentRole::Discovery))
}

/// `nomad agent -dev -config <cfg> -data-dir <dir> -consul-address <addr>`
pub fn scheduler_agent(config: &DevgridConfig) -> SpawnSpec {
    let scheduler = &config.scheduler;
    let command = CommandSpec::new(&scheduler.binary)
        .args(["agent", "-dev", "-config"])
        .arg(path_arg(&config.cluster.installer_path(&scheduler.config_file)))
        .arg("-data-dir")
        .arg(path_arg(&data_path(config, AgentRole::Scheduler)))
        .arg("-consul-address")
        .arg(&config.discovery.address)
        .args(&scheduler.extra_args);
    SpawnSpec::new(command).with_log_file(log_path(config, AgentRole::Scheduler))
}

pub fn server_members(config: &DevgridConfig) -> CommandSpec {
    CommandSpec::new(&config.scheduler.binary).args(["server", "members"])
}

/// Submit without waiting for the deployment: `nomad job run -detach -var=k=v <template>`.
pub fn job_run(config: &DevgridConfig, job: &JobDescriptor) -> CommandSpec {
    CommandSpec::new(&config.scheduler.binary)
        .args(["job", "run", "-detach"])
        .args(job.vars.iter().map(|(key, value)| format!("-var={key}={value}")))
        .arg(path_arg(&job.template))
}

pub fn job_status(config: &DevgridConfig, job_name: &str) -> CommandSpec {
    CommandSpec::new(&config.scheduler.binary).args(["job", "status", job_name])
}
