//! Scheduler job-status parsing.
//!
//! `nomad job status <name>` prints a "Deployed" table once a deployment
//! exists:
//!
//! ```text
//! Deployed
//! Task Group  Desired  Placed  Healthy  Unhealthy  Progress Deadline
//! hippo       1        1       1        0          2022-01-21T10:23:12Z
//! ```
//!
//! The job is healthy when its row shows one placed, one healthy and zero
//! unhealthy allocations. Anything that does not match the layout is "not
//! healthy yet", never an error.

use serde::Serialize;

/// Marker line that precedes the deployment table.
pub const DEPLOYED_MARKER: &str = "Deployed";

/// One row of the "Deployed" table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentSummary {
    pub name: String,
    pub desired: String,
    pub placed: String,
    pub healthy: String,
    pub unhealthy: String,
    pub progress: String,
}

impl DeploymentSummary {
    pub fn is_healthy(&self) -> bool {
        self.placed == "1" && self.healthy == "1" && self.unhealthy == "0"
    }
}

/// Find `job`'s row in the deployment table of `output`.
///
/// Lines are trimmed and blank lines dropped; the row is the first line after
/// the `Deployed` marker that begins with the job name and has at least five
/// fields. A missing progress column is reported as empty.
pub fn parse_deployment_summary(output: &str, job: &str) -> Option<DeploymentSummary> {
    let mut lines = output.lines().map(str::trim).filter(|line| !line.is_empty());
    lines.by_ref().find(|line| *line == DEPLOYED_MARKER)?;

    let row = lines.find(|line| line.starts_with(job))?;
    let fields: Vec<&str> = row.split_whitespace().collect();
    if fields.len() < 5 {
        return None;
    }

    Some(DeploymentSummary {
        name: fields[0].to_string(),
        desired: fields[1].to_string(),
        placed: fields[2].to_string(),
        healthy: fields[3].to_string(),
        unhealthy: fields[4].to_string(),
        progress: fields[5..].join(" "),
    })
}

/// Whether `output` reports `job` as deployed and healthy.
pub fn is_deployment_healthy(output: &str, job: &str) -> bool {
    parse_deployment_summary(output, job).is_some_and(|summary| summary.is_healthy())
}

/// Whether a membership listing contains the ready token.
pub fn members_ready(output: &str, ready_token: &str) -> bool {
    output.contains(ready_token)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOMAD_STATUS: &str = "\
ID            = hippo
Name          = hippo
Type          = service
Status        = running

Latest Deployment
ID          = 6c9a3f2e
Status      = successful
Description = Deployment completed successfully

Deployed
Task Group  Desired  Placed  Healthy  Unhealthy  Progress Deadline
hippo       1        1       1        0          2022-01-21T10:23:12Z

Allocations
ID        Node ID   Task Group  Version  Desired  Status   Created  Modified
0b1a6f0d  4f1c2b3a  hippo       0        run      running  1m ago   40s ago
";

    #[test]
    fn healthy_row() {
        assert!(is_deployment_healthy("Deployed\nproxy  1  1  1  0  100%", "proxy"));
    }

    #[test]
    fn unhealthy_row() {
        assert!(!is_deployment_healthy("Deployed\nproxy  1  1  0  1  100%", "proxy"));
    }

    #[test]
    fn empty_output_is_not_healthy() {
        assert!(!is_deployment_healthy("", "proxy"));
        assert_eq!(parse_deployment_summary("", "proxy"), None);
    }

    #[test]
    fn full_status_output() {
        let summary = parse_deployment_summary(NOMAD_STATUS, "hippo").unwrap();
        assert_eq!(summary.desired, "1");
        assert_eq!(summary.progress, "2022-01-21T10:23:12Z");
        assert!(summary.is_healthy());
    }

    #[test]
    fn rows_before_marker_are_ignored() {
        let output = "proxy 1 1 1 0 100%\nDeployed\nproxy 1 0 0 0 0%";
        let summary = parse_deployment_summary(output, "proxy").unwrap();
        assert_eq!(summary.placed, "0");
        assert!(!summary.is_healthy());
    }

    #[test]
    fn missing_marker_is_not_healthy() {
        let output = "Task Group  Desired  Placed  Healthy  Unhealthy\nproxy 1 1 1 0 100%";
        assert!(!is_deployment_healthy(output, "proxy"));
    }

    #[test]
    fn missing_job_row_is_not_healthy() {
        let output = "Deployed\nTask Group Desired Placed Healthy Unhealthy\nother 1 1 1 0 100%";
        assert!(!is_deployment_healthy(output, "proxy"));
    }

    #[test]
    fn first_matching_row_wins() {
        let output = "Deployed\nproxy 1 1 0 0 0%\nproxy 1 1 1 0 100%";
        assert!(!is_deployment_healthy(output, "proxy"));
    }

    #[test]
    fn short_row_is_not_healthy() {
        assert!(!is_deployment_healthy("Deployed\nproxy 1 1", "proxy"));
    }

    #[test]
    fn indented_and_blank_lines_are_trimmed() {
        let output = "\n   Deployed   \n\n   proxy  1  1  1  0  100%   \n";
        assert!(is_deployment_healthy(output, "proxy"));
    }

    #[test]
    fn two_placed_is_not_healthy() {
        assert!(!is_deployment_healthy("Deployed\nproxy 2 2 2 0 100%", "proxy"));
    }

    #[test]
    fn membership_token() {
        let output = "Name          Address    Port  Status  Leader\nnode.global  127.0.0.1  4648  alive   true";
        assert!(members_ready(output, "alive"));
        assert!(!members_ready("No cluster leader", "alive"));
    }
}
