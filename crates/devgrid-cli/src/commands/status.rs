use std::path::Path;

use anyhow::bail;

use devgrid_cluster::agents;
use devgrid_core::DevgridConfig;
use devgrid_core::duration::require_duration;
use devgrid_exec::{CommandRunner, TokioRunner};
use devgrid_health::{DeploymentSummary, parse_deployment_summary};

pub async fn status(job: &str, config_path: Option<&Path>, format: &str) -> anyhow::Result<()> {
    let (config, _) = DevgridConfig::load(config_path)?;
    let timeout = config
        .scheduler
        .command_timeout
        .as_deref()
        .map(|value| require_duration("scheduler.command_timeout", value))
        .transpose()?;
    let runner = TokioRunner::new().with_timeout(timeout);

    let command = agents::job_status(&config, job);
    let output = runner.run(&command).await?;
    if !output.success() {
        bail!(
            "`{command}` exited with code {}: {}",
            output.code,
            output.stderr.trim()
        );
    }

    let summary = parse_deployment_summary(&output.stdout, job);
    println!("{}", render(job, summary.as_ref(), format)?);
    Ok(())
}

fn render(job: &str, summary: Option<&DeploymentSummary>, format: &str) -> anyhow::Result<String> {
    let healthy = summary.is_some_and(DeploymentSummary::is_healthy);
    match format {
        "json" => Ok(serde_json::to_string_pretty(&serde_json::json!({
            "job": job,
            "deployed": summary.is_some(),
            "healthy": healthy,
            "summary": summary,
        }))?),
        _ => Ok(match summary {
            None => format!("{job}: no deployment reported yet"),
            Some(s) => format!(
                "{job}: {}\n  desired {}  placed {}  healthy {}  unhealthy {}  {}",
                if healthy { "healthy" } else { "not healthy" },
                s.desired,
                s.placed,
                s.healthy,
                s.unhealthy,
                s.progress
            ),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_output() {
        let summary = parse_deployment_summary("Deployed\nhippo 1 1 1 0 2022-01-21T10:23:12Z", "hippo");
        let text = render("hippo", summary.as_ref(), "text").unwrap();
        assert!(text.starts_with("hippo: healthy"));
        assert_eq!(
            render("hippo", None, "text").unwrap(),
            "hippo: no deployment reported yet"
        );
    }

    #[test]
    fn json_output() {
        let summary = parse_deployment_summary("Deployed\nhippo 1 1 0 1 100%", "hippo");
        let json: serde_json::Value =
            serde_json::from_str(&render("hippo", summary.as_ref(), "json").unwrap()).unwrap();
        assert_eq!(json["deployed"], true);
        assert_eq!(json["healthy"], false);
        assert_eq!(json["summary"]["unhealthy"], "1");
    }
}
