use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use devgrid_cluster::{
    LifecycleManager, Pipeline, PipelineDeps, PipelinePhase, PipelineReport, StopOutcome,
};
use devgrid_core::DevgridConfig;
use devgrid_core::config::FailurePolicy;

pub async fn up(config_path: Option<&Path>, keep_on_failure: bool) -> anyhow::Result<()> {
    let (mut config, source) = DevgridConfig::load(config_path)?;
    match &source {
        Some(path) => info!(config = %path.display(), "loaded configuration"),
        None => info!("no devgrid.toml found, using built-in defaults"),
    }
    if keep_on_failure {
        config.cluster.on_failure = FailurePolicy::Keep;
    }

    let deps = PipelineDeps::system(&config)?;
    let pipeline = Pipeline::new(config, deps)?.with_observer(Arc::new(|phase: &PipelinePhase| {
        println!("→ {phase}");
    }));
    let manager = LifecycleManager::new(pipeline.termination_policy().clone());

    let run = pipeline.run(&manager);
    tokio::pin!(run);
    let result = tokio::select! {
        result = &mut run => result,
        Ok(()) = tokio::signal::ctrl_c() => {
            info!("interrupt received, cancelling bootstrap");
            manager.stop_active().await;
            run.await
        }
    };

    let report = match result {
        Ok(report) => report,
        Err(err) => {
            if manager.is_active().await {
                eprintln!("✗ {err}");
                println!("Agents left running for inspection. Press Ctrl-C to stop them.");
                wait_for_interrupt().await?;
                shutdown(&pipeline, &manager).await?;
            }
            return Err(err.into());
        }
    };

    print_report(&report);
    println!("Cluster is ready. Press Ctrl-C to stop.");
    wait_for_interrupt().await?;
    shutdown(&pipeline, &manager).await
}

async fn wait_for_interrupt() -> anyhow::Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("shutdown signal received");
    Ok(())
}

async fn shutdown(pipeline: &Pipeline, manager: &LifecycleManager) -> anyhow::Result<()> {
    match pipeline.stop(manager).await? {
        StopOutcome::Stopped(_) => println!("✓ Cluster stopped"),
        StopOutcome::NoInstance => warn!("nothing to stop"),
        StopOutcome::BootstrapCancelled => warn!("bootstrap cancelled"),
    }
    Ok(())
}

fn print_report(report: &PipelineReport) {
    for deployment in &report.deployments {
        println!(
            "✓ {} ({}) healthy after {} status checks",
            deployment.job, deployment.role, deployment.attempts
        );
    }
    if let Some(summary) = report.external_health {
        println!("✓ External health check passed after {} attempts", summary.attempts);
    }
    if let (Some(discovery), Some(scheduler)) = (report.discovery_pid, report.scheduler_pid) {
        println!("  discovery agent pid {discovery}, scheduler agent pid {scheduler}");
    }
    println!("  took {:.1}s", report.elapsed.as_secs_f64());
}
