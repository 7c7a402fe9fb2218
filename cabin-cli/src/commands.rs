use anyhow::{bail, Context};
use cabin_chaos::{
    ConvergenceDetector, ElectionExperiment, ElectionReport, FailoverReport, FailoverRow,
    FaultSchedule, FaultScheduler, StopCondition,
};
use cabin_cluster::{ClientCommand, ClientOutcome, ClusterLifecycle, LocalSandbox};
use cabin_core::types::host_of;
use cabin_core::{Clock, LogSource, ProcessStatus, ResultWriter, SystemClock};
use cabin_rtt::{probe_all, EwmaConfig, PingProber, RttRow, RttTimeline};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::cli::{Cli, Command, ElectionArgs, FailoverArgs, ReconfigureArgs, SmokeArgs, TimeoutArgs};

/// What a run leaves behind in the `--summary` file.
#[derive(Debug, Serialize)]
#[serde(tag = "experiment", rename_all = "snake_case")]
pub enum Summary {
    Smoke {
        exit_code: Option<i32>,
    },
    Failover(FailoverReport),
    Election {
        report: ElectionReport,
        terms: Vec<u64>,
        woken: Vec<usize>,
    },
    Reconfigure {
        timed_out: bool,
    },
    Timeouts {
        samples: usize,
        recommended_timeout_ms: Option<f64>,
        rows: Vec<RttRow>,
    },
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let summary = match &cli.command {
        Command::Timeouts(args) => timeouts(&cli, args).await?,
        _ => run_on_cluster(&cli).await?,
    };

    if let Some(path) = &cli.summary {
        let json = serde_json::to_string_pretty(&summary)?;
        tokio::fs::write(path, json)
            .await
            .with_context(|| format!("writing summary to {}", path.display()))?;
        info!("Wrote summary to {}", path.display());
    }
    Ok(())
}

/// Brings the cluster up, runs the experiment and always cleans up. An
/// experiment failure takes precedence over a cleanup failure.
async fn run_on_cluster(cli: &Cli) -> anyhow::Result<Summary> {
    let cluster = cli.cluster()?;
    let config = cli.harness_config();
    let sandbox = Arc::new(LocalSandbox::new(&config.work_dir));
    let clock = Arc::new(SystemClock::new());

    info!(
        "Cluster {} with {} servers: {}",
        cluster.cluster_uuid(),
        cluster.total_members(),
        cluster.addresses()
    );
    let mut lifecycle = ClusterLifecycle::new(cluster, config, sandbox, clock);
    lifecycle.initialize().await?;

    let outcome = match &cli.command {
        Command::Smoke(args) => smoke(&mut lifecycle, args).await,
        Command::Failover(args) => failover(&mut lifecycle, args).await,
        Command::Election(args) => election(&mut lifecycle, args).await,
        Command::Reconfigure(args) => reconfigure(&mut lifecycle, args).await,
        Command::Timeouts(_) => Err(anyhow::anyhow!("timeouts does not run against a cluster")),
    };
    if let Err(e) = &outcome {
        error!("Experiment failed: {:#}", e);
    }

    let cleanup = lifecycle.cleanup().await;
    let summary = outcome?;
    cleanup.context("cleaning up after the run")?;
    Ok(summary)
}

async fn smoke(lifecycle: &mut ClusterLifecycle, args: &SmokeArgs) -> anyhow::Result<Summary> {
    let handle = lifecycle
        .start_client(&ClientCommand::new(&args.client), true)
        .await?;
    let status = lifecycle
        .wait_for_client(handle, Duration::from_secs(args.timeout))
        .await?;
    expect_success(&args.client, status)?;

    info!("Smoke test passed");
    Ok(Summary::Smoke {
        exit_code: exit_code(status),
    })
}

async fn failover(lifecycle: &mut ClusterLifecycle, args: &FailoverArgs) -> anyhow::Result<Summary> {
    let mut stop = StopCondition::after(Duration::from_secs(args.timeout));
    for client in &args.clients {
        let handle = lifecycle
            .start_client(&ClientCommand::new(client), true)
            .await?;
        stop = stop.or_client_exit(handle);
    }

    let schedule = FaultSchedule::new(
        Duration::from_secs(args.killinterval),
        Duration::from_secs(args.launchdelay),
    );
    let mut scheduler = match args.seed {
        Some(seed) => FaultScheduler::from_seed(seed),
        None => FaultScheduler::from_entropy(),
    }
    .with_poll_interval(lifecycle.config().schedule_poll_interval);

    let report = scheduler.run(lifecycle, schedule, stop).await?;
    info!(
        "Success: {} after {:?} with {} kills and {} relaunches",
        report.reason,
        report.elapsed,
        report.kills(),
        report.relaunches()
    );

    append_rows(&args.results, &[FailoverRow::from(&report)]).await;
    Ok(Summary::Failover(report))
}

async fn election(lifecycle: &mut ClusterLifecycle, args: &ElectionArgs) -> anyhow::Result<Summary> {
    let logs: Arc<dyn LogSource> = Arc::new(lifecycle.logs().clone());
    let detector = ConvergenceDetector::from_config(logs, lifecycle.config());

    let report = ElectionExperiment::new(detector, args.trials)
        .run(lifecycle)
        .await?;

    let terms = report.sorted_terms();
    let woken = report.sorted_woken();
    info!("Terms per election (sorted): {:?}", terms);
    info!("Servers woken per election (sorted): {:?}", woken);

    append_rows(&args.results, &report.rows(args.election_timeout_ms)).await;
    Ok(Summary::Election {
        report,
        terms,
        woken,
    })
}

async fn reconfigure(
    lifecycle: &mut ClusterLifecycle,
    args: &ReconfigureArgs,
) -> anyhow::Result<Summary> {
    // let the new configuration settle before the client starts changing it
    lifecycle.clock().sleep(Duration::from_secs(1)).await;

    let handle = lifecycle
        .start_client(&ClientCommand::new(&args.client), true)
        .await?;
    let timed_out = match lifecycle
        .supervise_client(handle, Duration::from_secs(args.timeout))
        .await?
    {
        ClientOutcome::TimedOut => {
            info!("Success: timeout met with no errors");
            true
        }
        ClientOutcome::Exited(status) => {
            expect_success(&args.client, status)?;
            false
        }
    };
    Ok(Summary::Reconfigure { timed_out })
}

async fn timeouts(cli: &Cli, args: &TimeoutArgs) -> anyhow::Result<Summary> {
    let config = EwmaConfig::new()
        .with_alpha(args.alpha)
        .with_beta(args.beta)
        .with_window(args.window);

    let text = match &args.input {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading probe output from {}", path.display()))?,
        None => {
            let targets = if args.targets.is_empty() {
                cli.cluster()?
                    .members()
                    .iter()
                    .map(|member| host_of(&member.address).to_string())
                    .collect()
            } else {
                args.targets.clone()
            };
            probe_all(&PingProber::new(args.count), &targets).await?
        }
    };

    let timeline =
        RttTimeline::from_probe_output(config, Duration::from_millis(args.interval_ms), &text)?;
    if timeline.rows().is_empty() {
        bail!("no round-trip samples found in the probe output");
    }

    let recommended = timeline.recommended_timeout();
    if let Some(timeout) = recommended {
        info!(
            "Estimated round-trip time {:.3} ms, deviation {:.3} ms, recommended timeout {:.3} ms",
            timeline.estimator().average().unwrap_or_default(),
            timeline.estimator().deviation().unwrap_or_default(),
            timeout
        );
    }

    append_rows(&args.results, timeline.rows()).await;
    Ok(Summary::Timeouts {
        samples: timeline.rows().len(),
        recommended_timeout_ms: recommended,
        rows: timeline.rows().to_vec(),
    })
}

fn exit_code(status: ProcessStatus) -> Option<i32> {
    match status {
        ProcessStatus::Exited(code) => code,
        ProcessStatus::Running => None,
    }
}

fn expect_success(client: &str, status: ProcessStatus) -> anyhow::Result<()> {
    if !status.success() {
        bail!("client {} finished with {}", client, status);
    }
    Ok(())
}

/// Results are a by-product of a run; failing to record them is logged
/// rather than failing the run.
async fn append_rows<R: cabin_core::ResultRow>(path: &Path, rows: &[R]) {
    match ResultWriter::new(path).append(rows).await {
        Ok(count) => info!("Appended {} rows to {}", count, path.display()),
        Err(e) => warn!("Could not write results to {}: {}", path.display(), e),
    }
}
