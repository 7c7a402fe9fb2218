use cabin_core::{ClusterSpec, HarnessConfig, KillPolicy};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use crate::telemetry::LogFormat;

#[derive(Parser, Debug)]
#[command(author, version, about = "Fault-injection experiments against a replicated server cluster", long_about = None)]
pub struct Cli {
    /// Cluster members as `id=address` pairs, comma separated. Ids default
    /// to the position in the list, starting at 1
    #[arg(
        long,
        global = true,
        default_value = "1=127.0.0.1:5254,2=127.0.0.1:5255,3=127.0.0.1:5256"
    )]
    pub servers: String,

    /// Server binary to execute
    #[arg(long, global = true, default_value = "build/LogCabin")]
    pub binary: String,

    /// Reconfigure binary
    #[arg(long, global = true, default_value = "build/Examples/Reconfigure")]
    pub reconf_binary: String,

    /// Additional options to pass through to the Reconfigure binary
    #[arg(long, global = true, default_value = "")]
    pub reconf: String,

    /// Appended to every generated server config when it exists
    #[arg(long, global = true, default_value = "smoketest.conf")]
    pub extra_config: PathBuf,

    /// Directory the servers and clients run in
    #[arg(long, global = true, default_value = ".")]
    pub work_dir: PathBuf,

    /// Keep the debug logs after the run
    #[arg(long, global = true)]
    pub keep_logs: bool,

    /// Write a JSON summary of the run to this file
    #[arg(long, global = true)]
    pub summary: Option<PathBuf>,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start a cluster and run one client against it
    Smoke(SmokeArgs),
    /// Run clients while servers are killed and relaunched at random
    Failover(FailoverArgs),
    /// Repeatedly kill the leader and measure the elections that follow
    Election(ElectionArgs),
    /// Run a reconfiguration stress client until the timeout
    Reconfigure(ReconfigureArgs),
    /// Estimate round-trip times and recommend a timeout
    Timeouts(TimeoutArgs),
}

#[derive(Args, Debug)]
pub struct SmokeArgs {
    /// Client binary to execute
    #[arg(long, default_value = "build/Examples/SmokeTest")]
    pub client: String,

    /// Seconds to wait for the client before failing
    #[arg(long, default_value_t = 10)]
    pub timeout: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KillPolicyArg {
    /// Keep a majority running
    Quorum,
    /// Kill any running server
    Unrestricted,
}

#[derive(Args, Debug)]
pub struct FailoverArgs {
    /// Client binaries to execute; the run ends when one of them exits
    #[arg(long = "client", default_value = "build/Examples/FailoverTest")]
    pub clients: Vec<String>,

    /// Seconds to run before declaring success
    #[arg(long, default_value_t = 20)]
    pub timeout: u64,

    /// Seconds between server kills
    #[arg(long, default_value_t = 5)]
    pub killinterval: u64,

    /// Seconds before a killed server is relaunched
    #[arg(long, default_value_t = 0)]
    pub launchdelay: u64,

    #[arg(long, value_enum, default_value_t = KillPolicyArg::Quorum)]
    pub kill_policy: KillPolicyArg,

    /// Minimum number of running servers; overrides --kill-policy
    #[arg(long)]
    pub min_alive: Option<usize>,

    /// Seed for victim selection
    #[arg(long)]
    pub seed: Option<u64>,

    #[arg(long, default_value = "failover.csv")]
    pub results: PathBuf,
}

impl FailoverArgs {
    pub fn kill_policy(&self) -> KillPolicy {
        match (self.min_alive, self.kill_policy) {
            (Some(count), _) => KillPolicy::MinAlive(count),
            (None, KillPolicyArg::Quorum) => KillPolicy::PreserveQuorum,
            (None, KillPolicyArg::Unrestricted) => KillPolicy::Unrestricted,
        }
    }
}

#[derive(Args, Debug)]
pub struct ElectionArgs {
    /// Leader kills to measure
    #[arg(long, default_value_t = 10)]
    pub trials: usize,

    /// Election timeout the servers are configured with, recorded in the
    /// results
    #[arg(long, default_value_t = 500)]
    pub election_timeout_ms: u64,

    /// Give up waiting for a stable leader after this many seconds
    #[arg(long)]
    pub stable_timeout: Option<u64>,

    #[arg(long, default_value = "electionperf.csv")]
    pub results: PathBuf,
}

#[derive(Args, Debug)]
pub struct ReconfigureArgs {
    /// Client binary to execute
    #[arg(long, default_value = "build/Examples/ReconfigureTest")]
    pub client: String,

    /// Seconds to run the client before declaring success
    #[arg(long, default_value_t = 20)]
    pub timeout: u64,
}

#[derive(Args, Debug)]
pub struct TimeoutArgs {
    /// Hosts to probe; defaults to the hosts of --servers
    pub targets: Vec<String>,

    /// Read probe output from this file instead of running ping
    #[arg(long)]
    pub input: Option<PathBuf>,

    /// Echo requests per target
    #[arg(long, default_value_t = 10)]
    pub count: u32,

    /// Milliseconds between probes, used for the time column
    #[arg(long, default_value_t = 1000)]
    pub interval_ms: u64,

    #[arg(long, default_value_t = 0.125)]
    pub alpha: f64,

    #[arg(long, default_value_t = 0.25)]
    pub beta: f64,

    /// Deviations added to the estimated round-trip time
    #[arg(long, default_value_t = 4.0)]
    pub window: f64,

    #[arg(long, default_value = "timeout_stats.csv")]
    pub results: PathBuf,
}

impl Cli {
    pub fn cluster(&self) -> anyhow::Result<ClusterSpec> {
        Ok(ClusterSpec::from_host_list(&self.servers)?)
    }

    pub fn harness_config(&self) -> HarnessConfig {
        let prefix = match self.command {
            Command::Smoke(_) => "smoketest",
            _ => "logcabin",
        };
        let mut config = HarnessConfig::default()
            .with_server_command(&self.binary)
            .with_reconfigure_command(&self.reconf_binary)
            .with_reconfigure_options(&self.reconf)
            .with_config_prefix(prefix)
            .with_extra_config(&self.extra_config)
            .with_work_dir(&self.work_dir)
            .with_keep_debug_logs(self.keep_logs);

        match &self.command {
            Command::Failover(args) => {
                config = config.with_kill_policy(args.kill_policy());
            }
            Command::Election(args) => {
                if let Some(seconds) = args.stable_timeout {
                    config = config.with_stable_leader_timeout(Duration::from_secs(seconds));
                }
            }
            _ => {}
        }
        config
    }
}
