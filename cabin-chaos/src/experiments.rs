//! Experiments built on the scheduler and the detector, and their result
//! rows.

use cabin_cluster::ClusterLifecycle;
use cabin_core::{HarnessError, MemberIdentity, Result, ResultRow, Term};
use serde::Serialize;
use std::time::Duration;
use tracing::info;

use crate::detector::ConvergenceDetector;
use crate::scheduler::FailoverReport;

/// One leader failover: the leader is killed and a new one elected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ElectionTrial {
    pub old_leader: MemberIdentity,
    pub old_term: Term,
    pub new_leader: MemberIdentity,
    pub new_term: Term,
    /// Time from the kill until the cluster agreed on the new leader
    pub duration: Duration,
    pub num_woken: usize,
}

impl ElectionTrial {
    /// Terms it took to elect the new leader.
    pub fn terms(&self) -> u64 {
        self.new_term.since(self.old_term)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ElectionReport {
    pub trials: Vec<ElectionTrial>,
}

impl ElectionReport {
    pub fn sorted_terms(&self) -> Vec<u64> {
        let mut terms: Vec<u64> = self.trials.iter().map(ElectionTrial::terms).collect();
        terms.sort_unstable();
        terms
    }

    pub fn sorted_woken(&self) -> Vec<usize> {
        let mut woken: Vec<usize> = self.trials.iter().map(|trial| trial.num_woken).collect();
        woken.sort_unstable();
        woken
    }

    pub fn sorted_durations(&self) -> Vec<Duration> {
        let mut durations: Vec<Duration> = self.trials.iter().map(|trial| trial.duration).collect();
        durations.sort_unstable();
        durations
    }

    /// Rows tagged with the election timeout the servers were configured
    /// with.
    pub fn rows(&self, election_timeout_ms: u64) -> Vec<ElectionRow> {
        self.trials
            .iter()
            .enumerate()
            .map(|(index, trial)| ElectionRow {
                election_timeout_ms,
                elections: index + 1,
                time_ms: trial.duration.as_secs_f64() * 1000.0,
                terms: trial.terms(),
                woken: trial.num_woken,
            })
            .collect()
    }
}

/// Repeatedly kills the leader and times the election that follows.
pub struct ElectionExperiment {
    detector: ConvergenceDetector,
    trials: usize,
}

impl ElectionExperiment {
    pub fn new(detector: ConvergenceDetector, trials: usize) -> Self {
        Self { detector, trials }
    }

    pub async fn run(&self, lifecycle: &mut ClusterLifecycle) -> Result<ElectionReport> {
        let mut report = ElectionReport::default();
        for trial in 0..self.trials {
            let result = self.run_trial(lifecycle).await?;
            info!(
                "Trial {}: took {} terms to elect server {} in {:?}, {} servers woke up",
                trial + 1,
                result.terms(),
                result.new_leader.id,
                result.duration,
                result.num_woken
            );
            report.trials.push(result);
        }
        Ok(report)
    }

    async fn run_trial(&self, lifecycle: &mut ClusterLifecycle) -> Result<ElectionTrial> {
        let clock = lifecycle.clock().clone();
        let old = self.detector.await_stable_leader(lifecycle, Term::ZERO).await?;

        // without a majority left nobody can win the next election
        let remaining = lifecycle.running_count().saturating_sub(1);
        if !lifecycle.cluster().has_quorum(remaining) {
            return Err(HarnessError::QuorumNotAvailable {
                current: remaining,
                required: lifecycle.cluster().quorum_size(),
            });
        }

        lifecycle.kill(&old.leader).await?;
        let killed_at = clock.now();

        let new = self.detector.await_stable_leader(lifecycle, old.term).await?;
        let duration = clock.now().saturating_sub(killed_at);
        lifecycle.sandbox().check_failures().await?;

        lifecycle.start(&old.leader).await?;
        Ok(ElectionTrial {
            old_leader: old.leader,
            old_term: old.term,
            new_leader: new.leader,
            new_term: new.term,
            duration,
            num_woken: new.num_woken,
        })
    }
}

/// `electionTimeout;elections;time;terms;woken`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ElectionRow {
    pub election_timeout_ms: u64,
    pub elections: usize,
    pub time_ms: f64,
    pub terms: u64,
    pub woken: usize,
}

impl ResultRow for ElectionRow {
    fn header() -> &'static [&'static str] {
        &["electionTimeout", "elections", "time", "terms", "woken"]
    }

    fn fields(&self) -> Vec<String> {
        vec![
            self.election_timeout_ms.to_string(),
            self.elections.to_string(),
            self.time_ms.to_string(),
            self.terms.to_string(),
            self.woken.to_string(),
        ]
    }
}

/// `killinterval;launchdelay;time;kills;relaunches;outcome`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailoverRow {
    pub kill_interval_s: f64,
    pub launch_delay_s: f64,
    pub time_s: f64,
    pub kills: usize,
    pub relaunches: usize,
    pub outcome: String,
}

impl From<&FailoverReport> for FailoverRow {
    fn from(report: &FailoverReport) -> Self {
        Self {
            kill_interval_s: report.schedule.kill_interval.as_secs_f64(),
            launch_delay_s: report.schedule.launch_delay.as_secs_f64(),
            time_s: report.elapsed.as_secs_f64(),
            kills: report.kills(),
            relaunches: report.relaunches(),
            outcome: report.reason.to_string(),
        }
    }
}

impl ResultRow for FailoverRow {
    fn header() -> &'static [&'static str] {
        &[
            "killinterval",
            "launchdelay",
            "time",
            "kills",
            "relaunches",
            "outcome",
        ]
    }

    fn fields(&self) -> Vec<String> {
        vec![
            self.kill_interval_s.to_string(),
            self.launch_delay_s.to_string(),
            self.time_s.to_string(),
            self.kills.to_string(),
            self.relaunches.to_string(),
            self.outcome.clone(),
        ]
    }
}
