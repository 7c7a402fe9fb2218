//! Randomized kill and relaunch of cluster members.
//!
//! Every poll the scheduler checks whether to stop, kills a random running
//! member once the kill interval has passed since the previous kill, and
//! relaunches members whose launch delay has passed. Time is taken from the
//! lifecycle's [`Clock`](cabin_core::Clock), so runs against a virtual clock
//! are deterministic for a given seed.

use cabin_cluster::ClusterLifecycle;
use cabin_core::{HarnessError, KillPolicy, MemberIdentity, ProcessHandle, ProcessStatus, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FaultSchedule {
    /// Minimum time between two kills
    pub kill_interval: Duration,
    /// Time a killed member stays down
    pub launch_delay: Duration,
}

impl FaultSchedule {
    pub fn new(kill_interval: Duration, launch_delay: Duration) -> Self {
        Self {
            kill_interval,
            launch_delay,
        }
    }
}

/// When a fault run ends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopCondition {
    /// Run time after which the run passes
    pub timeout: Duration,
    /// Clients whose exit ends the run
    pub clients: Vec<ProcessHandle>,
}

impl StopCondition {
    pub fn after(timeout: Duration) -> Self {
        Self {
            timeout,
            clients: Vec::new(),
        }
    }

    pub fn or_client_exit(mut self, client: ProcessHandle) -> Self {
        self.clients.push(client);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopReason {
    TimeoutReached,
    ClientExited { code: Option<i32> },
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::TimeoutReached => write!(f, "timeout"),
            StopReason::ClientExited { .. } => write!(f, "client-exited"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRelaunch {
    pub relaunch_at: Duration,
    pub member: MemberIdentity,
}

/// Killed members waiting to be relaunched, earliest first.
///
/// Entries are appended in kill order and every entry uses the same launch
/// delay, so the queue stays sorted without reordering.
#[derive(Debug, Clone, Default)]
pub struct KillSchedule {
    pending: VecDeque<PendingRelaunch>,
}

impl KillSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, relaunch_at: Duration, member: MemberIdentity) {
        self.pending.push_back(PendingRelaunch {
            relaunch_at,
            member,
        });
    }

    /// Removes and returns the earliest entry if it is due at `now`.
    pub fn pop_due(&mut self, now: Duration) -> Option<MemberIdentity> {
        if self.pending.front()?.relaunch_at <= now {
            self.pending.pop_front().map(|entry| entry.member)
        } else {
            None
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &PendingRelaunch> {
        self.pending.iter()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FaultEventKind {
    Killed,
    Relaunched,
    /// A kill was due but the kill policy held it back
    KillSkipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FaultEvent {
    /// Time since the start of the run
    pub at: Duration,
    pub kind: FaultEventKind,
    pub member: Option<MemberIdentity>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailoverReport {
    pub schedule: FaultSchedule,
    pub reason: StopReason,
    pub elapsed: Duration,
    pub events: Vec<FaultEvent>,
}

impl FailoverReport {
    fn count(&self, kind: FaultEventKind) -> usize {
        self.events.iter().filter(|event| event.kind == kind).count()
    }

    pub fn kills(&self) -> usize {
        self.count(FaultEventKind::Killed)
    }

    pub fn relaunches(&self) -> usize {
        self.count(FaultEventKind::Relaunched)
    }
}

/// State of one fault run. Exposed so that single steps can be driven at
/// chosen instants.
pub struct FaultRun<'a, R: Rng + ?Sized> {
    lifecycle: &'a mut ClusterLifecycle,
    rng: &'a mut R,
    schedule: FaultSchedule,
    min_alive: usize,
    start: Duration,
    last_kill: Duration,
    pending: KillSchedule,
    events: Vec<FaultEvent>,
    kill_blocked: bool,
}

impl<'a, R: Rng + ?Sized> FaultRun<'a, R> {
    pub fn new(
        lifecycle: &'a mut ClusterLifecycle,
        rng: &'a mut R,
        schedule: FaultSchedule,
        start: Duration,
    ) -> Self {
        let min_alive = lifecycle
            .config()
            .kill_policy
            .min_alive(lifecycle.cluster().total_members());
        Self {
            lifecycle,
            rng,
            schedule,
            min_alive,
            start,
            last_kill: start,
            pending: KillSchedule::new(),
            events: Vec::new(),
            kill_blocked: false,
        }
    }

    pub fn lifecycle(&self) -> &ClusterLifecycle {
        &*self.lifecycle
    }

    pub fn pending(&self) -> &KillSchedule {
        &self.pending
    }

    pub fn events(&self) -> &[FaultEvent] {
        &self.events
    }

    pub fn last_kill(&self) -> Duration {
        self.last_kill
    }

    fn record(&mut self, now: Duration, kind: FaultEventKind, member: Option<MemberIdentity>) {
        self.events.push(FaultEvent {
            at: now.saturating_sub(self.start),
            kind,
            member,
        });
    }

    /// Why the run should end at `now`, if it should.
    ///
    /// A run only ends cleanly when the sandbox reports no failure at that
    /// moment, so a client that exits non-zero or a server crash seen on the
    /// last poll fails the run.
    pub async fn stop_reason(&self, stop: &StopCondition, now: Duration) -> Result<Option<StopReason>> {
        let reason = self.pending_stop(stop, now).await?;
        if reason.is_some() {
            self.lifecycle.sandbox().check_failures().await?;
        }
        Ok(reason)
    }

    async fn pending_stop(&self, stop: &StopCondition, now: Duration) -> Result<Option<StopReason>> {
        if now.saturating_sub(self.start) > stop.timeout {
            return Ok(Some(StopReason::TimeoutReached));
        }
        for client in &stop.clients {
            if let ProcessStatus::Exited(code) = self.lifecycle.sandbox().poll(*client).await? {
                info!("Client {} exited with {:?}", client, code);
                if code != Some(0) {
                    return Err(HarnessError::process_failed(
                        format!("client {}", client),
                        ProcessStatus::Exited(code).to_string(),
                    ));
                }
                return Ok(Some(StopReason::ClientExited { code }));
            }
        }
        Ok(None)
    }

    /// One scheduling step at `now`: maybe kill, relaunch what is due, then
    /// check for failures.
    pub async fn tick(&mut self, now: Duration) -> Result<()> {
        if now.saturating_sub(self.last_kill) > self.schedule.kill_interval {
            self.kill_random(now).await?;
        }

        while let Some(member) = self.pending.pop_due(now) {
            info!("Relaunching {}", member);
            self.lifecycle.start(&member).await?;
            self.record(now, FaultEventKind::Relaunched, Some(member));
        }

        self.lifecycle.sandbox().check_failures().await
    }

    async fn kill_random(&mut self, now: Duration) -> Result<()> {
        let running = self.lifecycle.running_members();
        if running.is_empty() || running.len() <= self.min_alive {
            if !self.kill_blocked {
                info!(
                    "Holding back kill: {} servers running, at least {} must stay up",
                    running.len(),
                    self.min_alive
                );
                self.kill_blocked = true;
                self.record(now, FaultEventKind::KillSkipped, None);
            }
            return Ok(());
        }

        let victim = running[self.rng.gen_range(0..running.len())].clone();
        self.lifecycle.kill(&victim).await?;
        self.last_kill = now;
        self.kill_blocked = false;
        self.pending.push(now + self.schedule.launch_delay, victim.clone());
        self.record(now, FaultEventKind::Killed, Some(victim));
        Ok(())
    }

    /// Starts every member that is down, pending or not.
    pub async fn restore(&mut self, now: Duration) -> Result<()> {
        self.pending.clear();
        let restored = self.lifecycle.restore_all().await?;
        for member in restored {
            self.record(now, FaultEventKind::Relaunched, Some(member));
        }
        Ok(())
    }

    fn into_events(self) -> Vec<FaultEvent> {
        self.events
    }
}

/// Drives fault runs with an injected random source.
pub struct FaultScheduler<R: Rng = StdRng> {
    rng: R,
    poll_interval: Duration,
}

impl FaultScheduler<StdRng> {
    pub fn from_seed(seed: u64) -> Self {
        Self::new(StdRng::seed_from_u64(seed))
    }

    pub fn from_entropy() -> Self {
        Self::new(StdRng::from_entropy())
    }
}

impl<R: Rng> FaultScheduler<R> {
    pub fn new(rng: R) -> Self {
        Self {
            rng,
            poll_interval: Duration::from_millis(100),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Kills and relaunches members until `stop` holds, then relaunches
    /// every member still down.
    ///
    /// Reaching the timeout without a failure is a pass. On a failure the
    /// down members are relaunched on a best-effort basis and the failure
    /// is returned.
    pub async fn run(
        &mut self,
        lifecycle: &mut ClusterLifecycle,
        schedule: FaultSchedule,
        stop: StopCondition,
    ) -> Result<FailoverReport> {
        if schedule.launch_delay > schedule.kill_interval {
            warn!(
                "Launch delay {:?} exceeds kill interval {:?}; servers will pile up down",
                schedule.launch_delay, schedule.kill_interval
            );
        }
        if lifecycle.config().kill_policy == KillPolicy::Unrestricted {
            debug!("Kill policy allows killing every server");
        }

        let clock = lifecycle.clock().clone();
        let poll_interval = self.poll_interval;
        let start = clock.now();
        let mut run = FaultRun::new(lifecycle, &mut self.rng, schedule, start);
        info!(
            "Killing a server every {:?}, relaunching after {:?}, for up to {:?}",
            schedule.kill_interval, schedule.launch_delay, stop.timeout
        );

        let outcome = loop {
            let now = clock.now();
            match run.stop_reason(&stop, now).await {
                Ok(Some(reason)) => break Ok(reason),
                Ok(None) => {}
                Err(e) => break Err(e),
            }
            if let Err(e) = run.tick(now).await {
                break Err(e);
            }
            clock.sleep(poll_interval).await;
        };

        let now = clock.now();
        match outcome {
            Ok(reason) => {
                run.restore(now).await?;
                let elapsed = now.saturating_sub(start);
                let events = run.into_events();
                info!("Fault run ended ({}) after {:?}", reason, elapsed);
                Ok(FailoverReport {
                    schedule,
                    reason,
                    elapsed,
                    events,
                })
            }
            Err(e) => {
                error!("Fault run aborted: {}", e);
                if let Err(restore_error) = run.restore(now).await {
                    warn!("Relaunching servers after the abort failed: {}", restore_error);
                }
                Err(e)
            }
        }
    }
}

impl<R: Rng> fmt::Debug for FaultScheduler<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaultScheduler")
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

/// Converts a misuse of the schedule into an error early.
pub fn validate_schedule(schedule: &FaultSchedule) -> Result<()> {
    if schedule.kill_interval.is_zero() {
        return Err(HarnessError::config("kill interval must be positive"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: u64) -> MemberIdentity {
        MemberIdentity::new(id, format!("127.0.0.1:{}", 5253 + id))
    }

    #[test]
    fn test_kill_schedule_pops_due_entries_in_order() {
        let mut schedule = KillSchedule::new();
        schedule.push(Duration::from_secs(12), member(1));
        schedule.push(Duration::from_secs(17), member(2));

        assert_eq!(schedule.pop_due(Duration::from_secs(11)), None);
        assert_eq!(schedule.pop_due(Duration::from_secs(12)), Some(member(1)));
        assert_eq!(schedule.pop_due(Duration::from_secs(12)), None);
        assert_eq!(schedule.len(), 1);
        assert_eq!(schedule.pop_due(Duration::from_secs(30)), Some(member(2)));
        assert!(schedule.is_empty());
    }

    #[test]
    fn test_stop_reason_display() {
        assert_eq!(StopReason::TimeoutReached.to_string(), "timeout");
        assert_eq!(
            StopReason::ClientExited { code: Some(0) }.to_string(),
            "client-exited"
        );
    }

    #[test]
    fn test_validate_schedule() {
        assert!(validate_schedule(&FaultSchedule::new(Duration::ZERO, Duration::ZERO)).is_err());
        assert!(
            validate_schedule(&FaultSchedule::new(Duration::from_secs(5), Duration::ZERO)).is_ok()
        );
    }
}
