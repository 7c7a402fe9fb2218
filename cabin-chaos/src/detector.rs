//! Leader convergence detection.
//!
//! The detector never talks to the servers. It rebuilds every running
//! member's [`Belief`] from its log on each poll and calls the cluster
//! stable once all of them agree on a term newer than a baseline.

use cabin_cluster::ClusterLifecycle;
use cabin_core::{
    ClusterSpec, HarnessConfig, HarnessError, LogSource, MemberIdentity, Result, Term,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::belief::Belief;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StableLeader {
    pub leader: MemberIdentity,
    pub term: Term,
    /// Members that started an election after the baseline term
    pub num_woken: usize,
}

/// Beliefs of the given members. Members without a log yet are left out.
pub async fn collect_beliefs(
    cluster: &ClusterSpec,
    members: &[MemberIdentity],
    logs: &dyn LogSource,
) -> Result<Vec<(MemberIdentity, Belief)>> {
    let mut beliefs = Vec::with_capacity(members.len());
    for member in members {
        match logs.read_log(member).await? {
            Some(log) => {
                let belief = Belief::from_log(member, &log, cluster)?;
                beliefs.push((member.clone(), belief));
            }
            None => debug!("No log for {} yet", member),
        }
    }
    Ok(beliefs)
}

/// Decides whether `beliefs` describe a cluster with a stable leader newer
/// than `baseline`.
///
/// Returns `Ok(None)` while the members disagree on the term or have not
/// moved past `baseline`. Members that agree on a term but not on its
/// leader are a safety violation.
pub fn assess(beliefs: &[(MemberIdentity, Belief)], baseline: Term) -> Result<Option<StableLeader>> {
    let term = match beliefs.first().and_then(|(_, belief)| belief.term) {
        Some(term) => term,
        None => return Ok(None),
    };
    let agreed = beliefs
        .iter()
        .all(|(_, belief)| belief.term == Some(term));
    if !agreed || term <= baseline {
        return Ok(None);
    }

    let leader = beliefs[0].1.leader.clone();
    if beliefs.iter().any(|(_, belief)| belief.leader != leader) {
        return Err(HarnessError::SafetyViolation {
            term,
            details: describe(beliefs),
        });
    }
    let leader = leader.ok_or_else(|| {
        HarnessError::internal(format!("term {} recorded without a leader", term))
    })?;

    let num_woken = beliefs
        .iter()
        .filter(|(_, belief)| belief.woke_after(baseline))
        .count();
    Ok(Some(StableLeader {
        leader,
        term,
        num_woken,
    }))
}

fn describe(beliefs: &[(MemberIdentity, Belief)]) -> String {
    beliefs
        .iter()
        .map(|(member, belief)| {
            let leader = belief
                .leader
                .as_ref()
                .map_or_else(|| "none".to_string(), |leader| leader.id.to_string());
            let term = belief
                .term
                .map_or_else(|| "none".to_string(), |term| term.to_string());
            format!("server {} follows {} in term {}", member.id, leader, term)
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Polls member logs until the running members agree on a leader.
#[derive(Clone)]
pub struct ConvergenceDetector {
    logs: Arc<dyn LogSource>,
    poll_interval: Duration,
    timeout: Option<Duration>,
}

impl ConvergenceDetector {
    pub fn new(logs: Arc<dyn LogSource>) -> Self {
        Self {
            logs,
            poll_interval: Duration::from_millis(250),
            timeout: None,
        }
    }

    pub fn from_config(logs: Arc<dyn LogSource>, config: &HarnessConfig) -> Self {
        Self {
            logs,
            poll_interval: config.detect_poll_interval,
            timeout: config.stable_leader_timeout,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// One pass over the currently running members.
    pub async fn check(
        &self,
        lifecycle: &ClusterLifecycle,
        baseline: Term,
    ) -> Result<Option<StableLeader>> {
        let running = lifecycle.running_members();
        let beliefs = collect_beliefs(lifecycle.cluster(), &running, self.logs.as_ref()).await?;
        assess(&beliefs, baseline)
    }

    /// Waits until the running members agree on a leader for a term after
    /// `baseline`.
    pub async fn await_stable_leader(
        &self,
        lifecycle: &ClusterLifecycle,
        baseline: Term,
    ) -> Result<StableLeader> {
        let clock = lifecycle.clock().clone();
        let start = clock.now();
        let mut polls = 0u64;

        loop {
            polls += 1;
            if let Some(stable) = self.check(lifecycle, baseline).await? {
                info!(
                    "Server {} is the leader in term {} ({} woken)",
                    stable.leader.id, stable.term, stable.num_woken
                );
                return Ok(stable);
            }
            debug!("No stable leader after term {} yet (poll {})", baseline, polls);

            if let Some(timeout) = self.timeout {
                if clock.now().saturating_sub(start) > timeout {
                    return Err(HarnessError::timeout(format!(
                        "stable leader after term {} not found within {:?}",
                        baseline, timeout
                    )));
                }
            }

            clock.sleep(self.poll_interval).await;
            lifecycle.sandbox().check_failures().await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: u64) -> MemberIdentity {
        MemberIdentity::new(id, format!("127.0.0.1:{}", 5253 + id))
    }

    fn belief(leader: u64, term: u64, wake: Option<u64>) -> Belief {
        Belief {
            leader: Some(member(leader)),
            term: Some(Term(term)),
            wake_term: wake.map(Term),
        }
    }

    #[test]
    fn test_agreement_is_stable() {
        let beliefs = vec![
            (member(1), belief(2, 5, Some(3))),
            (member(2), belief(2, 5, Some(5))),
            (member(3), belief(2, 5, None)),
        ];

        let stable = assess(&beliefs, Term(4)).unwrap().unwrap();
        assert_eq!(stable.leader, member(2));
        assert_eq!(stable.term, Term(5));
        assert_eq!(stable.num_woken, 1);
    }

    #[test]
    fn test_conflicting_leaders_in_one_term() {
        let beliefs = vec![
            (member(1), belief(1, 5, None)),
            (member(2), belief(2, 5, None)),
            (member(3), belief(1, 5, None)),
        ];

        match assess(&beliefs, Term(4)) {
            Err(HarnessError::SafetyViolation { term, details }) => {
                assert_eq!(term, Term(5));
                assert!(details.contains("server 2 follows 2 in term 5"));
            }
            other => panic!("expected a safety violation, got {:?}", other),
        }
    }

    #[test]
    fn test_not_stable() {
        // split terms
        let beliefs = vec![
            (member(1), belief(1, 3, None)),
            (member(2), belief(2, 5, None)),
        ];
        assert_eq!(assess(&beliefs, Term(4)).unwrap(), None);

        // not past the baseline
        let beliefs = vec![
            (member(1), belief(1, 4, None)),
            (member(2), belief(1, 4, None)),
        ];
        assert_eq!(assess(&beliefs, Term(4)).unwrap(), None);

        // one member has no opinion yet
        let beliefs = vec![
            (member(1), belief(1, 5, None)),
            (member(2), Belief::default()),
        ];
        assert_eq!(assess(&beliefs, Term(4)).unwrap(), None);

        assert_eq!(assess(&[], Term::ZERO).unwrap(), None);
    }

    #[test]
    fn test_disagreement_in_older_terms_is_not_checked() {
        let beliefs = vec![
            (member(1), belief(1, 3, None)),
            (member(2), belief(2, 3, None)),
        ];
        assert_eq!(assess(&beliefs, Term(4)).unwrap(), None);
    }
}
