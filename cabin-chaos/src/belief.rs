use cabin_core::{ClusterSpec, HarnessError, MemberIdentity, Result, Term};
use serde::Serialize;

use crate::log_event::LogEvent;

/// What one member believes about leadership, according to its log so far.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Belief {
    pub leader: Option<MemberIdentity>,
    pub term: Option<Term>,
    /// Last term in which this member started an election
    pub wake_term: Option<Term>,
}

impl Belief {
    /// Replays a full log. The latest leadership line sets both leader and
    /// term.
    pub fn from_log(owner: &MemberIdentity, log: &str, cluster: &ClusterSpec) -> Result<Self> {
        let mut belief = Belief::default();
        for line in log.lines() {
            match LogEvent::decode(line) {
                Some(LogEvent::LeaderElectedByVote { leader, term }) => {
                    let leader = cluster.resolve(leader).map_err(|e| {
                        HarnessError::parse(format!("{} for term {} in log of {}", e, term, owner))
                    })?;
                    belief.leader = Some(leader.clone());
                    belief.term = Some(term);
                }
                Some(LogEvent::BecameLeader { term }) => {
                    belief.leader = Some(owner.clone());
                    belief.term = Some(term);
                }
                Some(LogEvent::ElectionStarted { term }) => {
                    belief.wake_term = Some(term);
                }
                None => {}
            }
        }
        Ok(belief)
    }

    pub fn woke_after(&self, baseline: Term) -> bool {
        self.wake_term.map_or(false, |term| term > baseline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster() -> ClusterSpec {
        ClusterSpec::with_cluster_uuid(
            (1..=3)
                .map(|id| MemberIdentity::new(id, format!("127.0.0.1:{}", 5253 + id)))
                .collect(),
            "testtest",
        )
        .unwrap()
    }

    #[test]
    fn test_last_leadership_line_wins() {
        let cluster = cluster();
        let owner = cluster.members()[0].clone();
        let log = "\
Running for election in term 2
Now leader for term 2
All hail leader 3 for term 4
Running for election in term 5
";
        let belief = Belief::from_log(&owner, log, &cluster).unwrap();
        assert_eq!(belief.leader, Some(cluster.members()[2].clone()));
        assert_eq!(belief.term, Some(Term(4)));
        assert_eq!(belief.wake_term, Some(Term(5)));
        assert!(belief.woke_after(Term(4)));
        assert!(!belief.woke_after(Term(5)));
    }

    #[test]
    fn test_self_leadership() {
        let cluster = cluster();
        let owner = cluster.members()[1].clone();
        let belief = Belief::from_log(&owner, "Now leader for term 6\n", &cluster).unwrap();
        assert_eq!(belief.leader, Some(owner));
        assert_eq!(belief.term, Some(Term(6)));
        assert_eq!(belief.wake_term, None);
    }

    #[test]
    fn test_empty_log() {
        let cluster = cluster();
        let belief = Belief::from_log(&cluster.members()[0], "", &cluster).unwrap();
        assert_eq!(belief, Belief::default());
    }

    #[test]
    fn test_unknown_leader_is_an_error() {
        let cluster = cluster();
        let result = Belief::from_log(&cluster.members()[0], "All hail leader 9 for term 2", &cluster);
        let err = result.unwrap_err();
        assert!(matches!(err, HarnessError::Parse { .. }));
        assert!(err.to_string().contains("Server 9 is not a member"));
    }
}
