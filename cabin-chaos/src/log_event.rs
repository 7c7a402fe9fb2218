//! Decoding of the server log lines the detector cares about.

use cabin_core::{MemberId, Term};

const ALL_HAIL: &str = "All hail leader ";
const FOR_TERM: &str = " for term ";
const NOW_LEADER: &str = "Now leader for term ";
const RUNNING_FOR_ELECTION: &str = "Running for election in term ";

/// A log line that says something about leadership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogEvent {
    /// `All hail leader <id> for term <t>`: the writer follows `leader`
    LeaderElectedByVote { leader: MemberId, term: Term },
    /// `Now leader for term <t>`: the writer is the leader
    BecameLeader { term: Term },
    /// `Running for election in term <t>`: the writer's election timer fired
    ElectionStarted { term: Term },
}

impl LogEvent {
    /// Decodes one line. Patterns may appear anywhere in the line and are
    /// tried in declaration order.
    pub fn decode(line: &str) -> Option<LogEvent> {
        if let Some((leader, term)) = find_all_hail(line) {
            return Some(LogEvent::LeaderElectedByVote {
                leader: MemberId(leader),
                term: Term(term),
            });
        }
        if let Some(term) = find_number_after(line, NOW_LEADER) {
            return Some(LogEvent::BecameLeader { term: Term(term) });
        }
        find_number_after(line, RUNNING_FOR_ELECTION)
            .map(|term| LogEvent::ElectionStarted { term: Term(term) })
    }

    pub fn term(&self) -> Term {
        match self {
            LogEvent::LeaderElectedByVote { term, .. }
            | LogEvent::BecameLeader { term }
            | LogEvent::ElectionStarted { term } => *term,
        }
    }
}

/// Leading decimal digits of `text` and what follows them.
fn split_number(text: &str) -> Option<(u64, &str)> {
    let end = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    let value = text[..end].parse().ok()?;
    Some((value, &text[end..]))
}

fn find_number_after(line: &str, prefix: &str) -> Option<u64> {
    line.match_indices(prefix)
        .find_map(|(at, _)| split_number(&line[at + prefix.len()..]))
        .map(|(value, _)| value)
}

fn find_all_hail(line: &str) -> Option<(u64, u64)> {
    line.match_indices(ALL_HAIL).find_map(|(at, _)| {
        let (leader, rest) = split_number(&line[at + ALL_HAIL.len()..])?;
        let rest = rest.strip_prefix(FOR_TERM)?;
        let (term, _) = split_number(rest)?;
        Some((leader, term))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_events() {
        assert_eq!(
            LogEvent::decode("All hail leader 2 for term 7"),
            Some(LogEvent::LeaderElectedByVote {
                leader: MemberId(2),
                term: Term(7)
            })
        );
        assert_eq!(
            LogEvent::decode("Now leader for term 12"),
            Some(LogEvent::BecameLeader { term: Term(12) })
        );
        assert_eq!(
            LogEvent::decode("Running for election in term 3"),
            Some(LogEvent::ElectionStarted { term: Term(3) })
        );
    }

    #[test]
    fn test_patterns_match_inside_lines() {
        let line = "1431234567.123456 Server/RaftConsensus.cc:2210 in becomeLeader() \
                    NOTICE[1:evloop]: Now leader for term 5";
        assert_eq!(
            LogEvent::decode(line),
            Some(LogEvent::BecameLeader { term: Term(5) })
        );

        let line = "RaftConsensus.cc:1200 NOTICE: All hail leader 3 for term 9 (was 8)";
        assert_eq!(LogEvent::decode(line).map(|event| event.term()), Some(Term(9)));
    }

    #[test]
    fn test_unrelated_or_malformed_lines() {
        assert_eq!(LogEvent::decode(""), None);
        assert_eq!(LogEvent::decode("Starting up"), None);
        assert_eq!(LogEvent::decode("Now leader for term x"), None);
        assert_eq!(LogEvent::decode("All hail leader 2 in term 7"), None);
        assert_eq!(LogEvent::decode("All hail leader for term 7"), None);
    }

    #[test]
    fn test_all_hail_wins_over_other_patterns() {
        let line = "Running for election in term 4; All hail leader 1 for term 4";
        assert!(matches!(
            LogEvent::decode(line),
            Some(LogEvent::LeaderElectedByVote { .. })
        ));
    }
}
