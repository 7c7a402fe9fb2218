use rand::Rng;
use std::collections::HashSet;

use crate::{HarnessError, MemberId, MemberIdentity, Result};

/// Static description of the cluster under test.
///
/// The first member is the bootstrap member: it is started alone with
/// `--bootstrap` and leads until the cluster is reconfigured to the full
/// membership.
#[derive(Debug, Clone)]
pub struct ClusterSpec {
    members: Vec<MemberIdentity>,
    cluster_uuid: String,
    quorum_size: usize,
}

impl ClusterSpec {
    pub fn new(members: Vec<MemberIdentity>) -> Result<Self> {
        Self::with_cluster_uuid(members, random_cluster_uuid(&mut rand::thread_rng()))
    }

    pub fn with_cluster_uuid(
        members: Vec<MemberIdentity>,
        cluster_uuid: impl Into<String>,
    ) -> Result<Self> {
        if members.is_empty() {
            return Err(HarnessError::config("cluster needs at least one server"));
        }

        let mut seen = HashSet::new();
        for member in &members {
            if !seen.insert(member.id) {
                return Err(HarnessError::config(format!(
                    "server id {} is used more than once",
                    member.id
                )));
            }
        }

        let quorum_size = (members.len() / 2) + 1;
        Ok(Self {
            members,
            cluster_uuid: cluster_uuid.into(),
            quorum_size,
        })
    }

    /// Parses `id=address` entries separated by commas. Entries without an
    /// explicit id get their 1-based position.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cabin_core::ClusterSpec;
    ///
    /// let cluster = ClusterSpec::from_host_list("127.0.0.1:5254,7=127.0.0.1:5255").unwrap();
    /// assert_eq!(cluster.members()[0].id.value(), 1);
    /// assert_eq!(cluster.members()[1].id.value(), 7);
    /// ```
    pub fn from_host_list(list: &str) -> Result<Self> {
        let mut members = Vec::new();
        for (position, entry) in list
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .enumerate()
        {
            let member = match entry.split_once('=') {
                Some((id, address)) => {
                    let id: u64 = id.trim().parse().map_err(|_| {
                        HarnessError::parse(format!("invalid server id in '{}'", entry))
                    })?;
                    MemberIdentity::new(id, address.trim())
                }
                None => MemberIdentity::new(position as u64 + 1, entry),
            };
            members.push(member);
        }
        Self::new(members)
    }

    pub fn members(&self) -> &[MemberIdentity] {
        &self.members
    }

    pub fn bootstrap_member(&self) -> &MemberIdentity {
        &self.members[0]
    }

    pub fn member(&self, id: MemberId) -> Option<&MemberIdentity> {
        self.members.iter().find(|member| member.id == id)
    }

    /// Like [`member`](Self::member) but unknown ids are an error.
    pub fn resolve(&self, id: MemberId) -> Result<&MemberIdentity> {
        self.member(id)
            .ok_or(HarnessError::UnknownMember { member_id: id })
    }

    pub fn cluster_uuid(&self) -> &str {
        &self.cluster_uuid
    }

    pub fn quorum_size(&self) -> usize {
        self.quorum_size
    }

    pub fn has_quorum(&self, running: usize) -> bool {
        running >= self.quorum_size
    }

    pub fn total_members(&self) -> usize {
        self.members.len()
    }

    /// All addresses, comma-joined, in the form client tools expect for
    /// `--cluster=`.
    pub fn addresses(&self) -> String {
        self.members
            .iter()
            .map(|member| member.address.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Eight random lowercase letters.
pub fn random_cluster_uuid<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..8)
        .map(|_| char::from(b'a' + rng.gen_range(0..26u8)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn members(n: u64) -> Vec<MemberIdentity> {
        (1..=n)
            .map(|id| MemberIdentity::new(id, format!("127.0.0.1:{}", 5253 + id)))
            .collect()
    }

    #[test]
    fn test_quorum_size() {
        assert_eq!(ClusterSpec::new(members(1)).unwrap().quorum_size(), 1);
        assert_eq!(ClusterSpec::new(members(3)).unwrap().quorum_size(), 2);
        assert_eq!(ClusterSpec::new(members(4)).unwrap().quorum_size(), 3);
        assert_eq!(ClusterSpec::new(members(5)).unwrap().quorum_size(), 3);
    }

    #[test]
    fn test_rejects_empty_and_duplicates() {
        assert!(ClusterSpec::new(Vec::new()).is_err());

        let duplicated = vec![
            MemberIdentity::new(1, "a:1"),
            MemberIdentity::new(1, "b:1"),
        ];
        assert!(matches!(
            ClusterSpec::new(duplicated),
            Err(HarnessError::Config { .. })
        ));
    }

    #[test]
    fn test_resolve() {
        let cluster = ClusterSpec::new(members(3)).unwrap();
        assert_eq!(cluster.resolve(MemberId::new(2)).unwrap().address, "127.0.0.1:5255");
        assert!(matches!(
            cluster.resolve(MemberId::new(9)),
            Err(HarnessError::UnknownMember { .. })
        ));
    }

    #[test]
    fn test_from_host_list() {
        let cluster = ClusterSpec::from_host_list(" 10.0.0.1:5254 , 10.0.0.2:5254,").unwrap();
        assert_eq!(cluster.total_members(), 2);
        assert_eq!(cluster.bootstrap_member().address, "10.0.0.1:5254");
        assert_eq!(cluster.addresses(), "10.0.0.1:5254,10.0.0.2:5254");

        assert!(ClusterSpec::from_host_list("x=10.0.0.1:5254").is_err());
    }

    #[test]
    fn test_random_cluster_uuid() {
        let mut rng = StdRng::seed_from_u64(7);
        let uuid = random_cluster_uuid(&mut rng);
        assert_eq!(uuid.len(), 8);
        assert!(uuid.chars().all(|c| c.is_ascii_lowercase()));
    }
}
