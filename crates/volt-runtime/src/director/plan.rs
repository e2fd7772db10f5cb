use std::collections::BTreeMap;

use volt_core::cluster::MemberId;
use volt_core::{Result, VoltError};

/// Group of members without tags. Jobs without a member tag go here.
pub const UNTAGGED: &str = "!UNTAGGED!";

/// Job keys assigned to each member.
pub type Assignment = BTreeMap<MemberId, Vec<String>>;

/// A live member and the tags it advertises.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub id: MemberId,
    pub tags: Vec<String>,
}

impl Candidate {
    pub fn new(id: MemberId, tags: Vec<String>) -> Self {
        Self { id, tags }
    }

    pub fn untagged(id: MemberId) -> Self {
        Self::new(id, Vec::new())
    }
}

/// A job key and the member tag it requires, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedJob {
    pub key: String,
    pub member_tag: Option<String>,
}

impl PlannedJob {
    pub fn new(key: impl Into<String>, member_tag: Option<String>) -> Self {
        Self {
            key: key.into(),
            member_tag,
        }
    }

    pub fn untagged(key: impl Into<String>) -> Self {
        Self::new(key, None)
    }

    fn group(&self) -> &str {
        self.member_tag
            .as_deref()
            .filter(|tag| !tag.is_empty())
            .unwrap_or(UNTAGGED)
    }
}

/// Output of [`plan`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    /// Every member has an entry, possibly empty.
    pub assignment: Assignment,
    /// Jobs no member can take, sorted.
    pub orphaned: Vec<String>,
}

/// Split `jobs` across `members`, one tag group at a time.
///
/// Members are grouped by tag (untagged members form the [`UNTAGGED`]
/// group; a member with several tags joins each of them). Jobs go to the
/// group named by their member tag. Within a group, members and jobs are
/// sorted, each member gets `n / m` consecutive jobs and the last member
/// also takes the remainder. Jobs whose group has no members are orphaned.
pub fn plan(members: &[Candidate], jobs: &[PlannedJob]) -> Result<Plan> {
    if members.is_empty() {
        return Err(VoltError::NoMembers);
    }

    let mut assignment = Assignment::new();
    let mut groups: BTreeMap<&str, Vec<MemberId>> = BTreeMap::new();
    for member in members {
        assignment.entry(member.id.clone()).or_default();

        let mut tagged = false;
        for tag in member.tags.iter().filter(|t| !t.is_empty()) {
            groups.entry(tag.as_str()).or_default().push(member.id.clone());
            tagged = true;
        }
        if !tagged {
            groups.entry(UNTAGGED).or_default().push(member.id.clone());
        }
    }

    // Last definition of a key wins if it is listed twice.
    let mut job_groups: BTreeMap<&str, &str> = BTreeMap::new();
    for job in jobs {
        job_groups.insert(job.key.as_str(), job.group());
    }
    let mut jobs_by_group: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for (key, group) in job_groups {
        jobs_by_group.entry(group).or_default().push(key.to_string());
    }

    let mut orphaned = Vec::new();
    for (group, keys) in jobs_by_group {
        let Some(group_members) = groups.get_mut(group) else {
            orphaned.extend(keys);
            continue;
        };
        group_members.sort();
        group_members.dedup();

        for (member, share) in split(group_members, keys) {
            assignment.entry(member).or_default().extend(share);
        }
    }

    for share in assignment.values_mut() {
        share.sort();
    }
    orphaned.sort();

    Ok(Plan {
        assignment,
        orphaned,
    })
}

/// Equal split over sorted `members` and `jobs`; the remainder goes last.
fn split(members: &[MemberId], jobs: Vec<String>) -> Vec<(MemberId, Vec<String>)> {
    let per_member = jobs.len() / members.len();
    let last = members.len() - 1;
    let mut remaining = jobs.into_iter();

    members
        .iter()
        .enumerate()
        .map(|(i, member)| {
            let share: Vec<String> = if i == last {
                remaining.by_ref().collect()
            } else {
                remaining.by_ref().take(per_member).collect()
            };
            (member.clone(), share)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn members(n: usize) -> Vec<Candidate> {
        (1..=n)
            .map(|i| Candidate::untagged(MemberId::new(format!("m{:02}", i))))
            .collect()
    }

    fn jobs(n: usize) -> Vec<PlannedJob> {
        (0..n)
            .map(|i| PlannedJob::untagged(format!("monitor/job{:03}", i)))
            .collect()
    }

    fn tagged(id: &str, tags: &[&str]) -> Candidate {
        Candidate::new(
            MemberId::from(id),
            tags.iter().map(|t| t.to_string()).collect(),
        )
    }

    fn job(key: &str, tag: Option<&str>) -> PlannedJob {
        PlannedJob::new(key, tag.map(str::to_string))
    }

    fn counts(plan: &Plan) -> Vec<usize> {
        plan.assignment.values().map(Vec::len).collect()
    }

    #[test]
    fn test_three_members_ten_jobs() {
        let plan = plan(&members(3), &jobs(10)).unwrap();
        assert_eq!(counts(&plan), vec![3, 3, 4]);
        assert!(plan.orphaned.is_empty());
    }

    #[test]
    fn test_no_members() {
        assert!(matches!(plan(&[], &jobs(3)), Err(VoltError::NoMembers)));
        assert!(matches!(plan(&[], &[]), Err(VoltError::NoMembers)));
    }

    #[test]
    fn test_no_jobs() {
        let plan = plan(&members(2), &[]).unwrap();
        assert_eq!(plan.assignment.len(), 2);
        assert!(plan.assignment.values().all(Vec::is_empty));
    }

    #[test]
    fn test_fewer_jobs_than_members() {
        let plan = plan(&members(4), &jobs(2)).unwrap();
        assert_eq!(counts(&plan), vec![0, 0, 0, 2]);
    }

    #[test]
    fn test_every_job_assigned_once() {
        for m in 1..=7 {
            for n in 0..=40 {
                let plan = plan(&members(m), &jobs(n)).unwrap();
                let per = n / m;

                let mut all: Vec<&String> = plan.assignment.values().flatten().collect();
                assert_eq!(all.len(), n, "m={} n={}", m, n);
                all.sort();
                all.dedup();
                assert_eq!(all.len(), n, "duplicate assignment m={} n={}", m, n);

                let counts = counts(&plan);
                for count in &counts[..m - 1] {
                    assert_eq!(*count, per);
                }
                assert_eq!(counts[m - 1], n - per * (m - 1));
            }
        }
    }

    #[test]
    fn test_input_order_does_not_matter() {
        let mut shuffled = members(3);
        shuffled.reverse();
        let mut shuffled_jobs = jobs(5);
        shuffled_jobs.reverse();

        assert_eq!(
            plan(&shuffled, &shuffled_jobs).unwrap(),
            plan(&members(3), &jobs(5)).unwrap()
        );
    }

    #[test]
    fn test_tagged_jobs_stay_in_their_group() {
        let members = vec![
            tagged("m1", &["dc1"]),
            tagged("m2", &["dc1"]),
            tagged("m3", &["dc2"]),
            tagged("m4", &[]),
        ];
        let jobs = vec![
            job("monitor/a", Some("dc1")),
            job("monitor/b", Some("dc1")),
            job("monitor/c", Some("dc1")),
            job("monitor/d", Some("dc2")),
            job("monitor/e", None),
            job("monitor/f", Some("")),
        ];

        let plan = plan(&members, &jobs).unwrap();
        assert_eq!(plan.assignment[&MemberId::from("m1")], vec!["monitor/a"]);
        assert_eq!(
            plan.assignment[&MemberId::from("m2")],
            vec!["monitor/b", "monitor/c"]
        );
        assert_eq!(plan.assignment[&MemberId::from("m3")], vec!["monitor/d"]);
        assert_eq!(
            plan.assignment[&MemberId::from("m4")],
            vec!["monitor/e", "monitor/f"]
        );
        assert!(plan.orphaned.is_empty());
    }

    #[test]
    fn test_unmatched_jobs_are_orphaned() {
        let members = vec![tagged("m1", &["dc1"])];
        let jobs = vec![
            job("monitor/a", Some("dc1")),
            job("monitor/b", Some("dc9")),
            job("monitor/c", None),
        ];

        let plan = plan(&members, &jobs).unwrap();
        assert_eq!(plan.assignment[&MemberId::from("m1")], vec!["monitor/a"]);
        assert_eq!(plan.orphaned, vec!["monitor/b", "monitor/c"]);
    }

    #[test]
    fn test_member_with_several_tags_serves_each_group() {
        let members = vec![tagged("m1", &["dc1", "linux"]), tagged("m2", &["linux"])];
        let jobs = vec![
            job("monitor/a", Some("dc1")),
            job("monitor/b", Some("linux")),
            job("monitor/c", Some("linux")),
        ];

        let plan = plan(&members, &jobs).unwrap();
        assert_eq!(
            plan.assignment[&MemberId::from("m1")],
            vec!["monitor/a", "monitor/b"]
        );
        assert_eq!(plan.assignment[&MemberId::from("m2")], vec!["monitor/c"]);
    }

    #[test]
    fn test_tagged_member_without_jobs_gets_empty_share() {
        let plan = plan(&[tagged("m1", &["dc1"])], &jobs(2)).unwrap();
        assert_eq!(plan.assignment[&MemberId::from("m1")], Vec::<String>::new());
        assert_eq!(plan.orphaned.len(), 2);
    }
}
