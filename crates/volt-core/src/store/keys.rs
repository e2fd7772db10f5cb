//! Well-known keys.

use crate::cluster::MemberId;

pub const CLUSTER_DIR: &str = "cluster";
pub const DIRECTOR_KEY: &str = "cluster/director";
pub const MEMBERS_DIR: &str = "cluster/members";
pub const MONITOR_DIR: &str = "monitor";
pub const HOST_DIR: &str = "host";

/// Directories that must exist before any component starts.
pub const REQUIRED_DIRS: [&str; 4] = [CLUSTER_DIR, MEMBERS_DIR, MONITOR_DIR, HOST_DIR];

const STATUS: &str = "status";
const CONFIG: &str = "config";

pub fn member_dir(id: &MemberId) -> String {
    format!("{}/{}", MEMBERS_DIR, id)
}

pub fn member_status_key(id: &MemberId) -> String {
    format!("{}/{}/{}", MEMBERS_DIR, id, STATUS)
}

pub fn member_config_dir(id: &MemberId) -> String {
    format!("{}/{}/{}", MEMBERS_DIR, id, CONFIG)
}

/// Key of the check reference assigning `job_key` to a member.
///
/// The job key is hex encoded so it fits in a single path segment.
pub fn check_reference_key(id: &MemberId, job_key: &str) -> String {
    format!("{}/{}", member_config_dir(id), hex::encode(job_key))
}

/// Last path segment.
pub fn basename(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// Member ID if `key` is exactly `cluster/members/<id>`.
pub fn member_id_from_key(key: &str) -> Option<MemberId> {
    direct_child(MEMBERS_DIR, key).map(MemberId::from)
}

/// Member ID if `key` is exactly `cluster/members/<id>/status`.
pub fn member_id_from_status_key(key: &str) -> Option<MemberId> {
    let rest = key.strip_prefix(MEMBERS_DIR)?.strip_prefix('/')?;
    let id = rest.strip_suffix(STATUS)?.strip_suffix('/')?;
    if id.is_empty() || id.contains('/') {
        None
    } else {
        Some(MemberId::from(id))
    }
}

/// Job name if `key` is exactly `monitor/<job>`.
pub fn job_name(key: &str) -> Option<&str> {
    direct_child(MONITOR_DIR, key)
}

fn direct_child<'a>(parent: &str, key: &'a str) -> Option<&'a str> {
    let rest = key.strip_prefix(parent)?.strip_prefix('/')?;
    if rest.is_empty() || rest.contains('/') {
        None
    } else {
        Some(rest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_keys() {
        let id = MemberId::from("ab12cd34");
        assert_eq!(member_dir(&id), "cluster/members/ab12cd34");
        assert_eq!(member_status_key(&id), "cluster/members/ab12cd34/status");
        assert_eq!(
            check_reference_key(&id, "monitor/web"),
            "cluster/members/ab12cd34/config/6d6f6e69746f722f776562"
        );
    }

    #[test]
    fn test_member_id_from_key() {
        assert_eq!(
            member_id_from_key("cluster/members/m1"),
            Some(MemberId::from("m1"))
        );
        assert_eq!(member_id_from_key("cluster/members/m1/status"), None);
        assert_eq!(member_id_from_key("cluster/members"), None);
        assert_eq!(member_id_from_key("cluster/director"), None);
    }

    #[test]
    fn test_member_id_from_status_key() {
        assert_eq!(
            member_id_from_status_key("cluster/members/m1/status"),
            Some(MemberId::from("m1"))
        );
        assert_eq!(member_id_from_status_key("cluster/members/status"), None);
        assert_eq!(member_id_from_status_key("cluster/members/m1"), None);
        assert_eq!(member_id_from_status_key("cluster/members/m1/config/status"), None);
    }

    #[test]
    fn test_job_name() {
        assert_eq!(job_name("monitor/web"), Some("web"));
        assert_eq!(job_name("monitor"), None);
        assert_eq!(job_name("monitor/web/extra"), None);
        assert_eq!(basename("monitor/web"), "web");
    }
}
