mod director;
mod member;
mod stats;

pub use director::{DirectorRecord, ObservedDirector};
pub use member::{MemberId, MemberStatus};
pub use stats::ClusterStats;
