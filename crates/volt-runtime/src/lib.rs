pub mod cluster;
pub mod director;
pub mod overwatch;
pub mod status;
pub mod store;

pub use cluster::{Cluster, ClusterSettings, DirectorState, MemberRegistry};
pub use director::{Director, DistributeRequest};
pub use overwatch::{FailureKind, FailureReport, Overwatch, OverwatchHandle};
pub use status::{serve as serve_status, status_router, StatusState};
pub use store::{connect, PgStore};
