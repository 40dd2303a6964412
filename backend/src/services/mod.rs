pub mod couchbase_client;
pub mod query_analyzer;
pub mod session_store;

pub use couchbase_client::{ClusterTarget, CouchbaseQueryClient, PingResult, QueryService};
pub use session_store::{SessionInfo, SessionSource, SessionStore};
