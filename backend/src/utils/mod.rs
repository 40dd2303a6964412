pub mod collection_ext;
pub mod error;

pub use collection_ext::{OrderedMap, push_capped, push_unique};
pub use error::{ApiError, ApiResult};
