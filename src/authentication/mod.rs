mod middleware;

pub(crate) use middleware::{require_api_key, ApiKey};
