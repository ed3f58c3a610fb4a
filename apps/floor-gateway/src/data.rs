//! Boundary for `request_data` types the realtime core does not answer itself.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::RealtimeResult;

/// Answers domain queries (production lines, jobs, OEE figures) on behalf of
/// a connected client.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// `Ok(None)` means the data type is not known to this source.
    async fn fetch(
        &self,
        data_type: &str,
        filters: Option<&Value>,
        user_id: &str,
    ) -> RealtimeResult<Option<Value>>;
}

/// Knows no data types.
pub struct NoDataSource;

#[async_trait]
impl DataSource for NoDataSource {
    async fn fetch(&self, _: &str, _: Option<&Value>, _: &str) -> RealtimeResult<Option<Value>> {
        Ok(None)
    }
}
