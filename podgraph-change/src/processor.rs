//! The shared stage contract

use crate::buffer::ChangeRequestTxBuffer;
use crate::error::Result;
use async_trait::async_trait;

/// One stage of the change pipeline
///
/// Stages run strictly in sequence against the same buffer. A stage may add
/// and remove records; returning an error aborts the remaining chain.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Stage name used in logs
    fn name(&self) -> &str;

    async fn process(&self, buffer: &mut ChangeRequestTxBuffer) -> Result<()>;
}
