//! ResultApplier contract: writes a finished Request's messages into the
//! host document.

use async_trait::async_trait;

use super::types::AgentMessage;

pub use super::errors::ApplyError;

/// Applies aggregated stage output to the host document.
///
/// Implementations must be atomic: either every write derived from
/// `messages` becomes visible, or none does. Messages arrive in stage
/// order, so query data precedes the analysis that overlays it.
#[async_trait]
pub trait ResultApplier: Send + Sync {
    async fn apply_results(&self, messages: &[AgentMessage]) -> Result<(), ApplyError>;
}
