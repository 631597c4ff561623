use async_trait::async_trait;

use crate::error::{CommandError, FetchError};
use crate::models::{Command, CommandOutcome, Resource, Snapshot};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FetchParams {
    pub ranking_limit: usize,
}

/// A source of snapshots and a sink for commands: the live panel API or the
/// offline demo.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    async fn fetch(&self, resource: Resource, params: FetchParams) -> Result<Snapshot, FetchError>;

    async fn execute(&self, command: &Command) -> Result<CommandOutcome, CommandError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str;
}
