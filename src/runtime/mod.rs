use crate::error::Result;
use crate::mapping::ContainerNetworkRecord;
use crate::types::ChangeEvent;
use async_trait::async_trait;
use tokio::sync::mpsc;

pub mod docker;
pub use docker::DockerRuntime;

/// Source of container network state: a point-in-time snapshot plus a
/// lazy stream of change notifications.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Lists the network identities of all currently running containers.
    async fn snapshot(&self) -> Result<Vec<ContainerNetworkRecord>>;

    /// Forwards change notifications to `tx` until the receiver is
    /// dropped (cancellation) or the transport fails unrecoverably.
    async fn subscribe(&self, tx: mpsc::Sender<ChangeEvent>) -> Result<()>;
}
