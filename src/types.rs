//! Change notifications emitted by the container runtime.
//!
//! The event loop does not act on the payload beyond logging; every
//! notification triggers a fresh snapshot, so a missed detail can never
//! leave the hosts file stale.

/// A change in the container/network population.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// A container entered the running state.
    ContainerStarted { name: String },
    /// A container stopped, died, was killed or destroyed.
    ContainerStopped { name: String },
    /// A container was renamed in place.
    ContainerRenamed { name: String },
    /// A container attached to or detached from a network.
    NetworkChanged { network: String },
    /// The event transport (re)connected; state may have drifted while
    /// it was down.
    Resync,
}
