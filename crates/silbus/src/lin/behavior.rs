//! Trivial/detailed behavior selection
//!
//! A controller starts in trivial behavior and is self-sufficient. When
//! service discovery announces a network simulator on the controller's
//! network, every outbound message path is rewired to target that peer; when
//! the simulator leaves, the controller falls back to trivial behavior. The
//! switch is a tagged enum rather than a dispatch chain; the active variant
//! is swapped on discovery events.

use crate::participant::ServiceDescriptor;

/// The implementation currently backing a LIN controller
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) enum SimulationBehavior {
    /// Transmissions are synthesized locally against an idealized bus
    #[default]
    Trivial,
    /// An external network simulator owns the bus semantics
    Detailed {
        /// The simulator's service; sole peer for bus traffic
        simulated_link: ServiceDescriptor,
    },
}

impl SimulationBehavior {
    pub(crate) fn is_trivial(&self) -> bool {
        matches!(self, Self::Trivial)
    }

    pub(crate) fn is_detailed(&self) -> bool {
        matches!(self, Self::Detailed { .. })
    }
}
