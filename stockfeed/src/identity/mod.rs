//! Network identity management.
//!
//! When the upstream throttles or blocks the caller, the only cure is a new
//! public identity (IP address). This module holds the pieces involved:
//!
//! - [`IdentityRegistry`] remembers recently used identities so an exhausted
//!   one is not accepted again
//! - [`IdentityRotator`] performs the actual rotation (opaque to the rest of
//!   the service)
//! - [`RotationCoordinator`] serializes rotations and bounds their retries

mod coordinator;
mod registry;
mod rotator;

pub use coordinator::{RotationCoordinator, RotationPolicy, RotationResult};
pub use registry::{IdentityRegistry, DEFAULT_REGISTRY_CAPACITY};
pub use rotator::{CommandRotator, DisabledRotator, IdentityRotator, RotationOutcome};
