//! Verification and service layer error types

use thiserror::Error;
use trellis_core::{ServiceError, ServiceId};

/// Type alias for service layer results
pub type Result<T> = std::result::Result<T, LayerError>;

/// Errors detected while verifying the dependency graph, before any
/// service is constructed
#[derive(Error, Debug)]
pub enum VerifyError {
    /// Two packages share a name
    #[error("Duplicate package name: {package}")]
    DuplicatePackage {
        /// The duplicated package name
        package: String,
    },

    /// Two services claim the same qualified interface
    #[error("Duplicate registration for interface '{interface}' with qualifier '{qualifier}': {first} and {second}")]
    DuplicateInterface {
        /// The interface name
        interface: String,
        /// The qualifier both services claim
        qualifier: String,
        /// First claimant
        first: ServiceId,
        /// Second claimant
        second: ServiceId,
    },

    /// A required reference has no implementation
    #[error("No implementation for reference '{reference}' required by {required_by}")]
    Unimplemented {
        /// The unresolvable reference
        reference: String,
        /// Who requires it
        required_by: String,
    },

    /// An unqualified single-implementation reference has several candidates
    #[error("Ambiguous reference '{reference}' required by {required_by}: candidates [{}]", candidate_list(.candidates))]
    Ambiguous {
        /// The ambiguous reference
        reference: String,
        /// Who requires it
        required_by: String,
        /// Every matching service
        candidates: Vec<ServiceId>,
    },

    /// The dependency graph contains a cycle
    #[error("Circular dependency detected: {cycle}")]
    CircularDependency {
        /// The cycle path
        cycle: String,
    },
}

/// Errors surfaced by service layer operations
#[derive(Error, Debug)]
pub enum LayerError {
    /// The layer has not been started yet
    #[error("Service layer is not started")]
    NotStarted,

    /// The layer was already started once
    #[error("Service layer is already started")]
    AlreadyStarted,

    /// The layer has been destroyed
    #[error("Service layer has been destroyed")]
    Destroyed,

    /// The requesting package is not part of the layer
    #[error("Unknown package: {package}")]
    UnknownPackage {
        /// The unknown package name
        package: String,
    },

    /// The requesting package never declared this dependency
    #[error("Package '{package}' does not declare a dependency on '{reference}'")]
    UndeclaredDependency {
        /// The requesting package
        package: String,
        /// The undeclared reference
        reference: String,
    },

    /// No implementation exists for the requested reference
    #[error("No implementation found for reference '{reference}'")]
    Unimplemented {
        /// The unresolvable reference
        reference: String,
    },

    /// Several implementations match an unqualified single request
    #[error("Ambiguous reference '{reference}': candidates [{}]", candidate_list(.candidates))]
    Ambiguous {
        /// The ambiguous reference
        reference: String,
        /// Every matching service
        candidates: Vec<ServiceId>,
    },

    /// A service factory failed
    #[error("Failed to construct service '{service}': {source}")]
    ConstructionFailed {
        /// The service whose factory failed
        service: ServiceId,
        /// The factory error
        #[source]
        source: ServiceError,
    },

    /// A service teardown hook failed
    #[error("Failed to destroy service '{service}': {source}")]
    DestructionFailed {
        /// The service whose teardown failed
        service: ServiceId,
        /// The teardown error
        #[source]
        source: ServiceError,
    },

    /// Construction re-entered a service that is already being constructed
    #[error("Service '{service}' is already being constructed (runtime dependency cycle)")]
    ConstructionCycle {
        /// The re-entered service
        service: ServiceId,
    },

    /// Graph verification failed
    #[error(transparent)]
    Verify(#[from] VerifyError),

    /// A bookkeeping invariant was violated
    #[error("Internal service layer error: {message}")]
    Internal {
        /// Description of the violated invariant
        message: String,
    },
}

/// Errors collected during a destroy pass.
///
/// The pass always runs to completion; this carries every failure it
/// encountered on the way.
#[derive(Error, Debug)]
#[error("Service teardown completed with {} error(s)", .0.len())]
pub struct DestroyErrors(pub Vec<LayerError>);

fn candidate_list(candidates: &[ServiceId]) -> String {
    candidates
        .iter()
        .map(|id| id.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
