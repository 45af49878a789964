//! Metadata and configuration error types

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for metadata results
pub type Result<T> = std::result::Result<T, MetadataError>;

/// Errors that can occur while building or parsing package metadata
#[derive(Error, Debug)]
pub enum MetadataError {
    /// A package, service, interface, qualifier or reference name is invalid
    #[error("Invalid {kind} name: {name:?}")]
    InvalidName {
        /// What kind of name was rejected
        kind: &'static str,
        /// The rejected name
        name: String,
    },

    /// A reference declaration requests all implementations and a qualifier at once
    #[error("Reference to interface '{interface}' sets both 'all' and a qualifier")]
    ConflictingReference {
        /// Interface named by the conflicting reference
        interface: String,
    },

    /// Two services in the same package share a name
    #[error("Duplicate service '{service}' in package '{package}'")]
    DuplicateService {
        /// Package declaring the duplicate
        package: String,
        /// The duplicated service name
        service: String,
    },

    /// A service declares two references with the same name
    #[error("Duplicate reference '{reference}' in service '{service}'")]
    DuplicateReference {
        /// Service declaring the duplicate
        service: String,
        /// The duplicated reference name
        reference: String,
    },

    /// A service claims the same provided interface twice
    #[error("Service '{service}' provides interface '{interface}' more than once")]
    DuplicateProvided {
        /// Service declaring the duplicate
        service: String,
        /// The duplicated interface, including its qualifier if any
        interface: String,
    },

    /// A package declares the same property twice
    #[error("Duplicate property '{property}' in package '{package}'")]
    DuplicateProperty {
        /// Package declaring the duplicate
        package: String,
        /// The duplicated property name
        property: String,
    },

    /// A required property has no value after merging defaults and overrides
    #[error("Missing required property '{property}' in package '{package}'")]
    MissingProperty {
        /// Package declaring the property
        package: String,
        /// Name of the missing property
        property: String,
    },

    /// An override targets a property the package never declared
    #[error("Unknown property '{property}' overridden in package '{package}'")]
    UnknownProperty {
        /// Package the override targets
        package: String,
        /// The undeclared property name
        property: String,
    },

    /// No factory was registered for a declared service
    #[error("No factory registered for service '{service}'")]
    UnknownFactory {
        /// Id of the service without a factory
        service: String,
    },

    /// A factory was registered twice for the same service
    #[error("Factory already registered for service '{service}'")]
    DuplicateFactory {
        /// Id of the doubly-registered service
        service: String,
    },

    /// Application metadata failed to parse as TOML
    #[error("Failed to parse TOML metadata: {error}")]
    ParseToml {
        /// The underlying TOML error
        #[source]
        error: toml::de::Error,
    },

    /// Application metadata failed to parse as JSON
    #[error("Failed to parse JSON metadata: {error}")]
    ParseJson {
        /// The underlying JSON error
        #[source]
        error: serde_json::Error,
    },

    /// I/O error while reading a metadata file
    #[error("IO error reading metadata {path}: {error}")]
    Io {
        /// Path to the file that failed to read
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        error: std::io::Error,
    },
}
