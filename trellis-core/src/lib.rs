//! Static metadata model for the Trellis service layer
//!
//! This crate holds everything the layer knows before anything runs:
//! interface specifications, service and package representations, resolved
//! properties, package message access, and the declarative metadata layer
//! that parses TOML/JSON application declarations and binds them to
//! registered factories.
//!
//! Graph verification and runtime orchestration live in `trellis-runtime`.

pub mod error;
pub mod interface;
pub mod intl;
pub mod metadata;
pub mod package;
pub mod properties;
pub mod service;

pub use error::{MetadataError, Result};
pub use interface::{
    validate_name, InterfaceSpec, ProvidedInterface, ServiceDependency, ID_SEPARATOR,
};
pub use intl::PackageIntl;
pub use metadata::{AppMetadata, FactoryRegistry};
pub use package::{PackageBuilder, PackageRepr, ServiceDef};
pub use properties::{resolve_properties, Properties, PropertySpec};
pub use service::{
    CreateServiceFn, ProvideService, ReferenceValue, Service, ServiceCtx, ServiceError,
    ServiceFactory, ServiceId, ServiceRepr,
};

/// Prelude module for common imports
pub mod prelude {
    pub use crate::{
        InterfaceSpec, MetadataError, PackageBuilder, PackageIntl, PackageRepr, Properties,
        PropertySpec, ProvideService, Service, ServiceCtx, ServiceDef, ServiceError,
        ServiceFactory, ServiceId,
    };
}
