//! Runtime half of the Trellis service layer
//!
//! Takes the packages described with `trellis-core`, verifies their
//! dependency graph and orchestrates service lifecycles: exactly-once
//! startup, shared instances with reference counting, and
//! consumer-before-provider teardown.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use trellis_core::prelude::*;
//! use trellis_runtime::{GetServiceOptions, ServiceLayer};
//!
//! struct Greeter;
//!
//! impl Service for Greeter {}
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let package = PackageRepr::builder("hello")
//!     .ui_reference(InterfaceSpec::one("Greeter")?)
//!     .service(
//!         ServiceDef::new(
//!             "greeter",
//!             ServiceFactory::function(|_ctx| Ok(Arc::new(Greeter) as Arc<dyn Service>)),
//!         )
//!         .provides("Greeter"),
//!     )
//!     .build()?;
//!
//! let layer = ServiceLayer::builder().package(package).build()?;
//! layer.start()?;
//!
//! let greeter = layer.get_service("hello", "Greeter", GetServiceOptions::default())?;
//! assert!(greeter.downcast_arc::<Greeter>().is_ok());
//!
//! layer.destroy()?;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod error;
pub mod layer;
pub mod lookup;
pub mod state;
pub mod verify;

pub use builder::ServiceLayerBuilder;
pub use error::{DestroyErrors, LayerError, Result, VerifyError};
pub use layer::{GetServiceOptions, ServiceLayer, StartupPolicy};
pub use lookup::{Resolution, ServiceLookup};
pub use state::{ServiceSlot, ServiceState};
pub use verify::{verify_dependencies, ComputedDependencies, ResolvedDependency, VerifiedGraph};

/// Prelude module for common imports
pub mod prelude {
    pub use crate::{
        GetServiceOptions, LayerError, ServiceLayer, ServiceLayerBuilder, StartupPolicy,
    };
    pub use trellis_core::prelude::*;
}
