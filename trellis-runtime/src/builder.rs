//! Assembly of a service layer from packages

use trellis_core::{InterfaceSpec, PackageRepr};

use crate::error::Result;
use crate::layer::{ServiceLayer, StartupPolicy};
use crate::verify::verify_dependencies;

/// Builder for [`ServiceLayer`].
///
/// Collects packages and forced framework references, verifies the
/// dependency graph once and produces a layer ready to start.
#[derive(Default)]
pub struct ServiceLayerBuilder {
    packages: Vec<PackageRepr>,
    forced: Vec<InterfaceSpec>,
    policy: StartupPolicy,
    dev_mode: bool,
}

impl ServiceLayerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one package
    pub fn package(mut self, package: PackageRepr) -> Self {
        self.packages.push(package);
        self
    }

    /// Add several packages
    pub fn packages(mut self, packages: impl IntoIterator<Item = PackageRepr>) -> Self {
        self.packages.extend(packages);
        self
    }

    /// Force a reference into the required closure on behalf of the
    /// framework, independent of any package declaration
    pub fn forced_reference(mut self, spec: InterfaceSpec) -> Self {
        self.forced.push(spec);
        self
    }

    /// Choose when required services are constructed
    pub fn startup_policy(mut self, policy: StartupPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Emit development diagnostics, such as services nothing references
    pub fn dev_mode(mut self, enabled: bool) -> Self {
        self.dev_mode = enabled;
        self
    }

    /// Verify the dependency graph and build the layer.
    ///
    /// Fails if verification rejects the graph. The returned layer has
    /// constructed nothing yet; call [`ServiceLayer::start`] next.
    pub fn build(self) -> Result<ServiceLayer> {
        let graph = verify_dependencies(&self.packages, &self.forced)?;
        Ok(ServiceLayer::from_parts(
            graph,
            &self.packages,
            self.policy,
            self.dev_mode,
        ))
    }
}
