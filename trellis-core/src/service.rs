//! Service instances, factories and static service metadata

use downcast_rs::{impl_downcast, DowncastSync};
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;

use crate::interface::{ProvidedInterface, ServiceDependency, ID_SEPARATOR};
use crate::intl::PackageIntl;
use crate::properties::Properties;

/// Error type surfaced by service factories and teardown hooks
pub type ServiceError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Trait implemented by every constructed service instance.
///
/// Consumers receive services as `Arc<dyn Service>` and downcast to the
/// concrete type with `downcast_arc`.
pub trait Service: DowncastSync {
    /// Type name of the service, for diagnostics
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Teardown hook, invoked once when the layer destroys the service.
    ///
    /// A failure here is reported but does not keep the service alive.
    fn on_destroy(&self) -> std::result::Result<(), ServiceError> {
        Ok(())
    }
}

impl_downcast!(sync Service);

impl fmt::Debug for dyn Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Service({})", self.type_name())
    }
}

/// Unique identity of a service: `package::service`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceId(String);

impl ServiceId {
    /// Build an id from package and service names
    pub fn new(package_name: &str, service_name: &str) -> Self {
        Self(format!("{}{}{}", package_name, ID_SEPARATOR, service_name))
    }

    /// The full `package::service` string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Package part of the id
    pub fn package_name(&self) -> &str {
        self.0
            .split_once(ID_SEPARATOR)
            .map(|(package, _)| package)
            .unwrap_or(&self.0)
    }

    /// Service part of the id
    pub fn service_name(&self) -> &str {
        self.0
            .split_once(ID_SEPARATOR)
            .map(|(_, service)| service)
            .unwrap_or(&self.0)
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A dependency value resolved for one reference name
#[derive(Clone)]
pub enum ReferenceValue {
    /// A single resolved implementation
    One(Arc<dyn Service>),
    /// Every resolved implementation, in declaration order
    All(Vec<Arc<dyn Service>>),
}

/// Everything a factory receives when constructing a service: its id, the
/// resolved dependency values keyed by reference name, the package
/// properties and the package message accessor.
pub struct ServiceCtx {
    service_id: ServiceId,
    references: FxHashMap<String, ReferenceValue>,
    properties: Properties,
    intl: PackageIntl,
}

impl ServiceCtx {
    /// Assemble a context for one construction
    pub fn new(
        service_id: ServiceId,
        references: FxHashMap<String, ReferenceValue>,
        properties: Properties,
        intl: PackageIntl,
    ) -> Self {
        Self {
            service_id,
            references,
            properties,
            intl,
        }
    }

    /// Id of the service being constructed
    pub fn service_id(&self) -> &ServiceId {
        &self.service_id
    }

    /// Resolved package properties
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Package message accessor
    pub fn intl(&self) -> &PackageIntl {
        &self.intl
    }

    /// A single resolved dependency by reference name
    pub fn reference(&self, name: &str) -> Option<Arc<dyn Service>> {
        match self.references.get(name) {
            Some(ReferenceValue::One(service)) => Some(service.clone()),
            _ => None,
        }
    }

    /// A single resolved dependency, downcast to its concrete type
    pub fn reference_as<T: Service>(&self, name: &str) -> Option<Arc<T>> {
        self.reference(name)?.downcast_arc::<T>().ok()
    }

    /// All implementations resolved for an all-reference, in declaration order
    pub fn references_all(&self, name: &str) -> Option<&[Arc<dyn Service>]> {
        match self.references.get(name) {
            Some(ReferenceValue::All(services)) => Some(services),
            _ => None,
        }
    }
}

/// Factory function form of service construction
pub type CreateServiceFn =
    Arc<dyn Fn(&ServiceCtx) -> std::result::Result<Arc<dyn Service>, ServiceError> + Send + Sync>;

/// Constructor-object form of service construction
pub trait ProvideService: Send + Sync {
    /// Construct the service instance from the resolved context
    fn provide(&self, ctx: &ServiceCtx) -> std::result::Result<Arc<dyn Service>, ServiceError>;
}

/// How a service is instantiated.
///
/// Both forms receive the same context; a single dispatch site keeps them
/// interchangeable.
#[derive(Clone)]
pub enum ServiceFactory {
    /// A provider object implementing [`ProvideService`]
    Provider(Arc<dyn ProvideService>),
    /// A free creation function
    Function(CreateServiceFn),
}

impl ServiceFactory {
    /// Wrap a provider object
    pub fn provider(provider: impl ProvideService + 'static) -> Self {
        ServiceFactory::Provider(Arc::new(provider))
    }

    /// Wrap a creation function
    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&ServiceCtx) -> std::result::Result<Arc<dyn Service>, ServiceError>
            + Send
            + Sync
            + 'static,
    {
        ServiceFactory::Function(Arc::new(f))
    }

    /// Instantiate the service from the given context
    pub fn create(
        &self,
        ctx: &ServiceCtx,
    ) -> std::result::Result<Arc<dyn Service>, ServiceError> {
        match self {
            ServiceFactory::Provider(provider) => provider.provide(ctx),
            ServiceFactory::Function(f) => f(ctx),
        }
    }
}

impl fmt::Debug for ServiceFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceFactory::Provider(_) => write!(f, "ServiceFactory::Provider(..)"),
            ServiceFactory::Function(_) => write!(f, "ServiceFactory::Function(..)"),
        }
    }
}

/// Static metadata of one declared service.
///
/// Built through a package builder; per-instance runtime state lives with
/// the service layer, not here.
#[derive(Debug, Clone)]
pub struct ServiceRepr {
    id: ServiceId,
    name: String,
    package_name: String,
    factory: ServiceFactory,
    dependencies: Vec<ServiceDependency>,
    interfaces: Vec<ProvidedInterface>,
    properties: Properties,
}

impl ServiceRepr {
    pub(crate) fn from_parts(
        name: String,
        package_name: String,
        factory: ServiceFactory,
        dependencies: Vec<ServiceDependency>,
        interfaces: Vec<ProvidedInterface>,
        properties: Properties,
    ) -> Self {
        let id = ServiceId::new(&package_name, &name);
        Self {
            id,
            name,
            package_name,
            factory,
            dependencies,
            interfaces,
            properties,
        }
    }

    /// Unique id of the service
    pub fn id(&self) -> &ServiceId {
        &self.id
    }

    /// Service name within its package
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the owning package
    pub fn package_name(&self) -> &str {
        &self.package_name
    }

    /// Factory used to instantiate the service
    pub fn factory(&self) -> &ServiceFactory {
        &self.factory
    }

    /// Declared dependencies, in declaration order
    pub fn dependencies(&self) -> &[ServiceDependency] {
        &self.dependencies
    }

    /// Interfaces this service provides
    pub fn interfaces(&self) -> &[ProvidedInterface] {
        &self.interfaces
    }

    /// Resolved properties of the owning package
    pub fn properties(&self) -> &Properties {
        &self.properties
    }
}
