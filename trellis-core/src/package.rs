//! Package representations and the validating package builder

use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::error::{MetadataError, Result};
use crate::interface::{validate_name, InterfaceSpec, ProvidedInterface, ServiceDependency};
use crate::intl::PackageIntl;
use crate::properties::{resolve_properties, Properties, PropertySpec};
use crate::service::{ServiceFactory, ServiceRepr};

/// A named group of services with resolved properties, declared UI
/// dependencies and a message accessor.
///
/// Packages own their services exclusively; the service layer takes
/// packages as its construction input.
#[derive(Debug, Clone)]
pub struct PackageRepr {
    name: String,
    services: Vec<ServiceRepr>,
    properties: Properties,
    ui_references: Vec<InterfaceSpec>,
    intl: PackageIntl,
}

impl PackageRepr {
    /// Start building a package
    pub fn builder(name: impl Into<String>) -> PackageBuilder {
        PackageBuilder::new(name)
    }

    /// Package name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Services owned by this package, in declaration order
    pub fn services(&self) -> &[ServiceRepr] {
        &self.services
    }

    /// Resolved package properties
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Interfaces this package's UI may request dynamically
    pub fn ui_references(&self) -> &[InterfaceSpec] {
        &self.ui_references
    }

    /// Message accessor of this package
    pub fn intl(&self) -> &PackageIntl {
        &self.intl
    }
}

/// Declaration of one service inside a package builder
#[derive(Debug)]
pub struct ServiceDef {
    name: String,
    factory: ServiceFactory,
    dependencies: Vec<(String, InterfaceSpec)>,
    interfaces: Vec<ProvidedInterface>,
}

impl ServiceDef {
    /// Declare a service with the given name and factory
    pub fn new(name: impl Into<String>, factory: ServiceFactory) -> Self {
        Self {
            name: name.into(),
            factory,
            dependencies: Vec::new(),
            interfaces: Vec::new(),
        }
    }

    /// Provide an interface without a qualifier.
    ///
    /// The name is validated when the package is built.
    pub fn provides(mut self, interface_name: impl Into<String>) -> Self {
        self.interfaces.push(ProvidedInterface {
            interface_name: interface_name.into(),
            qualifier: None,
        });
        self
    }

    /// Provide an interface with a qualifier
    pub fn provides_qualified(
        mut self,
        interface_name: impl Into<String>,
        qualifier: impl Into<String>,
    ) -> Self {
        self.interfaces.push(ProvidedInterface {
            interface_name: interface_name.into(),
            qualifier: Some(qualifier.into()),
        });
        self
    }

    /// Declare a dependency bound to the given reference name
    pub fn depends_on(mut self, reference_name: impl Into<String>, spec: InterfaceSpec) -> Self {
        self.dependencies.push((reference_name.into(), spec));
        self
    }
}

/// Validating builder for [`PackageRepr`].
///
/// All name validation, duplicate detection and property resolution
/// happens in [`PackageBuilder::build`]; invalid metadata never produces
/// a package.
pub struct PackageBuilder {
    name: String,
    locale: String,
    messages: FxHashMap<String, String>,
    property_specs: Vec<PropertySpec>,
    property_overrides: FxHashMap<String, Value>,
    ui_references: Vec<InterfaceSpec>,
    services: Vec<ServiceDef>,
}

impl PackageBuilder {
    /// Start building a package with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            locale: "en".to_string(),
            messages: FxHashMap::default(),
            property_specs: Vec::new(),
            property_overrides: FxHashMap::default(),
            ui_references: Vec::new(),
            services: Vec::new(),
        }
    }

    /// Set the package locale
    pub fn locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }

    /// Add a message to the package message table
    pub fn message(mut self, id: impl Into<String>, text: impl Into<String>) -> Self {
        self.messages.insert(id.into(), text.into());
        self
    }

    /// Add several messages to the package message table
    pub fn messages<I, K, V>(mut self, messages: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (id, text) in messages {
            self.messages.insert(id.into(), text.into());
        }
        self
    }

    /// Declare a package property
    pub fn property(mut self, spec: PropertySpec) -> Self {
        self.property_specs.push(spec);
        self
    }

    /// Override a declared property with an application-level value
    pub fn property_override(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.property_overrides.insert(name.into(), value.into());
        self
    }

    /// Declare an interface the package UI may request dynamically
    pub fn ui_reference(mut self, spec: InterfaceSpec) -> Self {
        self.ui_references.push(spec);
        self
    }

    /// Add a service to the package
    pub fn service(mut self, def: ServiceDef) -> Self {
        self.services.push(def);
        self
    }

    /// Validate the declarations and produce the package
    pub fn build(self) -> Result<PackageRepr> {
        validate_name("package", &self.name)?;

        for spec in &self.property_specs {
            validate_name("property", &spec.name)?;
            if self
                .property_specs
                .iter()
                .filter(|other| other.name == spec.name)
                .count()
                > 1
            {
                return Err(MetadataError::DuplicateProperty {
                    package: self.name.clone(),
                    property: spec.name.clone(),
                });
            }
        }

        let properties =
            resolve_properties(&self.name, &self.property_specs, &self.property_overrides)?;
        let intl = PackageIntl::new(self.locale, self.messages);

        let mut services = Vec::with_capacity(self.services.len());
        for def in self.services {
            validate_name("service", &def.name)?;
            if services
                .iter()
                .any(|existing: &ServiceRepr| existing.name() == def.name)
            {
                return Err(MetadataError::DuplicateService {
                    package: self.name.clone(),
                    service: def.name,
                });
            }

            let service_id = format!("{}::{}", self.name, def.name);
            let mut interfaces: Vec<ProvidedInterface> = Vec::with_capacity(def.interfaces.len());
            for provided in def.interfaces {
                let validated = match provided.qualifier {
                    Some(qualifier) => {
                        ProvidedInterface::qualified(provided.interface_name, qualifier)?
                    }
                    None => ProvidedInterface::new(provided.interface_name)?,
                };
                if interfaces.contains(&validated) {
                    let interface = match &validated.qualifier {
                        Some(qualifier) => {
                            format!("{}:{}", validated.interface_name, qualifier)
                        }
                        None => validated.interface_name.clone(),
                    };
                    return Err(MetadataError::DuplicateProvided {
                        service: service_id,
                        interface,
                    });
                }
                interfaces.push(validated);
            }

            let mut dependencies = Vec::with_capacity(def.dependencies.len());
            for (reference_name, spec) in def.dependencies {
                if dependencies
                    .iter()
                    .any(|existing: &ServiceDependency| existing.reference_name == reference_name)
                {
                    return Err(MetadataError::DuplicateReference {
                        service: service_id,
                        reference: reference_name,
                    });
                }
                dependencies.push(ServiceDependency::new(reference_name, spec)?);
            }

            services.push(ServiceRepr::from_parts(
                def.name,
                self.name.clone(),
                def.factory,
                dependencies,
                interfaces,
                properties.clone(),
            ));
        }

        Ok(PackageRepr {
            name: self.name,
            services,
            properties,
            ui_references: self.ui_references,
            intl,
        })
    }
}
