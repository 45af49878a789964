//! Declarative application metadata
//!
//! An application can describe its packages, services, interfaces,
//! references and property defaults in TOML or JSON, bind factories
//! through a [`FactoryRegistry`] keyed by `package::service`, and obtain
//! fully validated [`PackageRepr`]s from the combination.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

use crate::error::{MetadataError, Result};
use crate::interface::InterfaceSpec;
use crate::package::{PackageBuilder, PackageRepr, ServiceDef};
use crate::properties::PropertySpec;
use crate::service::{Service, ServiceCtx, ServiceError, ServiceFactory};

/// Raw reference form: a bare interface name, or a detailed spec.
///
/// A detailed spec carrying both `all = true` and a qualifier is rejected
/// when converted, before any resolution is attempted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReferenceSpecDecl {
    /// Shorthand: a single unqualified implementation of the named interface
    Name(String),
    /// Structured reference declaration
    Detailed {
        /// Interface name
        name: String,
        /// Optional qualifier
        #[serde(default)]
        qualifier: Option<String>,
        /// Request every implementation
        #[serde(default)]
        all: bool,
    },
}

impl ReferenceSpecDecl {
    /// Convert the raw declaration into a canonical [`InterfaceSpec`]
    pub fn to_spec(&self) -> Result<InterfaceSpec> {
        match self {
            ReferenceSpecDecl::Name(name) => InterfaceSpec::one(name.clone()),
            ReferenceSpecDecl::Detailed {
                name,
                qualifier: Some(_),
                all: true,
            } => Err(MetadataError::ConflictingReference {
                interface: name.clone(),
            }),
            ReferenceSpecDecl::Detailed {
                name,
                qualifier: Some(qualifier),
                all: false,
            } => InterfaceSpec::qualified(name.clone(), qualifier.clone()),
            ReferenceSpecDecl::Detailed {
                name,
                qualifier: None,
                all: true,
            } => InterfaceSpec::all(name.clone()),
            ReferenceSpecDecl::Detailed {
                name,
                qualifier: None,
                all: false,
            } => InterfaceSpec::one(name.clone()),
        }
    }
}

/// Raw provided-interface form: bare name or name plus qualifier
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProvidesDecl {
    /// Unqualified provider of the named interface
    Name(String),
    /// Provider with an explicit qualifier
    Detailed {
        /// Interface name
        name: String,
        /// Optional qualifier
        #[serde(default)]
        qualifier: Option<String>,
    },
}

/// A named constructor reference of a declared service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceDecl {
    /// Reference name the resolved value is bound to
    pub name: String,
    /// What the reference requests
    pub interface: ReferenceSpecDecl,
}

/// A service declaration inside a package declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDecl {
    /// Service name, unique within the package
    pub name: String,
    /// Interfaces the service provides
    #[serde(default)]
    pub provides: Vec<ProvidesDecl>,
    /// Constructor references, in declaration order
    #[serde(default)]
    pub references: Vec<ReferenceDecl>,
}

/// A property declaration inside a package declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyDecl {
    /// Property name
    pub name: String,
    /// Default value
    #[serde(default)]
    pub default: Option<Value>,
    /// Whether a non-null value must be present after resolution
    #[serde(default)]
    pub required: bool,
}

/// Declaration of one package
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageDecl {
    /// Package name
    pub name: String,
    /// Declared services
    #[serde(default)]
    pub services: Vec<ServiceDecl>,
    /// Declared properties
    #[serde(default)]
    pub properties: Vec<PropertyDecl>,
    /// Interfaces the package UI may request dynamically
    #[serde(default)]
    pub ui_references: Vec<ReferenceSpecDecl>,
    /// Inline message table
    #[serde(default)]
    pub messages: FxHashMap<String, String>,
}

/// Top-level application metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppMetadata {
    /// Locale applied to every package
    #[serde(default)]
    pub locale: Option<String>,
    /// Package declarations, in startup order
    pub packages: Vec<PackageDecl>,
    /// Application-level property overrides, keyed by package then property
    #[serde(default)]
    pub overrides: FxHashMap<String, FxHashMap<String, Value>>,
}

impl AppMetadata {
    /// Parse application metadata from a TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|error| MetadataError::ParseToml { error })
    }

    /// Parse application metadata from a JSON string
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str).map_err(|error| MetadataError::ParseJson { error })
    }

    /// Read and parse application metadata from a TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|error| MetadataError::Io {
            path: path.to_path_buf(),
            error,
        })?;
        Self::from_toml(&contents)
    }

    /// Bind declared services to registered factories and build the
    /// validated packages, in declaration order.
    pub fn into_packages(self, registry: &FactoryRegistry) -> Result<Vec<PackageRepr>> {
        let AppMetadata {
            locale,
            packages,
            overrides,
        } = self;

        let mut built = Vec::with_capacity(packages.len());
        for decl in packages {
            let mut builder = PackageBuilder::new(&decl.name);
            if let Some(locale) = &locale {
                builder = builder.locale(locale.clone());
            }
            builder = builder.messages(decl.messages);

            for property in decl.properties {
                let mut spec = PropertySpec::new(property.name);
                if let Some(default) = property.default {
                    spec = spec.with_default(default);
                }
                if property.required {
                    spec = spec.required();
                }
                builder = builder.property(spec);
            }

            if let Some(package_overrides) = overrides.get(&decl.name) {
                for (name, value) in package_overrides {
                    builder = builder.property_override(name.clone(), value.clone());
                }
            }

            for reference in &decl.ui_references {
                builder = builder.ui_reference(reference.to_spec()?);
            }

            for service in decl.services {
                let key = format!("{}::{}", decl.name, service.name);
                let factory = registry
                    .get(&key)
                    .cloned()
                    .ok_or(MetadataError::UnknownFactory { service: key })?;

                let mut def = ServiceDef::new(&service.name, factory);
                for provided in service.provides {
                    def = match provided {
                        ProvidesDecl::Name(name) => def.provides(name),
                        ProvidesDecl::Detailed {
                            name,
                            qualifier: Some(qualifier),
                        } => def.provides_qualified(name, qualifier),
                        ProvidesDecl::Detailed {
                            name,
                            qualifier: None,
                        } => def.provides(name),
                    };
                }
                for reference in service.references {
                    def = def.depends_on(reference.name, reference.interface.to_spec()?);
                }
                builder = builder.service(def);
            }

            built.push(builder.build()?);
        }

        Ok(built)
    }
}

/// Registry binding `package::service` ids to factories
#[derive(Default)]
pub struct FactoryRegistry {
    factories: FxHashMap<String, ServiceFactory>,
}

impl FactoryRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for a service id.
    ///
    /// Registering the same id twice is an error.
    pub fn register(&mut self, service_id: &str, factory: ServiceFactory) -> Result<()> {
        if self.factories.contains_key(service_id) {
            return Err(MetadataError::DuplicateFactory {
                service: service_id.to_string(),
            });
        }
        self.factories.insert(service_id.to_string(), factory);
        Ok(())
    }

    /// Register a creation function for a service id
    pub fn register_fn<F>(&mut self, service_id: &str, f: F) -> Result<()>
    where
        F: Fn(&ServiceCtx) -> std::result::Result<Arc<dyn Service>, ServiceError>
            + Send
            + Sync
            + 'static,
    {
        self.register(service_id, ServiceFactory::function(f))
    }

    /// Look up the factory for a service id
    pub fn get(&self, service_id: &str) -> Option<&ServiceFactory> {
        self.factories.get(service_id)
    }

    /// Number of registered factories
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Whether no factories are registered
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl std::fmt::Debug for FactoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactoryRegistry")
            .field("factories", &self.factories.len())
            .finish()
    }
}
