//! Interface specifications and dependency declarations

use std::fmt;

use crate::error::{MetadataError, Result};

/// Separator between package and service names in a service id
pub const ID_SEPARATOR: &str = "::";

/// Validate a metadata name (package, service, interface, qualifier or reference)
pub fn validate_name(kind: &'static str, name: &str) -> Result<()> {
    if name.is_empty()
        || name.contains(char::is_whitespace)
        || name.contains(ID_SEPARATOR)
    {
        return Err(MetadataError::InvalidName {
            kind,
            name: name.to_string(),
        });
    }
    Ok(())
}

/// A request for implementations of an interface.
///
/// A reference either asks for exactly one implementation, optionally
/// narrowed by a qualifier, or for every registered implementation. The
/// two forms are distinct variants so a qualified all-request cannot be
/// expressed at all.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InterfaceSpec {
    /// Exactly one implementation of the interface
    One {
        /// Name of the requested interface
        interface_name: String,
        /// Optional qualifier narrowing the providers
        qualifier: Option<String>,
    },
    /// Every registered implementation of the interface, in declaration order
    All {
        /// Name of the requested interface
        interface_name: String,
    },
}

impl InterfaceSpec {
    /// Request a single, unqualified implementation
    pub fn one(interface_name: impl Into<String>) -> Result<Self> {
        let interface_name = interface_name.into();
        validate_name("interface", &interface_name)?;
        Ok(InterfaceSpec::One {
            interface_name,
            qualifier: None,
        })
    }

    /// Request a single implementation with the given qualifier
    pub fn qualified(
        interface_name: impl Into<String>,
        qualifier: impl Into<String>,
    ) -> Result<Self> {
        let interface_name = interface_name.into();
        let qualifier = qualifier.into();
        validate_name("interface", &interface_name)?;
        validate_name("qualifier", &qualifier)?;
        Ok(InterfaceSpec::One {
            interface_name,
            qualifier: Some(qualifier),
        })
    }

    /// Request every implementation of the interface
    pub fn all(interface_name: impl Into<String>) -> Result<Self> {
        let interface_name = interface_name.into();
        validate_name("interface", &interface_name)?;
        Ok(InterfaceSpec::All { interface_name })
    }

    /// Name of the interface this spec refers to
    pub fn interface_name(&self) -> &str {
        match self {
            InterfaceSpec::One { interface_name, .. } => interface_name,
            InterfaceSpec::All { interface_name } => interface_name,
        }
    }

    /// Qualifier of a single-implementation spec, if any
    pub fn qualifier(&self) -> Option<&str> {
        match self {
            InterfaceSpec::One { qualifier, .. } => qualifier.as_deref(),
            InterfaceSpec::All { .. } => None,
        }
    }

    /// Whether this spec requests every implementation
    pub fn is_all(&self) -> bool {
        matches!(self, InterfaceSpec::All { .. })
    }
}

impl fmt::Display for InterfaceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterfaceSpec::One {
                interface_name,
                qualifier: None,
            } => write!(f, "{}", interface_name),
            InterfaceSpec::One {
                interface_name,
                qualifier: Some(q),
            } => write!(f, "{}:{}", interface_name, q),
            InterfaceSpec::All { interface_name } => write!(f, "{}[]", interface_name),
        }
    }
}

/// An interface a service claims to implement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvidedInterface {
    /// Name of the provided interface
    pub interface_name: String,
    /// Optional qualifier distinguishing this provider
    pub qualifier: Option<String>,
}

impl ProvidedInterface {
    /// Declare an unqualified provider of the interface
    pub fn new(interface_name: impl Into<String>) -> Result<Self> {
        let interface_name = interface_name.into();
        validate_name("interface", &interface_name)?;
        Ok(Self {
            interface_name,
            qualifier: None,
        })
    }

    /// Declare a qualified provider of the interface
    pub fn qualified(
        interface_name: impl Into<String>,
        qualifier: impl Into<String>,
    ) -> Result<Self> {
        let interface_name = interface_name.into();
        let qualifier = qualifier.into();
        validate_name("interface", &interface_name)?;
        validate_name("qualifier", &qualifier)?;
        Ok(Self {
            interface_name,
            qualifier: Some(qualifier),
        })
    }
}

/// A dependency a service declares on another interface.
///
/// The reference name is the constructor parameter the resolved value is
/// bound to when the service is created.
#[derive(Debug, Clone)]
pub struct ServiceDependency {
    /// Name the resolved value is bound to in the service context
    pub reference_name: String,
    /// What the dependency requests
    pub spec: InterfaceSpec,
}

impl ServiceDependency {
    /// Create a dependency binding the spec to the given reference name
    pub fn new(reference_name: impl Into<String>, spec: InterfaceSpec) -> Result<Self> {
        let reference_name = reference_name.into();
        validate_name("reference", &reference_name)?;
        Ok(Self {
            reference_name,
            spec,
        })
    }
}
