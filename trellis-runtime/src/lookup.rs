//! Interface lookup table
//!
//! Maps interface names to the services providing them, in declaration
//! order (package order, then in-package order). Built once per layer and
//! immutable afterwards.

use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;
use trellis_core::{PackageRepr, ServiceId, ServiceRepr};

use crate::error::VerifyError;

#[derive(Debug)]
struct ProviderEntry {
    id: ServiceId,
    qualifier: Option<String>,
}

/// Outcome of resolving a single-implementation reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Exactly one provider matched
    Found(ServiceId),
    /// No provider matched
    NotFound,
    /// Several providers matched an unqualified request
    Ambiguous(Vec<ServiceId>),
}

/// Immutable mapping from interface names to providing services
#[derive(Debug)]
pub struct ServiceLookup {
    by_interface: FxHashMap<String, Vec<ProviderEntry>>,
    by_id: FxHashMap<ServiceId, Arc<ServiceRepr>>,
    all_ids: Vec<ServiceId>,
}

impl ServiceLookup {
    /// Build the table from the package set.
    ///
    /// Rejects duplicate package names and duplicate claims on the same
    /// qualified interface. Multiple unqualified providers of one
    /// interface are legal; they only fail later if an unqualified single
    /// request has to choose among them.
    pub fn build(packages: &[PackageRepr]) -> Result<Self, VerifyError> {
        let mut seen_packages = FxHashSet::default();
        for package in packages {
            if !seen_packages.insert(package.name().to_string()) {
                return Err(VerifyError::DuplicatePackage {
                    package: package.name().to_string(),
                });
            }
        }

        let mut lookup = Self {
            by_interface: FxHashMap::default(),
            by_id: FxHashMap::default(),
            all_ids: Vec::new(),
        };

        for package in packages {
            for service in package.services() {
                let id = service.id().clone();
                lookup.all_ids.push(id.clone());
                lookup.by_id.insert(id.clone(), Arc::new(service.clone()));

                for provided in service.interfaces() {
                    let entries = lookup
                        .by_interface
                        .entry(provided.interface_name.clone())
                        .or_default();

                    if let Some(qualifier) = &provided.qualifier {
                        if let Some(existing) = entries
                            .iter()
                            .find(|entry| entry.qualifier.as_ref() == Some(qualifier))
                        {
                            return Err(VerifyError::DuplicateInterface {
                                interface: provided.interface_name.clone(),
                                qualifier: qualifier.clone(),
                                first: existing.id.clone(),
                                second: id.clone(),
                            });
                        }
                    }

                    entries.push(ProviderEntry {
                        id: id.clone(),
                        qualifier: provided.qualifier.clone(),
                    });
                }
            }
        }

        Ok(lookup)
    }

    /// Metadata of a service by id
    pub fn service(&self, id: &ServiceId) -> Option<&Arc<ServiceRepr>> {
        self.by_id.get(id)
    }

    /// All service ids, in registration order
    pub fn service_ids(&self) -> &[ServiceId] {
        &self.all_ids
    }

    /// Resolve a single-implementation reference.
    ///
    /// An unqualified request matches every provider of the interface and
    /// requires there to be exactly one; a qualified request matches only
    /// the provider with that exact qualifier.
    pub fn resolve_one(&self, interface: &str, qualifier: Option<&str>) -> Resolution {
        let Some(entries) = self.by_interface.get(interface) else {
            return Resolution::NotFound;
        };

        let matching: Vec<&ProviderEntry> = match qualifier {
            Some(qualifier) => entries
                .iter()
                .filter(|entry| entry.qualifier.as_deref() == Some(qualifier))
                .collect(),
            None => entries.iter().collect(),
        };

        match matching.as_slice() {
            [] => Resolution::NotFound,
            [single] => Resolution::Found(single.id.clone()),
            many => Resolution::Ambiguous(many.iter().map(|entry| entry.id.clone()).collect()),
        }
    }

    /// Every provider of an interface, in declaration order
    pub fn resolve_all(&self, interface: &str) -> Vec<ServiceId> {
        self.by_interface
            .get(interface)
            .map(|entries| entries.iter().map(|entry| entry.id.clone()).collect())
            .unwrap_or_default()
    }

    /// Number of known services
    pub fn len(&self) -> usize {
        self.all_ids.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.all_ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::{Service, ServiceDef, ServiceError, ServiceFactory};

    struct Noop;

    impl Service for Noop {}

    fn noop_factory() -> ServiceFactory {
        ServiceFactory::function(|_ctx| {
            Ok::<Arc<dyn Service>, ServiceError>(Arc::new(Noop))
        })
    }

    fn package(name: &str, services: Vec<ServiceDef>) -> PackageRepr {
        let mut builder = PackageRepr::builder(name);
        for service in services {
            builder = builder.service(service);
        }
        builder.build().unwrap()
    }

    #[test]
    fn test_duplicate_package_rejected() {
        let packages = vec![package("a", vec![]), package("a", vec![])];
        assert!(matches!(
            ServiceLookup::build(&packages),
            Err(VerifyError::DuplicatePackage { .. })
        ));
    }

    #[test]
    fn test_duplicate_qualified_interface_rejected() {
        let packages = vec![
            package(
                "a",
                vec![ServiceDef::new("x", noop_factory()).provides_qualified("Store", "disk")],
            ),
            package(
                "b",
                vec![ServiceDef::new("y", noop_factory()).provides_qualified("Store", "disk")],
            ),
        ];
        let err = ServiceLookup::build(&packages).unwrap_err();
        match err {
            VerifyError::DuplicateInterface {
                interface,
                qualifier,
                first,
                second,
            } => {
                assert_eq!(interface, "Store");
                assert_eq!(qualifier, "disk");
                assert_eq!(first.as_str(), "a::x");
                assert_eq!(second.as_str(), "b::y");
            }
            other => panic!("expected DuplicateInterface, got {:?}", other),
        }
    }

    #[test]
    fn test_unqualified_providers_may_coexist() {
        let packages = vec![
            package("a", vec![ServiceDef::new("x", noop_factory()).provides("Sink")]),
            package("b", vec![ServiceDef::new("y", noop_factory()).provides("Sink")]),
        ];
        let lookup = ServiceLookup::build(&packages).unwrap();
        assert_eq!(lookup.len(), 2);
    }

    #[test]
    fn test_resolve_one() {
        let packages = vec![package(
            "a",
            vec![ServiceDef::new("x", noop_factory()).provides("Store")],
        )];
        let lookup = ServiceLookup::build(&packages).unwrap();

        assert_eq!(
            lookup.resolve_one("Store", None),
            Resolution::Found(ServiceId::new("a", "x"))
        );
        assert_eq!(lookup.resolve_one("Missing", None), Resolution::NotFound);
    }

    #[test]
    fn test_resolve_one_ambiguous() {
        let packages = vec![
            package("a", vec![ServiceDef::new("x", noop_factory()).provides("Sink")]),
            package("b", vec![ServiceDef::new("y", noop_factory()).provides("Sink")]),
        ];
        let lookup = ServiceLookup::build(&packages).unwrap();

        match lookup.resolve_one("Sink", None) {
            Resolution::Ambiguous(candidates) => {
                assert_eq!(candidates.len(), 2);
            }
            other => panic!("expected Ambiguous, got {:?}", other),
        }
    }

    #[test]
    fn test_resolve_one_qualified() {
        let packages = vec![package(
            "a",
            vec![
                ServiceDef::new("x", noop_factory()).provides_qualified("Store", "disk"),
                ServiceDef::new("y", noop_factory()).provides_qualified("Store", "memory"),
            ],
        )];
        let lookup = ServiceLookup::build(&packages).unwrap();

        assert_eq!(
            lookup.resolve_one("Store", Some("memory")),
            Resolution::Found(ServiceId::new("a", "y"))
        );
        assert_eq!(
            lookup.resolve_one("Store", Some("tape")),
            Resolution::NotFound
        );
    }

    #[test]
    fn test_resolve_all_declaration_order() {
        let packages = vec![
            package(
                "a",
                vec![
                    ServiceDef::new("x", noop_factory()).provides("Sink"),
                    ServiceDef::new("y", noop_factory()).provides("Sink"),
                ],
            ),
            package("b", vec![ServiceDef::new("z", noop_factory()).provides("Sink")]),
        ];
        let lookup = ServiceLookup::build(&packages).unwrap();

        let all = lookup.resolve_all("Sink");
        let ids: Vec<&str> = all.iter().map(|id| id.as_str()).collect();
        assert_eq!(ids, vec!["a::x", "a::y", "b::z"]);

        assert!(lookup.resolve_all("Missing").is_empty());
    }
}
