//! Dependency verification
//!
//! Runs once when a layer is built: resolves every declared dependency
//! against the lookup table, rejects ambiguous and cyclic graphs, and
//! computes the transitive closure of services the application requires.

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::warn;
use trellis_core::{InterfaceSpec, PackageRepr, ServiceId};

use crate::error::VerifyError;
use crate::lookup::{Resolution, ServiceLookup};

/// How a single declared dependency resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedDependency {
    /// One implementation
    One(ServiceId),
    /// Every implementation, in declaration order
    All(Vec<ServiceId>),
}

/// Resolved dependencies of one service, keyed by reference name and kept
/// in declaration order
#[derive(Debug, Clone, Default)]
pub struct ComputedDependencies {
    entries: Vec<(String, ResolvedDependency)>,
}

impl ComputedDependencies {
    /// All entries, in declaration order
    pub fn entries(&self) -> &[(String, ResolvedDependency)] {
        &self.entries
    }

    /// The resolved value for one reference name
    pub fn get(&self, reference_name: &str) -> Option<&ResolvedDependency> {
        self.entries
            .iter()
            .find(|(name, _)| name == reference_name)
            .map(|(_, resolved)| resolved)
    }

    /// Every service id this service depends on, in declaration order
    pub fn service_ids(&self) -> impl Iterator<Item = &ServiceId> {
        self.entries.iter().flat_map(|(_, resolved)| match resolved {
            ResolvedDependency::One(id) => std::slice::from_ref(id).iter(),
            ResolvedDependency::All(ids) => ids.iter(),
        })
    }
}

/// Output of [`verify_dependencies`]: the lookup table, the resolved
/// dependency map, and the required closure
#[derive(Debug)]
pub struct VerifiedGraph {
    lookup: ServiceLookup,
    computed: FxHashMap<ServiceId, ComputedDependencies>,
    required: Vec<ServiceId>,
    required_set: FxHashSet<ServiceId>,
    framework_roots: Vec<ServiceId>,
    unused: Vec<ServiceId>,
}

impl VerifiedGraph {
    /// The interface lookup table
    pub fn lookup(&self) -> &ServiceLookup {
        &self.lookup
    }

    /// Resolved dependencies of a service.
    ///
    /// Absent for services left unresolvable at verification time; such
    /// services cannot be constructed.
    pub fn computed(&self, id: &ServiceId) -> Option<&ComputedDependencies> {
        self.computed.get(id)
    }

    /// The transitive closure of required services, roots first
    pub fn required(&self) -> &[ServiceId] {
        &self.required
    }

    /// Whether a service is part of the required closure
    pub fn is_required(&self, id: &ServiceId) -> bool {
        self.required_set.contains(id)
    }

    /// Services resolved directly from forced framework references
    pub fn framework_roots(&self) -> &[ServiceId] {
        &self.framework_roots
    }

    /// Services no reference reaches
    pub fn unused(&self) -> &[ServiceId] {
        &self.unused
    }
}

/// Build the lookup table, resolve every dependency, reject cycles and
/// compute the required closure from forced and UI-declared references.
pub fn verify_dependencies(
    packages: &[PackageRepr],
    forced: &[InterfaceSpec],
) -> Result<VerifiedGraph, VerifyError> {
    let lookup = ServiceLookup::build(packages)?;

    // Resolve the declared dependencies of every service. Ambiguity is a
    // hard error here; a missing implementation is deferred until we know
    // whether the service is reachable.
    let mut computed: FxHashMap<ServiceId, ComputedDependencies> = FxHashMap::default();
    let mut unresolved: FxHashMap<ServiceId, String> = FxHashMap::default();

    for id in lookup.service_ids() {
        let Some(service) = lookup.service(id) else {
            continue;
        };

        let mut entries = Vec::with_capacity(service.dependencies().len());
        let mut missing = None;
        for dependency in service.dependencies() {
            match &dependency.spec {
                InterfaceSpec::All { interface_name } => {
                    entries.push((
                        dependency.reference_name.clone(),
                        ResolvedDependency::All(lookup.resolve_all(interface_name)),
                    ));
                }
                InterfaceSpec::One {
                    interface_name,
                    qualifier,
                } => match lookup.resolve_one(interface_name, qualifier.as_deref()) {
                    Resolution::Found(target) => {
                        entries.push((
                            dependency.reference_name.clone(),
                            ResolvedDependency::One(target),
                        ));
                    }
                    Resolution::NotFound => {
                        missing = Some(dependency.spec.to_string());
                        break;
                    }
                    Resolution::Ambiguous(candidates) => {
                        return Err(VerifyError::Ambiguous {
                            reference: dependency.spec.to_string(),
                            required_by: id.to_string(),
                            candidates,
                        });
                    }
                },
            }
        }

        match missing {
            Some(reference) => {
                unresolved.insert(id.clone(), reference);
            }
            None => {
                computed.insert(id.clone(), ComputedDependencies { entries });
            }
        }
    }

    check_cycles(&lookup, &computed)?;

    // Walk the closure from forced framework references and every
    // package's UI references. Reaching an unresolvable service turns its
    // deferred missing implementation into a hard error.
    let mut required = Vec::new();
    let mut required_set = FxHashSet::default();
    let mut framework_roots = Vec::new();

    for spec in forced {
        let targets = resolve_root(&lookup, spec, "the framework")?;
        for target in targets {
            if !framework_roots.contains(&target) {
                framework_roots.push(target.clone());
            }
            visit_closure(
                &target,
                &computed,
                &unresolved,
                &mut required,
                &mut required_set,
            )?;
        }
    }

    for package in packages {
        let origin = format!("package '{}' ui", package.name());
        for spec in package.ui_references() {
            let targets = resolve_root(&lookup, spec, &origin)?;
            for target in targets {
                visit_closure(
                    &target,
                    &computed,
                    &unresolved,
                    &mut required,
                    &mut required_set,
                )?;
            }
        }
    }

    for id in lookup.service_ids() {
        if let Some(reference) = unresolved.get(id) {
            warn!(
                "Service {} references unimplemented interface '{}' and is not required; it will be unavailable",
                id, reference
            );
        }
    }

    let unused: Vec<ServiceId> = lookup
        .service_ids()
        .iter()
        .filter(|id| !required_set.contains(*id))
        .cloned()
        .collect();

    Ok(VerifiedGraph {
        lookup,
        computed,
        required,
        required_set,
        framework_roots,
        unused,
    })
}

/// Resolve one root reference to the services it forces
fn resolve_root(
    lookup: &ServiceLookup,
    spec: &InterfaceSpec,
    origin: &str,
) -> Result<Vec<ServiceId>, VerifyError> {
    match spec {
        InterfaceSpec::All { interface_name } => Ok(lookup.resolve_all(interface_name)),
        InterfaceSpec::One {
            interface_name,
            qualifier,
        } => match lookup.resolve_one(interface_name, qualifier.as_deref()) {
            Resolution::Found(target) => Ok(vec![target]),
            Resolution::NotFound => Err(VerifyError::Unimplemented {
                reference: spec.to_string(),
                required_by: origin.to_string(),
            }),
            Resolution::Ambiguous(candidates) => Err(VerifyError::Ambiguous {
                reference: spec.to_string(),
                required_by: origin.to_string(),
                candidates,
            }),
        },
    }
}

fn visit_closure(
    id: &ServiceId,
    computed: &FxHashMap<ServiceId, ComputedDependencies>,
    unresolved: &FxHashMap<ServiceId, String>,
    required: &mut Vec<ServiceId>,
    required_set: &mut FxHashSet<ServiceId>,
) -> Result<(), VerifyError> {
    if required_set.contains(id) {
        return Ok(());
    }
    if let Some(reference) = unresolved.get(id) {
        return Err(VerifyError::Unimplemented {
            reference: reference.clone(),
            required_by: id.to_string(),
        });
    }

    required_set.insert(id.clone());
    required.push(id.clone());

    if let Some(dependencies) = computed.get(id) {
        for dependency in dependencies.service_ids() {
            visit_closure(dependency, computed, unresolved, required, required_set)?;
        }
    }
    Ok(())
}

/// Depth-first cycle check over every resolvable service
fn check_cycles(
    lookup: &ServiceLookup,
    computed: &FxHashMap<ServiceId, ComputedDependencies>,
) -> Result<(), VerifyError> {
    let mut visited = FxHashSet::default();
    let mut stack = Vec::new();
    let mut on_stack = FxHashSet::default();

    for id in lookup.service_ids() {
        if computed.contains_key(id) && !visited.contains(id) {
            visit_cycles(id, computed, &mut visited, &mut stack, &mut on_stack)?;
        }
    }
    Ok(())
}

fn visit_cycles(
    id: &ServiceId,
    computed: &FxHashMap<ServiceId, ComputedDependencies>,
    visited: &mut FxHashSet<ServiceId>,
    stack: &mut Vec<ServiceId>,
    on_stack: &mut FxHashSet<ServiceId>,
) -> Result<(), VerifyError> {
    visited.insert(id.clone());
    on_stack.insert(id.clone());
    stack.push(id.clone());

    if let Some(dependencies) = computed.get(id) {
        for dependency in dependencies.service_ids() {
            if on_stack.contains(dependency) {
                let start = stack
                    .iter()
                    .position(|entry| entry == dependency)
                    .unwrap_or(0);
                let mut cycle: Vec<String> =
                    stack[start..].iter().map(ServiceId::to_string).collect();
                cycle.push(dependency.to_string());
                return Err(VerifyError::CircularDependency {
                    cycle: cycle.join(" -> "),
                });
            }
            if !visited.contains(dependency) && computed.contains_key(dependency) {
                visit_cycles(dependency, computed, visited, stack, on_stack)?;
            }
        }
    }

    stack.pop();
    on_stack.remove(id);
    Ok(())
}
