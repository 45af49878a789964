//! The service layer
//!
//! Owns every service slot, orchestrates construction and teardown over a
//! verified dependency graph, and answers interface requests from
//! packages. The layer is started exactly once and destroyed exactly
//! once; all access in between goes through the handle.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::{debug, error, info, warn};
use trellis_core::{
    InterfaceSpec, PackageIntl, PackageRepr, Properties, ReferenceValue, Service, ServiceCtx,
    ServiceId,
};

use crate::builder::ServiceLayerBuilder;
use crate::error::{DestroyErrors, LayerError, Result};
use crate::lookup::Resolution;
use crate::state::{InvalidTransition, ServiceSlot, ServiceState};
use crate::verify::{ResolvedDependency, VerifiedGraph};

/// When required services are constructed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartupPolicy {
    /// Construct the whole required closure during start
    #[default]
    Eager,
    /// Construct forced framework services during start and everything
    /// else on first request
    OnDemand,
}

/// Options for a single service request
#[derive(Debug, Clone, Default)]
pub struct GetServiceOptions {
    /// Restrict the lookup to the implementation carrying this qualifier
    pub qualifier: Option<String>,
    /// Skip the declaration check for this request.
    ///
    /// The requesting package no longer has to declare the reference, or
    /// exist at all. Interface resolution and construction rules still
    /// apply unchanged.
    pub ignore_declaration_check: bool,
}

impl GetServiceOptions {
    /// Request the implementation carrying a qualifier
    pub fn qualified(qualifier: impl Into<String>) -> Self {
        Self {
            qualifier: Some(qualifier.into()),
            ..Self::default()
        }
    }

    /// Request without a declaration check
    pub fn unchecked() -> Self {
        Self {
            ignore_declaration_check: true,
            ..Self::default()
        }
    }
}

/// Lifecycle phase of the layer itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LayerPhase {
    Created,
    Started,
    Destroyed,
}

/// Static per-package data the layer serves without touching slots
struct PackageRuntime {
    properties: Properties,
    intl: PackageIntl,
    ui_references: Vec<InterfaceSpec>,
}

/// Mutable state guarded by the layer lock
struct LayerState {
    phase: LayerPhase,
    slots: FxHashMap<ServiceId, ServiceSlot>,
    /// References handed out past the layer boundary, released during
    /// teardown
    external: FxHashMap<ServiceId, u32>,
}

struct LayerShared {
    graph: VerifiedGraph,
    packages: FxHashMap<String, PackageRuntime>,
    policy: StartupPolicy,
    dev_mode: bool,
    state: RwLock<LayerState>,
}

/// Handle to a service layer. Cheap to clone; every clone shares the same
/// slots and phase.
#[derive(Clone)]
pub struct ServiceLayer {
    shared: Arc<LayerShared>,
}

impl ServiceLayer {
    /// Start assembling a layer from packages
    pub fn builder() -> ServiceLayerBuilder {
        ServiceLayerBuilder::new()
    }

    pub(crate) fn from_parts(
        graph: VerifiedGraph,
        packages: &[PackageRepr],
        policy: StartupPolicy,
        dev_mode: bool,
    ) -> Self {
        let package_map = packages
            .iter()
            .map(|package| {
                (
                    package.name().to_string(),
                    PackageRuntime {
                        properties: package.properties().clone(),
                        intl: package.intl().clone(),
                        ui_references: package.ui_references().to_vec(),
                    },
                )
            })
            .collect();
        let slots = graph
            .lookup()
            .service_ids()
            .iter()
            .map(|id| (id.clone(), ServiceSlot::new()))
            .collect();

        ServiceLayer {
            shared: Arc::new(LayerShared {
                graph,
                packages: package_map,
                policy,
                dev_mode,
                state: RwLock::new(LayerState {
                    phase: LayerPhase::Created,
                    slots,
                    external: FxHashMap::default(),
                }),
            }),
        }
    }

    /// Start the layer, constructing required services according to the
    /// startup policy.
    ///
    /// Runs at most once. If any construction fails, every service built
    /// so far is torn down, the layer moves to the destroyed phase and the
    /// construction error is returned.
    pub fn start(&self) -> Result<()> {
        let mut state = self.shared.state.write();
        match state.phase {
            LayerPhase::Created => {}
            LayerPhase::Started => return Err(LayerError::AlreadyStarted),
            LayerPhase::Destroyed => return Err(LayerError::Destroyed),
        }
        state.phase = LayerPhase::Started;

        let roots: &[ServiceId] = match self.shared.policy {
            StartupPolicy::Eager => self.shared.graph.required(),
            StartupPolicy::OnDemand => self.shared.graph.framework_roots(),
        };

        for id in roots {
            match self.shared.create_service(&mut state, id) {
                Ok(_) => {
                    *state.external.entry(id.clone()).or_insert(0) += 1;
                }
                Err(err) => {
                    error!("Startup failed while constructing {}: {}", id, err);
                    state.phase = LayerPhase::Destroyed;
                    for cleanup_err in self.shared.teardown(&mut state) {
                        error!("Cleanup after failed startup: {}", cleanup_err);
                    }
                    return Err(err);
                }
            }
        }

        if self.shared.dev_mode {
            for id in self.shared.graph.unused() {
                warn!("Service {} is never referenced", id);
            }
        }

        let constructed = state
            .slots
            .values()
            .filter(|slot| slot.state() == ServiceState::Constructed)
            .count();
        info!(
            "Service layer started: {}/{} services constructed",
            constructed,
            state.slots.len()
        );
        Ok(())
    }

    /// Request one implementation of an interface on behalf of a package.
    ///
    /// The package must have declared a matching UI reference unless the
    /// options disable the check. The service is constructed on first
    /// request; later requests share the instance.
    pub fn get_service(
        &self,
        package: &str,
        interface: &str,
        options: GetServiceOptions,
    ) -> Result<Arc<dyn Service>> {
        let mut state = self.shared.state.write();
        match state.phase {
            LayerPhase::Created => return Err(LayerError::NotStarted),
            LayerPhase::Destroyed => return Err(LayerError::Destroyed),
            LayerPhase::Started => {}
        }

        let qualifier = options.qualifier.as_deref();
        if !options.ignore_declaration_check {
            let runtime = self.shared.packages.get(package).ok_or_else(|| {
                LayerError::UnknownPackage {
                    package: package.to_string(),
                }
            })?;
            let declared = runtime.ui_references.iter().any(|spec| {
                matches!(
                    spec,
                    InterfaceSpec::One {
                        interface_name,
                        qualifier: declared_qualifier,
                    } if interface_name == interface && declared_qualifier.as_deref() == qualifier
                )
            });
            if !declared {
                return Err(LayerError::UndeclaredDependency {
                    package: package.to_string(),
                    reference: render_one(interface, qualifier),
                });
            }
        }

        let id = match self.shared.graph.lookup().resolve_one(interface, qualifier) {
            Resolution::Found(id) => id,
            Resolution::NotFound => {
                return Err(LayerError::Unimplemented {
                    reference: render_one(interface, qualifier),
                });
            }
            Resolution::Ambiguous(candidates) => {
                return Err(LayerError::Ambiguous {
                    reference: render_one(interface, qualifier),
                    candidates,
                });
            }
        };

        let instance = self.shared.create_service(&mut state, &id)?;
        *state.external.entry(id).or_insert(0) += 1;
        Ok(instance)
    }

    /// Request every implementation of an interface on behalf of a
    /// package, in declaration order.
    ///
    /// The package must have declared a matching all-implementations UI
    /// reference. An interface nobody provides yields an empty list.
    pub fn get_services(&self, package: &str, interface: &str) -> Result<Vec<Arc<dyn Service>>> {
        let mut state = self.shared.state.write();
        match state.phase {
            LayerPhase::Created => return Err(LayerError::NotStarted),
            LayerPhase::Destroyed => return Err(LayerError::Destroyed),
            LayerPhase::Started => {}
        }

        let runtime = self.shared.packages.get(package).ok_or_else(|| {
            LayerError::UnknownPackage {
                package: package.to_string(),
            }
        })?;
        let declared = runtime.ui_references.iter().any(|spec| {
            matches!(spec, InterfaceSpec::All { interface_name } if interface_name == interface)
        });
        if !declared {
            return Err(LayerError::UndeclaredDependency {
                package: package.to_string(),
                reference: format!("{}[]", interface),
            });
        }

        let ids = self.shared.graph.lookup().resolve_all(interface);
        let mut services = Vec::with_capacity(ids.len());
        for id in ids {
            services.push(self.shared.create_service(&mut state, &id)?);
            *state.external.entry(id).or_insert(0) += 1;
        }
        Ok(services)
    }

    /// Resolved properties of a package
    pub fn get_properties(&self, package: &str) -> Result<Properties> {
        if self.shared.state.read().phase == LayerPhase::Destroyed {
            return Err(LayerError::Destroyed);
        }
        self.shared
            .packages
            .get(package)
            .map(|runtime| runtime.properties.clone())
            .ok_or_else(|| LayerError::UnknownPackage {
                package: package.to_string(),
            })
    }

    /// Message accessor of a package
    pub fn get_intl(&self, package: &str) -> Result<PackageIntl> {
        if self.shared.state.read().phase == LayerPhase::Destroyed {
            return Err(LayerError::Destroyed);
        }
        self.shared
            .packages
            .get(package)
            .map(|runtime| runtime.intl.clone())
            .ok_or_else(|| LayerError::UnknownPackage {
                package: package.to_string(),
            })
    }

    /// Destroy the layer, releasing every handed-out reference and tearing
    /// down consumers before their providers.
    ///
    /// Idempotent. The pass always runs to completion; failures of
    /// individual teardown hooks are collected and returned together.
    pub fn destroy(&self) -> std::result::Result<(), DestroyErrors> {
        let mut state = self.shared.state.write();
        match state.phase {
            LayerPhase::Destroyed => return Ok(()),
            LayerPhase::Created => {
                state.phase = LayerPhase::Destroyed;
                return Ok(());
            }
            LayerPhase::Started => {}
        }
        state.phase = LayerPhase::Destroyed;

        let errors = self.shared.teardown(&mut state);
        info!("Service layer destroyed ({} teardown errors)", errors.len());
        if errors.is_empty() {
            Ok(())
        } else {
            Err(DestroyErrors(errors))
        }
    }

    /// Whether the layer is currently serving requests
    pub fn is_started(&self) -> bool {
        self.shared.state.read().phase == LayerPhase::Started
    }

    /// Lifecycle state of one service slot
    pub fn service_state(&self, id: &ServiceId) -> Option<ServiceState> {
        self.shared.state.read().slots.get(id).map(ServiceSlot::state)
    }

    /// Ids of the required closure, in construction order
    pub fn required_services(&self) -> Vec<ServiceId> {
        self.shared.graph.required().to_vec()
    }
}

impl fmt::Debug for ServiceLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.read();
        f.debug_struct("ServiceLayer")
            .field("phase", &state.phase)
            .field("services", &state.slots.len())
            .finish()
    }
}

impl LayerShared {
    /// Acquire one reference to a service, constructing it and its
    /// dependencies first when needed.
    fn create_service(
        &self,
        state: &mut LayerState,
        id: &ServiceId,
    ) -> Result<Arc<dyn Service>> {
        {
            let slot = state
                .slots
                .get_mut(id)
                .ok_or_else(|| missing_slot(id))?;
            match slot.state() {
                ServiceState::Constructed => {
                    slot.add_ref().map_err(|err| invalid_transition(id, err))?;
                    return slot.instance().cloned().ok_or_else(|| LayerError::Internal {
                        message: format!("service '{}' constructed without an instance", id),
                    });
                }
                ServiceState::Constructing => {
                    return Err(LayerError::ConstructionCycle {
                        service: id.clone(),
                    });
                }
                ServiceState::Destroyed => {
                    return Err(LayerError::Internal {
                        message: format!("service '{}' was already destroyed", id),
                    });
                }
                ServiceState::NotConstructed => {
                    slot.begin_construction()
                        .map_err(|err| invalid_transition(id, err))?;
                }
            }
        }

        let mut acquired = Vec::new();
        match self.construct_instance(state, id, &mut acquired) {
            Ok(instance) => Ok(instance),
            Err(err) => {
                // Release the dependency references acquired before the
                // failure, then park the slot in the terminal state.
                let mut rollback_errors = Vec::new();
                for dependency in acquired.iter().rev() {
                    self.destroy_service(state, dependency, &mut rollback_errors);
                }
                for rollback_err in rollback_errors {
                    error!(
                        "Rollback after failed construction of {}: {}",
                        id, rollback_err
                    );
                }
                if let Some(slot) = state.slots.get_mut(id) {
                    if let Err(transition_err) = slot.abort_construction() {
                        error!("service '{}': {}", id, transition_err);
                    }
                }
                Err(err)
            }
        }
    }

    /// Build the reference map, run the factory and commit the instance.
    /// Every dependency reference acquired on the way is recorded in
    /// `acquired` so the caller can roll back on failure.
    fn construct_instance(
        &self,
        state: &mut LayerState,
        id: &ServiceId,
        acquired: &mut Vec<ServiceId>,
    ) -> Result<Arc<dyn Service>> {
        let service = self
            .graph
            .lookup()
            .service(id)
            .cloned()
            .ok_or_else(|| missing_slot(id))?;
        let computed = self.graph.computed(id).ok_or_else(|| LayerError::Internal {
            message: format!(
                "service '{}' has no resolved dependencies and cannot be constructed",
                id
            ),
        })?;

        let mut references = FxHashMap::default();
        for (name, resolved) in computed.entries() {
            let value = match resolved {
                ResolvedDependency::One(dependency) => {
                    let instance = self.create_service(state, dependency)?;
                    acquired.push(dependency.clone());
                    ReferenceValue::One(instance)
                }
                ResolvedDependency::All(dependencies) => {
                    let mut all = Vec::with_capacity(dependencies.len());
                    for dependency in dependencies {
                        all.push(self.create_service(state, dependency)?);
                        acquired.push(dependency.clone());
                    }
                    ReferenceValue::All(all)
                }
            };
            references.insert(name.clone(), value);
        }

        let intl = self
            .packages
            .get(service.package_name())
            .map(|runtime| runtime.intl.clone())
            .unwrap_or_else(|| PackageIntl::empty("en"));
        let ctx = ServiceCtx::new(id.clone(), references, service.properties().clone(), intl);
        let instance = service
            .factory()
            .create(&ctx)
            .map_err(|source| LayerError::ConstructionFailed {
                service: id.clone(),
                source,
            })?;

        let slot = state
            .slots
            .get_mut(id)
            .ok_or_else(|| missing_slot(id))?;
        slot.finish_construction(instance.clone())
            .map_err(|err| invalid_transition(id, err))?;
        debug!("Constructed service {}", id);
        Ok(instance)
    }

    /// Release one reference to a service. When the count reaches zero the
    /// service is torn down and the references it holds are released in
    /// turn, so consumers always go down before their providers.
    fn destroy_service(
        &self,
        state: &mut LayerState,
        id: &ServiceId,
        errors: &mut Vec<LayerError>,
    ) {
        let Some(slot) = state.slots.get_mut(id) else {
            errors.push(missing_slot(id));
            return;
        };
        let remaining = match slot.remove_ref() {
            Ok(count) => count,
            Err(err) => {
                errors.push(invalid_transition(id, err));
                return;
            }
        };
        if remaining > 0 {
            return;
        }

        let instance = match slot.take_for_destroy() {
            Ok(instance) => instance,
            Err(err) => {
                errors.push(invalid_transition(id, err));
                return;
            }
        };
        if let Err(source) = instance.on_destroy() {
            error!("Failed to destroy service {}: {}", id, source);
            errors.push(LayerError::DestructionFailed {
                service: id.clone(),
                source,
            });
        } else {
            debug!("Destroyed service {}", id);
        }

        if let Some(dependencies) = self.graph.computed(id) {
            for dependency in dependencies.service_ids() {
                self.destroy_service(state, dependency, errors);
            }
        }
    }

    /// Tear down every constructed service. Releases external handouts in
    /// required order first, then handouts to services outside the
    /// closure, then reports anything the accounting left behind.
    fn teardown(&self, state: &mut LayerState) -> Vec<LayerError> {
        let mut errors = Vec::new();

        for id in self.graph.required() {
            let handouts = state.external.remove(id).unwrap_or(0);
            for _ in 0..handouts {
                self.destroy_service(state, id, &mut errors);
            }
        }

        for id in self.graph.lookup().service_ids() {
            if let Some(handouts) = state.external.remove(id) {
                for _ in 0..handouts {
                    self.destroy_service(state, id, &mut errors);
                }
            }
        }
        state.external.clear();

        for id in self.graph.lookup().service_ids() {
            let Some(slot) = state.slots.get_mut(id) else {
                continue;
            };
            if slot.state() != ServiceState::Constructed {
                continue;
            }
            errors.push(LayerError::Internal {
                message: format!(
                    "service '{}' still constructed after teardown (use count {})",
                    id,
                    slot.use_count()
                ),
            });
            match slot.take_for_destroy() {
                Ok(instance) => {
                    if let Err(source) = instance.on_destroy() {
                        errors.push(LayerError::DestructionFailed {
                            service: id.clone(),
                            source,
                        });
                    }
                }
                Err(err) => errors.push(invalid_transition(id, err)),
            }
        }

        errors
    }
}

impl Drop for LayerShared {
    fn drop(&mut self) {
        let mut state = self.state.write();
        if state.phase != LayerPhase::Started {
            return;
        }
        warn!("Service layer dropped while started; destroying services");
        state.phase = LayerPhase::Destroyed;
        for err in self.teardown(&mut state) {
            error!("Teardown on drop: {}", err);
        }
    }
}

fn render_one(interface: &str, qualifier: Option<&str>) -> String {
    match qualifier {
        Some(qualifier) => format!("{}:{}", interface, qualifier),
        None => interface.to_string(),
    }
}

fn invalid_transition(id: &ServiceId, err: InvalidTransition) -> LayerError {
    LayerError::Internal {
        message: format!("service '{}': {}", id, err),
    }
}

fn missing_slot(id: &ServiceId) -> LayerError {
    LayerError::Internal {
        message: format!("service '{}' has no slot", id),
    }
}
