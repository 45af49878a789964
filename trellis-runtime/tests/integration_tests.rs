//! Integration tests for the service layer

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use trellis_core::FactoryRegistry;
use trellis_runtime::prelude::*;
use trellis_runtime::{LayerError, ServiceState, VerifyError};

// Test services

struct Noop;

impl Service for Noop {}

/// Carries a name so lookups can be told apart after downcasting
struct Named {
    name: &'static str,
}

impl Service for Named {}

/// Records construction and teardown in a shared event log
struct Recorder {
    name: &'static str,
    log: Arc<Mutex<Vec<String>>>,
}

impl Service for Recorder {
    fn on_destroy(&self) -> Result<(), ServiceError> {
        self.log
            .lock()
            .unwrap()
            .push(format!("destroy {}", self.name));
        Ok(())
    }
}

/// Counts constructions and teardowns across a whole graph
struct Counted {
    destroys: Arc<AtomicUsize>,
}

impl Service for Counted {
    fn on_destroy(&self) -> Result<(), ServiceError> {
        self.destroys.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FailingTeardown;

impl Service for FailingTeardown {
    fn on_destroy(&self) -> Result<(), ServiceError> {
        Err("still busy".into())
    }
}

// Helpers

fn one(interface: &str) -> InterfaceSpec {
    InterfaceSpec::one(interface).unwrap()
}

fn all(interface: &str) -> InterfaceSpec {
    InterfaceSpec::all(interface).unwrap()
}

fn noop_factory() -> ServiceFactory {
    ServiceFactory::function(|_ctx| Ok(Arc::new(Noop) as Arc<dyn Service>))
}

fn named_factory(name: &'static str) -> ServiceFactory {
    ServiceFactory::function(move |_ctx| Ok(Arc::new(Named { name }) as Arc<dyn Service>))
}

fn recorder_factory(name: &'static str, log: Arc<Mutex<Vec<String>>>) -> ServiceFactory {
    ServiceFactory::function(move |_ctx| {
        log.lock().unwrap().push(format!("construct {}", name));
        Ok(Arc::new(Recorder {
            name,
            log: log.clone(),
        }) as Arc<dyn Service>)
    })
}

fn counted_factory(constructs: Arc<AtomicUsize>, destroys: Arc<AtomicUsize>) -> ServiceFactory {
    ServiceFactory::function(move |_ctx| {
        constructs.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(Counted {
            destroys: destroys.clone(),
        }) as Arc<dyn Service>)
    })
}

fn entries(log: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
    log.lock().unwrap().clone()
}

#[test]
fn test_start_constructs_required_closure_in_dependency_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let package = PackageRepr::builder("app")
        .service(
            ServiceDef::new("api", recorder_factory("api", log.clone()))
                .provides("Api")
                .depends_on("store", one("Store")),
        )
        .service(ServiceDef::new("store", recorder_factory("store", log.clone())).provides("Store"))
        .service(ServiceDef::new("spare", recorder_factory("spare", log.clone())).provides("Spare"))
        .build()
        .unwrap();

    let layer = ServiceLayer::builder()
        .package(package)
        .forced_reference(one("Api"))
        .build()
        .unwrap();
    layer.start().unwrap();

    // The provider comes up while the consumer's references are assembled
    assert_eq!(entries(&log), vec!["construct store", "construct api"]);

    let required: Vec<String> = layer
        .required_services()
        .iter()
        .map(|id| id.to_string())
        .collect();
    assert_eq!(required, vec!["app::api", "app::store"]);
    assert_eq!(
        layer.service_state(&ServiceId::new("app", "spare")),
        Some(ServiceState::NotConstructed)
    );
}

#[test]
fn test_shared_dependency_constructed_once() {
    let constructs = Arc::new(AtomicUsize::new(0));
    let destroys = Arc::new(AtomicUsize::new(0));
    let package = PackageRepr::builder("app")
        .service(
            ServiceDef::new("first", noop_factory())
                .provides("First")
                .depends_on("store", one("Store")),
        )
        .service(
            ServiceDef::new("second", noop_factory())
                .provides("Second")
                .depends_on("store", one("Store")),
        )
        .service(
            ServiceDef::new(
                "store",
                counted_factory(constructs.clone(), destroys.clone()),
            )
            .provides("Store"),
        )
        .build()
        .unwrap();

    let layer = ServiceLayer::builder()
        .package(package)
        .forced_reference(one("First"))
        .forced_reference(one("Second"))
        .build()
        .unwrap();
    layer.start().unwrap();

    assert_eq!(constructs.load(Ordering::SeqCst), 1);

    layer.destroy().unwrap();
    assert_eq!(destroys.load(Ordering::SeqCst), 1);
}

#[test]
fn test_destroy_tears_down_consumers_before_providers() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let package = PackageRepr::builder("app")
        .service(
            ServiceDef::new("api", recorder_factory("api", log.clone()))
                .provides("Api")
                .depends_on("store", one("Store")),
        )
        .service(ServiceDef::new("store", recorder_factory("store", log.clone())).provides("Store"))
        .build()
        .unwrap();

    let layer = ServiceLayer::builder()
        .package(package)
        .forced_reference(one("Api"))
        .build()
        .unwrap();
    layer.start().unwrap();
    layer.destroy().unwrap();

    assert_eq!(
        entries(&log),
        vec![
            "construct store",
            "construct api",
            "destroy api",
            "destroy store"
        ]
    );
    assert_eq!(
        layer.service_state(&ServiceId::new("app", "api")),
        Some(ServiceState::Destroyed)
    );
    assert_eq!(
        layer.service_state(&ServiceId::new("app", "store")),
        Some(ServiceState::Destroyed)
    );
}

#[test]
fn test_diamond_graph_destroys_each_service_exactly_once() {
    let constructs = Arc::new(AtomicUsize::new(0));
    let destroys = Arc::new(AtomicUsize::new(0));
    let factory = || counted_factory(constructs.clone(), destroys.clone());

    let package = PackageRepr::builder("app")
        .service(
            ServiceDef::new("main", factory())
                .provides("Main")
                .depends_on("left", one("Left"))
                .depends_on("right", one("Right")),
        )
        .service(
            ServiceDef::new("left", factory())
                .provides("Left")
                .depends_on("shared", one("Shared")),
        )
        .service(
            ServiceDef::new("right", factory())
                .provides("Right")
                .depends_on("shared", one("Shared")),
        )
        .service(ServiceDef::new("shared", factory()).provides("Shared"))
        .build()
        .unwrap();

    let layer = ServiceLayer::builder()
        .package(package)
        .forced_reference(one("Main"))
        .build()
        .unwrap();
    layer.start().unwrap();
    assert_eq!(constructs.load(Ordering::SeqCst), 4);

    layer.destroy().unwrap();
    assert_eq!(destroys.load(Ordering::SeqCst), 4);
}

#[test]
fn test_cycle_rejected_at_build() {
    let package = PackageRepr::builder("app")
        .service(
            ServiceDef::new("x", noop_factory())
                .provides("X")
                .depends_on("y", one("Y")),
        )
        .service(
            ServiceDef::new("y", noop_factory())
                .provides("Y")
                .depends_on("x", one("X")),
        )
        .build()
        .unwrap();

    let err = ServiceLayer::builder().package(package).build().unwrap_err();
    match err {
        LayerError::Verify(VerifyError::CircularDependency { cycle }) => {
            assert!(cycle.contains("app::x"), "unexpected cycle: {}", cycle);
        }
        other => panic!("expected CircularDependency, got {:?}", other),
    }
}

#[test]
fn test_duplicate_qualified_interface_rejected_at_build() {
    let package = PackageRepr::builder("app")
        .service(ServiceDef::new("a", noop_factory()).provides_qualified("Store", "disk"))
        .service(ServiceDef::new("b", noop_factory()).provides_qualified("Store", "disk"))
        .build()
        .unwrap();

    let err = ServiceLayer::builder().package(package).build().unwrap_err();
    assert!(matches!(
        err,
        LayerError::Verify(VerifyError::DuplicateInterface { .. })
    ));
}

#[test]
fn test_declared_ambiguous_reference_rejected_at_build() {
    let providers = PackageRepr::builder("plugins")
        .service(ServiceDef::new("a", noop_factory()).provides("Sink"))
        .service(ServiceDef::new("b", noop_factory()).provides("Sink"))
        .build()
        .unwrap();
    let shell = PackageRepr::builder("shell")
        .ui_reference(one("Sink"))
        .build()
        .unwrap();

    let err = ServiceLayer::builder()
        .package(providers)
        .package(shell)
        .build()
        .unwrap_err();
    assert!(matches!(
        err,
        LayerError::Verify(VerifyError::Ambiguous { .. })
    ));
}

#[test]
fn test_unchecked_ambiguous_request_reported_at_runtime() {
    let providers = PackageRepr::builder("plugins")
        .service(ServiceDef::new("a", noop_factory()).provides("Sink"))
        .service(ServiceDef::new("b", noop_factory()).provides("Sink"))
        .build()
        .unwrap();

    let layer = ServiceLayer::builder().package(providers).build().unwrap();
    layer.start().unwrap();

    let err = layer
        .get_service("plugins", "Sink", GetServiceOptions::unchecked())
        .unwrap_err();
    match err {
        LayerError::Ambiguous { candidates, .. } => assert_eq!(candidates.len(), 2),
        other => panic!("expected Ambiguous, got {:?}", other),
    }
}

#[test]
fn test_declaration_check_distinguishes_outcomes() {
    let data = PackageRepr::builder("data")
        .service(ServiceDef::new("db", noop_factory()).provides("Database"))
        .build()
        .unwrap();
    let shell = PackageRepr::builder("shell")
        .ui_reference(one("Database"))
        .build()
        .unwrap();

    let layer = ServiceLayer::builder()
        .package(data)
        .package(shell)
        .build()
        .unwrap();
    layer.start().unwrap();

    // Declared reference resolves
    assert!(layer
        .get_service("shell", "Database", GetServiceOptions::default())
        .is_ok());

    // Same interface, undeclared requester
    let err = layer
        .get_service("data", "Database", GetServiceOptions::default())
        .unwrap_err();
    assert!(matches!(err, LayerError::UndeclaredDependency { .. }));

    // Unknown requester
    let err = layer
        .get_service("nope", "Database", GetServiceOptions::default())
        .unwrap_err();
    assert!(matches!(err, LayerError::UnknownPackage { .. }));

    // The declaration check runs before resolution
    let err = layer
        .get_service("shell", "Missing", GetServiceOptions::default())
        .unwrap_err();
    assert!(matches!(err, LayerError::UndeclaredDependency { .. }));

    // A qualifier the declaration does not carry counts as undeclared
    let err = layer
        .get_service("shell", "Database", GetServiceOptions::qualified("replica"))
        .unwrap_err();
    assert!(matches!(err, LayerError::UndeclaredDependency { .. }));

    // Skipping the check surfaces the resolution outcome instead
    let err = layer
        .get_service("shell", "Missing", GetServiceOptions::unchecked())
        .unwrap_err();
    assert!(matches!(err, LayerError::Unimplemented { .. }));

    // Skipping the check also lifts the known-package requirement
    assert!(layer
        .get_service("nope", "Database", GetServiceOptions::unchecked())
        .is_ok());
}

#[test]
fn test_get_services_returns_declaration_order() {
    let plugins = PackageRepr::builder("plugins")
        .service(ServiceDef::new("alpha", named_factory("alpha")).provides("Sink"))
        .service(ServiceDef::new("beta", named_factory("beta")).provides("Sink"))
        .service(ServiceDef::new("gamma", named_factory("gamma")).provides("Sink"))
        .build()
        .unwrap();
    let hub = PackageRepr::builder("hub")
        .ui_reference(all("Sink"))
        .ui_reference(all("Absent"))
        .build()
        .unwrap();

    let layer = ServiceLayer::builder()
        .package(plugins)
        .package(hub)
        .startup_policy(StartupPolicy::OnDemand)
        .build()
        .unwrap();
    layer.start().unwrap();

    // Nothing is built until the first request under on-demand startup
    assert_eq!(
        layer.service_state(&ServiceId::new("plugins", "alpha")),
        Some(ServiceState::NotConstructed)
    );

    let sinks = layer.get_services("hub", "Sink").unwrap();
    let names: Vec<&str> = sinks
        .iter()
        .map(|sink| {
            sink.clone()
                .downcast_arc::<Named>()
                .map(|named| named.name)
                .unwrap_or("?")
        })
        .collect();
    assert_eq!(names, vec!["alpha", "beta", "gamma"]);

    // An interface nobody provides yields an empty list, not an error
    assert!(layer.get_services("hub", "Absent").unwrap().is_empty());

    // An undeclared all-reference is rejected
    let err = layer.get_services("plugins", "Sink").unwrap_err();
    assert!(matches!(err, LayerError::UndeclaredDependency { .. }));
}

#[test]
fn test_on_demand_startup_defers_ui_services() {
    let package = PackageRepr::builder("app")
        .ui_reference(one("Panel"))
        .service(ServiceDef::new("api", noop_factory()).provides("Api"))
        .service(ServiceDef::new("panel", noop_factory()).provides("Panel"))
        .build()
        .unwrap();

    let layer = ServiceLayer::builder()
        .package(package)
        .forced_reference(one("Api"))
        .startup_policy(StartupPolicy::OnDemand)
        .build()
        .unwrap();
    layer.start().unwrap();

    assert_eq!(
        layer.service_state(&ServiceId::new("app", "api")),
        Some(ServiceState::Constructed)
    );
    assert_eq!(
        layer.service_state(&ServiceId::new("app", "panel")),
        Some(ServiceState::NotConstructed)
    );

    layer
        .get_service("app", "Panel", GetServiceOptions::default())
        .unwrap();
    assert_eq!(
        layer.service_state(&ServiceId::new("app", "panel")),
        Some(ServiceState::Constructed)
    );

    layer.destroy().unwrap();
    assert_eq!(
        layer.service_state(&ServiceId::new("app", "panel")),
        Some(ServiceState::Destroyed)
    );
}

#[test]
fn test_qualified_lookup_picks_the_matching_provider() {
    let stores = PackageRepr::builder("stores")
        .service(ServiceDef::new("memory", named_factory("memory")).provides_qualified("Store", "memory"))
        .service(ServiceDef::new("disk", named_factory("disk")).provides_qualified("Store", "disk"))
        .build()
        .unwrap();
    let shell = PackageRepr::builder("shell")
        .ui_reference(InterfaceSpec::qualified("Store", "memory").unwrap())
        .ui_reference(InterfaceSpec::qualified("Store", "disk").unwrap())
        .build()
        .unwrap();

    let layer = ServiceLayer::builder()
        .package(stores)
        .package(shell)
        .build()
        .unwrap();
    layer.start().unwrap();

    let disk = layer
        .get_service("shell", "Store", GetServiceOptions::qualified("disk"))
        .unwrap();
    assert_eq!(
        disk.downcast_arc::<Named>().map(|n| n.name).unwrap_or("?"),
        "disk"
    );

    let memory = layer
        .get_service("shell", "Store", GetServiceOptions::qualified("memory"))
        .unwrap();
    assert_eq!(
        memory.downcast_arc::<Named>().map(|n| n.name).unwrap_or("?"),
        "memory"
    );
}

#[test]
fn test_lifecycle_phase_errors() {
    let package = PackageRepr::builder("app")
        .service(ServiceDef::new("api", noop_factory()).provides("Api"))
        .build()
        .unwrap();
    let layer = ServiceLayer::builder()
        .package(package)
        .forced_reference(one("Api"))
        .build()
        .unwrap();

    assert!(matches!(
        layer.get_service("app", "Api", GetServiceOptions::unchecked()),
        Err(LayerError::NotStarted)
    ));

    layer.start().unwrap();
    assert!(matches!(layer.start(), Err(LayerError::AlreadyStarted)));

    layer.destroy().unwrap();
    layer.destroy().unwrap();
    assert!(matches!(
        layer.get_service("app", "Api", GetServiceOptions::unchecked()),
        Err(LayerError::Destroyed)
    ));
    assert!(matches!(
        layer.get_properties("app"),
        Err(LayerError::Destroyed)
    ));
    assert!(matches!(layer.start(), Err(LayerError::Destroyed)));
}

#[test]
fn test_construction_failure_aborts_startup_and_cleans_up() {
    let constructs = Arc::new(AtomicUsize::new(0));
    let destroys = Arc::new(AtomicUsize::new(0));
    let package = PackageRepr::builder("app")
        .service(
            ServiceDef::new(
                "good",
                counted_factory(constructs.clone(), destroys.clone()),
            )
            .provides("Good"),
        )
        .service(
            ServiceDef::new(
                "bad",
                ServiceFactory::function(|_ctx| {
                    Err::<Arc<dyn Service>, ServiceError>("boom".into())
                }),
            )
            .provides("Bad")
            .depends_on("good", one("Good")),
        )
        .build()
        .unwrap();

    let layer = ServiceLayer::builder()
        .package(package)
        .forced_reference(one("Bad"))
        .build()
        .unwrap();

    let err = layer.start().unwrap_err();
    match err {
        LayerError::ConstructionFailed { service, .. } => {
            assert_eq!(service.as_str(), "app::bad");
        }
        other => panic!("expected ConstructionFailed, got {:?}", other),
    }

    // The dependency built before the failure was torn down again
    assert_eq!(constructs.load(Ordering::SeqCst), 1);
    assert_eq!(destroys.load(Ordering::SeqCst), 1);
    assert!(!layer.is_started());
    assert_eq!(
        layer.service_state(&ServiceId::new("app", "bad")),
        Some(ServiceState::Destroyed)
    );
    assert_eq!(
        layer.service_state(&ServiceId::new("app", "good")),
        Some(ServiceState::Destroyed)
    );
    assert!(matches!(
        layer.get_service("app", "Good", GetServiceOptions::unchecked()),
        Err(LayerError::Destroyed)
    ));
}

#[test]
fn test_destroy_collects_teardown_failures_and_finishes_the_pass() {
    let package = PackageRepr::builder("app")
        .service(
            ServiceDef::new(
                "flaky",
                ServiceFactory::function(|_ctx| {
                    Ok(Arc::new(FailingTeardown) as Arc<dyn Service>)
                }),
            )
            .provides("Flaky"),
        )
        .service(ServiceDef::new("solid", noop_factory()).provides("Solid"))
        .build()
        .unwrap();

    let layer = ServiceLayer::builder()
        .package(package)
        .forced_reference(one("Flaky"))
        .forced_reference(one("Solid"))
        .build()
        .unwrap();
    layer.start().unwrap();

    let errors = layer.destroy().unwrap_err();
    assert_eq!(errors.0.len(), 1);
    assert!(matches!(
        errors.0[0],
        LayerError::DestructionFailed { .. }
    ));

    // The failing hook did not stop the pass
    assert_eq!(
        layer.service_state(&ServiceId::new("app", "flaky")),
        Some(ServiceState::Destroyed)
    );
    assert_eq!(
        layer.service_state(&ServiceId::new("app", "solid")),
        Some(ServiceState::Destroyed)
    );
}

#[test]
fn test_factory_reads_references_from_ctx() {
    struct Bus {
        events: Mutex<Vec<String>>,
    }

    impl Service for Bus {}

    impl Bus {
        fn publish(&self, event: &str) {
            self.events.lock().unwrap().push(event.to_string());
        }
    }

    struct Publisher {
        bus: Arc<Bus>,
    }

    impl Service for Publisher {}

    let package = PackageRepr::builder("events")
        .ui_reference(one("Publisher"))
        .service(
            ServiceDef::new(
                "bus",
                ServiceFactory::function(|_ctx| {
                    Ok(Arc::new(Bus {
                        events: Mutex::new(Vec::new()),
                    }) as Arc<dyn Service>)
                }),
            )
            .provides("Bus"),
        )
        .service(
            ServiceDef::new(
                "publisher",
                ServiceFactory::function(|ctx| {
                    let bus = ctx
                        .reference_as::<Bus>("bus")
                        .ok_or("bus reference missing")?;
                    bus.publish("publisher ready");
                    Ok(Arc::new(Publisher { bus }) as Arc<dyn Service>)
                }),
            )
            .provides("Publisher")
            .depends_on("bus", one("Bus")),
        )
        .build()
        .unwrap();

    let layer = ServiceLayer::builder().package(package).build().unwrap();
    layer.start().unwrap();

    let publisher = layer
        .get_service("events", "Publisher", GetServiceOptions::default())
        .unwrap()
        .downcast_arc::<Publisher>()
        .ok()
        .unwrap();
    let events = publisher.bus.events.lock().unwrap().clone();
    assert_eq!(events, vec!["publisher ready"]);
}

#[test]
fn test_provider_object_factory() {
    struct ClockProvider;

    impl ProvideService for ClockProvider {
        fn provide(
            &self,
            _ctx: &ServiceCtx,
        ) -> Result<Arc<dyn Service>, ServiceError> {
            Ok(Arc::new(Named { name: "clock" }))
        }
    }

    let package = PackageRepr::builder("time")
        .ui_reference(one("Clock"))
        .service(
            ServiceDef::new("clock", ServiceFactory::provider(ClockProvider)).provides("Clock"),
        )
        .build()
        .unwrap();

    let layer = ServiceLayer::builder().package(package).build().unwrap();
    layer.start().unwrap();

    let clock = layer
        .get_service("time", "Clock", GetServiceOptions::default())
        .unwrap();
    assert_eq!(
        clock.downcast_arc::<Named>().map(|n| n.name).unwrap_or("?"),
        "clock"
    );
}

#[test]
fn test_metadata_toml_end_to_end() {
    const APP_TOML: &str = r#"
        locale = "en"

        [overrides.portal]
        environment = "prod"

        [[packages]]
        name = "portal"
        ui_references = ["Clock"]

        [packages.messages]
        welcome = "Welcome to {environment}"

        [[packages.properties]]
        name = "environment"
        default = "dev"

        [[packages.services]]
        name = "clock"
        provides = ["Clock"]
    "#;

    let mut registry = FactoryRegistry::new();
    registry
        .register_fn("portal::clock", |_ctx| {
            Ok(Arc::new(Named { name: "clock" }) as Arc<dyn Service>)
        })
        .unwrap();

    let metadata = trellis_core::AppMetadata::from_toml(APP_TOML).unwrap();
    let packages = metadata.into_packages(&registry).unwrap();
    let layer = ServiceLayer::builder().packages(packages).build().unwrap();
    layer.start().unwrap();

    let properties = layer.get_properties("portal").unwrap();
    assert_eq!(properties.get_str("environment"), Some("prod"));

    let intl = layer.get_intl("portal").unwrap();
    assert_eq!(
        intl.format_message("welcome", &[("environment", "prod")]),
        Some("Welcome to prod".to_string())
    );

    let clock = layer
        .get_service("portal", "Clock", GetServiceOptions::default())
        .unwrap();
    assert_eq!(
        clock.downcast_arc::<Named>().map(|n| n.name).unwrap_or("?"),
        "clock"
    );

    layer.destroy().unwrap();
}
