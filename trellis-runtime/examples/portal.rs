//! Portal application assembled from declarative packages
//!
//! Builds three packages: `telemetry` provides an event bus fanning out
//! to pluggable sinks, `portal` provides a greeter wired through the bus,
//! and `shell` declares the UI references the front end is allowed to
//! request.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use trellis_core::prelude::*;
use trellis_runtime::{GetServiceOptions, ServiceLayer, StartupPolicy};

/// Destination for telemetry events
struct RecordingSink {
    label: String,
    events: Mutex<Vec<String>>,
}

impl Service for RecordingSink {}

/// Fans published events out to every registered sink
struct EventBus {
    sinks: Vec<Arc<RecordingSink>>,
}

impl Service for EventBus {}

impl EventBus {
    fn publish(&self, event: &str) {
        for sink in &self.sinks {
            sink.events.lock().unwrap().push(event.to_string());
        }
    }
}

/// User-facing greeter backed by package messages
struct Greeter {
    bus: Arc<EventBus>,
    intl: PackageIntl,
}

impl Service for Greeter {}

impl Greeter {
    fn greet(&self, name: &str) -> String {
        self.bus.publish(&format!("greeted {}", name));
        self.intl
            .format_message("welcome", &[("name", name)])
            .unwrap_or_else(|| format!("Hello, {}!", name))
    }
}

fn sink_service(label: &'static str) -> ServiceDef {
    ServiceDef::new(
        label,
        ServiceFactory::function(move |_ctx| {
            Ok(Arc::new(RecordingSink {
                label: label.to_string(),
                events: Mutex::new(Vec::new()),
            }) as Arc<dyn Service>)
        }),
    )
    .provides("Sink")
}

fn telemetry_package() -> Result<PackageRepr> {
    let package = PackageRepr::builder("telemetry")
        .service(sink_service("console"))
        .service(sink_service("audit"))
        .service(
            ServiceDef::new(
                "bus",
                ServiceFactory::function(|ctx| {
                    let sinks = ctx
                        .references_all("sinks")
                        .unwrap_or_default()
                        .iter()
                        .filter_map(|sink| sink.clone().downcast_arc::<RecordingSink>().ok())
                        .collect();
                    Ok(Arc::new(EventBus { sinks }) as Arc<dyn Service>)
                }),
            )
            .provides("EventBus")
            .depends_on("sinks", InterfaceSpec::all("Sink")?),
        )
        .build()?;
    Ok(package)
}

fn portal_package() -> Result<PackageRepr> {
    let package = PackageRepr::builder("portal")
        .property(PropertySpec::new("environment").with_default("production"))
        .message("welcome", "Welcome to the portal, {name}!")
        .service(
            ServiceDef::new(
                "greeter",
                ServiceFactory::function(|ctx| {
                    let bus = ctx
                        .reference_as::<EventBus>("bus")
                        .ok_or("bus reference missing")?;
                    Ok(Arc::new(Greeter {
                        bus,
                        intl: ctx.intl().clone(),
                    }) as Arc<dyn Service>)
                }),
            )
            .provides("Greeter")
            .depends_on("bus", InterfaceSpec::one("EventBus")?),
        )
        .build()?;
    Ok(package)
}

fn shell_package() -> Result<PackageRepr> {
    let package = PackageRepr::builder("shell")
        .ui_reference(InterfaceSpec::one("Greeter")?)
        .ui_reference(InterfaceSpec::all("Sink")?)
        .build()?;
    Ok(package)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    println!("=== Trellis Portal Example ===\n");

    let layer = ServiceLayer::builder()
        .package(telemetry_package()?)
        .package(portal_package()?)
        .package(shell_package()?)
        .forced_reference(InterfaceSpec::one("EventBus")?)
        .startup_policy(StartupPolicy::Eager)
        .dev_mode(true)
        .build()?;

    layer.start()?;
    let required: Vec<String> = layer
        .required_services()
        .iter()
        .map(|id| id.to_string())
        .collect();
    println!("✓ Layer started; required services: {:?}", required);

    let properties = layer.get_properties("portal")?;
    println!(
        "✓ Portal environment: {}",
        properties.get_str("environment").unwrap_or("unknown")
    );

    let greeter = layer
        .get_service("shell", "Greeter", GetServiceOptions::default())?
        .downcast_arc::<Greeter>()
        .map_err(|_| anyhow::anyhow!("Greeter has an unexpected type"))?;
    println!("✓ {}", greeter.greet("Ada"));
    println!("✓ {}", greeter.greet("Grace"));

    println!("\nSink contents:");
    for sink in layer.get_services("shell", "Sink")? {
        if let Ok(sink) = sink.downcast_arc::<RecordingSink>() {
            let events = sink.events.lock().unwrap();
            println!("  [{}] {} events", sink.label, events.len());
            for event in events.iter() {
                println!("    - {}", event);
            }
        }
    }

    match layer.destroy() {
        Ok(()) => println!("\n✓ Layer destroyed cleanly"),
        Err(errors) => println!("\n✗ Teardown finished with {} error(s)", errors.0.len()),
    }
    Ok(())
}
