// SPDX-License-Identifier: MPL-2.0

//! Demo program: exchange thermostat events between two endpoints.
//!
//! This example demonstrates:
//! - Starting an event client and attaching it to a user
//! - Discovering endpoints that listen for thermostat events
//! - Registering a listener that handles each thermostat event type
//! - Sending a broadcast event and a transaction (event block)
//!
//! An in-process [`LocalHub`] stands in for the event server. A second
//! client plays the thermostat with endpoint ID `thermostat_endpoint_id`;
//! it answers info requests and applies degree changes.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example event_demo
//! ```
//!
//! Press Enter to stop the demo.

use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

use endpoint_events::client::{EventClient, EventFamilyHandle};
use endpoint_events::event::EndpointId;
use endpoint_events::family::thermostat::{
    CHANGE_DEGREE_REQUEST_FQN, ChangeDegreeRequest, THERMOSTAT_INFO_REQUEST_FQN, ThermostatEvent,
    ThermostatInfo, ThermostatInfoRequest, ThermostatInfoResponse, ThermostatListener,
};
use endpoint_events::transport::{LocalHub, LocalTransport};
use tokio::io::{AsyncBufReadExt, BufReader};

const USER_EXTERNAL_ID: &str = "userExternalId";
const USER_ACCESS_TOKEN: &str = "userAccessToken";
const THERMOSTAT_ENDPOINT_ID: &str = "thermostat_endpoint_id";

/// Listener of the controlling endpoint: prints every thermostat event.
struct ConsoleListener;

impl ThermostatListener for ConsoleListener {
    fn on_thermostat_info_request(&self, _event: &ThermostatInfoRequest, sender: &EndpointId) {
        println!("<- ThermostatInfoRequest from {sender}");
    }

    fn on_thermostat_info_response(&self, event: &ThermostatInfoResponse, sender: &EndpointId) {
        match event.thermostat_info {
            Some(info) => println!(
                "<- ThermostatInfoResponse from {sender}: degree={:?} target={:?} manual={:?}",
                info.degree, info.target_degree, info.is_set_manually
            ),
            None => println!("<- ThermostatInfoResponse from {sender}: no info"),
        }
    }

    fn on_change_degree_request(&self, event: &ChangeDegreeRequest, sender: &EndpointId) {
        println!("<- ChangeDegreeRequest from {sender}: {:+}", event.degree);
    }
}

/// The simulated thermostat.
struct Thermostat {
    degree: i32,
    target: AtomicI32,
    handle: EventFamilyHandle<ThermostatEvent, LocalTransport>,
}

impl ThermostatListener for Thermostat {
    fn on_thermostat_info_request(&self, _event: &ThermostatInfoRequest, sender: &EndpointId) {
        let info = ThermostatInfo {
            degree: Some(self.degree),
            target_degree: Some(self.target.load(Ordering::SeqCst)),
            is_set_manually: Some(false),
        };
        println!("   [thermostat] info requested by {sender}");

        let handle = self.handle.clone();
        let sender = sender.clone();
        tokio::spawn(async move {
            if let Err(e) = handle
                .send_event(ThermostatInfoResponse::new(info), sender)
                .await
            {
                eprintln!("   [thermostat] failed to answer: {e}");
            }
        });
    }

    fn on_change_degree_request(&self, event: &ChangeDegreeRequest, sender: &EndpointId) {
        let target = self.target.fetch_add(event.degree, Ordering::SeqCst) + event.degree;
        println!(
            "   [thermostat] {sender} changed target by {:+}, now {target}",
            event.degree
        );
    }
}

async fn start_thermostat(
    hub: &LocalHub,
) -> Result<EventClient<LocalTransport>, Box<dyn std::error::Error>> {
    let client = EventClient::builder(hub.transport())
        .with_endpoint_id(THERMOSTAT_ENDPOINT_ID)
        .with_family::<ThermostatEvent>()
        .build();

    let handle = client.family::<ThermostatEvent>()?;
    handle.add_listener(Arc::new(Thermostat {
        degree: 21,
        target: AtomicI32::new(22),
        handle: handle.clone(),
    }));

    client.start().await?;
    client
        .attach_user(USER_EXTERNAL_ID, USER_ACCESS_TOKEN)
        .await?;
    Ok(client)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let hub = LocalHub::new();
    let thermostat = start_thermostat(&hub).await?;

    let client = EventClient::builder(hub.transport())
        .with_family::<ThermostatEvent>()
        .build();

    client.on_started(|endpoint| println!("Event client started as {endpoint}"));
    client.on_stopped(|endpoint| println!("Event client {endpoint} stopped"));

    client.start().await?;

    if let Err(e) = client
        .attach_user(USER_EXTERNAL_ID, USER_ACCESS_TOKEN)
        .await
    {
        eprintln!("Attach failed: {e}");
        client.stop().await;
        thermostat.stop().await;
        return Ok(());
    }
    println!("Attached to user {USER_EXTERNAL_ID}");

    match client
        .find_event_listeners(&[THERMOSTAT_INFO_REQUEST_FQN, CHANGE_DEGREE_REQUEST_FQN])
        .await
    {
        Ok(listeners) => {
            println!("{} event listener(s) received", listeners.len());
            for listener in &listeners {
                println!("  - {listener}");
            }
        }
        Err(e) => println!("Event listeners request failed: {e}"),
    }

    let thermostat_family = client.family::<ThermostatEvent>()?;
    thermostat_family.add_listener(Arc::new(ConsoleListener));

    println!("-> ChangeDegreeRequest(+10) to all");
    thermostat_family
        .send_event_to_all(ChangeDegreeRequest::new(10))
        .await?;

    let block = client.start_events_block()?;
    thermostat_family.add_event_to_block(block, ThermostatInfoRequest::new(), None)?;
    thermostat_family.add_event_to_block(
        block,
        ChangeDegreeRequest::new(-30),
        Some(EndpointId::new(THERMOSTAT_ENDPOINT_ID)),
    )?;
    println!("-> Submitting {block}: ThermostatInfoRequest to all, ChangeDegreeRequest(-30) to {THERMOSTAT_ENDPOINT_ID}");
    client.submit_events_block(block).await?;

    println!();
    println!("Press Enter to stop...");
    let mut line = String::new();
    if let Err(e) = BufReader::new(tokio::io::stdin()).read_line(&mut line).await {
        tracing::error!(error = %e, "Failed to read console input");
    }

    client.stop().await;
    thermostat.stop().await;
    Ok(())
}
