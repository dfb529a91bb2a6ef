// SPDX-License-Identifier: MPL-2.0

//! Demo program: exchange thermostat events through an MQTT broker.
//!
//! Runs the same flow as `event_demo` with an [`MqttTransport`]. Start a
//! thermostat endpoint elsewhere (for example a second instance of this
//! program) to see events being delivered.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example mqtt_event_demo -- <host> [port] [username] [password]
//! ```
//!
//! # Example
//!
//! ```bash
//! # Without authentication (default port 1883)
//! cargo run --example mqtt_event_demo -- 192.168.1.50
//!
//! # With authentication
//! cargo run --example mqtt_event_demo -- 192.168.1.50 1883 mqtt_user mqtt_pass
//! ```

use std::env;
use std::sync::Arc;

use endpoint_events::client::EventClient;
use endpoint_events::event::EndpointId;
use endpoint_events::family::thermostat::{
    CHANGE_DEGREE_REQUEST_FQN, ChangeDegreeRequest, THERMOSTAT_INFO_REQUEST_FQN, ThermostatEvent,
    ThermostatInfoRequest, ThermostatInfoResponse, ThermostatListener,
};
use endpoint_events::transport::MqttTransport;
use tokio::io::{AsyncBufReadExt, BufReader};

const USER_EXTERNAL_ID: &str = "userExternalId";
const USER_ACCESS_TOKEN: &str = "userAccessToken";
const THERMOSTAT_ENDPOINT_ID: &str = "thermostat_endpoint_id";

struct ConsoleListener;

impl ThermostatListener for ConsoleListener {
    fn on_thermostat_info_request(&self, _event: &ThermostatInfoRequest, sender: &EndpointId) {
        println!("<- ThermostatInfoRequest from {sender}");
    }

    fn on_thermostat_info_response(&self, event: &ThermostatInfoResponse, sender: &EndpointId) {
        println!("<- ThermostatInfoResponse from {sender}: {:?}", event.thermostat_info);
    }

    fn on_change_degree_request(&self, event: &ChangeDegreeRequest, sender: &EndpointId) {
        println!("<- ChangeDegreeRequest from {sender}: {:+}", event.degree);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <host> [port] [username] [password]", args[0]);
        eprintln!();
        eprintln!("Examples:");
        eprintln!("  cargo run --example mqtt_event_demo -- 192.168.1.50");
        eprintln!("  cargo run --example mqtt_event_demo -- 192.168.1.50 1883 user pass");
        std::process::exit(1);
    }

    let host = &args[1];
    let port: u16 = args.get(2).and_then(|p| p.parse().ok()).unwrap_or(1883);

    println!("Connecting to MQTT broker {host}:{port}...");

    let mut builder = MqttTransport::builder().host(host).port(port);
    if args.len() >= 5 {
        builder = builder.credentials(&args[3], &args[4]);
    }
    let transport = builder.build().await?;

    let client = EventClient::builder(transport)
        .with_family::<ThermostatEvent>()
        .build();
    client.on_started(|endpoint| println!("Event client started as {endpoint}"));

    client.start().await?;

    if let Err(e) = client
        .attach_user(USER_EXTERNAL_ID, USER_ACCESS_TOKEN)
        .await
    {
        eprintln!("Attach failed: {e}");
        client.stop().await;
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

    let thermostat = client.family::<ThermostatEvent>()?;
    thermostat.add_listener(Arc::new(ConsoleListener));

    thermostat
        .send_event_to_all(ChangeDegreeRequest::new(10))
        .await?;

    let block = client.start_events_block()?;
    thermostat.add_event_to_block(block, ThermostatInfoRequest::new(), None)?;
    thermostat.add_event_to_block(
        block,
        ChangeDegreeRequest::new(-30),
        Some(EndpointId::new(THERMOSTAT_ENDPOINT_ID)),
    )?;
    client.submit_events_block(block).await?;

    println!();
    println!("Press Enter to stop...");
    let mut line = String::new();
    if let Err(e) = BufReader::new(tokio::io::stdin()).read_line(&mut line).await {
        tracing::error!(error = %e, "Failed to read console input");
    }

    client.stop().await;
    Ok(())
}
