// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end sessions between endpoints sharing an in-process hub.

use std::sync::Arc;
use std::time::Duration;

use endpoint_events::client::{EventClient, EventFamilyHandle, SessionState};
use endpoint_events::error::{AttachError, DiscoveryError, Error, TransactionError};
use endpoint_events::event::{ClientEvent, EndpointId};
use endpoint_events::family::thermostat::{
    CHANGE_DEGREE_REQUEST_FQN, ChangeDegreeRequest, THERMOSTAT_INFO_REQUEST_FQN, ThermostatEvent,
    ThermostatInfo, ThermostatInfoRequest, ThermostatInfoResponse, ThermostatListener,
};
use endpoint_events::transport::{LocalHub, LocalTransport, StaticVerifier};
use tokio::sync::mpsc;
use tokio::time::timeout;

const USER: &str = "userExternalId";
const TOKEN: &str = "userAccessToken";
const THERMOSTAT_ID: &str = "thermostat_endpoint_id";

type Received = (ThermostatEvent, EndpointId);

/// Listener forwarding every event to a channel.
struct Recorder {
    tx: mpsc::UnboundedSender<Received>,
}

impl ThermostatListener for Recorder {
    fn on_thermostat_info_request(&self, event: &ThermostatInfoRequest, sender: &EndpointId) {
        let _ = self.tx.send(((*event).into(), sender.clone()));
    }

    fn on_thermostat_info_response(&self, event: &ThermostatInfoResponse, sender: &EndpointId) {
        let _ = self.tx.send(((*event).into(), sender.clone()));
    }

    fn on_change_degree_request(&self, event: &ChangeDegreeRequest, sender: &EndpointId) {
        let _ = self.tx.send(((*event).into(), sender.clone()));
    }
}

fn client(hub: &LocalHub, id: &str) -> EventClient<LocalTransport> {
    EventClient::builder(hub.transport())
        .with_endpoint_id(id)
        .with_family::<ThermostatEvent>()
        .build()
}

async fn attached(hub: &LocalHub, id: &str) -> EventClient<LocalTransport> {
    let client = client(hub, id);
    client.start().await.unwrap();
    client.attach_user(USER, TOKEN).await.unwrap();
    client
}

fn record(
    handle: &EventFamilyHandle<ThermostatEvent, LocalTransport>,
) -> mpsc::UnboundedReceiver<Received> {
    let (tx, rx) = mpsc::unbounded_channel();
    handle.add_listener(Arc::new(Recorder { tx }));
    rx
}

async fn next(rx: &mut mpsc::UnboundedReceiver<Received>) -> Received {
    timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("no event within a second")
        .expect("listener channel closed")
}

async fn nothing_more(rx: &mut mpsc::UnboundedReceiver<Received>) {
    assert!(
        timeout(Duration::from_millis(100), rx.recv()).await.is_err(),
        "unexpected event"
    );
}

// ============================================================================
// Full Scenario
// ============================================================================

mod scenario {
    use super::*;

    #[tokio::test]
    async fn broadcast_then_transaction() {
        let hub = LocalHub::new();
        let thermostat = attached(&hub, THERMOSTAT_ID).await;
        let panel = attached(&hub, "panel").await;
        let phone = attached(&hub, "phone").await;

        let mut at_thermostat = record(&thermostat.family::<ThermostatEvent>().unwrap());
        let mut at_phone = record(&phone.family::<ThermostatEvent>().unwrap());
        let mut at_panel = record(&panel.family::<ThermostatEvent>().unwrap());

        let listeners = panel
            .find_event_listeners(&[THERMOSTAT_INFO_REQUEST_FQN, CHANGE_DEGREE_REQUEST_FQN])
            .await
            .unwrap();
        assert_eq!(
            listeners,
            vec![EndpointId::new("phone"), EndpointId::new(THERMOSTAT_ID)]
        );

        let family = panel.family::<ThermostatEvent>().unwrap();
        family
            .send_event_to_all(ChangeDegreeRequest::new(10))
            .await
            .unwrap();

        let expected = (
            ThermostatEvent::from(ChangeDegreeRequest::new(10)),
            EndpointId::new("panel"),
        );
        assert_eq!(next(&mut at_thermostat).await, expected);
        assert_eq!(next(&mut at_phone).await, expected);

        let block = panel.start_events_block().unwrap();
        family
            .add_event_to_block(block, ThermostatInfoRequest::new(), None)
            .unwrap();
        family
            .add_event_to_block(
                block,
                ChangeDegreeRequest::new(-30),
                Some(EndpointId::new(THERMOSTAT_ID)),
            )
            .unwrap();
        panel.submit_events_block(block).await.unwrap();

        assert_eq!(
            next(&mut at_thermostat).await.0,
            ThermostatEvent::from(ThermostatInfoRequest::new())
        );
        assert_eq!(
            next(&mut at_thermostat).await.0,
            ThermostatEvent::from(ChangeDegreeRequest::new(-30))
        );
        assert_eq!(
            next(&mut at_phone).await.0,
            ThermostatEvent::from(ThermostatInfoRequest::new())
        );
        nothing_more(&mut at_phone).await;
        nothing_more(&mut at_panel).await;

        for client in [&panel, &phone, &thermostat] {
            client.stop().await;
        }
        assert_eq!(hub.endpoint_count(), 0);
    }

    #[tokio::test]
    async fn thermostat_answers_info_request() {
        let hub = LocalHub::new();
        let thermostat = attached(&hub, THERMOSTAT_ID).await;
        let panel = attached(&hub, "panel").await;
        let mut at_panel = record(&panel.family::<ThermostatEvent>().unwrap());

        let responder = thermostat.family::<ThermostatEvent>().unwrap();
        let reply_with = responder.clone();
        responder.on_event(move |event, sender| {
            if let ThermostatEvent::ThermostatInfoRequest(_) = event {
                let handle = reply_with.clone();
                let sender = sender.clone();
                tokio::spawn(async move {
                    let info = ThermostatInfo {
                        degree: Some(21),
                        target_degree: Some(22),
                        is_set_manually: Some(false),
                    };
                    let _ = handle
                        .send_event(ThermostatInfoResponse::new(info), sender)
                        .await;
                });
            }
        });

        panel
            .family::<ThermostatEvent>()
            .unwrap()
            .send_event(ThermostatInfoRequest::new(), EndpointId::new(THERMOSTAT_ID))
            .await
            .unwrap();

        let (event, sender) = next(&mut at_panel).await;
        assert_eq!(sender, EndpointId::new(THERMOSTAT_ID));
        match event {
            ThermostatEvent::ThermostatInfoResponse(response) => {
                let info = response.thermostat_info.unwrap();
                assert_eq!(info.target_degree, Some(22));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}

// ============================================================================
// Transactions
// ============================================================================

mod transactions {
    use super::*;

    #[tokio::test]
    async fn discarded_block_delivers_nothing() {
        let hub = LocalHub::new();
        let panel = attached(&hub, "panel").await;
        let thermostat = attached(&hub, THERMOSTAT_ID).await;
        let mut at_thermostat = record(&thermostat.family::<ThermostatEvent>().unwrap());

        let family = panel.family::<ThermostatEvent>().unwrap();
        let block = panel.start_events_block().unwrap();
        family
            .add_event_to_block(block, ChangeDegreeRequest::new(5), None)
            .unwrap();
        family
            .add_event_to_block(block, ThermostatInfoRequest::new(), None)
            .unwrap();

        assert_eq!(panel.remove_events_block(block).unwrap(), 2);
        nothing_more(&mut at_thermostat).await;

        assert!(matches!(
            panel.submit_events_block(block).await,
            Err(Error::Transaction(TransactionError::Closed(_)))
        ));
    }

    #[tokio::test]
    async fn add_to_closed_block_fails() {
        let hub = LocalHub::new();
        let panel = attached(&hub, "panel").await;
        let family = panel.family::<ThermostatEvent>().unwrap();

        let block = panel.start_events_block().unwrap();
        panel.submit_events_block(block).await.unwrap();

        assert!(matches!(
            family.add_event_to_block(block, ChangeDegreeRequest::new(1), None),
            Err(Error::Transaction(TransactionError::Closed(id))) if id == block
        ));
    }

    #[tokio::test]
    async fn blocks_are_independent() {
        let hub = LocalHub::new();
        let panel = attached(&hub, "panel").await;
        let thermostat = attached(&hub, THERMOSTAT_ID).await;
        let mut at_thermostat = record(&thermostat.family::<ThermostatEvent>().unwrap());
        let family = panel.family::<ThermostatEvent>().unwrap();

        let first = panel.start_events_block().unwrap();
        let second = panel.start_events_block().unwrap();
        assert_ne!(first, second);

        family
            .add_event_to_block(first, ChangeDegreeRequest::new(1), None)
            .unwrap();
        family
            .add_event_to_block(second, ChangeDegreeRequest::new(2), None)
            .unwrap();

        panel.remove_events_block(first).unwrap();
        panel.submit_events_block(second).await.unwrap();

        assert_eq!(
            next(&mut at_thermostat).await.0,
            ThermostatEvent::from(ChangeDegreeRequest::new(2))
        );
        nothing_more(&mut at_thermostat).await;
    }
}

// ============================================================================
// Attachment and Discovery
// ============================================================================

mod attachment {
    use super::*;

    #[tokio::test]
    async fn rejected_attach_refuses_sending() {
        let hub = LocalHub::with_verifier(StaticVerifier::new().with_user(USER, TOKEN));
        let panel = client(&hub, "panel");
        panel.start().await.unwrap();

        let result = panel.attach_user(USER, "stolen").await;
        assert!(matches!(result, Err(AttachError::Rejected(_))));

        let family = panel.family::<ThermostatEvent>().unwrap();
        assert!(matches!(
            family.send_event_to_all(ChangeDegreeRequest::new(1)).await,
            Err(Error::NotAttached)
        ));
        assert_eq!(
            panel.find_event_listeners(&[CHANGE_DEGREE_REQUEST_FQN]).await,
            Err(DiscoveryError::NotAttached)
        );
    }

    #[tokio::test]
    async fn users_do_not_see_each_other() {
        let hub = LocalHub::new();
        let panel = attached(&hub, "panel").await;
        let stranger = client(&hub, "stranger");
        stranger.start().await.unwrap();
        stranger.attach_user("someoneElse", TOKEN).await.unwrap();
        let mut at_stranger = record(&stranger.family::<ThermostatEvent>().unwrap());

        let listeners = panel
            .find_event_listeners(&[CHANGE_DEGREE_REQUEST_FQN])
            .await
            .unwrap();
        assert!(listeners.is_empty());

        panel
            .family::<ThermostatEvent>()
            .unwrap()
            .send_event_to_all(ChangeDegreeRequest::new(1))
            .await
            .unwrap();
        nothing_more(&mut at_stranger).await;
    }

    #[tokio::test]
    async fn empty_query_returns_empty_list() {
        let hub = LocalHub::new();
        let panel = attached(&hub, "panel").await;
        let _thermostat = attached(&hub, THERMOSTAT_ID).await;

        assert_eq!(panel.find_event_listeners(&[]).await, Ok(Vec::new()));
    }

    #[tokio::test]
    async fn unreachable_hub() {
        let hub = LocalHub::new();
        let panel = client(&hub, "panel");
        panel.start().await.unwrap();

        hub.set_reachable(false);
        assert!(matches!(
            panel.attach_user(USER, TOKEN).await,
            Err(AttachError::Unreachable(_))
        ));

        hub.set_reachable(true);
        panel.attach_user(USER, TOKEN).await.unwrap();

        hub.set_reachable(false);
        assert!(matches!(
            panel.find_event_listeners(&[CHANGE_DEGREE_REQUEST_FQN]).await,
            Err(DiscoveryError::Unreachable(_))
        ));
        assert!(matches!(
            panel
                .family::<ThermostatEvent>()
                .unwrap()
                .send_event_to_all(ChangeDegreeRequest::new(1))
                .await,
            Err(Error::Protocol(_))
        ));
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

mod lifecycle {
    use super::*;

    #[tokio::test]
    async fn lifecycle_events_in_order() {
        let hub = LocalHub::new();
        let panel = client(&hub, "panel");
        let mut events = panel.subscribe();

        panel.start().await.unwrap();
        panel.attach_user(USER, TOKEN).await.unwrap();
        let block = panel.start_events_block().unwrap();
        panel.remove_events_block(block).unwrap();
        panel.stop().await;

        let endpoint = EndpointId::new("panel");
        assert_eq!(
            events.recv().await.unwrap(),
            ClientEvent::started(endpoint.clone())
        );
        assert_eq!(
            events.recv().await.unwrap(),
            ClientEvent::UserAttached {
                endpoint_id: endpoint.clone(),
                external_id: USER.to_string(),
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            ClientEvent::TransactionDiscarded {
                endpoint_id: endpoint.clone(),
                transaction: block,
                event_count: 0,
            }
        );
        assert_eq!(events.recv().await.unwrap(), ClientEvent::stopped(endpoint));
    }

    #[tokio::test]
    async fn stopped_peer_no_longer_receives() {
        let hub = LocalHub::new();
        let panel = attached(&hub, "panel").await;
        let thermostat = attached(&hub, THERMOSTAT_ID).await;

        thermostat.stop().await;
        assert_eq!(thermostat.state(), SessionState::Stopped);

        let listeners = panel
            .find_event_listeners(&[CHANGE_DEGREE_REQUEST_FQN])
            .await
            .unwrap();
        assert!(listeners.is_empty());
        panel
            .family::<ThermostatEvent>()
            .unwrap()
            .send_event_to_all(ChangeDegreeRequest::new(1))
            .await
            .unwrap();
    }
}
