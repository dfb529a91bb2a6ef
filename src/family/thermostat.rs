// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Thermostat event family.
//!
//! Events exchanged between thermostats and the endpoints controlling them:
//!
//! | Event | Payload |
//! |-------|---------|
//! | [`ThermostatInfoRequest`] | none |
//! | [`ThermostatInfoResponse`] | current [`ThermostatInfo`] |
//! | [`ChangeDegreeRequest`] | relative change in degrees |

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CodecError;
use crate::event::EndpointId;

use super::EventFamily;

/// Fully-qualified name of [`ThermostatInfoRequest`].
pub const THERMOSTAT_INFO_REQUEST_FQN: &str =
    "org.kaaproject.kaa.schema.sample.event.thermo.ThermostatInfoRequest";

/// Fully-qualified name of [`ThermostatInfoResponse`].
pub const THERMOSTAT_INFO_RESPONSE_FQN: &str =
    "org.kaaproject.kaa.schema.sample.event.thermo.ThermostatInfoResponse";

/// Fully-qualified name of [`ChangeDegreeRequest`].
pub const CHANGE_DEGREE_REQUEST_FQN: &str =
    "org.kaaproject.kaa.schema.sample.event.thermo.ChangeDegreeRequest";

/// Thermostat readings and settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThermostatInfo {
    /// Current temperature.
    #[serde(default)]
    pub degree: Option<i32>,
    /// Temperature the thermostat is regulating towards.
    #[serde(default)]
    pub target_degree: Option<i32>,
    /// Whether the target was set manually on the device.
    #[serde(default)]
    pub is_set_manually: Option<bool>,
}

/// Asks thermostats to report their [`ThermostatInfo`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThermostatInfoRequest {}

impl ThermostatInfoRequest {
    /// Creates a new info request.
    #[must_use]
    pub fn new() -> Self {
        Self {}
    }
}

/// A thermostat's answer to a [`ThermostatInfoRequest`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThermostatInfoResponse {
    /// The reported information.
    #[serde(default)]
    pub thermostat_info: Option<ThermostatInfo>,
}

impl ThermostatInfoResponse {
    /// Creates a response carrying `info`.
    #[must_use]
    pub fn new(info: ThermostatInfo) -> Self {
        Self {
            thermostat_info: Some(info),
        }
    }
}

/// Asks thermostats to change their target temperature by `degree`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeDegreeRequest {
    /// Relative change, may be negative.
    pub degree: i32,
}

impl ChangeDegreeRequest {
    /// Creates a request to change the temperature by `degree`.
    #[must_use]
    pub fn new(degree: i32) -> Self {
        Self { degree }
    }
}

/// Events of the thermostat family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThermostatEvent {
    /// See [`ThermostatInfoRequest`].
    ThermostatInfoRequest(ThermostatInfoRequest),
    /// See [`ThermostatInfoResponse`].
    ThermostatInfoResponse(ThermostatInfoResponse),
    /// See [`ChangeDegreeRequest`].
    ChangeDegreeRequest(ChangeDegreeRequest),
}

impl From<ThermostatInfoRequest> for ThermostatEvent {
    fn from(event: ThermostatInfoRequest) -> Self {
        Self::ThermostatInfoRequest(event)
    }
}

impl From<ThermostatInfoResponse> for ThermostatEvent {
    fn from(event: ThermostatInfoResponse) -> Self {
        Self::ThermostatInfoResponse(event)
    }
}

impl From<ChangeDegreeRequest> for ThermostatEvent {
    fn from(event: ChangeDegreeRequest) -> Self {
        Self::ChangeDegreeRequest(event)
    }
}

/// Listener with one method per thermostat event type.
///
/// Every method defaults to doing nothing, so implementors only override the
/// events they care about.
pub trait ThermostatListener: Send + Sync {
    /// Called for each [`ThermostatInfoRequest`].
    fn on_thermostat_info_request(&self, _event: &ThermostatInfoRequest, _sender: &EndpointId) {}

    /// Called for each [`ThermostatInfoResponse`].
    fn on_thermostat_info_response(&self, _event: &ThermostatInfoResponse, _sender: &EndpointId) {}

    /// Called for each [`ChangeDegreeRequest`].
    fn on_change_degree_request(&self, _event: &ChangeDegreeRequest, _sender: &EndpointId) {}
}

impl EventFamily for ThermostatEvent {
    const NAME: &'static str = "thermostat";

    const EVENT_TYPES: &'static [&'static str] = &[
        THERMOSTAT_INFO_REQUEST_FQN,
        THERMOSTAT_INFO_RESPONSE_FQN,
        CHANGE_DEGREE_REQUEST_FQN,
    ];

    type Listener = dyn ThermostatListener;

    fn fqn(&self) -> &'static str {
        match self {
            Self::ThermostatInfoRequest(_) => THERMOSTAT_INFO_REQUEST_FQN,
            Self::ThermostatInfoResponse(_) => THERMOSTAT_INFO_RESPONSE_FQN,
            Self::ChangeDegreeRequest(_) => CHANGE_DEGREE_REQUEST_FQN,
        }
    }

    fn to_payload(&self) -> Result<Value, CodecError> {
        let payload = match self {
            Self::ThermostatInfoRequest(event) => serde_json::to_value(event)?,
            Self::ThermostatInfoResponse(event) => serde_json::to_value(event)?,
            Self::ChangeDegreeRequest(event) => serde_json::to_value(event)?,
        };
        Ok(payload)
    }

    fn from_payload(fqn: &str, payload: Value) -> Result<Self, CodecError> {
        let event = match fqn {
            THERMOSTAT_INFO_REQUEST_FQN => {
                Self::ThermostatInfoRequest(serde_json::from_value(payload)?)
            }
            THERMOSTAT_INFO_RESPONSE_FQN => {
                Self::ThermostatInfoResponse(serde_json::from_value(payload)?)
            }
            CHANGE_DEGREE_REQUEST_FQN => Self::ChangeDegreeRequest(serde_json::from_value(payload)?),
            other => return Err(CodecError::UnknownEventType(other.to_string())),
        };
        Ok(event)
    }

    fn dispatch_to(&self, listener: &Self::Listener, sender: &EndpointId) {
        match self {
            Self::ThermostatInfoRequest(event) => listener.on_thermostat_info_request(event, sender),
            Self::ThermostatInfoResponse(event) => {
                listener.on_thermostat_info_response(event, sender);
            }
            Self::ChangeDegreeRequest(event) => listener.on_change_degree_request(event, sender),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fqn_matches_variant() {
        assert_eq!(
            ThermostatEvent::from(ChangeDegreeRequest::new(10)).fqn(),
            CHANGE_DEGREE_REQUEST_FQN
        );
        assert_eq!(
            ThermostatEvent::from(ThermostatInfoRequest::new()).fqn(),
            THERMOSTAT_INFO_REQUEST_FQN
        );
    }

    #[test]
    fn change_degree_payload() {
        let payload = ThermostatEvent::from(ChangeDegreeRequest::new(-30))
            .to_payload()
            .unwrap();
        assert_eq!(payload, json!({ "degree": -30 }));
    }

    #[test]
    fn info_response_uses_camel_case() {
        let info = ThermostatInfo {
            degree: Some(21),
            target_degree: Some(23),
            is_set_manually: Some(false),
        };
        let payload = ThermostatEvent::from(ThermostatInfoResponse::new(info))
            .to_payload()
            .unwrap();
        assert_eq!(
            payload,
            json!({
                "thermostatInfo": { "degree": 21, "targetDegree": 23, "isSetManually": false }
            })
        );
    }

    #[test]
    fn decode_info_request_from_empty_object() {
        let event = ThermostatEvent::from_payload(THERMOSTAT_INFO_REQUEST_FQN, json!({})).unwrap();
        assert_eq!(
            event,
            ThermostatEvent::ThermostatInfoRequest(ThermostatInfoRequest::new())
        );
    }

    #[test]
    fn decode_info_response_with_missing_fields() {
        let event = ThermostatEvent::from_payload(
            THERMOSTAT_INFO_RESPONSE_FQN,
            json!({ "thermostatInfo": { "degree": 19 } }),
        )
        .unwrap();

        let ThermostatEvent::ThermostatInfoResponse(response) = event else {
            panic!("expected ThermostatInfoResponse");
        };
        let info = response.thermostat_info.unwrap();
        assert_eq!(info.degree, Some(19));
        assert_eq!(info.target_degree, None);
    }

    #[test]
    fn decode_unknown_type_fails() {
        let result = ThermostatEvent::from_payload("org.example.Other", json!({}));
        assert!(matches!(result, Err(CodecError::UnknownEventType(fqn)) if fqn == "org.example.Other"));
    }

    #[test]
    fn decode_mismatched_payload_fails() {
        let result = ThermostatEvent::from_payload(CHANGE_DEGREE_REQUEST_FQN, json!({}));
        assert!(matches!(result, Err(CodecError::Json(_))));
    }

    #[test]
    fn supports_only_family_types() {
        assert!(ThermostatEvent::supports(CHANGE_DEGREE_REQUEST_FQN));
        assert!(ThermostatEvent::supports(THERMOSTAT_INFO_RESPONSE_FQN));
        assert!(!ThermostatEvent::supports("ChangeDegreeRequest"));
    }

    #[test]
    fn dispatch_to_calls_matching_method() {
        use std::sync::atomic::{AtomicI32, Ordering};

        #[derive(Default)]
        struct LastDegree(AtomicI32);

        impl ThermostatListener for LastDegree {
            fn on_change_degree_request(&self, event: &ChangeDegreeRequest, _sender: &EndpointId) {
                self.0.store(event.degree, Ordering::SeqCst);
            }
        }

        let listener = LastDegree::default();
        let sender = EndpointId::new("phone");

        ThermostatEvent::from(ChangeDegreeRequest::new(7)).dispatch_to(&listener, &sender);
        ThermostatEvent::from(ThermostatInfoRequest::new()).dispatch_to(&listener, &sender);

        assert_eq!(listener.0.load(Ordering::SeqCst), 7);
    }
}
