// Copyright 2022, The Android Open Source Project
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The unsolicited notifications delivered by the device stack.

use crate::params::{
    DeviceState, MulticastListUpdateNtf, OneWayRangingMeasurement, RangingMeasurementType,
    SessionId, SessionState, StatusCode, TwoWayRangingMeasurement,
};

/// The enum of all the notifications which the device stack reports without being asked.
#[derive(Debug, Clone, PartialEq)]
pub enum StackNotification {
    /// The device-scoped notifications.
    Core(CoreNotification),
    /// The session-scoped notifications.
    Session(SessionNotification),
}

/// The device-scoped notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum CoreNotification {
    /// The device lifecycle state reported by the device.
    DeviceStatus(DeviceState),
    /// An error the device could not attribute to a command.
    GenericError(StatusCode),
}

/// The session-scoped notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotification {
    /// The state transition of a session, with the device-defined reason byte.
    Status { session_id: SessionId, session_state: SessionState, reason_code: u8 },
    /// The measurements of a completed ranging round.
    RangeData(SessionRangeData),
    /// The outcome of a controller multicast-list update.
    MulticastListUpdate(MulticastListUpdateNtf),
    /// The transmission status of submitted blink data.
    BlinkDataTx { repetition_count_status: u8 },
}

/// The measurement data of a single ranging round.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRangeData {
    /// The sequence counter that starts with 0 when the session is started.
    pub sequence_number: u32,

    /// The identifier of the ranging session.
    pub session_id: SessionId,

    /// The current ranging interval setting in the unit of ms.
    pub current_ranging_interval_ms: u32,

    /// The ranging measurement type.
    pub ranging_measurement_type: RangingMeasurementType,

    /// The ranging measurement data.
    pub ranging_measurements: RangingMeasurements,

    /// Indication that a RCR was sent or received in the current ranging round.
    pub rcr_indicator: u8,

    /// The raw data of the notification message.
    pub raw_ranging_data: Vec<u8>,
}

/// The measurement list of a ranging round, keyed by the measurement type.
#[derive(Debug, Clone, PartialEq)]
pub enum RangingMeasurements {
    /// The measurements of a two-way ranging round.
    TwoWay(Vec<TwoWayRangingMeasurement>),
    /// The measurements of a one-way ranging round.
    OneWay(Vec<OneWayRangingMeasurement>),
}
