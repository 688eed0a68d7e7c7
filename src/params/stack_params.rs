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

//! This module defines the parameters or responses of the UwbManager's methods.

use num_derive::{FromPrimitive, ToPrimitive};

use crate::params::utils::u8_to_bytes;
use crate::utils::consuming_builder_field;

/// The type of the session identifier.
pub type SessionId = u32;
/// The type of the sub-session identifier.
pub type SubSessionId = u32;

/// The maximum number of sessions the device stack supports concurrently.
pub const MAX_SESSION_COUNT: u8 = 5;
/// The maximum number of controlees a single multicast-list update may carry.
pub const MAX_NUM_CONTROLLEES: usize = 8;
/// The maximum number of measurement slots in a single ranging round.
pub const MAX_NUM_RESPONDERS: usize = 12;
/// The marshalling bound for variable-length command payloads.
pub const MAX_COMMAND_PAYLOAD_LEN: usize = 255;
/// The distance value reported when a measurement carries no valid distance.
pub const INVALID_DISTANCE_VALUE: u16 = 0xFFFF;

/// The lifecycle state of the UWB device, tracked by the manager and reported by the
/// device status notification.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum DeviceState {
    Uninitialized = 0x00,
    Enabling = 0x01,
    Ready = 0x02,
    Error = 0xFF,
}

/// The state of a ranging session. It is never cached by this library; the state query
/// always goes to the device.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum SessionState {
    Init = 0x00,
    Deinit = 0x01,
    Active = 0x02,
    Idle = 0x03,
    /// The state reported when the device could not answer the query.
    Unknown = 0xFF,
}

/// The type of a ranging session.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum SessionType {
    FiraRangingSession = 0x00,
    FiraDataTransfer = 0x01,
    Ccc = 0xA0,
    DeviceTestMode = 0xD0,
}

/// The status code reported by the device in responses and notifications.
///
/// Parse sites decode an unlisted byte to `Failed`; the callers treat every non-`Ok` code
/// uniformly as a device rejection.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum StatusCode {
    Ok = 0x00,
    Rejected = 0x01,
    Failed = 0x02,
    SyntaxError = 0x03,
    InvalidParam = 0x04,
    InvalidRange = 0x05,
    InvalidMessageSize = 0x06,
    UnknownGid = 0x07,
    UnknownOid = 0x08,
    ReadOnly = 0x09,
    CommandRetry = 0x0A,
    SessionNotExist = 0x11,
    SessionDuplicate = 0x12,
    SessionActive = 0x13,
    MaxSessionsExceeded = 0x14,
    SessionNotConfigured = 0x15,
    RangingTxFailed = 0x20,
    DataMaxTxPsduSizeExceeded = 0x30,
}

/// The type of the measurements carried by a ranging round.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum RangingMeasurementType {
    OneWay = 0x00,
    TwoWay = 0x01,
}

/// The identifier of a device configuration parameter.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum DeviceConfigId {
    DeviceState = 0x00,
    LowPowerMode = 0x01,
}

/// The identifier of an application configuration parameter.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum AppConfigTlvType {
    DeviceType = 0x00,
    RangingRoundUsage = 0x01,
    StsConfig = 0x02,
    MultiNodeMode = 0x03,
    ChannelNumber = 0x04,
    NoOfControlee = 0x05,
    DeviceMacAddress = 0x06,
    DstMacAddress = 0x07,
    SlotDuration = 0x08,
    RangingDuration = 0x09,
    RngDataNtf = 0x0E,
    RngDataNtfProximityNear = 0x0F,
    RngDataNtfProximityFar = 0x10,
    DeviceRole = 0x11,
}

/// The action of a controller multicast-list update.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum UpdateMulticastListAction {
    AddControlee = 0x00,
    RemoveControlee = 0x01,
}

/// A protocol version unpacked from the packed form reported by the device. The low byte of
/// the packed form carries the major number; the high byte carries the maintenance and minor
/// numbers as its low and high nibbles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
    pub maintenance: u8,
}

impl ProtocolVersion {
    pub fn from_packed(value: u16) -> Self {
        Self {
            major: (value & 0xFF) as u8,
            maintenance: ((value >> 8) & 0x0F) as u8,
            minor: ((value >> 12) & 0x0F) as u8,
        }
    }
}

/// The response of the UwbManager::device_info() method.
///
/// The versions are kept in their packed form; the accessor methods return the unpacked view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfoResponse {
    pub uci_version: u16,
    pub mac_version: u16,
    pub phy_version: u16,
    pub uci_test_version: u16,
    pub vendor_spec_info: Vec<u8>,
}

impl DeviceInfoResponse {
    pub fn uci_protocol_version(&self) -> ProtocolVersion {
        ProtocolVersion::from_packed(self.uci_version)
    }

    pub fn mac_protocol_version(&self) -> ProtocolVersion {
        ProtocolVersion::from_packed(self.mac_version)
    }

    pub fn phy_protocol_version(&self) -> ProtocolVersion {
        ProtocolVersion::from_packed(self.phy_version)
    }

    pub fn uci_test_protocol_version(&self) -> ProtocolVersion {
        ProtocolVersion::from_packed(self.uci_test_version)
    }
}

/// A device configuration parameter in its type-value form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfigTlv {
    pub cfg_id: DeviceConfigId,
    pub v: Vec<u8>,
}

/// The fixed device configuration applied at the end of the device bring-up, and re-applied
/// by the recovery path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreDeviceConfig {
    low_power_mode: bool,
}

impl Default for CoreDeviceConfig {
    fn default() -> Self {
        Self { low_power_mode: true }
    }
}

impl CoreDeviceConfig {
    consuming_builder_field!(low_power_mode, bool);

    /// Generates the parameter list submitted to the device.
    pub fn tlvs(&self) -> Vec<DeviceConfigTlv> {
        vec![DeviceConfigTlv {
            cfg_id: DeviceConfigId::LowPowerMode,
            v: u8_to_bytes(u8::from(self.low_power_mode)),
        }]
    }
}

/// The per-parameter status returned by a device configuration update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfigStatus {
    pub cfg_id: DeviceConfigId,
    pub status: StatusCode,
}

/// An application configuration parameter in its type-value form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfigTlv {
    pub cfg_id: AppConfigTlvType,
    pub v: Vec<u8>,
}

/// The per-parameter status returned by an application configuration update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfigStatus {
    pub cfg_id: AppConfigTlvType,
    pub status: StatusCode,
}

/// The response of the UwbManager::set_core_config() method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreSetConfigResponse {
    pub status: StatusCode,
    pub config_status: Vec<DeviceConfigStatus>,
}

/// The response of the UwbManager::set_app_config() method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetAppConfigResponse {
    pub status: StatusCode,
    pub config_status: Vec<AppConfigStatus>,
}

/// A controlee entry of a controller multicast-list update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Controlee {
    pub short_address: u16,
    pub subsession_id: SubSessionId,
}

/// The per-controlee status carried by a multicast-list update notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControleeStatus {
    pub mac_address: u16,
    pub subsession_id: SubSessionId,
    pub status: u8,
}

/// The payload of a controller multicast-list update notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MulticastListUpdateNtf {
    pub session_id: SessionId,
    pub remaining_multicast_list_size: u8,
    pub status_list: Vec<ControleeStatus>,
}

/// A single two-way ranging measurement slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TwoWayRangingMeasurement {
    pub mac_address: u16,
    pub status: StatusCode,
    pub nlos: u8,
    pub distance: u16,
    pub aoa_azimuth: u16,
    pub aoa_elevation: u16,
}

/// A single one-way ranging measurement slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OneWayRangingMeasurement {
    pub mac_address: u16,
    pub status: StatusCode,
    pub nlos: u8,
    pub aoa_azimuth: u16,
    pub aoa_elevation: u16,
    pub frame_sequence_number: u8,
}

/// The response of the UwbManager::raw_command() method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawStackMessage {
    pub gid: u32,
    pub oid: u32,
    pub payload: Vec<u8>,
}
