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

use bytes::Bytes;

use crate::params::{
    AppConfigTlv, AppConfigTlvType, Controlee, DeviceConfigId, DeviceConfigTlv, SessionId,
    SessionType, UpdateMulticastListAction,
};

/// The enum to represent the commands submitted to the device stack. The definition of each
/// field should follow the stack interface.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub enum StackCommand {
    Enable,
    Disable {
        graceful: bool,
    },
    DeviceReset {
        reset_config: u8,
    },
    CoreGetDeviceInfo,
    CoreSetConfig {
        config_tlvs: Vec<DeviceConfigTlv>,
    },
    CoreGetConfig {
        cfg_id: Vec<DeviceConfigId>,
    },
    SessionInit {
        session_id: SessionId,
        session_type: SessionType,
    },
    SessionDeinit {
        session_id: SessionId,
    },
    SessionSetAppConfig {
        session_id: SessionId,
        config_tlvs: Vec<AppConfigTlv>,
    },
    SessionGetAppConfig {
        session_id: SessionId,
        app_cfg: Vec<AppConfigTlvType>,
    },
    SessionGetCount,
    SessionGetState {
        session_id: SessionId,
    },
    SessionUpdateControllerMulticastList {
        session_id: SessionId,
        action: UpdateMulticastListAction,
        controlees: Vec<Controlee>,
    },
    RangeStart {
        session_id: SessionId,
    },
    RangeStop {
        session_id: SessionId,
    },
    RangeGetRangingCount {
        session_id: SessionId,
    },
    SendBlinkData {
        session_id: SessionId,
        repetition_count: u32,
        app_data: Bytes,
    },
    RawCommand {
        gid: u32,
        oid: u32,
        payload: Bytes,
    },
}
