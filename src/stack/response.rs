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

use crate::error::Result;
use crate::params::{
    AppConfigTlv, CoreSetConfigResponse, DeviceConfigTlv, DeviceInfoResponse, RawStackMessage,
    SessionState, SetAppConfigResponse,
};
use crate::stack::command::StackCommand;

/// The enum to represent the responses of the device stack. Each variant carries the outcome
/// of the command kind of the same name.
#[derive(Debug, Clone, PartialEq)]
pub enum StackResponse {
    Enable(Result<()>),
    Disable(Result<()>),
    DeviceReset(Result<()>),
    CoreGetDeviceInfo(Result<DeviceInfoResponse>),
    CoreSetConfig(CoreSetConfigResponse),
    CoreGetConfig(Result<Vec<DeviceConfigTlv>>),
    SessionInit(Result<()>),
    SessionDeinit(Result<()>),
    SessionSetAppConfig(SetAppConfigResponse),
    SessionGetAppConfig(Result<Vec<AppConfigTlv>>),
    SessionGetCount(Result<u8>),
    SessionGetState(Result<SessionState>),
    SessionUpdateControllerMulticastList(Result<()>),
    RangeStart(Result<()>),
    RangeStop(Result<()>),
    RangeGetRangingCount(Result<u32>),
    SendBlinkData(Result<()>),
    RawCommand(Result<RawStackMessage>),
}

impl StackResponse {
    /// Returns true if this response is the terminal event of the given command. The bridge
    /// completes a pending command only with a response of the matching kind.
    pub fn matches_command(&self, cmd: &StackCommand) -> bool {
        match self {
            Self::Enable(_) => matches!(cmd, StackCommand::Enable),
            Self::Disable(_) => matches!(cmd, StackCommand::Disable { .. }),
            Self::DeviceReset(_) => matches!(cmd, StackCommand::DeviceReset { .. }),
            Self::CoreGetDeviceInfo(_) => matches!(cmd, StackCommand::CoreGetDeviceInfo),
            Self::CoreSetConfig(_) => matches!(cmd, StackCommand::CoreSetConfig { .. }),
            Self::CoreGetConfig(_) => matches!(cmd, StackCommand::CoreGetConfig { .. }),
            Self::SessionInit(_) => matches!(cmd, StackCommand::SessionInit { .. }),
            Self::SessionDeinit(_) => matches!(cmd, StackCommand::SessionDeinit { .. }),
            Self::SessionSetAppConfig(_) => {
                matches!(cmd, StackCommand::SessionSetAppConfig { .. })
            }
            Self::SessionGetAppConfig(_) => {
                matches!(cmd, StackCommand::SessionGetAppConfig { .. })
            }
            Self::SessionGetCount(_) => matches!(cmd, StackCommand::SessionGetCount),
            Self::SessionGetState(_) => matches!(cmd, StackCommand::SessionGetState { .. }),
            Self::SessionUpdateControllerMulticastList(_) => {
                matches!(cmd, StackCommand::SessionUpdateControllerMulticastList { .. })
            }
            Self::RangeStart(_) => matches!(cmd, StackCommand::RangeStart { .. }),
            Self::RangeStop(_) => matches!(cmd, StackCommand::RangeStop { .. }),
            Self::RangeGetRangingCount(_) => {
                matches!(cmd, StackCommand::RangeGetRangingCount { .. })
            }
            Self::SendBlinkData(_) => matches!(cmd, StackCommand::SendBlinkData { .. }),
            Self::RawCommand(_) => matches!(cmd, StackCommand::RawCommand { .. }),
        }
    }
}
