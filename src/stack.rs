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

//! This module provides the functionalities related to the UWB device stack.

mod command;
mod response;
mod timeout_stack_hal;

pub(crate) mod notification;
pub(crate) mod uwb_manager;

pub mod stack_hal;
pub mod uwb_manager_sync;

#[cfg(any(test, feature = "mock-utils"))]
pub mod mock_stack_hal;

// Re-export the public elements.
pub use command::StackCommand;
pub use notification::{
    CoreNotification, RangingMeasurements, SessionNotification, SessionRangeData,
    StackNotification,
};
pub use response::StackResponse;
pub use stack_hal::{NopStackHal, StackEvent, StackHal};
pub use uwb_manager::{UwbManager, UwbManagerImpl};
