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

//! This module defines the StackHal trait, used for the device-stack adaptation layer.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::stack::command::StackCommand;
use crate::stack::notification::StackNotification;
use crate::stack::response::StackResponse;

/// The event that the device stack delivers via the callback channel: the terminal response of
/// a submitted command, or an unsolicited notification.
#[derive(Debug, Clone, PartialEq)]
pub enum StackEvent {
    /// The terminal response of a submitted command.
    Response(StackResponse),
    /// An unsolicited notification.
    Notification(StackNotification),
}

/// The trait for the device-stack adaptation layer. The client of this library should implement
/// this trait and inject into the library.
/// Note: Each method should be completed in 1000 ms, except initialize().
#[async_trait]
pub trait StackHal: 'static + Send + Sync {
    /// Start the adaptation layer and register the event callback.
    ///
    /// All the other API should be called after the initialize() completes successfully. Once
    /// the method completes successfully, the StackHal instance should store |event_sender| and
    /// send the stack events (responses and notifications) back to the caller via the
    /// |event_sender|.
    async fn initialize(&mut self, event_sender: mpsc::UnboundedSender<StackEvent>) -> Result<()>;

    /// Tear down the adaptation layer.
    ///
    /// With |graceful| set, the stack may flush its outstanding work before the teardown. After
    /// calling this method, the instance would drop |event_sender| received from the
    /// initialize() method.
    async fn finalize(&mut self, graceful: bool) -> Result<()>;

    /// Run the device core initialization.
    ///
    /// This step completes inside the stack and reports no event on the callback channel.
    async fn init_core(&mut self) -> Result<()>;

    /// Submit a command to the device stack.
    ///
    /// A successful return only means the stack accepted the submission. The terminal event of
    /// the command, if any, arrives later via the |event_sender| registered at initialize().
    async fn submit_command(&mut self, cmd: StackCommand) -> Result<()>;
}

/// A placeholder implementation for StackHal that do nothing.
pub struct NopStackHal {}
#[async_trait]
impl StackHal for NopStackHal {
    async fn initialize(&mut self, _event_sender: mpsc::UnboundedSender<StackEvent>) -> Result<()> {
        Ok(())
    }
    async fn finalize(&mut self, _graceful: bool) -> Result<()> {
        Ok(())
    }
    async fn init_core(&mut self) -> Result<()> {
        Ok(())
    }
    async fn submit_command(&mut self, _cmd: StackCommand) -> Result<()> {
        Ok(())
    }
}
