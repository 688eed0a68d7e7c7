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

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::error::{Error, Result};
use crate::stack::command::StackCommand;
use crate::stack::stack_hal::{StackEvent, StackHal};

const HAL_API_TIMEOUT_MS: u64 = 1000;
const HAL_INIT_TIMEOUT_MS: u64 = 20000; // Extra time may be needed for starting the UWB stack.

pub(crate) struct TimeoutStackHal<T: StackHal>(T);

impl<T: StackHal> TimeoutStackHal<T> {
    pub fn new(hal: T) -> Self {
        Self(hal)
    }

    async fn call_with_timeout(
        future: impl Future<Output = Result<()>>,
        duration: u64,
    ) -> Result<()> {
        match timeout(Duration::from_millis(duration), future).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout),
        }
    }
}

#[async_trait]
impl<T: StackHal> StackHal for TimeoutStackHal<T> {
    async fn initialize(&mut self, event_sender: mpsc::UnboundedSender<StackEvent>) -> Result<()> {
        Self::call_with_timeout(self.0.initialize(event_sender), HAL_INIT_TIMEOUT_MS).await
    }

    async fn finalize(&mut self, graceful: bool) -> Result<()> {
        Self::call_with_timeout(self.0.finalize(graceful), HAL_API_TIMEOUT_MS).await
    }

    async fn init_core(&mut self) -> Result<()> {
        Self::call_with_timeout(self.0.init_core(), HAL_API_TIMEOUT_MS).await
    }

    async fn submit_command(&mut self, cmd: StackCommand) -> Result<()> {
        Self::call_with_timeout(self.0.submit_command(cmd), HAL_API_TIMEOUT_MS).await
    }
}
