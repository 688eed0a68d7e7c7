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

//! The mock implementation of the device-stack adaptation layer.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};
use tokio::time::timeout;

use crate::error::{Error, Result};
use crate::stack::command::StackCommand;
use crate::stack::stack_hal::{StackEvent, StackHal};

/// The mock implementation of StackHal.
///
/// The mock is scripted with the calls it should see, in order. Every expected submission
/// carries the events the stack would deliver back on the callback channel. The clones share
/// the script, so a test keeps one clone to verify and inject while the manager owns another.
#[derive(Clone, Default)]
pub struct MockStackHal {
    event_sender: Arc<Mutex<Option<mpsc::UnboundedSender<StackEvent>>>>,
    expected_calls: Arc<Mutex<VecDeque<ExpectedCall>>>,
    expect_call_consumed: Arc<Notify>,
}

impl Drop for MockStackHal {
    fn drop(&mut self) {
        // The script is shared between the clones; only the last one checks it drained.
        if Arc::strong_count(&self.expected_calls) == 1 && !std::thread::panicking() {
            assert!(self.expected_calls.lock().unwrap().is_empty());
        }
    }
}

#[allow(dead_code)]
impl MockStackHal {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn expected_initialize(&mut self, events: Option<Vec<StackEvent>>, out: Result<()>) {
        self.expected_calls.lock().unwrap().push_back(ExpectedCall::Initialize { events, out });
    }

    pub fn expected_finalize(&mut self, expected_graceful: bool, out: Result<()>) {
        self.expected_calls
            .lock()
            .unwrap()
            .push_back(ExpectedCall::Finalize { expected_graceful, out });
    }

    pub fn expected_init_core(&mut self, out: Result<()>) {
        self.expected_calls.lock().unwrap().push_back(ExpectedCall::InitCore { out });
    }

    pub fn expected_submit_command(
        &mut self,
        expected_cmd: StackCommand,
        events: Vec<StackEvent>,
        out: Result<()>,
    ) {
        self.expected_calls.lock().unwrap().push_back(ExpectedCall::SubmitCommand {
            expected_cmd,
            events,
            event_delay_ms: None,
            out,
        });
    }

    /// Like expected_submit_command(), but delivers the events only after |event_delay_ms|.
    /// Used to exercise the waiting side of the command bridge.
    pub fn expected_submit_command_delayed(
        &mut self,
        expected_cmd: StackCommand,
        events: Vec<StackEvent>,
        event_delay_ms: u64,
        out: Result<()>,
    ) {
        self.expected_calls.lock().unwrap().push_back(ExpectedCall::SubmitCommand {
            expected_cmd,
            events,
            event_delay_ms: Some(event_delay_ms),
            out,
        });
    }

    /// Sends events on the callback channel out of band, the way the stack threads would when
    /// nothing was asked.
    pub fn inject_events(&mut self, events: Vec<StackEvent>) {
        let event_sender = self.event_sender.lock().unwrap();
        let event_sender = event_sender.as_ref().expect("initialize() must succeed beforehand");
        for event in events.into_iter() {
            let _ = event_sender.send(event);
        }
    }

    /// Waits until all the expected calls are consumed, and returns whether they all were
    /// within the wait bound.
    pub async fn wait_expected_calls_done(&mut self) -> bool {
        while !self.expected_calls.lock().unwrap().is_empty() {
            if timeout(Duration::from_secs(1), self.expect_call_consumed.notified()).await.is_err()
            {
                return false;
            }
        }
        true
    }
}

#[async_trait]
impl StackHal for MockStackHal {
    async fn initialize(&mut self, event_sender: mpsc::UnboundedSender<StackEvent>) -> Result<()> {
        let next_call = {
            let mut expected_calls = self.expected_calls.lock().unwrap();
            match expected_calls.pop_front() {
                Some(ExpectedCall::Initialize { events, out }) => Some((events, out)),
                Some(call) => {
                    expected_calls.push_front(call);
                    None
                }
                None => None,
            }
        };
        match next_call {
            Some((events, out)) => {
                if let Some(events) = events {
                    for event in events.into_iter() {
                        let _ = event_sender.send(event);
                    }
                }
                if out.is_ok() {
                    self.event_sender.lock().unwrap().replace(event_sender);
                }
                self.expect_call_consumed.notify_one();
                out
            }
            None => Err(Error::MockUndefined),
        }
    }

    async fn finalize(&mut self, graceful: bool) -> Result<()> {
        let next_call = {
            let mut expected_calls = self.expected_calls.lock().unwrap();
            match expected_calls.pop_front() {
                Some(ExpectedCall::Finalize { expected_graceful, out })
                    if expected_graceful == graceful =>
                {
                    Some(out)
                }
                Some(call) => {
                    expected_calls.push_front(call);
                    None
                }
                None => None,
            }
        };
        match next_call {
            Some(out) => {
                if out.is_ok() {
                    *self.event_sender.lock().unwrap() = None;
                }
                self.expect_call_consumed.notify_one();
                out
            }
            None => Err(Error::MockUndefined),
        }
    }

    async fn init_core(&mut self) -> Result<()> {
        let next_call = {
            let mut expected_calls = self.expected_calls.lock().unwrap();
            match expected_calls.pop_front() {
                Some(ExpectedCall::InitCore { out }) => Some(out),
                Some(call) => {
                    expected_calls.push_front(call);
                    None
                }
                None => None,
            }
        };
        match next_call {
            Some(out) => {
                self.expect_call_consumed.notify_one();
                out
            }
            None => Err(Error::MockUndefined),
        }
    }

    async fn submit_command(&mut self, cmd: StackCommand) -> Result<()> {
        let next_call = {
            let mut expected_calls = self.expected_calls.lock().unwrap();
            match expected_calls.pop_front() {
                Some(ExpectedCall::SubmitCommand { expected_cmd, events, event_delay_ms, out })
                    if expected_cmd == cmd =>
                {
                    Some((events, event_delay_ms, out))
                }
                Some(call) => {
                    expected_calls.push_front(call);
                    None
                }
                None => None,
            }
        };
        match next_call {
            Some((events, event_delay_ms, out)) => {
                let event_sender = self.event_sender.lock().unwrap().clone();
                if let Some(event_sender) = event_sender {
                    match event_delay_ms {
                        // The submission returns right away; the events arrive later, the way
                        // a real stack answers.
                        Some(delay_ms) => {
                            tokio::spawn(async move {
                                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                                for event in events.into_iter() {
                                    let _ = event_sender.send(event);
                                }
                            });
                        }
                        None => {
                            for event in events.into_iter() {
                                let _ = event_sender.send(event);
                            }
                        }
                    }
                }
                self.expect_call_consumed.notify_one();
                out
            }
            None => Err(Error::MockUndefined),
        }
    }
}

enum ExpectedCall {
    Initialize {
        events: Option<Vec<StackEvent>>,
        out: Result<()>,
    },
    Finalize {
        expected_graceful: bool,
        out: Result<()>,
    },
    InitCore {
        out: Result<()>,
    },
    SubmitCommand {
        expected_cmd: StackCommand,
        events: Vec<StackEvent>,
        event_delay_ms: Option<u64>,
        out: Result<()>,
    },
}
