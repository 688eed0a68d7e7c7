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

//! This module offers a synchronized interface on top of UwbManager.
//!
//! The module is designed with non-async adaptation layers in mind. The handling of the
//! notifications is different in UwbManager and UwbManagerSync: the sync version routes them
//! to the callbacks of a NotificationManager instead of exposing tokio::mpsc channels.

use log::{debug, error};
use tokio::runtime::{Builder as RuntimeBuilder, Handle};
use tokio::sync::mpsc;
use tokio::task;

use crate::error::{Error, Result};
use crate::params::{
    AppConfigTlv, AppConfigTlvType, Controlee, CoreDeviceConfig, DeviceConfigId, DeviceConfigTlv,
    DeviceInfoResponse, DeviceState, MulticastListUpdateNtf, RawStackMessage, SessionId,
    SessionState, SessionType, SetAppConfigResponse, StatusCode, UpdateMulticastListAction,
};
use crate::stack::notification::{CoreNotification, SessionNotification, SessionRangeData};
use crate::stack::stack_hal::StackHal;
use crate::stack::uwb_manager::{UwbManager, UwbManagerImpl};

/// The NotificationManager processes the notifications relayed from UwbManagerSync in a sync
/// fashion. UwbManagerSync assumes the NotificationManager takes the responsibility to properly
/// handle them; UwbManagerSync and lower levels only redirect and categorize the notifications.
/// NotificationManager can be !Send and !Sync, as interfacing with other programs may require.
pub trait NotificationManager: 'static {
    /// Callback for the device lifecycle state reports.
    fn on_device_status(&mut self, device_state: DeviceState) -> Result<()>;

    /// Callback for the errors the device could not attribute to a command.
    fn on_generic_error(&mut self, status: StatusCode) -> Result<()>;

    /// Callback for the session state transitions.
    fn on_session_status(
        &mut self,
        session_id: SessionId,
        session_state: SessionState,
        reason_code: u8,
    ) -> Result<()>;

    /// Callback for the (already smoothed) ranging rounds.
    fn on_range_data(&mut self, range_data: SessionRangeData) -> Result<()>;

    /// Callback for the multicast-list update outcomes.
    fn on_multicast_list_update(&mut self, update_ntf: MulticastListUpdateNtf) -> Result<()>;

    /// Callback for the blink-data transmission statuses.
    fn on_blink_data_tx(&mut self, repetition_count_status: u8) -> Result<()>;
}

/// Builder for NotificationManager. Builder is sent between threads.
pub trait NotificationManagerBuilder: 'static + Send + Sync {
    /// Type of NotificationManager built.
    type NotificationManager: NotificationManager;
    /// Builds NotificationManager. The build operation consumes the Builder.
    fn build(self) -> Option<Self::NotificationManager>;
}

struct NotificationDriver<U: NotificationManager> {
    core_notification_receiver: mpsc::UnboundedReceiver<CoreNotification>,
    session_notification_receiver: mpsc::UnboundedReceiver<SessionNotification>,
    notification_manager: U,
}

impl<U: NotificationManager> NotificationDriver<U> {
    fn new(
        core_notification_receiver: mpsc::UnboundedReceiver<CoreNotification>,
        session_notification_receiver: mpsc::UnboundedReceiver<SessionNotification>,
        notification_manager: U,
    ) -> Self {
        Self { core_notification_receiver, session_notification_receiver, notification_manager }
    }

    async fn run(&mut self) {
        loop {
            tokio::select! {
                Some(ntf) = self.core_notification_receiver.recv() => {
                    self.handle_core_notification(ntf).unwrap_or_else(|e| {
                        error!("NotificationDriver: CoreNotification callback error: {:?}", e);
                    });
                }
                Some(ntf) = self.session_notification_receiver.recv() => {
                    self.handle_session_notification(ntf).unwrap_or_else(|e| {
                        error!("NotificationDriver: SessionNotification callback error: {:?}", e);
                    });
                }
                else => {
                    debug!("NotificationDriver dropping.");
                    break;
                }
            }
        }
    }

    fn handle_core_notification(&mut self, ntf: CoreNotification) -> Result<()> {
        match ntf {
            CoreNotification::DeviceStatus(device_state) => {
                self.notification_manager.on_device_status(device_state)
            }
            CoreNotification::GenericError(status) => {
                self.notification_manager.on_generic_error(status)
            }
        }
    }

    fn handle_session_notification(&mut self, ntf: SessionNotification) -> Result<()> {
        match ntf {
            SessionNotification::Status { session_id, session_state, reason_code } => {
                self.notification_manager.on_session_status(session_id, session_state, reason_code)
            }
            SessionNotification::RangeData(range_data) => {
                self.notification_manager.on_range_data(range_data)
            }
            SessionNotification::MulticastListUpdate(update_ntf) => {
                self.notification_manager.on_multicast_list_update(update_ntf)
            }
            SessionNotification::BlinkDataTx { repetition_count_status } => {
                self.notification_manager.on_blink_data_tx(repetition_count_status)
            }
        }
    }
}

/// The UwbManagerSync provides a synchronized version of UwbManager.
///
/// Note the processing of the notifications is different: the set_X_notification_sender methods
/// are removed. Instead, the method redirect_notification(NotificationManagerBuilder) is
/// introduced to avoid the exposure of async tokio::mpsc.
pub struct UwbManagerSync<U: UwbManager> {
    runtime_handle: Handle,
    uwb_manager: U,
}

impl<U: UwbManager> UwbManagerSync<U> {
    /// Redirects the notifications to a new NotificationManager built with the
    /// notification_manager_builder. The NotificationManager lives on a separate thread.
    pub fn redirect_notification<T: NotificationManagerBuilder>(
        &mut self,
        notification_manager_builder: T,
    ) -> Result<()> {
        let (core_notification_sender, core_notification_receiver) =
            mpsc::unbounded_channel::<CoreNotification>();
        let (session_notification_sender, session_notification_receiver) =
            mpsc::unbounded_channel::<SessionNotification>();
        self.runtime_handle.to_owned().block_on(async {
            self.uwb_manager.set_core_notification_sender(core_notification_sender).await;
            self.uwb_manager.set_session_notification_sender(session_notification_sender).await;
        });

        // The potentially !Send NotificationManager is created in a separate thread.
        let (driver_status_sender, mut driver_status_receiver) = mpsc::unbounded_channel::<bool>();
        std::thread::spawn(move || {
            let notification_runtime =
                match RuntimeBuilder::new_current_thread().enable_all().build() {
                    Ok(nr) => nr,
                    Err(_) => {
                        // unwrap safe since receiver is in scope
                        driver_status_sender.send(false).unwrap();
                        return;
                    }
                };

            let local = task::LocalSet::new();
            let notification_manager = match notification_manager_builder.build() {
                Some(nm) => {
                    // unwrap safe since receiver is in scope
                    driver_status_sender.send(true).unwrap();
                    nm
                }
                None => {
                    // unwrap safe since receiver is in scope
                    driver_status_sender.send(false).unwrap();
                    return;
                }
            };
            let mut notification_driver = NotificationDriver::new(
                core_notification_receiver,
                session_notification_receiver,
                notification_manager,
            );
            local.spawn_local(async move {
                task::spawn_local(async move { notification_driver.run().await }).await.unwrap();
            });
            notification_runtime.block_on(local);
        });
        match driver_status_receiver.blocking_recv() {
            Some(true) => Ok(()),
            _ => Err(Error::Unknown),
        }
    }

    /// Bring the device up, blocking until the commands can be sent.
    pub fn enable(&self) -> Result<DeviceInfoResponse> {
        self.runtime_handle.block_on(self.uwb_manager.enable())
    }

    /// Bring the device down.
    pub fn disable(&self) -> Result<()> {
        self.runtime_handle.block_on(self.uwb_manager.disable())
    }

    // Methods for sending the commands. Functions are blocked until the terminal event of the
    // command is received.
    /// Reset the device.
    pub fn device_reset(&self, reset_config: u8) -> Result<()> {
        self.runtime_handle.block_on(self.uwb_manager.device_reset(reset_config))
    }

    /// Clear the per-session state and re-apply the core configuration.
    pub fn recover(&self) -> Result<()> {
        self.runtime_handle.block_on(self.uwb_manager.recover())
    }

    /// Get the device information retrieved during the bring-up.
    pub fn device_info(&self) -> Result<DeviceInfoResponse> {
        self.runtime_handle.block_on(self.uwb_manager.device_info())
    }

    /// Query the lifecycle state the device itself reports.
    pub fn get_device_state(&self) -> Result<DeviceState> {
        self.runtime_handle.block_on(self.uwb_manager.get_device_state())
    }

    /// Get the values of the device configuration parameters.
    pub fn get_core_config(&self, cfg_id: Vec<DeviceConfigId>) -> Result<Vec<DeviceConfigTlv>> {
        self.runtime_handle.block_on(self.uwb_manager.get_core_config(cfg_id))
    }

    /// Initiate a session.
    pub fn session_init(&self, session_id: SessionId, session_type: SessionType) -> Result<()> {
        self.runtime_handle.block_on(self.uwb_manager.session_init(session_id, session_type))
    }

    /// Deinitiate a session.
    pub fn session_deinit(&self, session_id: SessionId) -> Result<()> {
        self.runtime_handle.block_on(self.uwb_manager.session_deinit(session_id))
    }

    /// Set the application configuration of a session.
    pub fn set_app_config(
        &self,
        session_id: SessionId,
        config_tlvs: Vec<AppConfigTlv>,
    ) -> Result<SetAppConfigResponse> {
        self.runtime_handle.block_on(self.uwb_manager.set_app_config(session_id, config_tlvs))
    }

    /// Get the application configuration of a session.
    pub fn get_app_config(
        &self,
        session_id: SessionId,
        app_cfg: Vec<AppConfigTlvType>,
    ) -> Result<Vec<AppConfigTlv>> {
        self.runtime_handle.block_on(self.uwb_manager.get_app_config(session_id, app_cfg))
    }

    /// Get the count of the sessions.
    pub fn get_session_count(&self) -> Result<u8> {
        self.runtime_handle.block_on(self.uwb_manager.get_session_count())
    }

    /// Get the state of a session.
    pub fn get_session_state(&self, session_id: SessionId) -> Result<SessionState> {
        self.runtime_handle.block_on(self.uwb_manager.get_session_state(session_id))
    }

    /// Update the multicast list of a controller session.
    pub fn update_controller_multicast_list(
        &self,
        session_id: SessionId,
        action: UpdateMulticastListAction,
        controlees: Vec<Controlee>,
    ) -> Result<()> {
        self.runtime_handle.block_on(self.uwb_manager.update_controller_multicast_list(
            session_id,
            action,
            controlees,
        ))
    }

    /// Start the ranging of a session.
    pub fn range_start(&self, session_id: SessionId) -> Result<()> {
        self.runtime_handle.block_on(self.uwb_manager.range_start(session_id))
    }

    /// Stop the ranging of a session.
    pub fn range_stop(&self, session_id: SessionId) -> Result<()> {
        self.runtime_handle.block_on(self.uwb_manager.range_stop(session_id))
    }

    /// Get the count of the completed ranging rounds of a session.
    pub fn get_ranging_count(&self, session_id: SessionId) -> Result<u32> {
        self.runtime_handle.block_on(self.uwb_manager.get_ranging_count(session_id))
    }

    /// Set the size of the distance-averaging window of a session.
    pub fn set_ranging_sampling_rate(
        &self,
        session_id: SessionId,
        sampling_rate: u8,
    ) -> Result<()> {
        self.runtime_handle
            .block_on(self.uwb_manager.set_ranging_sampling_rate(session_id, sampling_rate))
    }

    /// Switch the ranging-data notifications of a session on or off.
    pub fn enable_range_data_ntf(&self, session_id: SessionId, enable: bool) -> Result<()> {
        self.runtime_handle.block_on(self.uwb_manager.enable_range_data_ntf(session_id, enable))
    }

    /// Send blink data to the devices listening on the session.
    pub fn send_blink_data(
        &self,
        session_id: SessionId,
        repetition_count: u32,
        app_data: Vec<u8>,
    ) -> Result<()> {
        self.runtime_handle
            .block_on(self.uwb_manager.send_blink_data(session_id, repetition_count, app_data))
    }

    /// Send a raw command to the device stack.
    pub fn raw_command(&self, gid: u32, oid: u32, payload: Vec<u8>) -> Result<RawStackMessage> {
        self.runtime_handle.block_on(self.uwb_manager.raw_command(gid, oid, payload))
    }
}

impl UwbManagerSync<UwbManagerImpl> {
    /// Constructor.
    ///
    /// StackHal and NotificationManagerBuilder are required at construction as they are needed
    /// before enable() is called. runtime_handle must be a Handle to a multithread runtime that
    /// outlives UwbManagerSync.
    ///
    /// Implementation note: an explicit decision is made to not use UwbManagerImpl as a
    /// parameter. UwbManagerImpl::new() appears to be sync, but needs an async context to be
    /// called, and the user is unlikely to be aware of this technicality.
    pub fn new<H, B>(
        hal: H,
        notification_manager_builder: B,
        core_config: CoreDeviceConfig,
        runtime_handle: Handle,
    ) -> Result<Self>
    where
        H: StackHal,
        B: NotificationManagerBuilder,
    {
        // UwbManagerImpl::new uses tokio::spawn, so it is called inside the runtime as async fn.
        let uwb_manager =
            runtime_handle.block_on(async { UwbManagerImpl::new(hal, core_config) });
        let mut uwb_manager_sync = UwbManagerSync { runtime_handle, uwb_manager };
        uwb_manager_sync.redirect_notification(notification_manager_builder)?;
        Ok(uwb_manager_sync)
    }
}
