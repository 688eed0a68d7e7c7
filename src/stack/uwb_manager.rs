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

//! The command bridge of the UWB device stack.
//!
//! The device stack answers every submitted command with an asynchronous event on the callback
//! channel. UwbManager turns each command into an awaitable call with a bounded wait, tracks the
//! device lifecycle state driven by the stack's notifications, and smooths the ranging distances
//! before they are forwarded to the notification senders.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use num_traits::FromPrimitive;
use tokio::sync::{mpsc, oneshot};

use crate::error::{status_code_to_result, Error, Result};
use crate::params::utils::{bytes_to_u8, u8_to_bytes};
use crate::params::{
    AppConfigTlv, AppConfigTlvType, Controlee, CoreDeviceConfig, DeviceConfigId, DeviceConfigTlv,
    DeviceInfoResponse, DeviceState, RawStackMessage, SessionId, SessionState, SessionType,
    SetAppConfigResponse, StatusCode, UpdateMulticastListAction, MAX_COMMAND_PAYLOAD_LEN,
    MAX_NUM_CONTROLLEES,
};
use crate::session::range_data_averager::RangeDataAverager;
use crate::stack::command::StackCommand;
use crate::stack::notification::{CoreNotification, SessionNotification, StackNotification};
use crate::stack::response::StackResponse;
use crate::stack::stack_hal::{StackEvent, StackHal};
use crate::stack::timeout_stack_hal::TimeoutStackHal;
use crate::utils::{clean_mpsc_receiver, PinSleep};

const UWB_CMD_TIMEOUT_MS: u64 = 2000;
const RESET_CONFIG_DEVICE: u8 = 0x00;

/// The UwbManager organizes the state machine of the UWB device, and provides the interface
/// which abstracts the commands, responses, and notifications of the device stack.
#[async_trait]
pub trait UwbManager: 'static + Send + Sync + Clone {
    /// Set the sender of the device-scoped notifications.
    async fn set_core_notification_sender(
        &mut self,
        core_notf_sender: mpsc::UnboundedSender<CoreNotification>,
    );
    /// Set the sender of the session-scoped notifications.
    async fn set_session_notification_sender(
        &mut self,
        session_notf_sender: mpsc::UnboundedSender<SessionNotification>,
    );

    /// Bring the device up.
    ///
    /// All the other commands should be called after enable() completes successfully. Calling
    /// enable() on a device which is already running resets it instead.
    async fn enable(&self) -> Result<DeviceInfoResponse>;

    /// Bring the device down. The teardown completes even if the device stops answering.
    async fn disable(&self) -> Result<()>;

    /// Reset the device. The reset counts as successful only once the device reports ready
    /// again afterwards; a confirmed reset drops all the per-session state.
    async fn device_reset(&self, reset_config: u8) -> Result<()>;

    /// Clear the per-session state and re-apply the core configuration.
    async fn recover(&self) -> Result<()>;

    /// Get the device information retrieved during the bring-up.
    async fn device_info(&self) -> Result<DeviceInfoResponse>;

    /// Query the lifecycle state the device itself reports.
    async fn get_device_state(&self) -> Result<DeviceState>;

    /// Get the values of the device configuration parameters.
    async fn get_core_config(&self, cfg_id: Vec<DeviceConfigId>) -> Result<Vec<DeviceConfigTlv>>;

    // The session commands.
    async fn session_init(&self, session_id: SessionId, session_type: SessionType) -> Result<()>;
    async fn session_deinit(&self, session_id: SessionId) -> Result<()>;
    async fn set_app_config(
        &self,
        session_id: SessionId,
        config_tlvs: Vec<AppConfigTlv>,
    ) -> Result<SetAppConfigResponse>;
    async fn get_app_config(
        &self,
        session_id: SessionId,
        app_cfg: Vec<AppConfigTlvType>,
    ) -> Result<Vec<AppConfigTlv>>;
    async fn get_session_count(&self) -> Result<u8>;
    async fn get_session_state(&self, session_id: SessionId) -> Result<SessionState>;
    async fn update_controller_multicast_list(
        &self,
        session_id: SessionId,
        action: UpdateMulticastListAction,
        controlees: Vec<Controlee>,
    ) -> Result<()>;

    // The ranging commands.
    async fn range_start(&self, session_id: SessionId) -> Result<()>;
    async fn range_stop(&self, session_id: SessionId) -> Result<()>;
    async fn get_ranging_count(&self, session_id: SessionId) -> Result<u32>;

    /// Set the size of the distance-averaging window of a session. A size of 1 or less turns
    /// the averaging off for the session.
    async fn set_ranging_sampling_rate(
        &self,
        session_id: SessionId,
        sampling_rate: u8,
    ) -> Result<()>;

    /// Switch the ranging-data notifications of a session on or off.
    async fn enable_range_data_ntf(&self, session_id: SessionId, enable: bool) -> Result<()>;

    /// Send blink data to the devices listening on the session.
    async fn send_blink_data(
        &self,
        session_id: SessionId,
        repetition_count: u32,
        app_data: Vec<u8>,
    ) -> Result<()>;

    /// Send a raw command to the device stack.
    async fn raw_command(&self, gid: u32, oid: u32, payload: Vec<u8>) -> Result<RawStackMessage>;
}

/// UwbManagerImpl is the main implementation of UwbManager. Using the actor model,
/// UwbManagerImpl delegates the requests to UwbManagerActor.
#[derive(Clone)]
pub struct UwbManagerImpl {
    cmd_sender: mpsc::UnboundedSender<(UwbManagerCmd, ResponseSender)>,
    core_config: CoreDeviceConfig,
}

impl UwbManagerImpl {
    /// Constructor. Need to be called in an async context.
    pub fn new<T: StackHal>(hal: T, core_config: CoreDeviceConfig) -> Self {
        let (cmd_sender, cmd_receiver) = mpsc::unbounded_channel();
        let mut actor = UwbManagerActor::new(hal, cmd_receiver);
        tokio::spawn(async move { actor.run().await });

        Self { cmd_sender, core_config }
    }

    // Send the |cmd| to the UwbManagerActor.
    async fn send_cmd(&self, cmd: UwbManagerCmd) -> Result<UwbManagerResponse> {
        let (result_sender, result_receiver) = oneshot::channel();
        match self.cmd_sender.send((cmd, result_sender)) {
            Ok(()) => result_receiver.await.unwrap_or(Err(Error::Unknown)),
            Err(cmd) => {
                error!("Failed to send cmd: {:?}", cmd.0);
                Err(Error::Unknown)
            }
        }
    }

    async fn send_ack_cmd(&self, cmd: UwbManagerCmd) -> Result<()> {
        match self.send_cmd(cmd).await? {
            UwbManagerResponse::Ack => Ok(()),
            _ => Err(Error::Unknown),
        }
    }

    async fn send_stack_cmd(&self, cmd: StackCommand) -> Result<StackResponse> {
        match self.send_cmd(UwbManagerCmd::SendCommand { cmd }).await? {
            UwbManagerResponse::Stack(resp) => Ok(resp),
            _ => Err(Error::Unknown),
        }
    }

    // The bring-up pipeline: adaptation start + stack enable, core initialization, device-info
    // retrieval, core configuration. Each step aborts the remaining ones on failure; the caller
    // tears the stack down.
    async fn run_enable_pipeline(&self) -> Result<DeviceInfoResponse> {
        match self.send_cmd(UwbManagerCmd::StartStack).await? {
            UwbManagerResponse::Stack(StackResponse::Enable(result)) => result?,
            _ => return Err(Error::Unknown),
        }

        self.send_ack_cmd(UwbManagerCmd::InitCore).await?;

        let device_info = match self.send_stack_cmd(StackCommand::CoreGetDeviceInfo).await? {
            StackResponse::CoreGetDeviceInfo(resp) => resp?,
            _ => return Err(Error::Unknown),
        };
        debug!("UWB device info: {:?}", device_info);

        let resp = match self
            .send_stack_cmd(StackCommand::CoreSetConfig { config_tlvs: self.core_config.tlvs() })
            .await?
        {
            StackResponse::CoreSetConfig(resp) => resp,
            _ => return Err(Error::Unknown),
        };
        status_code_to_result(resp.status)?;

        self.send_ack_cmd(UwbManagerCmd::FinishEnable).await?;
        Ok(device_info)
    }
}

#[async_trait]
impl UwbManager for UwbManagerImpl {
    async fn set_core_notification_sender(
        &mut self,
        core_notf_sender: mpsc::UnboundedSender<CoreNotification>,
    ) {
        let _ = self.send_cmd(UwbManagerCmd::SetCoreNotificationSender { core_notf_sender }).await;
    }

    async fn set_session_notification_sender(
        &mut self,
        session_notf_sender: mpsc::UnboundedSender<SessionNotification>,
    ) {
        let _ = self
            .send_cmd(UwbManagerCmd::SetSessionNotificationSender { session_notf_sender })
            .await;
    }

    async fn enable(&self) -> Result<DeviceInfoResponse> {
        if let UwbManagerResponse::CachedDeviceInfo {
            device_state: DeviceState::Ready,
            device_info: Some(device_info),
        } = self.send_cmd(UwbManagerCmd::GetCachedDeviceInfo).await?
        {
            // The device is already running; reset it instead of a second bring-up.
            if let Err(e) = self.device_reset(RESET_CONFIG_DEVICE).await {
                warn!("Device reset on re-enable failed: {:?}", e);
            }
            return Ok(device_info);
        }

        match self.run_enable_pipeline().await {
            Ok(device_info) => Ok(device_info),
            Err(e) => {
                error!("The enable sequence failed with {:?}, tearing the stack down", e);
                let _ = self.send_ack_cmd(UwbManagerCmd::AbortEnable).await;
                Err(e)
            }
        }
    }

    async fn disable(&self) -> Result<()> {
        // The teardown completes even when the device never answers the disable command.
        match self.send_stack_cmd(StackCommand::Disable { graceful: true }).await {
            Ok(StackResponse::Disable(result)) => {
                if let Err(e) = result {
                    warn!("The device rejected the disable command: {:?}", e);
                }
            }
            Ok(resp) => warn!("Unexpected response to the disable command: {:?}", resp),
            Err(e) => warn!("The disable command was not answered: {:?}", e),
        }
        self.send_ack_cmd(UwbManagerCmd::FinishDisable).await
    }

    async fn device_reset(&self, reset_config: u8) -> Result<()> {
        match self.send_cmd(UwbManagerCmd::DeviceReset { reset_config }).await? {
            UwbManagerResponse::Stack(StackResponse::DeviceReset(result)) => result,
            _ => Err(Error::Unknown),
        }
    }

    async fn recover(&self) -> Result<()> {
        self.send_ack_cmd(UwbManagerCmd::ClearRegistry).await?;
        let resp = match self
            .send_stack_cmd(StackCommand::CoreSetConfig { config_tlvs: self.core_config.tlvs() })
            .await?
        {
            StackResponse::CoreSetConfig(resp) => resp,
            _ => return Err(Error::Unknown),
        };
        status_code_to_result(resp.status)
    }

    async fn device_info(&self) -> Result<DeviceInfoResponse> {
        match self.send_cmd(UwbManagerCmd::GetCachedDeviceInfo).await? {
            UwbManagerResponse::CachedDeviceInfo { device_info: Some(device_info), .. } => {
                Ok(device_info)
            }
            UwbManagerResponse::CachedDeviceInfo { device_info: None, .. } => Err(Error::NotReady),
            _ => Err(Error::Unknown),
        }
    }

    async fn get_device_state(&self) -> Result<DeviceState> {
        let tlvs = self.get_core_config(vec![DeviceConfigId::DeviceState]).await?;
        let tlv = tlvs
            .into_iter()
            .find(|tlv| tlv.cfg_id == DeviceConfigId::DeviceState)
            .ok_or(Error::Unknown)?;
        bytes_to_u8(tlv.v).and_then(DeviceState::from_u8).ok_or(Error::Unknown)
    }

    async fn get_core_config(&self, cfg_id: Vec<DeviceConfigId>) -> Result<Vec<DeviceConfigTlv>> {
        match self.send_stack_cmd(StackCommand::CoreGetConfig { cfg_id }).await? {
            StackResponse::CoreGetConfig(resp) => resp,
            _ => Err(Error::Unknown),
        }
    }

    async fn session_init(&self, session_id: SessionId, session_type: SessionType) -> Result<()> {
        match self.send_stack_cmd(StackCommand::SessionInit { session_id, session_type }).await? {
            StackResponse::SessionInit(resp) => resp,
            _ => Err(Error::Unknown),
        }
    }

    async fn session_deinit(&self, session_id: SessionId) -> Result<()> {
        match self.send_stack_cmd(StackCommand::SessionDeinit { session_id }).await? {
            StackResponse::SessionDeinit(resp) => resp,
            _ => Err(Error::Unknown),
        }
    }

    async fn set_app_config(
        &self,
        session_id: SessionId,
        config_tlvs: Vec<AppConfigTlv>,
    ) -> Result<SetAppConfigResponse> {
        match self
            .send_stack_cmd(StackCommand::SessionSetAppConfig { session_id, config_tlvs })
            .await?
        {
            StackResponse::SessionSetAppConfig(resp) => Ok(resp),
            _ => Err(Error::Unknown),
        }
    }

    async fn get_app_config(
        &self,
        session_id: SessionId,
        app_cfg: Vec<AppConfigTlvType>,
    ) -> Result<Vec<AppConfigTlv>> {
        match self
            .send_stack_cmd(StackCommand::SessionGetAppConfig { session_id, app_cfg })
            .await?
        {
            StackResponse::SessionGetAppConfig(resp) => resp,
            _ => Err(Error::Unknown),
        }
    }

    async fn get_session_count(&self) -> Result<u8> {
        match self.send_stack_cmd(StackCommand::SessionGetCount).await? {
            StackResponse::SessionGetCount(resp) => resp,
            _ => Err(Error::Unknown),
        }
    }

    async fn get_session_state(&self, session_id: SessionId) -> Result<SessionState> {
        match self.send_stack_cmd(StackCommand::SessionGetState { session_id }).await? {
            StackResponse::SessionGetState(resp) => resp,
            _ => Err(Error::Unknown),
        }
    }

    async fn update_controller_multicast_list(
        &self,
        session_id: SessionId,
        action: UpdateMulticastListAction,
        controlees: Vec<Controlee>,
    ) -> Result<()> {
        if !(1..=MAX_NUM_CONTROLLEES).contains(&controlees.len()) {
            warn!("The number of controlees should be between 1 and {}", MAX_NUM_CONTROLLEES);
            return Err(Error::BadParameters);
        }
        match self
            .send_stack_cmd(StackCommand::SessionUpdateControllerMulticastList {
                session_id,
                action,
                controlees,
            })
            .await?
        {
            StackResponse::SessionUpdateControllerMulticastList(resp) => resp,
            _ => Err(Error::Unknown),
        }
    }

    async fn range_start(&self, session_id: SessionId) -> Result<()> {
        match self.send_stack_cmd(StackCommand::RangeStart { session_id }).await? {
            StackResponse::RangeStart(resp) => resp,
            _ => Err(Error::Unknown),
        }
    }

    async fn range_stop(&self, session_id: SessionId) -> Result<()> {
        match self.send_stack_cmd(StackCommand::RangeStop { session_id }).await? {
            StackResponse::RangeStop(resp) => resp,
            _ => Err(Error::Unknown),
        }
    }

    async fn get_ranging_count(&self, session_id: SessionId) -> Result<u32> {
        match self.send_stack_cmd(StackCommand::RangeGetRangingCount { session_id }).await? {
            StackResponse::RangeGetRangingCount(resp) => resp,
            _ => Err(Error::Unknown),
        }
    }

    async fn set_ranging_sampling_rate(
        &self,
        session_id: SessionId,
        sampling_rate: u8,
    ) -> Result<()> {
        self.send_ack_cmd(UwbManagerCmd::SetSamplingRate { session_id, sampling_rate }).await
    }

    async fn enable_range_data_ntf(&self, session_id: SessionId, enable: bool) -> Result<()> {
        let config_tlvs = vec![AppConfigTlv {
            cfg_id: AppConfigTlvType::RngDataNtf,
            v: u8_to_bytes(u8::from(enable)),
        }];
        let resp = self.set_app_config(session_id, config_tlvs).await?;
        status_code_to_result(resp.status)
    }

    async fn send_blink_data(
        &self,
        session_id: SessionId,
        repetition_count: u32,
        app_data: Vec<u8>,
    ) -> Result<()> {
        if app_data.is_empty() {
            warn!("The blink data payload should not be empty");
            return Err(Error::BadParameters);
        }
        if app_data.len() > MAX_COMMAND_PAYLOAD_LEN {
            return Err(Error::AllocationFailure);
        }
        match self
            .send_stack_cmd(StackCommand::SendBlinkData {
                session_id,
                repetition_count,
                app_data: app_data.into(),
            })
            .await?
        {
            StackResponse::SendBlinkData(resp) => resp,
            _ => Err(Error::Unknown),
        }
    }

    async fn raw_command(&self, gid: u32, oid: u32, payload: Vec<u8>) -> Result<RawStackMessage> {
        if payload.len() > MAX_COMMAND_PAYLOAD_LEN {
            return Err(Error::AllocationFailure);
        }
        match self
            .send_stack_cmd(StackCommand::RawCommand { gid, oid, payload: payload.into() })
            .await?
        {
            StackResponse::RawCommand(resp) => resp,
            _ => Err(Error::Unknown),
        }
    }
}

struct UwbManagerActor<T: StackHal> {
    hal: TimeoutStackHal<T>,
    cmd_receiver: mpsc::UnboundedReceiver<(UwbManagerCmd, ResponseSender)>,

    // Whether the adaptation layer started successfully. The |event_receiver| is only used
    // while the stack is initialized.
    is_stack_initialized: bool,
    event_receiver: mpsc::UnboundedReceiver<StackEvent>,

    device_state: DeviceState,
    // The response of the device-info query, retrieved during the bring-up and served from
    // the cache afterwards.
    device_info: Option<DeviceInfoResponse>,
    // The per-session distance-averaging registry. Owning it inside the actor serializes the
    // averaging computation against the registry updates.
    averager: RangeDataAverager,

    // The single in-flight command and its wait deadline. Commands queue up in |cmd_receiver|
    // while the slot is occupied.
    pending_cmd: Option<PendingCmd>,
    wait_resp_timeout: PinSleep,

    // The reset-confirmation waiter. An acknowledged reset completes only when the follow-up
    // device status notification arrives.
    reset_confirm_sender: Option<ResponseSender>,
    wait_device_status_timeout: PinSleep,

    // Send the notifications to the callers of UwbManager.
    core_notf_sender: mpsc::UnboundedSender<CoreNotification>,
    session_notf_sender: mpsc::UnboundedSender<SessionNotification>,
}

impl<T: StackHal> UwbManagerActor<T> {
    fn new(hal: T, cmd_receiver: mpsc::UnboundedReceiver<(UwbManagerCmd, ResponseSender)>) -> Self {
        Self {
            hal: TimeoutStackHal::new(hal),
            cmd_receiver,
            is_stack_initialized: false,
            event_receiver: mpsc::unbounded_channel().1,
            device_state: DeviceState::Uninitialized,
            device_info: None,
            averager: RangeDataAverager::new(),
            pending_cmd: None,
            wait_resp_timeout: PinSleep::new(Duration::MAX),
            reset_confirm_sender: None,
            wait_device_status_timeout: PinSleep::new(Duration::MAX),
            core_notf_sender: mpsc::unbounded_channel().0,
            session_notf_sender: mpsc::unbounded_channel().0,
        }
    }

    async fn run(&mut self) {
        loop {
            tokio::select! {
                // Handle the next command. Only when the previous command already received its
                // terminal event.
                cmd = self.cmd_receiver.recv(), if !self.is_waiting_resp() => {
                    match cmd {
                        None => {
                            debug!("UwbManager is about to drop.");
                            break;
                        },
                        Some((cmd, result_sender)) => {
                            self.handle_cmd(cmd, result_sender).await;
                        }
                    }
                }

                // Handle the event from the device stack. Only when the stack is initialized.
                event = self.event_receiver.recv(), if self.is_stack_initialized => {
                    self.handle_stack_event(event);
                }

                // Timeout waiting for the terminal event of the command.
                _ = &mut self.wait_resp_timeout, if self.is_waiting_bounded_resp() => {
                    if let Some(pending_cmd) = self.pending_cmd.take() {
                        warn!("The command {:?} is not answered in time", pending_cmd.cmd);
                        let _ = pending_cmd.result_sender.send(Err(Error::Timeout));
                    }
                }

                // Timeout waiting for the device status notification confirming a reset.
                _ = &mut self.wait_device_status_timeout, if self.is_waiting_device_status() => {
                    if let Some(result_sender) = self.reset_confirm_sender.take() {
                        warn!("No device status notification confirmed the reset");
                        let _ = result_sender.send(Err(Error::Timeout));
                    }
                }
            }
        }

        if self.is_stack_initialized {
            debug!("The stack is still initialized when exit, finalize it");
            let _ = self.hal.finalize(false).await;
            self.on_stack_closed();
        }
    }

    async fn handle_cmd(&mut self, cmd: UwbManagerCmd, result_sender: ResponseSender) {
        debug!("Received cmd: {:?}", cmd);

        match cmd {
            UwbManagerCmd::SetCoreNotificationSender { core_notf_sender } => {
                self.core_notf_sender = core_notf_sender;
                let _ = result_sender.send(Ok(UwbManagerResponse::Ack));
            }
            UwbManagerCmd::SetSessionNotificationSender { session_notf_sender } => {
                self.session_notf_sender = session_notf_sender;
                let _ = result_sender.send(Ok(UwbManagerResponse::Ack));
            }
            UwbManagerCmd::StartStack => {
                if self.is_stack_initialized {
                    warn!("The stack is already initialized, skip.");
                    let _ = result_sender.send(Err(Error::BadParameters));
                    return;
                }

                let (event_sender, event_receiver) = mpsc::unbounded_channel();
                match self.hal.initialize(event_sender).await {
                    Ok(()) => {
                        self.is_stack_initialized = true;
                        self.event_receiver = event_receiver;
                        self.device_state = DeviceState::Enabling;
                        // Nothing from a previous run may survive the new bring-up.
                        self.averager.clear();
                        self.device_info = None;
                        self.submit_pending(StackCommand::Enable, PendingKind::Bounded, result_sender)
                            .await;
                    }
                    Err(e) => {
                        error!("Failed to initialize the stack adaptation: {:?}", e);
                        let _ = result_sender.send(Err(e));
                    }
                }
            }
            UwbManagerCmd::InitCore => {
                // The core initialization completes inside the stack; no event follows.
                let result = self.hal.init_core().await.map(|_| UwbManagerResponse::Ack);
                let _ = result_sender.send(result);
            }
            UwbManagerCmd::FinishEnable => {
                self.device_state = DeviceState::Ready;
                info!("The UWB device is ready");
                let _ = result_sender.send(Ok(UwbManagerResponse::Ack));
            }
            UwbManagerCmd::AbortEnable => {
                // Best-effort teardown; the caller surfaces the step that failed.
                let _ = self.hal.submit_command(StackCommand::Disable { graceful: false }).await;
                let _ = self.hal.finalize(false).await;
                self.on_stack_closed();
                self.device_state = DeviceState::Error;
                let _ = result_sender.send(Ok(UwbManagerResponse::Ack));
            }
            UwbManagerCmd::FinishDisable => {
                self.averager.clear();
                if self.is_stack_initialized {
                    let _ = self.hal.finalize(true).await;
                    self.on_stack_closed();
                }
                self.device_state = DeviceState::Uninitialized;
                let _ = result_sender.send(Ok(UwbManagerResponse::Ack));
            }
            UwbManagerCmd::DeviceReset { reset_config } => {
                if self.device_state != DeviceState::Ready {
                    let _ = result_sender.send(Err(Error::NotReady));
                    return;
                }
                self.submit_pending(
                    StackCommand::DeviceReset { reset_config },
                    PendingKind::ResetAck,
                    result_sender,
                )
                .await;
            }
            UwbManagerCmd::GetCachedDeviceInfo => {
                let _ = result_sender.send(Ok(UwbManagerResponse::CachedDeviceInfo {
                    device_state: self.device_state,
                    device_info: self.device_info.clone(),
                }));
            }
            UwbManagerCmd::SetSamplingRate { session_id, sampling_rate } => {
                if self.device_state != DeviceState::Ready {
                    let _ = result_sender.send(Err(Error::NotReady));
                    return;
                }
                self.averager.set_sampling_rate(session_id, sampling_rate);
                let _ = result_sender.send(Ok(UwbManagerResponse::Ack));
            }
            UwbManagerCmd::ClearRegistry => {
                if self.device_state != DeviceState::Ready {
                    let _ = result_sender.send(Err(Error::NotReady));
                    return;
                }
                self.averager.clear();
                let _ = result_sender.send(Ok(UwbManagerResponse::Ack));
            }
            UwbManagerCmd::SendCommand { cmd } => {
                debug_assert!(self.pending_cmd.is_none());
                if !self.is_command_allowed(&cmd) {
                    debug!("The command {:?} is rejected: the device is not ready", cmd);
                    let _ = result_sender.send(Err(Error::NotReady));
                    return;
                }
                // The first-contact device-info query of the bring-up waits without a bound;
                // it is failed fast by an error device status instead.
                let kind = if matches!(cmd, StackCommand::CoreGetDeviceInfo)
                    && self.device_state == DeviceState::Enabling
                {
                    PendingKind::Unbounded
                } else {
                    PendingKind::Bounded
                };
                self.submit_pending(cmd, kind, result_sender).await;
            }
        }
    }

    async fn submit_pending(
        &mut self,
        cmd: StackCommand,
        kind: PendingKind,
        result_sender: ResponseSender,
    ) {
        match self.hal.submit_command(cmd.clone()).await {
            Ok(()) => {
                if !matches!(kind, PendingKind::Unbounded) {
                    self.wait_resp_timeout =
                        PinSleep::new(Duration::from_millis(UWB_CMD_TIMEOUT_MS));
                }
                self.pending_cmd = Some(PendingCmd { cmd, kind, result_sender });
            }
            Err(e) => {
                error!("Failed to submit command {:?}: {:?}", cmd, e);
                let _ = result_sender.send(Err(e));
            }
        }
    }

    fn handle_stack_event(&mut self, event: Option<StackEvent>) {
        match event {
            Some(StackEvent::Response(resp)) => self.handle_response(resp),
            Some(StackEvent::Notification(notf)) => self.handle_notification(notf),
            None => {
                warn!("The stack dropped the event sender unexpectedly.");
                self.on_stack_closed();
                self.device_state = DeviceState::Error;
                if let Some(pending_cmd) = self.pending_cmd.take() {
                    let _ = pending_cmd.result_sender.send(Err(Error::Unknown));
                }
                if let Some(result_sender) = self.reset_confirm_sender.take() {
                    let _ = result_sender.send(Err(Error::Unknown));
                }
            }
        }
    }

    fn handle_response(&mut self, resp: StackResponse) {
        if let StackResponse::CoreGetDeviceInfo(Ok(device_info)) = &resp {
            self.device_info = Some(device_info.clone());
        }

        match self.pending_cmd.take() {
            Some(pending_cmd) if resp.matches_command(&pending_cmd.cmd) => {
                if matches!(pending_cmd.kind, PendingKind::ResetAck) {
                    self.handle_reset_ack(resp, pending_cmd.result_sender);
                    return;
                }
                let _ = pending_cmd.result_sender.send(Ok(UwbManagerResponse::Stack(resp)));
            }
            Some(pending_cmd) => {
                warn!("Received a response not matching the pending command, dropped: {:?}", resp);
                self.pending_cmd = Some(pending_cmd);
            }
            None => {
                warn!("Received a response unexpectedly: {:?}", resp);
            }
        }
    }

    fn handle_reset_ack(&mut self, resp: StackResponse, result_sender: ResponseSender) {
        match resp {
            StackResponse::DeviceReset(Ok(())) => {
                // Acknowledged. The outcome is decided by the follow-up device status.
                self.wait_device_status_timeout =
                    PinSleep::new(Duration::from_millis(UWB_CMD_TIMEOUT_MS));
                self.reset_confirm_sender = Some(result_sender);
            }
            resp => {
                let _ = result_sender.send(Ok(UwbManagerResponse::Stack(resp)));
            }
        }
    }

    fn handle_notification(&mut self, notf: StackNotification) {
        match notf {
            StackNotification::Core(core_notf) => {
                if let CoreNotification::DeviceStatus(state) = core_notf {
                    self.handle_device_status(state);
                }
                let _ = self.core_notf_sender.send(core_notf);
            }
            StackNotification::Session(session_notf) => {
                let session_notf = match session_notf {
                    SessionNotification::Status { session_id, session_state, reason_code } => {
                        if session_state == SessionState::Deinit {
                            self.averager.remove_session(session_id);
                        }
                        SessionNotification::Status { session_id, session_state, reason_code }
                    }
                    SessionNotification::RangeData(mut range_data) => {
                        self.averager.smooth(&mut range_data);
                        SessionNotification::RangeData(range_data)
                    }
                    session_notf => session_notf,
                };
                let _ = self.session_notf_sender.send(session_notf);
            }
        }
    }

    fn handle_device_status(&mut self, state: DeviceState) {
        if let Some(result_sender) = self.reset_confirm_sender.take() {
            let result = match state {
                DeviceState::Ready => {
                    // The confirmed reset wiped the device; drop the per-session state with it.
                    self.averager.clear();
                    Ok(UwbManagerResponse::Stack(StackResponse::DeviceReset(Ok(()))))
                }
                state => {
                    warn!("The device reported {:?} after an acknowledged reset", state);
                    // The unconfirmed reset leaves the device in an unusable state.
                    self.device_state = DeviceState::Error;
                    Err(Error::DeviceRejected(StatusCode::Failed))
                }
            };
            let _ = result_sender.send(result);
            return;
        }

        if state == DeviceState::Error {
            // Fail fast any waiter with no deadline.
            if matches!(&self.pending_cmd, Some(p) if matches!(p.kind, PendingKind::Unbounded)) {
                if let Some(pending_cmd) = self.pending_cmd.take() {
                    let _ =
                        pending_cmd.result_sender.send(Err(Error::DeviceRejected(StatusCode::Failed)));
                }
            }
            if self.device_state == DeviceState::Ready {
                error!("The device reported an error state");
                self.device_state = DeviceState::Error;
            }
        }
    }

    fn on_stack_closed(&mut self) {
        self.is_stack_initialized = false;
        self.event_receiver = mpsc::unbounded_channel().1;
        self.device_info = None;
        self.averager.clear();
    }

    fn is_command_allowed(&self, cmd: &StackCommand) -> bool {
        if !self.is_stack_initialized {
            return false;
        }
        match cmd {
            // The disable command is accepted in any state; the teardown always completes.
            StackCommand::Disable { .. } => true,
            // The bring-up pipeline runs its own queries before the device is ready.
            StackCommand::CoreGetDeviceInfo | StackCommand::CoreSetConfig { .. } => {
                matches!(self.device_state, DeviceState::Enabling | DeviceState::Ready)
            }
            _ => self.device_state == DeviceState::Ready,
        }
    }

    fn is_waiting_resp(&self) -> bool {
        self.pending_cmd.is_some() || self.reset_confirm_sender.is_some()
    }
    fn is_waiting_bounded_resp(&self) -> bool {
        matches!(&self.pending_cmd, Some(p) if !matches!(p.kind, PendingKind::Unbounded))
    }
    fn is_waiting_device_status(&self) -> bool {
        self.reset_confirm_sender.is_some()
    }
}

impl<T: StackHal> Drop for UwbManagerActor<T> {
    fn drop(&mut self) {
        // mpsc receiver is about to be dropped. Clean shutdown the mpsc message.
        clean_mpsc_receiver(&mut self.event_receiver);
    }
}

type ResponseSender = oneshot::Sender<Result<UwbManagerResponse>>;

struct PendingCmd {
    cmd: StackCommand,
    kind: PendingKind,
    result_sender: ResponseSender,
}

enum PendingKind {
    // Completed by the matching response within the command bound.
    Bounded,
    // The bring-up device-info query; waits for its response without a bound.
    Unbounded,
    // A reset command; an OK response arms the device-status confirmation instead of
    // completing the caller.
    ResetAck,
}

#[derive(Debug)]
enum UwbManagerResponse {
    Ack,
    CachedDeviceInfo { device_state: DeviceState, device_info: Option<DeviceInfoResponse> },
    Stack(StackResponse),
}

#[derive(Debug)]
enum UwbManagerCmd {
    SetCoreNotificationSender {
        core_notf_sender: mpsc::UnboundedSender<CoreNotification>,
    },
    SetSessionNotificationSender {
        session_notf_sender: mpsc::UnboundedSender<SessionNotification>,
    },
    StartStack,
    InitCore,
    FinishEnable,
    AbortEnable,
    FinishDisable,
    DeviceReset {
        reset_config: u8,
    },
    GetCachedDeviceInfo,
    SetSamplingRate {
        session_id: SessionId,
        sampling_rate: u8,
    },
    ClearRegistry,
    SendCommand {
        cmd: StackCommand,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::macros::support::Future;
    use tokio::time::Instant;

    use crate::params::{
        ControleeStatus, CoreSetConfigResponse, MulticastListUpdateNtf, RangingMeasurementType,
        TwoWayRangingMeasurement, INVALID_DISTANCE_VALUE,
    };
    use crate::stack::mock_stack_hal::MockStackHal;
    use crate::stack::notification::{RangingMeasurements, SessionRangeData};
    use crate::utils::init_test_logging;

    fn default_device_info() -> DeviceInfoResponse {
        DeviceInfoResponse {
            uci_version: 0x1234,
            mac_version: 0x5678,
            phy_version: 0x90ab,
            uci_test_version: 0x1357,
            vendor_spec_info: vec![0x01, 0x02],
        }
    }

    fn core_set_config_ok() -> StackEvent {
        StackEvent::Response(StackResponse::CoreSetConfig(CoreSetConfigResponse {
            status: StatusCode::Ok,
            config_status: vec![],
        }))
    }

    fn range_data_event(session_id: SessionId, distance: u16) -> StackEvent {
        StackEvent::Notification(StackNotification::Session(SessionNotification::RangeData(
            SessionRangeData {
                sequence_number: 1,
                session_id,
                current_ranging_interval_ms: 200,
                ranging_measurement_type: RangingMeasurementType::TwoWay,
                ranging_measurements: RangingMeasurements::TwoWay(vec![
                    TwoWayRangingMeasurement {
                        mac_address: 0x5700,
                        status: StatusCode::Ok,
                        nlos: 0,
                        distance,
                        aoa_azimuth: 0,
                        aoa_elevation: 0,
                    },
                ]),
                rcr_indicator: 0,
                raw_ranging_data: vec![],
            },
        )))
    }

    fn forwarded_distance(notf: SessionNotification) -> u16 {
        match notf {
            SessionNotification::RangeData(SessionRangeData {
                ranging_measurements: RangingMeasurements::TwoWay(measurements),
                ..
            }) => measurements[0].distance,
            notf => panic!("expected a two-way ranging notification, got {:?}", notf),
        }
    }

    // Scripts the whole successful bring-up sequence on the mock.
    fn setup_stack_for_enable(hal: &mut MockStackHal, device_info: &DeviceInfoResponse) {
        hal.expected_initialize(None, Ok(()));
        hal.expected_submit_command(
            StackCommand::Enable,
            vec![StackEvent::Response(StackResponse::Enable(Ok(())))],
            Ok(()),
        );
        hal.expected_init_core(Ok(()));
        hal.expected_submit_command(
            StackCommand::CoreGetDeviceInfo,
            vec![StackEvent::Response(StackResponse::CoreGetDeviceInfo(Ok(device_info.clone())))],
            Ok(()),
        );
        hal.expected_submit_command(
            StackCommand::CoreSetConfig { config_tlvs: CoreDeviceConfig::default().tlvs() },
            vec![core_set_config_ok()],
            Ok(()),
        );
    }

    async fn setup_uwb_manager_with_enabled_device<F, Fut>(
        setup_hal_fn: F,
    ) -> (UwbManagerImpl, MockStackHal)
    where
        F: FnOnce(MockStackHal) -> Fut,
        Fut: Future<Output = ()>,
    {
        init_test_logging();

        let mut hal = MockStackHal::new();
        let device_info = default_device_info();
        setup_stack_for_enable(&mut hal, &device_info);

        // Verify enable() is working.
        let uwb_manager = UwbManagerImpl::new(hal.clone(), CoreDeviceConfig::default());
        let result = uwb_manager.enable().await;
        assert_eq!(result, Ok(device_info));
        assert!(hal.wait_expected_calls_done().await);

        setup_hal_fn(hal.clone()).await;

        (uwb_manager, hal)
    }

    #[tokio::test]
    async fn test_enable_and_device_info() {
        let (uwb_manager, mut mock_hal) =
            setup_uwb_manager_with_enabled_device(|_| async move {}).await;

        assert_eq!(uwb_manager.device_info().await, Ok(default_device_info()));
        assert!(mock_hal.wait_expected_calls_done().await);
    }

    #[tokio::test]
    async fn test_enable_while_ready_resets_device() {
        let (uwb_manager, mut mock_hal) = setup_uwb_manager_with_enabled_device(|mut hal| async move {
            hal.expected_submit_command(
                StackCommand::DeviceReset { reset_config: RESET_CONFIG_DEVICE },
                vec![
                    StackEvent::Response(StackResponse::DeviceReset(Ok(()))),
                    StackEvent::Notification(StackNotification::Core(
                        CoreNotification::DeviceStatus(DeviceState::Ready),
                    )),
                ],
                Ok(()),
            );
        })
        .await;

        assert_eq!(uwb_manager.enable().await, Ok(default_device_info()));
        assert!(mock_hal.wait_expected_calls_done().await);
    }

    #[tokio::test]
    async fn test_enable_while_ready_ignores_reset_failure() {
        let (uwb_manager, mut mock_hal) = setup_uwb_manager_with_enabled_device(|mut hal| async move {
            hal.expected_submit_command(
                StackCommand::DeviceReset { reset_config: RESET_CONFIG_DEVICE },
                vec![
                    StackEvent::Response(StackResponse::DeviceReset(Ok(()))),
                    StackEvent::Notification(StackNotification::Core(
                        CoreNotification::DeviceStatus(DeviceState::Error),
                    )),
                ],
                Ok(()),
            );
        })
        .await;

        // The failed reset is logged only; the cached device info is still returned.
        assert_eq!(uwb_manager.enable().await, Ok(default_device_info()));
        assert!(mock_hal.wait_expected_calls_done().await);
    }

    #[tokio::test]
    async fn test_enable_failure_at_core_config_tears_down() {
        init_test_logging();

        let mut hal = MockStackHal::new();
        hal.expected_initialize(None, Ok(()));
        hal.expected_submit_command(
            StackCommand::Enable,
            vec![StackEvent::Response(StackResponse::Enable(Ok(())))],
            Ok(()),
        );
        hal.expected_init_core(Ok(()));
        hal.expected_submit_command(
            StackCommand::CoreGetDeviceInfo,
            vec![StackEvent::Response(StackResponse::CoreGetDeviceInfo(Ok(
                default_device_info(),
            )))],
            Ok(()),
        );
        hal.expected_submit_command(
            StackCommand::CoreSetConfig { config_tlvs: CoreDeviceConfig::default().tlvs() },
            vec![StackEvent::Response(StackResponse::CoreSetConfig(CoreSetConfigResponse {
                status: StatusCode::Failed,
                config_status: vec![],
            }))],
            Ok(()),
        );
        // The failed step tears the stack down.
        hal.expected_submit_command(StackCommand::Disable { graceful: false }, vec![], Ok(()));
        hal.expected_finalize(false, Ok(()));

        let uwb_manager = UwbManagerImpl::new(hal.clone(), CoreDeviceConfig::default());
        let result = uwb_manager.enable().await;
        assert_eq!(result, Err(Error::DeviceRejected(StatusCode::Failed)));

        // The device ends up not ready and nothing of the bring-up survives.
        assert_eq!(uwb_manager.device_info().await, Err(Error::NotReady));
        assert_eq!(uwb_manager.session_init(0x57, SessionType::FiraRangingSession).await,
            Err(Error::NotReady));
        assert!(hal.wait_expected_calls_done().await);
    }

    #[tokio::test]
    async fn test_enable_submit_rejected() {
        init_test_logging();

        let mut hal = MockStackHal::new();
        hal.expected_initialize(None, Ok(()));
        hal.expected_submit_command(StackCommand::Enable, vec![], Err(Error::SubmitRejected));
        hal.expected_submit_command(StackCommand::Disable { graceful: false }, vec![], Ok(()));
        hal.expected_finalize(false, Ok(()));

        let uwb_manager = UwbManagerImpl::new(hal.clone(), CoreDeviceConfig::default());
        assert_eq!(uwb_manager.enable().await, Err(Error::SubmitRejected));
        assert!(hal.wait_expected_calls_done().await);
    }

    #[tokio::test]
    async fn test_device_status_error_releases_device_info_wait() {
        init_test_logging();

        let mut hal = MockStackHal::new();
        hal.expected_initialize(None, Ok(()));
        hal.expected_submit_command(
            StackCommand::Enable,
            vec![StackEvent::Response(StackResponse::Enable(Ok(())))],
            Ok(()),
        );
        hal.expected_init_core(Ok(()));
        // The device-info query has no deadline; it is released by the error status instead.
        hal.expected_submit_command(
            StackCommand::CoreGetDeviceInfo,
            vec![StackEvent::Notification(StackNotification::Core(
                CoreNotification::DeviceStatus(DeviceState::Error),
            ))],
            Ok(()),
        );
        hal.expected_submit_command(StackCommand::Disable { graceful: false }, vec![], Ok(()));
        hal.expected_finalize(false, Ok(()));

        let uwb_manager = UwbManagerImpl::new(hal.clone(), CoreDeviceConfig::default());
        assert_eq!(
            uwb_manager.enable().await,
            Err(Error::DeviceRejected(StatusCode::Failed))
        );
        assert!(hal.wait_expected_calls_done().await);
    }

    #[tokio::test]
    async fn test_disable() {
        let (uwb_manager, mut mock_hal) = setup_uwb_manager_with_enabled_device(|mut hal| async move {
            hal.expected_submit_command(
                StackCommand::Disable { graceful: true },
                vec![StackEvent::Response(StackResponse::Disable(Ok(())))],
                Ok(()),
            );
            hal.expected_finalize(true, Ok(()));
        })
        .await;

        assert_eq!(uwb_manager.disable().await, Ok(()));
        assert_eq!(uwb_manager.device_info().await, Err(Error::NotReady));
        assert!(mock_hal.wait_expected_calls_done().await);
    }

    #[tokio::test]
    async fn test_finalize_stack_when_exit() {
        let (uwb_manager, mut mock_hal) = setup_uwb_manager_with_enabled_device(|mut hal| async move {
            // UwbManager should finalize the stack if it is still initialized when exit.
            hal.expected_finalize(false, Ok(()));
        })
        .await;

        drop(uwb_manager);
        assert!(mock_hal.wait_expected_calls_done().await);
    }

    #[tokio::test]
    async fn test_not_ready_operations_submit_nothing() {
        init_test_logging();

        let mut hal = MockStackHal::new();
        let uwb_manager = UwbManagerImpl::new(hal.clone(), CoreDeviceConfig::default());

        assert_eq!(
            uwb_manager.session_init(0x57, SessionType::FiraRangingSession).await,
            Err(Error::NotReady)
        );
        assert_eq!(uwb_manager.range_start(0x57).await, Err(Error::NotReady));
        assert_eq!(uwb_manager.device_reset(RESET_CONFIG_DEVICE).await, Err(Error::NotReady));
        assert_eq!(uwb_manager.set_ranging_sampling_rate(0x57, 3).await, Err(Error::NotReady));
        assert_eq!(uwb_manager.device_info().await, Err(Error::NotReady));

        // The expectation script stays empty: nothing reached the stack.
        assert!(hal.wait_expected_calls_done().await);
    }

    #[tokio::test]
    async fn test_command_timeout_after_bound() {
        let (uwb_manager, mut mock_hal) = setup_uwb_manager_with_enabled_device(|mut hal| async move {
            // The submission is accepted but no terminal event ever arrives.
            hal.expected_submit_command(StackCommand::RangeStart { session_id: 0x57 }, vec![], Ok(()));
        })
        .await;

        let started = Instant::now();
        assert_eq!(uwb_manager.range_start(0x57).await, Err(Error::Timeout));
        assert!(started.elapsed() >= Duration::from_millis(UWB_CMD_TIMEOUT_MS));
        assert!(mock_hal.wait_expected_calls_done().await);
    }

    #[tokio::test]
    async fn test_delayed_response_within_bound() {
        let (uwb_manager, mut mock_hal) = setup_uwb_manager_with_enabled_device(|mut hal| async move {
            hal.expected_submit_command_delayed(
                StackCommand::RangeStart { session_id: 0x57 },
                vec![StackEvent::Response(StackResponse::RangeStart(Ok(())))],
                500,
                Ok(()),
            );
        })
        .await;

        assert_eq!(uwb_manager.range_start(0x57).await, Ok(()));
        assert!(mock_hal.wait_expected_calls_done().await);
    }

    #[tokio::test]
    async fn test_device_reset_confirmed_ready_clears_registry() {
        let (mut uwb_manager, mut mock_hal) =
            setup_uwb_manager_with_enabled_device(|mut hal| async move {
                hal.expected_submit_command(
                    StackCommand::DeviceReset { reset_config: RESET_CONFIG_DEVICE },
                    vec![
                        StackEvent::Response(StackResponse::DeviceReset(Ok(()))),
                        StackEvent::Notification(StackNotification::Core(
                            CoreNotification::DeviceStatus(DeviceState::Ready),
                        )),
                    ],
                    Ok(()),
                );
            })
            .await;

        let (session_notf_sender, mut session_notf_receiver) = mpsc::unbounded_channel();
        uwb_manager.set_session_notification_sender(session_notf_sender).await;

        uwb_manager.set_ranging_sampling_rate(0x7, 3).await.unwrap();
        mock_hal.inject_events(vec![range_data_event(0x7, 10)]);
        assert_eq!(forwarded_distance(session_notf_receiver.recv().await.unwrap()), 10);
        mock_hal.inject_events(vec![range_data_event(0x7, 20)]);
        assert_eq!(forwarded_distance(session_notf_receiver.recv().await.unwrap()), 15);

        assert_eq!(uwb_manager.device_reset(RESET_CONFIG_DEVICE).await, Ok(()));

        // The confirmed reset dropped the averaging entry: the raw distance passes through.
        mock_hal.inject_events(vec![range_data_event(0x7, 100)]);
        assert_eq!(forwarded_distance(session_notf_receiver.recv().await.unwrap()), 100);
        assert!(mock_hal.wait_expected_calls_done().await);
    }

    // The acknowledged-but-unconfirmed arm: the reset command itself succeeds and the failure
    // only comes from the follow-up device status. The two-phase contract matches the stack
    // semantics and is deliberate.
    #[tokio::test]
    async fn test_device_reset_unconfirmed_fails_and_keeps_registry() {
        let (mut uwb_manager, mut mock_hal) =
            setup_uwb_manager_with_enabled_device(|mut hal| async move {
                hal.expected_submit_command(
                    StackCommand::DeviceReset { reset_config: RESET_CONFIG_DEVICE },
                    vec![
                        StackEvent::Response(StackResponse::DeviceReset(Ok(()))),
                        StackEvent::Notification(StackNotification::Core(
                            CoreNotification::DeviceStatus(DeviceState::Error),
                        )),
                    ],
                    Ok(()),
                );
            })
            .await;

        let (session_notf_sender, mut session_notf_receiver) = mpsc::unbounded_channel();
        uwb_manager.set_session_notification_sender(session_notf_sender).await;

        uwb_manager.set_ranging_sampling_rate(0x7, 3).await.unwrap();
        mock_hal.inject_events(vec![range_data_event(0x7, 10)]);
        assert_eq!(forwarded_distance(session_notf_receiver.recv().await.unwrap()), 10);
        mock_hal.inject_events(vec![range_data_event(0x7, 20)]);
        assert_eq!(forwarded_distance(session_notf_receiver.recv().await.unwrap()), 15);

        assert_eq!(
            uwb_manager.device_reset(RESET_CONFIG_DEVICE).await,
            Err(Error::DeviceRejected(StatusCode::Failed))
        );

        // The registry is untouched: the window {10, 20, 100} is still averaged.
        mock_hal.inject_events(vec![range_data_event(0x7, 100)]);
        assert_eq!(forwarded_distance(session_notf_receiver.recv().await.unwrap()), 43);

        // The errored device no longer accepts commands; nothing more reaches the stack.
        assert_eq!(uwb_manager.range_start(0x57).await, Err(Error::NotReady));
        assert!(mock_hal.wait_expected_calls_done().await);
    }

    #[tokio::test]
    async fn test_device_reset_confirmation_timeout() {
        let (uwb_manager, mut mock_hal) = setup_uwb_manager_with_enabled_device(|mut hal| async move {
            // Acknowledged, but no device status notification follows.
            hal.expected_submit_command(
                StackCommand::DeviceReset { reset_config: RESET_CONFIG_DEVICE },
                vec![StackEvent::Response(StackResponse::DeviceReset(Ok(())))],
                Ok(()),
            );
        })
        .await;

        assert_eq!(uwb_manager.device_reset(RESET_CONFIG_DEVICE).await, Err(Error::Timeout));
        assert!(mock_hal.wait_expected_calls_done().await);
    }

    #[tokio::test]
    async fn test_range_data_notification_smoothed() {
        let (mut uwb_manager, mut mock_hal) =
            setup_uwb_manager_with_enabled_device(|_| async move {}).await;

        let (session_notf_sender, mut session_notf_receiver) = mpsc::unbounded_channel();
        uwb_manager.set_session_notification_sender(session_notf_sender).await;
        uwb_manager.set_ranging_sampling_rate(0x7, 3).await.unwrap();

        let mut outputs = vec![];
        for distance in [10, 20, 30, INVALID_DISTANCE_VALUE] {
            mock_hal.inject_events(vec![range_data_event(0x7, distance)]);
            outputs.push(forwarded_distance(session_notf_receiver.recv().await.unwrap()));
        }
        assert_eq!(outputs, vec![10, 15, 20, 25]);
        assert!(mock_hal.wait_expected_calls_done().await);
    }

    #[tokio::test]
    async fn test_one_way_range_data_passes_through() {
        let (mut uwb_manager, mut mock_hal) =
            setup_uwb_manager_with_enabled_device(|_| async move {}).await;

        let (session_notf_sender, mut session_notf_receiver) = mpsc::unbounded_channel();
        uwb_manager.set_session_notification_sender(session_notf_sender).await;
        uwb_manager.set_ranging_sampling_rate(0x7, 3).await.unwrap();

        let range_data = SessionRangeData {
            sequence_number: 1,
            session_id: 0x7,
            current_ranging_interval_ms: 200,
            ranging_measurement_type: RangingMeasurementType::OneWay,
            ranging_measurements: RangingMeasurements::OneWay(vec![]),
            rcr_indicator: 0,
            raw_ranging_data: vec![],
        };
        mock_hal.inject_events(vec![StackEvent::Notification(StackNotification::Session(
            SessionNotification::RangeData(range_data.clone()),
        ))]);

        assert_eq!(
            session_notf_receiver.recv().await,
            Some(SessionNotification::RangeData(range_data))
        );
        assert!(mock_hal.wait_expected_calls_done().await);
    }

    #[tokio::test]
    async fn test_session_deinit_notification_removes_registry_entry_and_forwards() {
        let (mut uwb_manager, mut mock_hal) =
            setup_uwb_manager_with_enabled_device(|_| async move {}).await;

        let (session_notf_sender, mut session_notf_receiver) = mpsc::unbounded_channel();
        uwb_manager.set_session_notification_sender(session_notf_sender).await;
        uwb_manager.set_ranging_sampling_rate(0x7, 3).await.unwrap();

        mock_hal.inject_events(vec![range_data_event(0x7, 10)]);
        assert_eq!(forwarded_distance(session_notf_receiver.recv().await.unwrap()), 10);

        let deinit_event = StackEvent::Notification(StackNotification::Session(
            SessionNotification::Status {
                session_id: 0x7,
                session_state: SessionState::Deinit,
                reason_code: 0,
            },
        ));
        mock_hal.inject_events(vec![deinit_event.clone()]);
        assert_eq!(
            session_notf_receiver.recv().await,
            Some(SessionNotification::Status {
                session_id: 0x7,
                session_state: SessionState::Deinit,
                reason_code: 0,
            })
        );

        // The entry is gone: the next round passes through raw.
        mock_hal.inject_events(vec![range_data_event(0x7, 100)]);
        assert_eq!(forwarded_distance(session_notf_receiver.recv().await.unwrap()), 100);

        // A second de-init notification removes nothing but is still forwarded.
        mock_hal.inject_events(vec![deinit_event]);
        assert_eq!(
            session_notf_receiver.recv().await,
            Some(SessionNotification::Status {
                session_id: 0x7,
                session_state: SessionState::Deinit,
                reason_code: 0,
            })
        );
        assert!(mock_hal.wait_expected_calls_done().await);
    }

    #[tokio::test]
    async fn test_core_notifications_forwarded() {
        let (mut uwb_manager, mut mock_hal) =
            setup_uwb_manager_with_enabled_device(|_| async move {}).await;

        let (core_notf_sender, mut core_notf_receiver) = mpsc::unbounded_channel();
        uwb_manager.set_core_notification_sender(core_notf_sender).await;

        mock_hal.inject_events(vec![StackEvent::Notification(StackNotification::Core(
            CoreNotification::GenericError(StatusCode::Rejected),
        ))]);
        assert_eq!(
            core_notf_receiver.recv().await,
            Some(CoreNotification::GenericError(StatusCode::Rejected))
        );
        assert!(mock_hal.wait_expected_calls_done().await);
    }

    #[tokio::test]
    async fn test_multicast_list_update_notification_forwarded() {
        let (mut uwb_manager, mut mock_hal) =
            setup_uwb_manager_with_enabled_device(|_| async move {}).await;

        let (session_notf_sender, mut session_notf_receiver) = mpsc::unbounded_channel();
        uwb_manager.set_session_notification_sender(session_notf_sender).await;

        let ntf = MulticastListUpdateNtf {
            session_id: 0x7,
            remaining_multicast_list_size: 3,
            status_list: vec![ControleeStatus { mac_address: 0x5700, subsession_id: 0x1, status: 0 }],
        };
        mock_hal.inject_events(vec![StackEvent::Notification(StackNotification::Session(
            SessionNotification::MulticastListUpdate(ntf.clone()),
        ))]);
        assert_eq!(
            session_notf_receiver.recv().await,
            Some(SessionNotification::MulticastListUpdate(ntf))
        );
        assert!(mock_hal.wait_expected_calls_done().await);
    }

    #[tokio::test]
    async fn test_session_init_deinit() {
        let session_id = 0x123;
        let session_type = SessionType::FiraRangingSession;
        let (uwb_manager, mut mock_hal) = setup_uwb_manager_with_enabled_device(|mut hal| async move {
            hal.expected_submit_command(
                StackCommand::SessionInit { session_id, session_type },
                vec![StackEvent::Response(StackResponse::SessionInit(Ok(())))],
                Ok(()),
            );
            hal.expected_submit_command(
                StackCommand::SessionDeinit { session_id },
                vec![StackEvent::Response(StackResponse::SessionDeinit(Ok(())))],
                Ok(()),
            );
        })
        .await;

        assert_eq!(uwb_manager.session_init(session_id, session_type).await, Ok(()));
        assert_eq!(uwb_manager.session_deinit(session_id).await, Ok(()));
        assert!(mock_hal.wait_expected_calls_done().await);
    }

    #[tokio::test]
    async fn test_session_init_rejected() {
        let session_id = 0x123;
        let session_type = SessionType::FiraRangingSession;
        let (uwb_manager, mut mock_hal) = setup_uwb_manager_with_enabled_device(|mut hal| async move {
            hal.expected_submit_command(
                StackCommand::SessionInit { session_id, session_type },
                vec![StackEvent::Response(StackResponse::SessionInit(Err(
                    Error::DeviceRejected(StatusCode::MaxSessionsExceeded),
                )))],
                Ok(()),
            );
        })
        .await;

        assert_eq!(
            uwb_manager.session_init(session_id, session_type).await,
            Err(Error::DeviceRejected(StatusCode::MaxSessionsExceeded))
        );
        assert!(mock_hal.wait_expected_calls_done().await);
    }

    #[tokio::test]
    async fn test_set_and_get_app_config() {
        let session_id = 0x123;
        let config_tlv = AppConfigTlv { cfg_id: AppConfigTlvType::DeviceType, v: vec![0x01] };
        let set_resp = SetAppConfigResponse { status: StatusCode::Ok, config_status: vec![] };
        let (uwb_manager, mut mock_hal) = {
            let config_tlv = config_tlv.clone();
            let set_resp = set_resp.clone();
            setup_uwb_manager_with_enabled_device(|mut hal| async move {
                hal.expected_submit_command(
                    StackCommand::SessionSetAppConfig {
                        session_id,
                        config_tlvs: vec![config_tlv.clone()],
                    },
                    vec![StackEvent::Response(StackResponse::SessionSetAppConfig(set_resp))],
                    Ok(()),
                );
                hal.expected_submit_command(
                    StackCommand::SessionGetAppConfig {
                        session_id,
                        app_cfg: vec![AppConfigTlvType::DeviceType],
                    },
                    vec![StackEvent::Response(StackResponse::SessionGetAppConfig(Ok(vec![
                        config_tlv,
                    ])))],
                    Ok(()),
                );
            })
            .await
        };

        assert_eq!(
            uwb_manager.set_app_config(session_id, vec![config_tlv.clone()]).await,
            Ok(set_resp)
        );
        assert_eq!(
            uwb_manager.get_app_config(session_id, vec![AppConfigTlvType::DeviceType]).await,
            Ok(vec![config_tlv])
        );
        assert!(mock_hal.wait_expected_calls_done().await);
    }

    #[tokio::test]
    async fn test_enable_range_data_ntf() {
        let session_id = 0x123;
        let (uwb_manager, mut mock_hal) = setup_uwb_manager_with_enabled_device(|mut hal| async move {
            hal.expected_submit_command(
                StackCommand::SessionSetAppConfig {
                    session_id,
                    config_tlvs: vec![AppConfigTlv {
                        cfg_id: AppConfigTlvType::RngDataNtf,
                        v: vec![0x01],
                    }],
                },
                vec![StackEvent::Response(StackResponse::SessionSetAppConfig(
                    SetAppConfigResponse { status: StatusCode::Ok, config_status: vec![] },
                ))],
                Ok(()),
            );
        })
        .await;

        assert_eq!(uwb_manager.enable_range_data_ntf(session_id, true).await, Ok(()));
        assert!(mock_hal.wait_expected_calls_done().await);
    }

    #[tokio::test]
    async fn test_get_device_state() {
        let (uwb_manager, mut mock_hal) = setup_uwb_manager_with_enabled_device(|mut hal| async move {
            hal.expected_submit_command(
                StackCommand::CoreGetConfig { cfg_id: vec![DeviceConfigId::DeviceState] },
                vec![StackEvent::Response(StackResponse::CoreGetConfig(Ok(vec![
                    DeviceConfigTlv { cfg_id: DeviceConfigId::DeviceState, v: vec![0x02] },
                ])))],
                Ok(()),
            );
        })
        .await;

        assert_eq!(uwb_manager.get_device_state().await, Ok(DeviceState::Ready));
        assert!(mock_hal.wait_expected_calls_done().await);
    }

    #[tokio::test]
    async fn test_session_queries() {
        let session_id = 0x123;
        let (uwb_manager, mut mock_hal) = setup_uwb_manager_with_enabled_device(|mut hal| async move {
            hal.expected_submit_command(
                StackCommand::SessionGetCount,
                vec![StackEvent::Response(StackResponse::SessionGetCount(Ok(3)))],
                Ok(()),
            );
            hal.expected_submit_command(
                StackCommand::SessionGetState { session_id },
                vec![StackEvent::Response(StackResponse::SessionGetState(Ok(
                    SessionState::Idle,
                )))],
                Ok(()),
            );
            hal.expected_submit_command(
                StackCommand::RangeGetRangingCount { session_id },
                vec![StackEvent::Response(StackResponse::RangeGetRangingCount(Ok(5)))],
                Ok(()),
            );
        })
        .await;

        assert_eq!(uwb_manager.get_session_count().await, Ok(3));
        assert_eq!(uwb_manager.get_session_state(session_id).await, Ok(SessionState::Idle));
        assert_eq!(uwb_manager.get_ranging_count(session_id).await, Ok(5));
        assert!(mock_hal.wait_expected_calls_done().await);
    }

    #[tokio::test]
    async fn test_range_start_stop() {
        let session_id = 0x123;
        let (uwb_manager, mut mock_hal) = setup_uwb_manager_with_enabled_device(|mut hal| async move {
            hal.expected_submit_command(
                StackCommand::RangeStart { session_id },
                vec![StackEvent::Response(StackResponse::RangeStart(Ok(())))],
                Ok(()),
            );
            hal.expected_submit_command(
                StackCommand::RangeStop { session_id },
                vec![StackEvent::Response(StackResponse::RangeStop(Ok(())))],
                Ok(()),
            );
        })
        .await;

        assert_eq!(uwb_manager.range_start(session_id).await, Ok(()));
        assert_eq!(uwb_manager.range_stop(session_id).await, Ok(()));
        assert!(mock_hal.wait_expected_calls_done().await);
    }

    #[tokio::test]
    async fn test_update_controller_multicast_list() {
        let session_id = 0x123;
        let action = UpdateMulticastListAction::AddControlee;
        let controlees = vec![Controlee { short_address: 0x5700, subsession_id: 0x1 }];
        let (uwb_manager, mut mock_hal) = {
            let controlees = controlees.clone();
            setup_uwb_manager_with_enabled_device(|mut hal| async move {
                hal.expected_submit_command(
                    StackCommand::SessionUpdateControllerMulticastList {
                        session_id,
                        action,
                        controlees,
                    },
                    vec![StackEvent::Response(
                        StackResponse::SessionUpdateControllerMulticastList(Ok(())),
                    )],
                    Ok(()),
                );
            })
            .await
        };

        assert_eq!(
            uwb_manager.update_controller_multicast_list(session_id, action, controlees).await,
            Ok(())
        );
        assert!(mock_hal.wait_expected_calls_done().await);
    }

    #[tokio::test]
    async fn test_update_controller_multicast_list_bad_arguments() {
        let (uwb_manager, mut mock_hal) =
            setup_uwb_manager_with_enabled_device(|_| async move {}).await;

        let action = UpdateMulticastListAction::AddControlee;
        assert_eq!(
            uwb_manager.update_controller_multicast_list(0x123, action, vec![]).await,
            Err(Error::BadParameters)
        );

        let controlee = Controlee { short_address: 0x5700, subsession_id: 0x1 };
        let too_many = vec![controlee; MAX_NUM_CONTROLLEES + 1];
        assert_eq!(
            uwb_manager.update_controller_multicast_list(0x123, action, too_many).await,
            Err(Error::BadParameters)
        );
        assert!(mock_hal.wait_expected_calls_done().await);
    }

    #[tokio::test]
    async fn test_send_blink_data() {
        let session_id = 0x123;
        let app_data = vec![0x57, 0x13];
        let (uwb_manager, mut mock_hal) = {
            let app_data = app_data.clone();
            setup_uwb_manager_with_enabled_device(|mut hal| async move {
                hal.expected_submit_command(
                    StackCommand::SendBlinkData {
                        session_id,
                        repetition_count: 5,
                        app_data: app_data.into(),
                    },
                    vec![StackEvent::Response(StackResponse::SendBlinkData(Ok(())))],
                    Ok(()),
                );
            })
            .await
        };

        assert_eq!(uwb_manager.send_blink_data(session_id, 5, app_data).await, Ok(()));
        assert!(mock_hal.wait_expected_calls_done().await);
    }

    #[tokio::test]
    async fn test_send_blink_data_payload_bounds() {
        let (uwb_manager, mut mock_hal) =
            setup_uwb_manager_with_enabled_device(|_| async move {}).await;

        assert_eq!(
            uwb_manager.send_blink_data(0x123, 5, vec![]).await,
            Err(Error::BadParameters)
        );
        assert_eq!(
            uwb_manager.send_blink_data(0x123, 5, vec![0x57; MAX_COMMAND_PAYLOAD_LEN + 1]).await,
            Err(Error::AllocationFailure)
        );
        assert!(mock_hal.wait_expected_calls_done().await);
    }

    #[tokio::test]
    async fn test_raw_command() {
        let (gid, oid) = (0x0a, 0x01);
        let payload = vec![0x57];
        let message = RawStackMessage { gid, oid, payload: vec![0x13] };
        let (uwb_manager, mut mock_hal) = {
            let payload = payload.clone();
            let message = message.clone();
            setup_uwb_manager_with_enabled_device(|mut hal| async move {
                hal.expected_submit_command(
                    StackCommand::RawCommand { gid, oid, payload: payload.into() },
                    vec![StackEvent::Response(StackResponse::RawCommand(Ok(message)))],
                    Ok(()),
                );
            })
            .await
        };

        assert_eq!(uwb_manager.raw_command(gid, oid, payload).await, Ok(message));
        assert_eq!(
            uwb_manager.raw_command(gid, oid, vec![0x57; MAX_COMMAND_PAYLOAD_LEN + 1]).await,
            Err(Error::AllocationFailure)
        );
        assert!(mock_hal.wait_expected_calls_done().await);
    }

    #[tokio::test]
    async fn test_sampling_rate_of_one_removes_registry_entry() {
        let (mut uwb_manager, mut mock_hal) =
            setup_uwb_manager_with_enabled_device(|_| async move {}).await;

        let (session_notf_sender, mut session_notf_receiver) = mpsc::unbounded_channel();
        uwb_manager.set_session_notification_sender(session_notf_sender).await;

        uwb_manager.set_ranging_sampling_rate(0x7, 3).await.unwrap();
        mock_hal.inject_events(vec![range_data_event(0x7, 10)]);
        assert_eq!(forwarded_distance(session_notf_receiver.recv().await.unwrap()), 10);

        uwb_manager.set_ranging_sampling_rate(0x7, 1).await.unwrap();

        // The entry is gone: a distance that would have been averaged passes through.
        mock_hal.inject_events(vec![range_data_event(0x7, 100)]);
        assert_eq!(forwarded_distance(session_notf_receiver.recv().await.unwrap()), 100);
        assert!(mock_hal.wait_expected_calls_done().await);
    }

    #[tokio::test]
    async fn test_recover_clears_registry_and_reapplies_core_config() {
        let (mut uwb_manager, mut mock_hal) =
            setup_uwb_manager_with_enabled_device(|mut hal| async move {
                hal.expected_submit_command(
                    StackCommand::CoreSetConfig {
                        config_tlvs: CoreDeviceConfig::default().tlvs(),
                    },
                    vec![core_set_config_ok()],
                    Ok(()),
                );
            })
            .await;

        let (session_notf_sender, mut session_notf_receiver) = mpsc::unbounded_channel();
        uwb_manager.set_session_notification_sender(session_notf_sender).await;

        uwb_manager.set_ranging_sampling_rate(0x7, 3).await.unwrap();
        mock_hal.inject_events(vec![range_data_event(0x7, 10)]);
        assert_eq!(forwarded_distance(session_notf_receiver.recv().await.unwrap()), 10);

        assert_eq!(uwb_manager.recover().await, Ok(()));

        mock_hal.inject_events(vec![range_data_event(0x7, 100)]);
        assert_eq!(forwarded_distance(session_notf_receiver.recv().await.unwrap()), 100);
        assert!(mock_hal.wait_expected_calls_done().await);
    }
}
