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

//! Smoothing of the distances reported by two-way ranging rounds.

use std::collections::{HashMap, VecDeque};

use log::{debug, warn};

use crate::params::{SessionId, INVALID_DISTANCE_VALUE, MAX_NUM_RESPONDERS};
use crate::stack::notification::{RangingMeasurements, SessionRangeData};

/// The registry of the per-session averaging state.
///
/// A session opts in by setting a sampling rate larger than 1. Each measurement slot of the
/// session then keeps a window of the last |sampling_rate| raw distances, and every reported
/// distance is replaced by the mean of the valid values in its window.
#[derive(Default)]
pub(crate) struct RangeDataAverager {
    sessions: HashMap<SessionId, SessionAveragingState>,
}

struct SessionAveragingState {
    sampling_rate: u8,
    // One window per measurement slot of a ranging round.
    anchor_windows: Vec<VecDeque<u16>>,
}

impl SessionAveragingState {
    fn new(sampling_rate: u8) -> Self {
        Self { sampling_rate, anchor_windows: vec![VecDeque::new(); MAX_NUM_RESPONDERS] }
    }
}

impl RangeDataAverager {
    pub fn new() -> Self {
        Default::default()
    }

    /// Sets the sampling rate of a session. A rate larger than 1 creates or updates the entry,
    /// keeping the windows already accumulated; any other rate removes the entry.
    pub fn set_sampling_rate(&mut self, session_id: SessionId, sampling_rate: u8) {
        if sampling_rate > 1 {
            self.sessions
                .entry(session_id)
                .or_insert_with(|| SessionAveragingState::new(sampling_rate))
                .sampling_rate = sampling_rate;
            debug!("Averaging enabled for session {} with sampling rate {}", session_id, sampling_rate);
        } else {
            self.sessions.remove(&session_id);
            debug!(
                "Averaging disabled for session {} since sampling rate is {}",
                session_id, sampling_rate
            );
        }
    }

    /// Removes the averaging entry of a session, if it has one.
    pub fn remove_session(&mut self, session_id: SessionId) {
        if self.sessions.remove(&session_id).is_some() {
            debug!("Averaging disabled for the removed session {}", session_id);
        }
    }

    /// Removes every averaging entry.
    pub fn clear(&mut self) {
        self.sessions.clear();
    }

    /// Returns true if the session has an averaging entry.
    #[cfg(test)]
    pub fn has_session(&self, session_id: SessionId) -> bool {
        self.sessions.contains_key(&session_id)
    }

    /// Smooths the distances of a ranging round in place.
    ///
    /// Only two-way rounds of a session with an entry are touched; one-way rounds and sessions
    /// without an entry pass through unmodified. Smoothing never fails the delivery: slots
    /// beyond the supported anchor count are left as reported.
    pub fn smooth(&mut self, range_data: &mut SessionRangeData) {
        let measurements = match &mut range_data.ranging_measurements {
            RangingMeasurements::TwoWay(measurements) => measurements,
            RangingMeasurements::OneWay(_) => return,
        };
        let session = match self.sessions.get_mut(&range_data.session_id) {
            Some(session) if session.sampling_rate > 1 => session,
            _ => return,
        };

        for (i, measurement) in measurements.iter_mut().enumerate() {
            if i >= MAX_NUM_RESPONDERS {
                warn!(
                    "Ranging round of session {} carries {} measurement slots, skipping the rest",
                    range_data.session_id,
                    measurements.len()
                );
                break;
            }

            let window = &mut session.anchor_windows[i];
            while window.len() >= session.sampling_rate as usize {
                window.pop_front();
            }
            window.push_back(measurement.distance);

            let mut sum: u32 = 0;
            let mut divider: u32 = 0;
            for distance in window.iter() {
                if *distance != INVALID_DISTANCE_VALUE {
                    sum += u32::from(*distance);
                    divider += 1;
                }
            }
            let averaged = if divider > 0 { (sum / divider) as u16 } else { INVALID_DISTANCE_VALUE };
            debug!(
                "Averaged the distance of session {} slot {}: {} -> {}",
                range_data.session_id, i, measurement.distance, averaged
            );
            measurement.distance = averaged;
        }
    }
}
