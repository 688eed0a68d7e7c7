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

//! This module defines the error type and the result type for this library.

use crate::params::StatusCode;

/// The error type for the uwb_stack_core library.
#[non_exhaustive] // Adding new enum fields doesn't break the downstream build.
#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    /// The provided parameters are invalid, or the method is not allowed to be called in the
    /// current state.
    #[error("Bad parameters")]
    BadParameters,
    /// The device stack refused to accept the command for submission.
    #[error("The device stack rejected the command submission")]
    SubmitRejected,
    /// The terminal event for a submitted command did not arrive in time.
    #[error("The response or notification is not received in timeout")]
    Timeout,
    /// The device answered the command with a non-success status.
    #[error("The device rejected the command with status {0:?}")]
    DeviceRejected(StatusCode),
    /// The operation requires the device to be enabled and ready.
    #[error("The device is not ready")]
    NotReady,
    /// A variable-length payload does not fit the fixed marshalling bound.
    #[error("A payload buffer could not be obtained within the marshalling bound")]
    AllocationFailure,
    /// The unknown error.
    #[error("The unknown error")]
    Unknown,

    /// The result of the mock method is not assigned
    #[cfg(any(test, feature = "mock-utils"))]
    #[error("The result of the mock method is not assigned")]
    MockUndefined,
}

/// The result type for the uwb_stack_core library.
///
/// This type is broadly used by the methods in this library which may produce an error.
pub type Result<T> = std::result::Result<T, Error>;

/// Converts a status code reported by the device into a `Result`, keeping the rejecting code.
pub fn status_code_to_result(status: StatusCode) -> Result<()> {
    match status {
        StatusCode::Ok => Ok(()),
        status => Err(Error::DeviceRejected(status)),
    }
}
