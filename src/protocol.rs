// Copyright 2025 coScene
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

use serde::{Deserialize, Serialize};

use crate::window::Window;

/// Outcome of a control request, independent of the HTTP status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResponseState {
    Ok,
    Error,
}

/// Writer status as reported to callers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WriterStatus {
    Waiting,
    Writing,
    Finished,
    Error,
}

/// Response for status queries and commands without a payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusResponse {
    pub state: ResponseState,
    pub status: WriterStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StatusResponse {
    pub fn ok(status: WriterStatus) -> Self {
        Self {
            state: ResponseState::Ok,
            status,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Response carrying the session parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParametersResponse {
    pub state: ResponseState,
    pub status: WriterStatus,
    pub parameters: Option<serde_json::Value>,
}

/// Window boundaries and progress of the current session
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Statistics {
    pub start_pulse_id: Option<u64>,
    pub start_timestamp: Option<f64>,
    pub stop_pulse_id: Option<u64>,
    pub stop_timestamp: Option<f64>,
    pub last_pulse_id: Option<u64>,
    pub last_timestamp: Option<f64>,
    pub rows_written: u64,
}

impl Statistics {
    pub fn from_window(window: &Window) -> Self {
        Self {
            start_pulse_id: window.start.and_then(|b| b.pulse_id()),
            start_timestamp: window.start.and_then(|b| b.timestamp()),
            stop_pulse_id: window.stop.and_then(|b| b.pulse_id()),
            stop_timestamp: window.stop.and_then(|b| b.timestamp()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatisticsResponse {
    pub state: ResponseState,
    pub status: WriterStatus,
    pub statistics: Statistics,
}

/// Error envelope: `{"state": "error", "status": "<message>"}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorResponse {
    pub state: ResponseState,
    pub status: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            state: ResponseState::Error,
            status: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::Boundary;

    #[test]
    fn test_error_envelope_shape() {
        let value = serde_json::to_value(ErrorResponse::new("boom")).unwrap();
        assert_eq!(value, serde_json::json!({"state": "error", "status": "boom"}));
    }

    #[test]
    fn test_status_omits_empty_message() {
        let value = serde_json::to_value(StatusResponse::ok(WriterStatus::Waiting)).unwrap();
        assert_eq!(value, serde_json::json!({"state": "ok", "status": "waiting"}));
    }

    #[test]
    fn test_statistics_from_mixed_window() {
        let window = Window {
            start: Some(Boundary::PulseId(5)),
            stop: Some(Boundary::Timestamp(12.5)),
        };
        let stats = Statistics::from_window(&window);
        assert_eq!(stats.start_pulse_id, Some(5));
        assert_eq!(stats.start_timestamp, None);
        assert_eq!(stats.stop_pulse_id, None);
        assert_eq!(stats.stop_timestamp, Some(12.5));
        assert_eq!(stats.rows_written, 0);
    }
}
