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

use thiserror::Error;

/// Faults raised by the relay, the recorder and the control surface
#[derive(Debug, Error)]
pub enum RecorderError {
    /// Stream connection lost or unreachable
    #[error("Transport fault: {0}")]
    Transport(String),

    /// The channel set of a running session changed size, or a message
    /// disagrees with the schema in force
    #[error("Schema violation: {0}")]
    SchemaViolation(String),

    #[error("Missing mandatory parameters. Mandatory parameters {required:?} but received {received:?}.")]
    MissingParameters {
        required: Vec<String>,
        received: Vec<String>,
    },

    #[error("Writer did not confirm it is receiving within {0:?}")]
    StartupTimeout(std::time::Duration),

    #[error("Cannot {operation} in state '{state}'")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Storage fault: {0}")]
    Storage(String),
}

impl RecorderError {
    /// Faults after which the process must not keep running
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RecorderError::Transport(_)
                | RecorderError::SchemaViolation(_)
                | RecorderError::StartupTimeout(_)
                | RecorderError::Storage(_)
        )
    }
}

pub type RecorderResult<T> = std::result::Result<T, RecorderError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_fatal_classification() {
        assert!(RecorderError::Transport("lost".into()).is_fatal());
        assert!(RecorderError::SchemaViolation("2 != 3".into()).is_fatal());
        assert!(RecorderError::StartupTimeout(Duration::from_secs(2)).is_fatal());
        assert!(RecorderError::Storage("disk full".into()).is_fatal());

        assert!(!RecorderError::InvalidArgument("abc".into()).is_fatal());
        assert!(!RecorderError::InvalidState {
            operation: "stop",
            state: "idle",
        }
        .is_fatal());
        assert!(!RecorderError::MissingParameters {
            required: vec![],
            received: vec![],
        }
        .is_fatal());
    }
}
