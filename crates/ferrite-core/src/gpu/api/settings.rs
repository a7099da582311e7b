// Copyright 2025 eraflo
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

//! Tunables of the transfer and frame pipeline.

use crate::gpu::error::SettingsError;
use serde::{Deserialize, Serialize};

/// Global settings read by the frame scheduler, the transfer pipeline and the
/// material compiler.
///
/// Missing fields fall back to [`FrameSettings::default`] when deserialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameSettings {
    /// How many frames may have GPU work in flight at once.
    pub max_frames_in_flight: usize,
    /// Lower bound of staging-buffer entry alignment, in bytes.
    pub min_staging_alignment: u64,
    /// Upper bound on distinct image slots in one material set.
    pub material_slots: u32,
    /// Log an error when an object carrying an unconsumed release barrier is
    /// destroyed.
    pub validate_ownership_transfers: bool,
    /// Timeout used when blocking on a frame fence, in nanoseconds.
    pub fence_timeout_ns: u64,
}

impl Default for FrameSettings {
    fn default() -> Self {
        Self {
            max_frames_in_flight: 2,
            min_staging_alignment: 0x10,
            material_slots: 1024,
            validate_ownership_transfers: cfg!(debug_assertions),
            fence_timeout_ns: 1_000_000_000,
        }
    }
}

impl FrameSettings {
    /// Parses settings from a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Parse`] for malformed JSON and
    /// [`SettingsError::Invalid`] when a value is out of range.
    pub fn from_json_str(json: &str) -> Result<Self, SettingsError> {
        let settings: Self =
            serde_json::from_str(json).map_err(|e| SettingsError::Parse(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Checks that every value is usable.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.max_frames_in_flight == 0 {
            return Err(SettingsError::Invalid {
                field: "max_frames_in_flight",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.min_staging_alignment == 0 || !self.min_staging_alignment.is_power_of_two() {
            return Err(SettingsError::Invalid {
                field: "min_staging_alignment",
                reason: format!("{} is not a power of two", self.min_staging_alignment),
            });
        }
        if self.material_slots == 0 {
            return Err(SettingsError::Invalid {
                field: "material_slots",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_two_frames_in_flight() {
        let settings = FrameSettings::default();
        assert_eq!(settings.max_frames_in_flight, 2);
        assert_eq!(settings.min_staging_alignment, 0x10);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let settings = FrameSettings::from_json_str(r#"{ "max_frames_in_flight": 3 }"#).unwrap();
        assert_eq!(settings.max_frames_in_flight, 3);
        assert_eq!(settings.material_slots, 1024);
    }

    #[test]
    fn rejects_zero_frames() {
        let err = FrameSettings::from_json_str(r#"{ "max_frames_in_flight": 0 }"#).unwrap_err();
        assert!(matches!(
            err,
            SettingsError::Invalid {
                field: "max_frames_in_flight",
                ..
            }
        ));
    }

    #[test]
    fn rejects_malformed_json() {
        let err = FrameSettings::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, SettingsError::Parse(_)));
    }
}
