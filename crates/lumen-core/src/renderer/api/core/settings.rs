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

//! Global settings for the raytrace renderer.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::renderer::error::SettingsError;
use crate::scene::NodeId;

/// Settings that affect how frames are produced.
///
/// Every field has a default, so a settings document only needs to name what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    /// Width of the rendered image in pixels.
    pub width: u32,
    /// Height of the rendered image in pixels.
    pub height: u32,
    /// Ray dispatches accumulated per frame.
    pub samples_per_frame: u32,
    /// Linear RGB colour returned by rays that miss every primitive.
    pub sky_color: [f32; 3],
    /// Multiplier applied to `sky_color`.
    pub sky_intensity: f32,
    /// Exposure multiplied into the radiance written to the HDR image.
    pub exposure: f32,
    /// A runtime toggle to enable/disable GPU timestamp instrumentation.
    pub enable_gpu_timestamps: bool,
    /// Whether the device reports validation findings.
    pub enable_validation: bool,
    /// Renders from this camera instead of the first one found in the scene.
    pub camera: Option<NodeId>,
    /// Command buffers (and fences) cycled between frames.
    pub frames_in_flight: u32,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            width: 640,
            height: 360,
            samples_per_frame: 1,
            sky_color: [0.55, 0.7, 0.9],
            sky_intensity: 1.0,
            exposure: 1.0,
            enable_gpu_timestamps: true,
            enable_validation: true,
            camera: None,
            frames_in_flight: 2,
        }
    }
}

impl RenderSettings {
    /// Parses settings from a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, SettingsError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads settings from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Serializes the settings as pretty-printed JSON.
    pub fn to_json_string(&self) -> Result<String, SettingsError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// The sky radiance: colour times intensity.
    pub fn sky_radiance(&self) -> [f32; 3] {
        self.sky_color.map(|c| c * self.sky_intensity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_document_keeps_defaults() {
        let settings = RenderSettings::from_json_str(r#"{ "width": 64, "camera": 7 }"#).unwrap();
        assert_eq!(settings.width, 64);
        assert_eq!(settings.height, RenderSettings::default().height);
        assert_eq!(settings.camera, Some(NodeId(7)));
    }

    #[test]
    fn malformed_document_is_a_parse_error() {
        assert!(matches!(
            RenderSettings::from_json_str("{ width: }"),
            Err(SettingsError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        assert!(matches!(
            RenderSettings::load("/definitely/not/here.json"),
            Err(SettingsError::Io(_))
        ));
    }

    #[test]
    fn json_round_trip_preserves_settings() {
        let settings = RenderSettings {
            samples_per_frame: 4,
            frames_in_flight: 3,
            ..Default::default()
        };
        let json = settings.to_json_string().unwrap();
        assert_eq!(RenderSettings::from_json_str(&json).unwrap(), settings);
    }
}
