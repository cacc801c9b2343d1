//! The canonical normalize profile.
//!
//! Every normalized item shares resolution, frame rate, pixel format and
//! audio layout so compilations can be produced by stream copy.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::command::FfmpegCommand;

/// Target encoding for the normalized store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizeProfile {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// `loudnorm` target, e.g. `I=-16:TP=-1.5:LRA=11`
    pub loudness: String,
    pub video_codec: String,
    pub preset: String,
    pub crf: u8,
    pub pixel_format: String,
    pub audio_codec: String,
    pub audio_rate: u32,
    pub audio_bitrate: String,
}

impl Default for NormalizeProfile {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 30,
            loudness: "I=-16:TP=-1.5:LRA=11".to_string(),
            video_codec: "libx264".to_string(),
            preset: "veryslow".to_string(),
            crf: 21,
            pixel_format: "yuv420p".to_string(),
            audio_codec: "aac".to_string(),
            audio_rate: 48_000,
            audio_bitrate: "384k".to_string(),
        }
    }
}

impl NormalizeProfile {
    pub fn with_preset(mut self, preset: impl Into<String>) -> Self {
        self.preset = preset.into();
        self
    }

    pub fn with_crf(mut self, crf: u8) -> Self {
        self.crf = crf;
        self
    }

    /// Scale down to fit, letterbox to the exact frame, square pixels.
    pub fn video_filter(&self) -> String {
        format!(
            "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,setsar=1,fps={fps}",
            w = self.width,
            h = self.height,
            fps = self.fps
        )
    }

    pub fn audio_filter(&self) -> String {
        format!(
            "loudnorm={}:print_format=summary,aformat=channel_layouts=stereo",
            self.loudness
        )
    }

    pub fn command(&self, input: &Path, output: &Path) -> FfmpegCommand {
        FfmpegCommand::new(input, output)
            .video_filter(self.video_filter())
            .audio_filter(self.audio_filter())
            .video_codec(&self.video_codec)
            .preset(&self.preset)
            .crf(self.crf)
            .pixel_format(&self.pixel_format)
            .audio_codec(&self.audio_codec)
            .audio_rate(self.audio_rate)
            .audio_bitrate(&self.audio_bitrate)
    }
}
