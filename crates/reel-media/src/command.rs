//! FFmpeg argument builder.
//!
//! Arguments come out in the order ffmpeg expects: global flags, input
//! options, `-i <input>`, output options, then the output path.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::runner::ToolInvocation;

#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    input: PathBuf,
    output: PathBuf,
    /// Applied to the input (before `-i`)
    before_input: Vec<String>,
    /// Applied to the output (after `-i`)
    after_input: Vec<String>,
}

impl FfmpegCommand {
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            before_input: Vec::new(),
            after_input: Vec::new(),
        }
    }

    fn out_opt(mut self, flag: &str, value: impl Into<String>) -> Self {
        self.after_input.push(flag.to_string());
        self.after_input.push(value.into());
        self
    }

    /// Raw input options, e.g. `["-safe", "0"]` for the concat demuxer.
    pub fn input_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.before_input.extend(args.into_iter().map(Into::into));
        self
    }

    /// Force the input demuxer.
    pub fn input_format(self, format: &str) -> Self {
        self.input_args(["-f", format])
    }

    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.out_opt("-vf", filter)
    }

    pub fn audio_filter(self, filter: impl Into<String>) -> Self {
        self.out_opt("-af", filter)
    }

    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.out_opt("-c:v", codec)
    }

    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.out_opt("-c:a", codec)
    }

    /// Remux every stream as is.
    pub fn stream_copy(self) -> Self {
        self.out_opt("-c", "copy")
    }

    pub fn crf(self, crf: u8) -> Self {
        self.out_opt("-crf", crf.to_string())
    }

    pub fn preset(self, preset: impl Into<String>) -> Self {
        self.out_opt("-preset", preset)
    }

    pub fn pixel_format(self, format: impl Into<String>) -> Self {
        self.out_opt("-pix_fmt", format)
    }

    pub fn audio_rate(self, hz: u32) -> Self {
        self.out_opt("-ar", hz.to_string())
    }

    pub fn audio_bitrate(self, bitrate: impl Into<String>) -> Self {
        self.out_opt("-b:a", bitrate)
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Always overwrites the output and logs errors only, so stderr holds
    /// just the diagnostics worth reporting.
    pub fn build_args(&self) -> Vec<String> {
        let mut args: Vec<String> = ["-y", "-v", "error"].map(String::from).into();
        args.extend(self.before_input.iter().cloned());
        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().into_owned());
        args.extend(self.after_input.iter().cloned());
        args.push(self.output.to_string_lossy().into_owned());
        args
    }

    /// Bind the command to a binary and a deadline.
    pub fn invocation(&self, program: impl Into<String>, timeout: Duration) -> ToolInvocation {
        ToolInvocation::new(program, self.build_args(), timeout)
    }
}
