//! External tool runner for the media stages.
//!
//! This crate provides:
//! - A `ToolRunner` abstraction over bounded-time subprocesses
//! - Scoped scratch directories removed on every exit path
//! - Type-safe FFmpeg command building
//! - The canonical normalize profile and stream-copy concatenation
//! - yt-dlp fetch commands and output discovery

pub mod command;
pub mod concat;
pub mod error;
pub mod fetch;
pub mod profile;
pub mod runner;
pub mod scratch;

pub use command::FfmpegCommand;
pub use concat::{concat_command, write_playlist, PLAYLIST_FILE};
pub use error::{MediaError, MediaResult};
pub use fetch::{locate_fetched, FetchCommand, FETCH_FORMAT, FETCH_OUTPUT_TEMPLATE};
pub use profile::NormalizeProfile;
pub use runner::{ProcessRunner, ToolInvocation, ToolOutput, ToolRunner};
pub use scratch::ScratchDir;
