//! Remote video fetch via yt-dlp.
//!
//! The output template derives the filename from the extractor and the
//! remote id, so the same video always lands under the same name.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs;
use tracing::debug;

use crate::error::{MediaError, MediaResult};
use crate::runner::ToolInvocation;

/// Best mp4 video plus m4a audio, falling back to a single mp4.
pub const FETCH_FORMAT: &str = "bv*[ext=mp4]+ba[ext=m4a]/b[ext=mp4]";

/// `<extractor>-<id>.<ext>`
pub const FETCH_OUTPUT_TEMPLATE: &str = "%(extractor)s-%(id)s.%(ext)s";

/// Suffixes of yt-dlp's in-progress and bookkeeping files.
const PARTIAL_SUFFIXES: &[&str] = &[".part", ".ytdl", ".temp", ".json"];

/// Builder for a yt-dlp download of one URL into a directory.
#[derive(Debug, Clone)]
pub struct FetchCommand {
    url: String,
    output_dir: PathBuf,
    format: String,
    extra_args: Vec<String>,
}

impl FetchCommand {
    pub fn new(url: impl Into<String>, output_dir: impl AsRef<Path>) -> Self {
        Self {
            url: url.into(),
            output_dir: output_dir.as_ref().to_path_buf(),
            format: FETCH_FORMAT.to_string(),
            extra_args: Vec::new(),
        }
    }

    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    /// Extra flags placed before the URL (cookies, proxies).
    pub fn extra_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn build_args(&self) -> Vec<String> {
        let template = self.output_dir.join(FETCH_OUTPUT_TEMPLATE);
        let mut args = vec![
            "--format".to_string(),
            self.format.clone(),
            "-o".to_string(),
            template.to_string_lossy().to_string(),
            "--restrict-filenames".to_string(),
            "--no-playlist".to_string(),
        ];
        args.extend(self.extra_args.iter().cloned());
        args.push(self.url.clone());
        args
    }

    pub fn invocation(&self, program: impl Into<String>, timeout: Duration) -> ToolInvocation {
        ToolInvocation::new(program, self.build_args(), timeout)
    }
}

/// The single media file a fetch left in `dir`.
pub async fn locate_fetched(dir: &Path) -> MediaResult<PathBuf> {
    let mut entries = fs::read_dir(dir).await?;
    let mut found = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') || PARTIAL_SUFFIXES.iter().any(|s| name.ends_with(s)) {
            debug!("Ignoring fetch leftover {}", name);
            continue;
        }
        if entry.file_type().await?.is_file() {
            found.push(entry.path());
        }
    }

    match found.len() {
        1 => Ok(found.remove(0)),
        0 => Err(MediaError::unexpected_output("fetch produced no media file")),
        n => {
            found.sort();
            Err(MediaError::unexpected_output(format!(
                "fetch produced {} files: {}",
                n,
                found
                    .iter()
                    .filter_map(|p| p.file_name())
                    .map(|n| n.to_string_lossy())
                    .collect::<Vec<_>>()
                    .join(", ")
            )))
        }
    }
}
