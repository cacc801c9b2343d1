//! Stream-copy concatenation via the concat demuxer.

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::command::FfmpegCommand;
use crate::error::MediaResult;

/// Playlist filename inside a concatenation scratch dir.
pub const PLAYLIST_FILE: &str = "playlist.txt";

fn quote(path: &Path) -> String {
    format!("'{}'", path.to_string_lossy().replace('\'', r"'\''"))
}

/// Write `file '<path>'` lines in the given order. Returns the playlist path.
pub async fn write_playlist(dir: &Path, files: &[PathBuf]) -> MediaResult<PathBuf> {
    let mut body = String::new();
    for file in files {
        body.push_str("file ");
        body.push_str(&quote(file));
        body.push('\n');
    }

    let playlist = dir.join(PLAYLIST_FILE);
    fs::write(&playlist, body).await?;
    Ok(playlist)
}

/// `ffmpeg -f concat -safe 0 -i <playlist> -c copy <output>`
pub fn concat_command(playlist: &Path, output: &Path) -> FfmpegCommand {
    FfmpegCommand::new(playlist, output)
        .input_format("concat")
        .input_args(["-safe", "0"])
        .stream_copy()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_playlist_order_and_quoting() {
        let dir = TempDir::new().unwrap();
        let files = vec![
            dir.path().join("0-b.mp4"),
            dir.path().join("1-it's.mp4"),
            dir.path().join("2-a.mp4"),
        ];

        let playlist = write_playlist(dir.path(), &files).await.unwrap();
        let body = fs::read_to_string(&playlist).await.unwrap();
        let lines: Vec<_> = body.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with("0-b.mp4'"));
        assert!(lines[1].ends_with(r"1-it'\''s.mp4'"));
        assert!(lines[2].starts_with("file '"));
    }

    #[test]
    fn test_concat_args() {
        let args = concat_command(Path::new("/s/playlist.txt"), Path::new("/s/out.mp4")).build_args();
        assert_eq!(
            args,
            vec!["-y", "-v", "error", "-f", "concat", "-safe", "0", "-i", "/s/playlist.txt", "-c", "copy", "/s/out.mp4"]
        );
    }
}
