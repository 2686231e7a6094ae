use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;

use super::{
    ChannelLister, ChannelProbe, MediaProcessor, MediaRequest, PipelineError, ProcessedMedia,
    RemoteVideo,
};
use crate::storage::{MediaFormat, Quality};

/// Extensions recognised as finished media output.
const MEDIA_EXTENSIONS: [&str; 8] = ["mp4", "m4a", "mp3", "webm", "mkv", "avi", "opus", "ogg"];
const THUMBNAIL_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];
const MAX_ERROR_CHARS: usize = 500;

/// `yt-dlp` subprocess adapter.
///
/// Every invocation is bounded by `timeout`; the child is killed when the
/// budget runs out.
#[derive(Debug, Clone)]
pub struct YtDlp {
    program: PathBuf,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct VideoInfo {
    id: String,
    title: Option<String>,
    timestamp: Option<i64>,
    release_timestamp: Option<i64>,
    /// YYYYMMDD
    upload_date: Option<String>,
    duration: Option<f64>,
    description: Option<String>,
    webpage_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeInfo {
    title: Option<String>,
    channel: Option<String>,
    playlist_count: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Listing,
    Download,
}

impl YtDlp {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    async fn run(&self, args: &[String]) -> Result<Output, PipelineError> {
        tracing::debug!(program = %self.program.display(), args = ?args, "Running yt-dlp");
        let child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                PipelineError::Unreachable(format!(
                    "failed to start {}: {e}",
                    self.program.display()
                ))
            })?;

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(PipelineError::Unreachable(format!(
                "failed to wait for {}: {e}",
                self.program.display()
            ))),
            Err(_) => {
                tracing::warn!(timeout = ?self.timeout, "yt-dlp exceeded its time budget, killed");
                Err(PipelineError::Timeout(self.timeout))
            }
        }
    }
}

/// Format selector passed to `-f`.
fn format_selector(format: MediaFormat, quality: Quality) -> &'static str {
    match (format, quality) {
        (MediaFormat::Audio, _) => "bestaudio[ext=m4a]/bestaudio",
        (MediaFormat::Video, Quality::Low) => "best[height<=480][ext=mp4]/best[ext=mp4]/best",
        (MediaFormat::Video, Quality::Max) => "best[ext=mp4]/best",
    }
}

fn listing_args(url: &str, limit: u32) -> Vec<String> {
    vec![
        "--dump-json".into(),
        "--skip-download".into(),
        "--ignore-errors".into(),
        "--no-warnings".into(),
        "--playlist-items".into(),
        format!("1:{}", limit.max(1)),
        url.into(),
    ]
}

fn probe_args(url: &str) -> Vec<String> {
    vec![
        "--flat-playlist".into(),
        "--dump-single-json".into(),
        "--no-warnings".into(),
        "--playlist-items".into(),
        "1".into(),
        url.into(),
    ]
}

fn download_args(request: &MediaRequest) -> Vec<String> {
    let dest = request.dest_dir.display();
    let mut args = vec![
        "-f".into(),
        format_selector(request.format, request.quality).into(),
        "--no-playlist".into(),
        "--no-progress".into(),
        "-o".into(),
        format!("{dest}/{}.%(ext)s", request.external_id),
        "--write-thumbnail".into(),
        "--convert-thumbnails".into(),
        "jpg".into(),
        "-o".into(),
        format!("thumbnail:{dest}/thumbnails/{}.%(ext)s", request.external_id),
    ];
    if !request.segment_categories.is_empty() {
        let categories: Vec<&str> = request
            .segment_categories
            .iter()
            .map(|c| c.as_str())
            .collect();
        args.push("--sponsorblock-remove".into());
        args.push(categories.join(","));
    }
    args.push(request.source_url.clone());
    args
}

/// Last `ERROR:` line of stderr, or its last non-empty line.
fn error_summary(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    let line = lines
        .iter()
        .rev()
        .find(|l| l.starts_with("ERROR:"))
        .or(lines.last())
        .copied()
        .unwrap_or("no error output");
    line.chars().take(MAX_ERROR_CHARS).collect()
}

fn classify(stderr: &str, stage: Stage) -> PipelineError {
    let summary = error_summary(stderr);
    let lower = stderr.to_lowercase();

    let missing = [
        "private video",
        "video unavailable",
        "does not exist",
        "not found",
        "http error 404",
        "this channel is not available",
        "members-only",
    ];
    if missing.iter().any(|m| lower.contains(m)) {
        return PipelineError::NotFound(summary);
    }
    if stage == Stage::Download
        && ["postprocessing", "ffmpeg", "sponsorblock"]
            .iter()
            .any(|m| lower.contains(m))
    {
        return PipelineError::Processing(summary);
    }
    match stage {
        Stage::Listing => PipelineError::Unreachable(summary),
        Stage::Download => PipelineError::Download(summary),
    }
}

fn published_at(info: &VideoInfo) -> Option<i64> {
    info.timestamp.or(info.release_timestamp).or_else(|| {
        let date = NaiveDate::parse_from_str(info.upload_date.as_deref()?, "%Y%m%d").ok()?;
        Some(date.and_hms_opt(0, 0, 0)?.and_utc().timestamp())
    })
}

/// Parse `--dump-json` output: one JSON object per line.
fn parse_listing(stdout: &str) -> Vec<RemoteVideo> {
    stdout
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<VideoInfo>(line) {
            Ok(info) => Some(info),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping unparseable listing entry");
                None
            }
        })
        .filter_map(|info| {
            let Some(published_at) = published_at(&info) else {
                tracing::warn!(id = %info.id, "Skipping listing entry without a publish date");
                return None;
            };
            Some(RemoteVideo {
                source_url: info
                    .webpage_url
                    .clone()
                    .unwrap_or_else(|| format!("https://www.youtube.com/watch?v={}", info.id)),
                title: info.title.unwrap_or_else(|| info.id.clone()),
                duration_seconds: info.duration.map(|d| d.round() as i64),
                description: info.description.unwrap_or_default(),
                external_id: info.id,
                published_at,
            })
        })
        .collect()
}

fn has_extension(path: &Path, allowed: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| allowed.contains(&e.to_ascii_lowercase().as_str()))
}

/// Find `{id}.{ext}` in `dir` among the allowed extensions.
async fn find_output(dir: &Path, id: &str, allowed: &[&str]) -> std::io::Result<Option<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let mut found = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.file_stem().and_then(|s| s.to_str()) == Some(id) && has_extension(&path, allowed) {
            found.push(path);
        }
    }
    // Several candidates only happen after an interrupted remux; take a stable pick.
    found.sort();
    Ok(found.into_iter().next())
}

#[async_trait]
impl ChannelLister for YtDlp {
    async fn list_videos(&self, url: &str, limit: u32) -> Result<Vec<RemoteVideo>, PipelineError> {
        let output = self.run(&listing_args(url, limit)).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let videos = parse_listing(&stdout);

        // --ignore-errors exits non-zero when single entries fail; keep what listed.
        if !output.status.success() && videos.is_empty() {
            return Err(classify(&String::from_utf8_lossy(&output.stderr), Stage::Listing));
        }
        Ok(videos)
    }

    async fn probe(&self, url: &str) -> Result<ChannelProbe, PipelineError> {
        let output = self.run(&probe_args(url)).await?;
        if !output.status.success() {
            return Err(classify(&String::from_utf8_lossy(&output.stderr), Stage::Listing));
        }
        let info: ProbeInfo = serde_json::from_slice(&output.stdout)
            .map_err(|e| PipelineError::Unreachable(format!("unexpected probe output: {e}")))?;
        Ok(ChannelProbe {
            title: info.channel.or(info.title),
            video_count: info.playlist_count,
        })
    }
}

#[async_trait]
impl MediaProcessor for YtDlp {
    async fn process(&self, request: &MediaRequest) -> Result<ProcessedMedia, PipelineError> {
        let thumbnails = request.dest_dir.join("thumbnails");
        tokio::fs::create_dir_all(&thumbnails)
            .await
            .map_err(|e| PipelineError::Download(format!("cannot create media directory: {e}")))?;

        let output = self.run(&download_args(request)).await?;
        if !output.status.success() {
            return Err(classify(&String::from_utf8_lossy(&output.stderr), Stage::Download));
        }

        let io_err = |e: std::io::Error| PipelineError::Processing(format!("reading output: {e}"));
        let local_path = find_output(&request.dest_dir, &request.external_id, &MEDIA_EXTENSIONS)
            .await
            .map_err(io_err)?
            .ok_or_else(|| {
                PipelineError::Processing(format!(
                    "yt-dlp succeeded but no media file for {} was found",
                    request.external_id
                ))
            })?;
        let file_size = tokio::fs::metadata(&local_path).await.map_err(io_err)?.len();
        let thumbnail_path = find_output(&thumbnails, &request.external_id, &THUMBNAIL_EXTENSIONS)
            .await
            .map_err(io_err)?;

        let extension = local_path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("mp4")
            .to_ascii_lowercase();

        Ok(ProcessedMedia {
            local_path,
            extension,
            file_size,
            thumbnail_path,
        })
    }
}
