//! yt-dlp + ffmpeg collaborators.
//!
//! yt-dlp resolves a video id to a direct stream URL of one of the Opus
//! formats, ffmpeg remuxes it to Ogg on stdout without re-encoding, and the
//! Ogg reader hands the Opus packets on as frames.

use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use tokio::process::{Child, Command};

use super::{CancelHandle, ResolvedStream, Resolver, Track, TrackSearch};
use crate::audio::OggOpusSource;
use crate::config::Config;

/// Opus-in-WebM formats, best first (itags 251, 250, 249).
const OPUS_FORMATS: &str = "251/250/249";

pub struct YtDlpResolver {
    ytdlp: String,
    ffmpeg: String,
}

impl YtDlpResolver {
    pub fn new(config: &Config) -> Self {
        Self {
            ytdlp: config.ytdlp_path.to_string(),
            ffmpeg: config.ffmpeg_path.to_string(),
        }
    }

    async fn stream_url(&self, id: &str) -> Result<String> {
        let output = Command::new(&self.ytdlp)
            .args(["-f", OPUS_FORMATS, "-g", "--", id])
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("running {}", self.ytdlp))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("getting stream URL for {}: {}", id, stderr.trim());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("no suitable format found for {}", id))
    }
}

#[async_trait]
impl Resolver for YtDlpResolver {
    async fn resolve(&self, track: &Track) -> Result<ResolvedStream> {
        let url = self.stream_url(&track.id).await?;

        let mut child = Command::new(&self.ffmpeg)
            .args(["-loglevel", "error", "-i", url.as_str(), "-c:a", "copy", "-vn", "-f", "ogg", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawning {}", self.ffmpeg))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("ffmpeg stdout not captured"))?;

        log::debug!("ffmpeg streaming {} ({})", track.title, track.id);

        let child: Arc<Mutex<Child>> = Arc::new(Mutex::new(child));
        let cancel = CancelHandle::new(move || {
            let mut child = child.lock().unwrap_or_else(PoisonError::into_inner);
            // 进程可能已经退出，忽略错误
            if let Err(e) = child.start_kill() {
                log::debug!("ffmpeg already gone: {}", e);
            }
        });

        Ok(ResolvedStream {
            source: Box::new(OggOpusSource::new(stdout)),
            cancel,
        })
    }
}

pub struct YtDlpSearch {
    ytdlp: String,
}

impl YtDlpSearch {
    pub fn new(config: &Config) -> Self {
        Self {
            ytdlp: config.ytdlp_path.to_string(),
        }
    }
}

#[async_trait]
impl TrackSearch for YtDlpSearch {
    async fn search(&self, query: &str) -> Result<Vec<Track>> {
        let target = format!("ytsearch1:{}", query);
        let output = Command::new(&self.ytdlp)
            .args(["--flat-playlist", "--print", "%(id)s\t%(title)s", target.as_str()])
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("running {}", self.ytdlp))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("searching for {:?}: {}", query, stderr.trim());
        }

        Ok(parse_search_output(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Parses `id<TAB>title` lines; lines without a tab are skipped.
fn parse_search_output(stdout: &str) -> Vec<Track> {
    stdout
        .lines()
        .filter_map(|line| {
            let (id, title) = line.split_once('\t')?;
            let id = id.trim();
            if id.is_empty() {
                return None;
            }
            Some(Track::new(title.trim(), id))
        })
        .collect()
}
