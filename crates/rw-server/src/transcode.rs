//! Transcode manager.
//!
//! Two delivery paths share one ffmpeg toolchain:
//!
//! - **Remux**: a single fragmented-MP4 stream piped straight to the client.
//!   The child dies with the response body.
//! - **HLS**: a fixed playlist planned from the probed duration, with
//!   segments produced by one background job per (input, audio stream).
//!   Requests far from the job's frontier restart it at the requested
//!   index; a segment that does not appear in time is rendered on its own.
//!
//! A job that fails while hardware encoding is demoted to software once and
//! keeps running from its frontier.

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use axum::body::Bytes;
use dashmap::DashMap;
use futures::Stream;
use parking_lot::RwLock;
use rw_av::{
    estimate_auto_offset_ms, segment_file_name, AudioSync, HlsJobArgs, HlsPlan, HwAccelMode, HwCapabilities,
    ManagedProcess, MediaProbe, MediaProber, RemuxArgs, SegmentArgs, StdoutMode, ToolCommand, ToolRegistry,
};
use rw_core::config::TranscodeConfig;
use rw_core::{Error, Result};
use serde::Serialize;
use tokio::process::ChildStdout;
use tokio::sync::Mutex;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use crate::cache::{digest_name, probe_key, CacheStore};
use crate::resolve::SingleFlight;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Segments a request may run ahead of the job before the job is restarted
/// at the requested index.
const LOOKAHEAD_SEGMENTS: u32 = 3;

const SINGLE_SEGMENT_TIMEOUT: Duration = Duration::from_secs(120);

// ---------------------------------------------------------------------------
// Job state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Running,
    Finished,
    Failed,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEvent {
    Started,
    Exited { success: bool },
    Stopped,
}

impl JobState {
    pub fn next(self, event: JobEvent) -> JobState {
        match (self, event) {
            (_, JobEvent::Started) => JobState::Running,
            (_, JobEvent::Stopped) => JobState::Stopped,
            (JobState::Running, JobEvent::Exited { success: true }) => JobState::Finished,
            (JobState::Running, JobEvent::Exited { success: false }) => JobState::Failed,
            (state, JobEvent::Exited { .. }) => state,
        }
    }

    pub fn is_terminal(self) -> bool {
        self != JobState::Running
    }
}

/// (input, audio stream)
pub type JobKey = (String, Option<u32>);

struct TranscodeJob {
    input: String,
    audio_index: Option<u32>,
    dir: PathBuf,
    plan: HlsPlan,
    mode: HwAccelMode,
    demoted: bool,
    state: JobState,
    start_index: u32,
    process: Option<ManagedProcess>,
    last_access: Instant,
}

impl TranscodeJob {
    fn segment_path(&self, index: u32) -> PathBuf {
        self.dir.join(segment_file_name(index))
    }

    /// First index at or after the job start with no file on disk.
    fn frontier(&self) -> u32 {
        let mut index = self.start_index;
        while self.plan.contains(index) && self.segment_path(index).exists() {
            index += 1;
        }
        index
    }

    /// A segment is complete once the muxer has moved on to the next file,
    /// or the job exited cleanly.
    fn is_ready(&self, index: u32) -> bool {
        if !self.segment_path(index).exists() {
            return false;
        }
        let last = index + 1 >= self.plan.segment_count();
        self.segment_path(index + 1).exists() || self.state == JobState::Finished || (last && self.state.is_terminal())
    }

    /// Observe a child exit. Returns `Some(success)` the first time the exit
    /// is seen.
    fn poll_exit(&mut self) -> Option<bool> {
        if self.state != JobState::Running {
            return None;
        }
        let status = self.process.as_mut()?.try_status()?;
        let success = status.success();
        self.state = self.state.next(JobEvent::Exited { success });
        Some(success)
    }
}

// ---------------------------------------------------------------------------
// Remux streaming
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct RemuxInfo {
    input: String,
    pid: Option<u32>,
    started: Instant,
}

#[derive(Debug, Clone, Default)]
pub struct RemuxRequest {
    pub input: String,
    pub start_secs: Option<f64>,
    pub audio_index: Option<u32>,
    pub subtitle_index: Option<u32>,
    pub manual_sync_ms: i64,
}

/// Body stream of one remux. Dropping it (client gone) kills ffmpeg.
pub struct RemuxStream {
    id: u64,
    registry: Arc<DashMap<u64, RemuxInfo>>,
    stdout: ReaderStream<ChildStdout>,
    _process: ManagedProcess,
    pub sync: AudioSync,
}

impl Stream for RemuxStream {
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().stdout).poll_next(cx)
    }
}

impl Drop for RemuxStream {
    fn drop(&mut self) {
        if let Some((_, info)) = self.registry.remove(&self.id) {
            debug!(
                remux = self.id,
                input = %info.input,
                secs = info.started.elapsed().as_secs(),
                "Remux stream closed"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Debug snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub input: String,
    pub audio_index: Option<u32>,
    pub mode: HwAccelMode,
    pub state: JobState,
    pub start_index: u32,
    pub frontier: u32,
    pub segment_count: u32,
    pub idle_secs: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemuxSummary {
    pub id: u64,
    pub input: String,
    pub pid: Option<u32>,
    pub age_secs: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscodeSnapshot {
    pub mode: HwAccelMode,
    pub capabilities: HwCapabilities,
    pub jobs: Vec<JobSummary>,
    /// Jobs busy with a request while the snapshot was taken.
    pub busy_jobs: usize,
    pub remuxes: Vec<RemuxSummary>,
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

struct CapabilityState {
    caps: HwCapabilities,
    refreshed_at: Option<Instant>,
}

pub struct TranscodeManager {
    tools: Arc<ToolRegistry>,
    prober: Arc<dyn MediaProber>,
    cache: Arc<CacheStore>,
    config: TranscodeConfig,
    work_dir: PathBuf,
    capabilities: RwLock<CapabilityState>,
    jobs: DashMap<JobKey, Arc<Mutex<TranscodeJob>>>,
    probes: SingleFlight<MediaProbe>,
    remuxes: Arc<DashMap<u64, RemuxInfo>>,
    next_remux: AtomicU64,
}

impl TranscodeManager {
    /// Create the manager and wipe leftovers from a previous run under
    /// `cache_dir/hls`.
    pub fn new(
        tools: Arc<ToolRegistry>,
        prober: Arc<dyn MediaProber>,
        cache: Arc<CacheStore>,
        config: TranscodeConfig,
        cache_dir: &Path,
    ) -> Result<Self> {
        let work_dir = cache_dir.join("hls");
        if work_dir.exists() {
            std::fs::remove_dir_all(&work_dir)?;
        }
        std::fs::create_dir_all(&work_dir)?;

        Ok(Self {
            tools,
            prober,
            cache,
            config,
            work_dir,
            capabilities: RwLock::new(CapabilityState {
                caps: HwCapabilities::default(),
                refreshed_at: None,
            }),
            jobs: DashMap::new(),
            probes: SingleFlight::new(),
            remuxes: Arc::new(DashMap::new()),
            next_remux: AtomicU64::new(1),
        })
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn segment_secs(&self) -> u32 {
        self.config.effective_segment_duration()
    }

    // -- capabilities -------------------------------------------------------

    /// Mode new jobs start in.
    pub fn current_mode(&self) -> HwAccelMode {
        self.capabilities.read().caps.resolve(&self.config.hw_accel)
    }

    pub fn set_capabilities(&self, caps: HwCapabilities) {
        let mut state = self.capabilities.write();
        state.caps = caps;
        state.refreshed_at = Some(Instant::now());
    }

    /// Re-detect hardware encoders when the last detection is older than
    /// the refresh interval. Detection failures leave software-only.
    pub async fn refresh_capabilities(&self, force: bool) {
        let interval = Duration::from_secs(self.config.capability_refresh_secs);
        let due = match self.capabilities.read().refreshed_at {
            Some(at) => force || at.elapsed() >= interval,
            None => true,
        };
        if !due || self.config.hw_accel.trim().eq_ignore_ascii_case("none") {
            return;
        }
        if !self.tools.is_available("ffmpeg") {
            return;
        }
        match rw_av::hwaccel::probe_capabilities(&self.tools).await {
            Ok(caps) => {
                info!(
                    encoders = ?caps.available,
                    mode = %caps.resolve(&self.config.hw_accel),
                    "Detected hardware encoders"
                );
                self.set_capabilities(caps);
            }
            Err(e) => {
                warn!(error = %e, "Hardware encoder detection failed; using software");
                self.set_capabilities(HwCapabilities::default());
            }
        }
    }

    // -- probing ------------------------------------------------------------

    /// Probe `input`, through the probe cache, coalescing concurrent calls.
    pub async fn probe(&self, input: &str) -> Result<MediaProbe> {
        let key = probe_key(None, None, input);
        if let Some(probe) = self.cache.get_probe(&key) {
            return Ok(probe);
        }
        let prober = Arc::clone(&self.prober);
        let cache = Arc::clone(&self.cache);
        let owned_input = input.to_string();
        self.probes
            .run(&key, move || async move {
                let probe = prober.probe(&owned_input).await?;
                cache.put_probe(&probe_key(None, None, &owned_input), &probe);
                Ok(probe)
            })
            .await
    }

    async fn plan_for(&self, input: &str) -> Result<HlsPlan> {
        let probe = self.probe(input).await?;
        let duration = probe
            .duration_secs
            .ok_or_else(|| Error::Probe(format!("no duration reported for {input}")))?;
        HlsPlan::new(duration, self.segment_secs())
    }

    // -- HLS ----------------------------------------------------------------

    /// Full VOD playlist for `input`. Segment URIs are relative to the
    /// playlist location.
    pub async fn playlist(&self, input: &str, audio_index: Option<u32>) -> Result<String> {
        let plan = self.plan_for(input).await?;
        let encoded = urlencoding::encode(input).into_owned();
        let audio = audio_index.map(|i| format!("&audioStream={i}")).unwrap_or_default();
        let body = plan.playlist(|index| format!("segment.ts?input={encoded}&index={index}{audio}"));

        // Warm the job so the first segments are underway before the player
        // asks for them.
        if self.tools.is_available("ffmpeg") {
            let job = self.job_for(input, audio_index, plan);
            let mut job = job.lock().await;
            job.last_access = Instant::now();
            if job.process.is_none() {
                self.spawn_job(&mut job, 0).await?;
            }
        }
        Ok(body)
    }

    /// Path of a completed segment file.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an index outside the playlist;
    /// [`Error::Tool`] when ffmpeg is missing or rendering fails.
    pub async fn segment(&self, input: &str, audio_index: Option<u32>, index: u32) -> Result<PathBuf> {
        let plan = self.plan_for(input).await?;
        if !plan.contains(index) {
            return Err(Error::not_found("segment", index));
        }
        self.tools.require("ffmpeg")?;

        let job = self.job_for(input, audio_index, plan);
        let deadline = Instant::now() + Duration::from_secs(self.config.segment_wait_secs);
        loop {
            {
                let mut job = job.lock().await;
                job.last_access = Instant::now();
                self.observe_exit(&mut job).await?;

                if job.is_ready(index) {
                    return Ok(job.segment_path(index));
                }
                if job.state == JobState::Failed {
                    break;
                }
                let frontier = job.frontier();
                let restart = job.process.is_none()
                    || job.state.is_terminal()
                    || index < job.start_index
                    || index > frontier + LOOKAHEAD_SEGMENTS;
                if restart {
                    debug!(input, index, start = job.start_index, frontier, "Restarting HLS job at requested segment");
                    self.spawn_job(&mut job, index).await?;
                }
            }
            if Instant::now() >= deadline {
                debug!(input, index, "Segment not produced in time; rendering it directly");
                break;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        self.render_segment(&job, index).await
    }

    fn job_for(&self, input: &str, audio_index: Option<u32>, plan: HlsPlan) -> Arc<Mutex<TranscodeJob>> {
        let key: JobKey = (input.to_string(), audio_index);
        let audio = audio_index.map(|i| i.to_string()).unwrap_or_default();
        let dir = self.work_dir.join(digest_name(&[input, &audio], ""));
        let mode = self.current_mode();
        self.jobs
            .entry(key)
            .or_insert_with(|| {
                Arc::new(Mutex::new(TranscodeJob {
                    input: input.to_string(),
                    audio_index,
                    dir,
                    plan,
                    mode,
                    demoted: false,
                    state: JobState::Stopped,
                    start_index: 0,
                    process: None,
                    last_access: Instant::now(),
                }))
            })
            .clone()
    }

    async fn spawn_job(&self, job: &mut TranscodeJob, start_index: u32) -> Result<()> {
        if let Some(mut old) = job.process.take() {
            old.kill().await;
        }
        tokio::fs::create_dir_all(&job.dir).await?;
        let ffmpeg = self.tools.require("ffmpeg")?.path.clone();
        let args = HlsJobArgs {
            input: &job.input,
            audio_index: job.audio_index,
            mode: job.mode,
            segment_secs: self.segment_secs(),
            start_index,
            output_dir: &job.dir,
            audio_bitrate: &self.config.audio_bitrate,
        }
        .build();
        let process = ManagedProcess::spawn(&ffmpeg, &args, StdoutMode::Null)?;
        info!(
            input = %job.input,
            audio = ?job.audio_index,
            mode = %job.mode,
            start_index,
            pid = ?process.id(),
            "Started HLS job"
        );
        job.process = Some(process);
        job.start_index = start_index;
        job.state = job.state.next(JobEvent::Started);
        Ok(())
    }

    /// Fold a child exit into the job state. A hardware failure demotes the
    /// job to software and resumes at its frontier.
    async fn observe_exit(&self, job: &mut TranscodeJob) -> Result<()> {
        let Some(success) = job.poll_exit() else {
            return Ok(());
        };
        if success {
            debug!(input = %job.input, "HLS job finished");
            return Ok(());
        }

        let stderr = job.process.as_ref().map(|p| p.stderr_tail()).unwrap_or_default();
        if job.mode.is_hardware() && !job.demoted {
            warn!(
                input = %job.input,
                mode = %job.mode,
                stderr = %stderr,
                "Hardware transcode failed; falling back to software"
            );
            job.mode = HwAccelMode::Software;
            job.demoted = true;
            let frontier = job.frontier();
            return self.spawn_job(job, frontier).await;
        }
        warn!(input = %job.input, mode = %job.mode, stderr = %stderr, "HLS job failed");
        Ok(())
    }

    async fn render_segment(&self, job: &Mutex<TranscodeJob>, index: u32) -> Result<PathBuf> {
        let (input, audio_index, mode, output, bounds) = {
            let job = job.lock().await;
            (
                job.input.clone(),
                job.audio_index,
                job.mode,
                job.segment_path(index),
                job.plan.segment_bounds(index),
            )
        };
        let (start, len) = bounds.ok_or_else(|| Error::not_found("segment", index))?;
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let part = output.with_extension("ts.part");

        let render = |mode: HwAccelMode| {
            SegmentArgs {
                input: &input,
                audio_index,
                mode,
                start_secs: start,
                duration_secs: len,
                segment_secs: self.segment_secs(),
                output: &part,
                audio_bitrate: &self.config.audio_bitrate,
            }
            .build()
        };

        match self.run_ffmpeg(render(mode)).await {
            Ok(()) => {}
            Err(e) if mode.is_hardware() && e.is_hw_related() => {
                warn!(input = %input, index, %mode, error = %e, "Hardware segment render failed; retrying in software");
                {
                    let mut job = job.lock().await;
                    job.mode = HwAccelMode::Software;
                    job.demoted = true;
                }
                self.run_ffmpeg(render(HwAccelMode::Software)).await?;
            }
            Err(e) => return Err(e),
        }

        tokio::fs::rename(&part, &output).await?;
        Ok(output)
    }

    async fn run_ffmpeg(&self, args: Vec<String>) -> Result<()> {
        let ffmpeg = self.tools.require("ffmpeg")?;
        ToolCommand::new(&ffmpeg.path, SINGLE_SEGMENT_TIMEOUT)
            .with_args(args)
            .run()
            .await?;
        Ok(())
    }

    // -- remux --------------------------------------------------------------

    /// Start a remux and hand back its body stream.
    pub async fn remux(&self, req: RemuxRequest) -> Result<RemuxStream> {
        let ffmpeg = self.tools.require("ffmpeg")?.path.clone();

        let auto_ms = if self.config.auto_audio_sync {
            match self.probe(&req.input).await {
                Ok(probe) => estimate_auto_offset_ms(&probe, req.audio_index, true, self.config.max_auto_sync_ms),
                Err(e) => {
                    debug!(input = %req.input, error = %e, "Probe failed; remuxing without auto sync");
                    0
                }
            }
        } else {
            0
        };
        let sync = AudioSync::new(req.manual_sync_ms, auto_ms);
        let filter = sync.filter();

        let args = RemuxArgs {
            input: &req.input,
            start_secs: req.start_secs,
            audio_index: req.audio_index,
            subtitle_index: req.subtitle_index,
            audio_filter: filter.as_deref(),
            audio_bitrate: &self.config.audio_bitrate,
        }
        .build();

        let mut process = ManagedProcess::spawn(&ffmpeg, &args, StdoutMode::Piped)?;
        let stdout = process
            .take_stdout()
            .ok_or_else(|| Error::Internal("remux stdout was not captured".into()))?;

        let id = self.next_remux.fetch_add(1, Ordering::Relaxed);
        self.remuxes.insert(
            id,
            RemuxInfo {
                input: req.input.clone(),
                pid: process.id(),
                started: Instant::now(),
            },
        );
        info!(
            remux = id,
            input = %req.input,
            start = ?req.start_secs,
            audio = ?req.audio_index,
            sync_ms = sync.total_ms(),
            "Started remux"
        );

        Ok(RemuxStream {
            id,
            registry: Arc::clone(&self.remuxes),
            stdout: ReaderStream::with_capacity(stdout, 64 * 1024),
            _process: process,
            sync,
        })
    }

    pub fn active_remuxes(&self) -> usize {
        self.remuxes.len()
    }

    // -- housekeeping -------------------------------------------------------

    /// Kill idle jobs and drop terminal jobs past their grace period,
    /// removing their segment directories. Jobs busy with a request are
    /// skipped. Returns the number of jobs removed.
    pub async fn reap(&self) -> usize {
        let idle = Duration::from_secs(self.config.idle_timeout_secs);
        let grace = Duration::from_secs(self.config.finished_grace_secs);
        let jobs: Vec<(JobKey, Arc<Mutex<TranscodeJob>>)> =
            self.jobs.iter().map(|e| (e.key().clone(), Arc::clone(e.value()))).collect();

        let mut removed = 0;
        for (key, job) in jobs {
            let Ok(mut guard) = job.try_lock() else {
                continue;
            };
            guard.poll_exit();
            let limit = if guard.state.is_terminal() { grace } else { idle };
            if guard.last_access.elapsed() < limit {
                continue;
            }
            if let Some(mut process) = guard.process.take() {
                process.kill().await;
            }
            guard.state = guard.state.next(JobEvent::Stopped);
            if let Err(e) = tokio::fs::remove_dir_all(&guard.dir).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(dir = %guard.dir.display(), error = %e, "Failed to remove HLS job directory");
                }
            }
            info!(input = %guard.input, audio = ?guard.audio_index, "Reaped HLS job");
            drop(guard);
            self.jobs.remove(&key);
            removed += 1;
        }
        removed
    }

    /// Stop every job; used at shutdown.
    pub async fn stop_all(&self) {
        let jobs: Vec<Arc<Mutex<TranscodeJob>>> = self.jobs.iter().map(|e| Arc::clone(e.value())).collect();
        for job in jobs {
            let mut job = job.lock().await;
            if let Some(mut process) = job.process.take() {
                process.kill().await;
            }
            job.state = job.state.next(JobEvent::Stopped);
        }
        self.jobs.clear();
    }

    pub fn snapshot(&self) -> TranscodeSnapshot {
        let caps = self.capabilities.read().caps.clone();
        let mut jobs = Vec::new();
        let mut busy_jobs = 0;
        for entry in self.jobs.iter() {
            match entry.value().try_lock() {
                Ok(job) => jobs.push(JobSummary {
                    input: job.input.clone(),
                    audio_index: job.audio_index,
                    mode: job.mode,
                    state: job.state,
                    start_index: job.start_index,
                    frontier: job.frontier(),
                    segment_count: job.plan.segment_count(),
                    idle_secs: job.last_access.elapsed().as_secs(),
                }),
                Err(_) => busy_jobs += 1,
            }
        }
        let remuxes = self
            .remuxes
            .iter()
            .map(|e| RemuxSummary {
                id: *e.key(),
                input: e.value().input.clone(),
                pid: e.value().pid,
                age_secs: e.value().started.elapsed().as_secs(),
            })
            .collect();

        TranscodeSnapshot {
            mode: caps.resolve(&self.config.hw_accel),
            capabilities: caps,
            jobs,
            busy_jobs,
            remuxes,
        }
    }
}
