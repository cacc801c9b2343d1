//! Test doubles shared by the pipeline integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use reel_media::{MediaError, MediaResult, ToolInvocation, ToolOutput, ToolRunner};
use reel_models::{ObjectCreated, StageName};
use reel_publish::{PublishError, PublishMetadata, PublishReceipt, PublishResult, Publisher};
use reel_queue::{EventSink, QueueError, QueueResult};
use reel_storage::{
    MemoryStore, ObjectInfo, ObjectStore, StageStores, StorageError, StorageLayout, StorageResult,
};
use reel_worker::{GateConfig, PipelineConfig, PipelineContext};
use tempfile::TempDir;

pub const ARCHIVE_BUCKET: &str = "reel-archive";

// ---------------------------------------------------------------------------
// Tools

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    Fetch,
    Transcode,
    Concat,
}

fn kind_of(invocation: &ToolInvocation) -> ToolKind {
    if invocation.tool_name().contains("yt-dlp") {
        ToolKind::Fetch
    } else if invocation.args.iter().any(|a| a == "concat") {
        ToolKind::Concat
    } else {
        ToolKind::Transcode
    }
}

fn arg_after<'a>(args: &'a [String], flag: &str) -> &'a str {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
        .unwrap_or_default()
}

/// Deterministic stand-in for yt-dlp and ffmpeg.
///
/// Fetch writes `fake-<id>.mp4` where `<id>` is the URL's last segment,
/// transcode prefixes the input with `normalized:`, concat joins playlist
/// entries line by line. Failures are scripted per tool kind.
#[derive(Default)]
pub struct FakeToolRunner {
    calls: Mutex<Vec<(ToolKind, ToolInvocation)>>,
    failures: Mutex<HashMap<ToolKind, u32>>,
    delays: Mutex<HashMap<ToolKind, std::time::Duration>>,
}

impl FakeToolRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` runs of this kind.
    pub fn fail(&self, kind: ToolKind, times: u32) {
        self.failures.lock().unwrap().insert(kind, times);
    }

    /// Make every run of this kind take at least `delay`.
    pub fn delay(&self, kind: ToolKind, delay: std::time::Duration) {
        self.delays.lock().unwrap().insert(kind, delay);
    }

    pub fn calls(&self, kind: ToolKind) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == kind)
            .count()
    }

    pub fn last_call(&self, kind: ToolKind) -> Option<ToolInvocation> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(k, _)| *k == kind)
            .map(|(_, inv)| inv.clone())
    }

    fn take_failure(&self, kind: ToolKind) -> bool {
        let mut failures = self.failures.lock().unwrap();
        match failures.get_mut(&kind) {
            Some(n) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        }
    }
}

pub fn source_id(url: &str) -> &str {
    url.rsplit(['/', '=']).next().unwrap_or("video")
}

async fn fake_fetch(invocation: &ToolInvocation) -> MediaResult<()> {
    let url = invocation.args.last().cloned().unwrap_or_default();
    let path = arg_after(&invocation.args, "-o")
        .replace("%(extractor)s", "fake")
        .replace("%(id)s", source_id(&url))
        .replace("%(ext)s", "mp4");
    tokio::fs::write(&path, format!("source:{}", url)).await?;
    Ok(())
}

async fn fake_transcode(invocation: &ToolInvocation) -> MediaResult<()> {
    let input = arg_after(&invocation.args, "-i");
    let output = invocation.args.last().cloned().unwrap_or_default();
    let mut data = b"normalized:".to_vec();
    data.extend(tokio::fs::read(input).await?);
    tokio::fs::write(output, data).await?;
    Ok(())
}

/// Inverse of the playlist quoting: `file '<path>'` with `'\''` escapes.
pub fn playlist_entries(playlist: &str) -> Vec<PathBuf> {
    playlist
        .lines()
        .filter_map(|line| line.strip_prefix("file '"))
        .filter_map(|rest| rest.strip_suffix('\''))
        .map(|quoted| PathBuf::from(quoted.replace(r"'\''", "'")))
        .collect()
}

async fn fake_concat(invocation: &ToolInvocation) -> MediaResult<()> {
    let playlist = tokio::fs::read_to_string(arg_after(&invocation.args, "-i")).await?;
    let output = invocation.args.last().cloned().unwrap_or_default();
    let mut merged = Vec::new();
    for entry in playlist_entries(&playlist) {
        merged.extend(tokio::fs::read(&entry).await?);
        merged.push(b'\n');
    }
    tokio::fs::write(output, merged).await?;
    Ok(())
}

#[async_trait]
impl ToolRunner for FakeToolRunner {
    async fn run(&self, invocation: &ToolInvocation) -> MediaResult<ToolOutput> {
        let kind = kind_of(invocation);
        self.calls.lock().unwrap().push((kind, invocation.clone()));
        let delay = self.delays.lock().unwrap().get(&kind).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.take_failure(kind) {
            return Err(MediaError::tool_failed(
                invocation.tool_name(),
                invocation.args.clone(),
                format!("{:?} failed on purpose", kind),
                Some(1),
            ));
        }

        match kind {
            ToolKind::Fetch => fake_fetch(invocation).await?,
            ToolKind::Transcode => fake_transcode(invocation).await?,
            ToolKind::Concat => fake_concat(invocation).await?,
        }
        Ok(ToolOutput {
            exit_code: Some(0),
            ..Default::default()
        })
    }
}

// ---------------------------------------------------------------------------
// Store

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Put,
    Get,
    List,
    Delete,
}

#[derive(Debug, Clone)]
struct Fault {
    op: Op,
    bucket: String,
    key: Option<String>,
}

/// Memory store wrapper that fails chosen operations.
pub struct FlakyStore {
    inner: Arc<MemoryStore>,
    faults: Mutex<Vec<Fault>>,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            faults: Mutex::new(Vec::new()),
        }
    }

    /// Fail `op` on every key of `bucket` until healed.
    pub fn fail(&self, op: Op, bucket: &str) {
        self.faults.lock().unwrap().push(Fault {
            op,
            bucket: bucket.to_string(),
            key: None,
        });
    }

    pub fn fail_key(&self, op: Op, bucket: &str, key: &str) {
        self.faults.lock().unwrap().push(Fault {
            op,
            bucket: bucket.to_string(),
            key: Some(key.to_string()),
        });
    }

    pub fn heal(&self) {
        self.faults.lock().unwrap().clear();
    }

    fn check(&self, op: Op, bucket: &str, key: Option<&str>) -> StorageResult<()> {
        let faulted = self.faults.lock().unwrap().iter().any(|f| {
            f.op == op
                && f.bucket == bucket
                && (f.key.is_none() || f.key.as_deref() == key)
        });
        if !faulted {
            return Ok(());
        }
        let msg = format!("injected fault on {}/{}", bucket, key.unwrap_or("*"));
        Err(match op {
            Op::Put => StorageError::upload_failed(msg),
            Op::Get => StorageError::download_failed(msg),
            Op::List => StorageError::list_failed(msg),
            Op::Delete => StorageError::delete_failed(msg),
        })
    }
}

#[async_trait]
impl ObjectStore for FlakyStore {
    fn backend_name(&self) -> &'static str {
        "flaky"
    }

    async fn put(&self, bucket: &str, key: &str, data: Vec<u8>) -> StorageResult<()> {
        self.check(Op::Put, bucket, Some(key))?;
        self.inner.put(bucket, key, data).await
    }

    async fn put_if_absent(&self, bucket: &str, key: &str, data: Vec<u8>) -> StorageResult<bool> {
        self.check(Op::Put, bucket, Some(key))?;
        self.inner.put_if_absent(bucket, key, data).await
    }

    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Vec<u8>> {
        self.check(Op::Get, bucket, Some(key))?;
        self.inner.get(bucket, key).await
    }

    async fn head(&self, bucket: &str, key: &str) -> StorageResult<ObjectInfo> {
        self.check(Op::Get, bucket, Some(key))?;
        self.inner.head(bucket, key).await
    }

    async fn list(&self, bucket: &str) -> StorageResult<Vec<ObjectInfo>> {
        self.check(Op::List, bucket, None)?;
        self.inner.list(bucket).await
    }

    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()> {
        self.check(Op::Delete, bucket, Some(key))?;
        self.inner.delete(bucket, key).await
    }
}

// ---------------------------------------------------------------------------
// Triggers and publishing

/// Event sink that remembers every trigger.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ObjectCreated>>,
    failing: Mutex<bool>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<ObjectCreated> {
        self.events.lock().unwrap().clone()
    }

    /// Drain recorded events.
    pub fn take(&self) -> Vec<ObjectCreated> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }

    pub fn keys(&self, stage: StageName) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.stage == stage)
            .map(|e| e.key.clone())
            .collect()
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn object_created(&self, stage: StageName, key: &str) -> QueueResult<()> {
        if *self.failing.lock().unwrap() {
            return Err(QueueError::enqueue_failed("sink unavailable"));
        }
        self.events
            .lock()
            .unwrap()
            .push(ObjectCreated::new(stage, key));
        Ok(())
    }
}

/// Publisher that records uploads instead of sending them.
#[derive(Default)]
pub struct FakePublisher {
    uploads: Mutex<Vec<(String, Vec<u8>, PublishMetadata)>>,
    fail_status: Mutex<Option<u16>>,
}

impl FakePublisher {
    pub fn uploads(&self) -> Vec<(String, Vec<u8>, PublishMetadata)> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn fail_with(&self, status: Option<u16>) {
        *self.fail_status.lock().unwrap() = status;
    }
}

#[async_trait]
impl Publisher for FakePublisher {
    async fn publish(&self, path: &Path, metadata: &PublishMetadata) -> PublishResult<PublishReceipt> {
        let status = *self.fail_status.lock().unwrap();
        if let Some(status) = status {
            return Err(PublishError::RequestFailed {
                status,
                body: "rejected by fake".to_string(),
            });
        }

        let data = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let mut uploads = self.uploads.lock().unwrap();
        uploads.push((name, data, metadata.clone()));
        Ok(PublishReceipt {
            id: format!("video-{}", uploads.len()),
            published_at: Utc::now(),
        })
    }
}

// ---------------------------------------------------------------------------
// Harness

/// A pipeline over in-memory storage and fake collaborators.
pub struct Harness {
    pub memory: Arc<MemoryStore>,
    pub store: Arc<FlakyStore>,
    pub layout: StorageLayout,
    pub runner: Arc<FakeToolRunner>,
    pub sink: Arc<RecordingSink>,
    pub publisher: Arc<FakePublisher>,
    pub ctx: Arc<PipelineContext>,
    pub work_dir: TempDir,
}

impl Harness {
    pub fn new(min_batch_size: usize) -> Self {
        Self::with_gate(GateConfig::default().with_min_batch_size(min_batch_size))
    }

    pub fn with_gate(gate: GateConfig) -> Self {
        Self::build(gate, StorageLayout::default().with_archive(ARCHIVE_BUCKET), false)
    }

    pub fn build(gate: GateConfig, layout: StorageLayout, delete_after_publish: bool) -> Self {
        let memory = Arc::new(MemoryStore::new());
        let store = Arc::new(FlakyStore::new(memory.clone()));
        let runner = Arc::new(FakeToolRunner::new());
        let sink = Arc::new(RecordingSink::default());
        let publisher = Arc::new(FakePublisher::default());
        let work_dir = TempDir::new().unwrap();

        let mut config = PipelineConfig::default()
            .with_work_dir(work_dir.path())
            .with_gate(gate);
        config.publish.delete_after = delete_after_publish;
        config.publish.metadata.title = "Best of {date}: {name}".to_string();

        let stores = StageStores::new(store.clone(), layout.clone());
        let ctx = PipelineContext::new(stores, runner.clone(), sink.clone(), config)
            .with_publisher(publisher.clone())
            .with_instance_id("test-worker");

        Self {
            memory,
            store,
            layout,
            runner,
            sink,
            publisher,
            ctx: Arc::new(ctx),
            work_dir,
        }
    }

    /// A second worker sharing this harness's storage, as another process would.
    pub fn peer(&self, instance_id: &str) -> PipelineContext {
        let stores = StageStores::new(self.store.clone(), self.layout.clone());
        PipelineContext::new(
            stores,
            self.runner.clone(),
            self.sink.clone(),
            self.ctx.config.clone(),
        )
        .with_publisher(self.publisher.clone())
        .with_instance_id(instance_id)
    }

    pub fn bucket(&self, stage: StageName) -> &str {
        self.layout.bucket(stage).unwrap()
    }

    pub async fn keys(&self, stage: StageName) -> Vec<String> {
        self.memory.keys(self.bucket(stage)).await
    }

    pub async fn count(&self, stage: StageName) -> usize {
        self.memory.count(self.bucket(stage)).await
    }

    pub async fn read(&self, stage: StageName, key: &str) -> Vec<u8> {
        self.memory.get(self.bucket(stage), key).await.unwrap()
    }

    pub async fn control_keys(&self) -> Vec<String> {
        self.memory.keys(&self.layout.control).await
    }

    /// Place `n` normalized items `item-00.mp4`.. with increasing timestamps.
    pub async fn seed_normalized(&self, n: usize) -> Vec<String> {
        let base: DateTime<Utc> = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut keys = Vec::with_capacity(n);
        for i in 0..n {
            let key = format!("item-{:02}.mp4", i);
            self.memory
                .put_at(
                    self.bucket(StageName::Normalized),
                    &key,
                    format!("normalized:{}", key).into_bytes(),
                    base + ChronoDuration::seconds(i as i64),
                )
                .await
                .unwrap();
            keys.push(key);
        }
        keys
    }

    pub async fn seed(&self, stage: StageName, key: &str, data: &[u8]) {
        self.memory
            .put(self.bucket(stage), key, data.to_vec())
            .await
            .unwrap();
    }

    /// Entries left in the scratch root; every stage run must clean up.
    pub fn scratch_leftovers(&self) -> usize {
        std::fs::read_dir(self.work_dir.path())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}
