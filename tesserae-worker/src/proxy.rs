//! The worker proxy: lifecycle state machine and HTTP upload/submit/poll/fetch.

use crate::error::{WorkerError, WorkerResult};
use reqwest::blocking::{multipart, Client};
use serde_json::{json, Value};
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};
use tesserae_core::Image;

/// Per-request timeout for the worker's HTTP endpoints.
pub const TIMEOUT: Duration = Duration::from_secs(8);
/// Consecutive failure count after which a worker is disqualified for the job.
pub const MAX_FAILURES: u32 = 1000;
/// Poll interval while waiting for a submitted job to finish.
pub const POLL_INTERVAL: Duration = Duration::from_millis(300);
/// Total time budget for one tile to finish processing remotely.
pub const JOB_TIMEOUT: Duration = Duration::from_secs(180);

fn http_client() -> &'static Client {
    static CLIENT: OnceLock<Client> = OnceLock::new();
    CLIENT.get_or_init(|| {
        Client::builder()
            .user_agent(concat!("tesserae/", env!("CARGO_PKG_VERSION")))
            .timeout(TIMEOUT)
            .build()
            .expect("failed to build HTTP client")
    })
}

/// Lifecycle state of a worker proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Freshly constructed, not yet probed.
    Init,
    /// Probed successfully and free to accept work.
    Idle,
    /// Currently processing a tile.
    Proc,
    /// Disqualified for this job (failure cap reached, or probe failed).
    Fail,
    /// Held by an external admin operation (not used by the core scheduler).
    Lock,
}

/// Static and dynamic information reported by a worker, refreshed by `probe()`.
#[derive(Debug, Clone, Default)]
pub struct WorkerInfo {
    /// `"posix"` or `"windows"`, parsed from the remote's system_stats.
    pub os: Option<String>,
    /// GPU device label.
    pub gpu: Option<String>,
    /// Total VRAM in GiB.
    pub vram_total: Option<f32>,
    /// Free VRAM in GiB, refreshed on `probe()`.
    pub vram_free: Option<f32>,
    /// The raw `/object_info` payload, used by `verify_nodes`.
    pub object_info: Option<Value>,
}

/// Request to process one tile: the cropped pixels and the per-tile workflow
/// (already patched with input filename, prompts and path separators by the
/// caller's use of `tesserae_io::workflow`).
pub struct ProcessRequest {
    /// The tile's pixels.
    pub image: Image,
    /// Per-tile API-format workflow graph to submit. The caller has already
    /// pointed the graph's input-image node at `input_filename` via
    /// `tesserae_io::workflow::set_input_image`.
    pub workflow: Value,
    /// Filename the tile is uploaded under; must match the name already
    /// written into `workflow`'s input-image node.
    pub input_filename: String,
    /// Node id whose output image should be fetched back.
    pub output_node_id: Option<String>,
    /// If set and not `1.0`, the image is downscaled by this factor before upload.
    pub downscale_factor: Option<f32>,
}

/// A remote tile-processing endpoint: ordering, lifecycle and the network
/// critical path. Implemented by [`ComfyWorker`] (real HTTP backend) and
/// [`DebugWorker`] (local stand-in for dry runs and tests).
pub trait WorkerProxy: Send + Sync {
    /// Stable identifier derived from the endpoint's authority.
    fn id(&self) -> &str;
    /// Human-readable name, shown in previewer overlays.
    fn name(&self) -> &str;
    /// Current lifecycle state.
    fn state(&self) -> WorkerState;
    /// Current priority (higher dispatches first among idle workers).
    fn priority(&self) -> f32;
    /// Refreshes static and dynamic info; transitions to `Fail` on network error.
    fn probe(&self) -> WorkerResult<()>;
    /// Runs the full upload/submit/poll/fetch cycle for one tile.
    fn process(&self, request: ProcessRequest) -> WorkerResult<Image>;
    /// Cancels any queued/running remote work and returns to `Idle`. No-op if `Fail`/`Lock`.
    fn abort(&self);
    /// Resets failure count and priority after a job completes. Requires `Idle`.
    fn reset(&self) -> WorkerResult<()>;
    /// A snapshot of static/dynamic info for status reporting.
    fn info(&self) -> WorkerInfo;
}

/// Orders workers by descending priority, so a sort puts the best candidate first.
pub fn by_priority_desc(workers: &[&dyn WorkerProxy]) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..workers.len()).collect();
    idx.sort_by(|&a, &b| workers[b].priority().partial_cmp(&workers[a].priority()).unwrap());
    idx
}

struct Inner {
    state: WorkerState,
    priority: f32,
    fails: u32,
    info: WorkerInfo,
}

/// A real ComfyUI-protocol worker endpoint.
pub struct ComfyWorker {
    url: String,
    host: String,
    port: u16,
    worker_id: String,
    name: String,
    priority_init: f32,
    inner: Mutex<Inner>,
}

impl ComfyWorker {
    /// Parses `url` and probes it once, mirroring the original constructor's
    /// `parse()` call: the worker starts `Idle` on success, `Fail` on failure.
    pub fn connect(url: &str, priority: f32, name: Option<String>) -> Self {
        let (host, port) = split_authority(url);
        let worker = Self {
            url: url.to_string(),
            host: host.clone(),
            port,
            worker_id: format!("{host}:{port}"),
            name: name.unwrap_or_else(|| format!("{host}:{port}")),
            priority_init: priority,
            inner: Mutex::new(Inner {
                state: WorkerState::Init,
                priority,
                fails: 0,
                info: WorkerInfo::default(),
            }),
        };
        if let Err(e) = worker.probe() {
            tracing::warn!(worker = %worker.worker_id, error = %e, "initial probe failed");
        }
        worker
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.url.trim_end_matches('/'), path)
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.fails += 1;
        inner.priority -= 0.001;
        if inner.fails >= MAX_FAILURES {
            inner.state = WorkerState::Fail;
        } else {
            inner.state = WorkerState::Idle;
        }
    }

    fn fetch_stats(&self) -> WorkerResult<(Value, Value)> {
        let stats: Value = http_client().get(self.endpoint("system_stats")).send()?.error_for_status()?.json()?;
        let object_info: Value = http_client().get(self.endpoint("object_info")).send()?.error_for_status()?.json()?;
        Ok((stats, object_info))
    }
}

fn split_authority(url: &str) -> (String, u16) {
    let without_scheme = url.split("://").next_back().unwrap_or(url);
    let authority = without_scheme.split('/').next().unwrap_or(without_scheme);
    match authority.rsplit_once(':') {
        Some((host, port)) => (host.to_string(), port.parse().unwrap_or(80)),
        None => (authority.to_string(), 80),
    }
}

impl WorkerProxy for ComfyWorker {
    fn id(&self) -> &str {
        &self.worker_id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> WorkerState {
        self.inner.lock().unwrap().state
    }

    fn priority(&self) -> f32 {
        self.inner.lock().unwrap().priority
    }

    fn probe(&self) -> WorkerResult<()> {
        {
            let state = self.inner.lock().unwrap().state;
            if matches!(state, WorkerState::Fail | WorkerState::Lock) {
                return Ok(());
            }
        }

        let (stats, object_info) = match self.fetch_stats() {
            Ok(pair) => pair,
            Err(e) => {
                self.inner.lock().unwrap().state = WorkerState::Fail;
                return Err(e);
            }
        };

        let os = stats
            .get("system")
            .and_then(|s| s.get("os"))
            .and_then(Value::as_str)
            .map(|s| if s == "nt" { "windows".to_string() } else { "posix".to_string() });
        let device = stats
            .get("devices")
            .and_then(Value::as_array)
            .and_then(|d| d.first());
        let gpu = device.and_then(|d| d.get("name")).and_then(Value::as_str).map(str::to_string);
        let vram_total = device
            .and_then(|d| d.get("vram_total"))
            .and_then(Value::as_f64)
            .map(|v| (v / 1_073_741_824.0) as f32);
        let vram_free = device
            .and_then(|d| d.get("vram_free"))
            .and_then(Value::as_f64)
            .map(|v| (v / 1_073_741_824.0) as f32);

        let mut inner = self.inner.lock().unwrap();
        inner.info = WorkerInfo {
            os,
            gpu,
            vram_total,
            vram_free,
            object_info: Some(object_info),
        };
        if inner.state == WorkerState::Init {
            inner.state = WorkerState::Idle;
        }
        Ok(())
    }

    fn process(&self, request: ProcessRequest) -> WorkerResult<Image> {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.state != WorkerState::Idle {
                return Err(WorkerError::BadState {
                    expected: "idle",
                    actual: format!("{:?}", inner.state),
                });
            }
            inner.state = WorkerState::Proc;
        }

        let result = self.process_locked(request);

        match &result {
            Ok(_) => {
                self.inner.lock().unwrap().state = WorkerState::Idle;
            }
            Err(_) => self.record_failure(),
        }
        result
    }

    fn abort(&self) {
        let mut inner = self.inner.lock().unwrap();
        if matches!(inner.state, WorkerState::Fail | WorkerState::Lock) {
            return;
        }
        if let Err(e) = self.clear_queue() {
            tracing::warn!(worker = %self.worker_id, error = %e, "best-effort queue clear failed");
        }
        inner.state = WorkerState::Idle;
    }

    fn reset(&self) -> WorkerResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != WorkerState::Idle {
            return Err(WorkerError::BadState {
                expected: "idle",
                actual: format!("{:?}", inner.state),
            });
        }
        inner.fails = 0;
        inner.priority = self.priority_init;
        Ok(())
    }

    fn info(&self) -> WorkerInfo {
        self.inner.lock().unwrap().info.clone()
    }
}

impl ComfyWorker {
    fn process_locked(&self, request: ProcessRequest) -> WorkerResult<Image> {
        let image = match request.downscale_factor {
            Some(f) if f > 0.0 && (f - 1.0).abs() > f32::EPSILON => {
                let w = ((request.image.width() as f32) * f).round().max(1.0) as u32;
                let h = ((request.image.height() as f32) * f).round().max(1.0) as u32;
                request.image.resize_bilinear(w, h)?
            }
            _ => request.image,
        };

        self.upload_image(&image, &request.input_filename)?;

        let job_id = format!("tesserae-{}", self.worker_id.replace([':', '.'], "_"));
        self.submit_workflow(&request.workflow, &job_id)?;
        self.download_image(&job_id, request.output_node_id.as_deref())
    }

    fn upload_image(&self, image: &Image, filename: &str) -> WorkerResult<()> {
        let meta = tesserae_io::png::OutputMeta::default();
        let tmp = std::env::temp_dir().join(filename);
        tesserae_io::png::write(&tmp, image, &meta).map_err(|e| WorkerError::BadState {
            expected: "encodable image",
            actual: e.to_string(),
        })?;
        let bytes = std::fs::read(&tmp).map_err(|e| WorkerError::BadState {
            expected: "readable temp file",
            actual: e.to_string(),
        })?;
        let _ = std::fs::remove_file(&tmp);

        let part = multipart::Part::bytes(bytes).file_name(filename.to_string());
        let form = multipart::Form::new().part("image", part).text("overwrite", "true");
        http_client()
            .post(self.endpoint("upload/image"))
            .multipart(form)
            .send()?
            .error_for_status()?;
        Ok(())
    }

    fn submit_workflow(&self, workflow: &Value, job_id: &str) -> WorkerResult<()> {
        let body = json!({
            "prompt": workflow,
            "client_id": "tesserae",
            "extra_data": {"job_id": job_id},
        });
        http_client()
            .post(self.endpoint("prompt"))
            .json(&body)
            .send()?
            .error_for_status()?;
        Ok(())
    }

    fn download_image(&self, job_id: &str, output_node_id: Option<&str>) -> WorkerResult<Image> {
        let deadline = Instant::now() + JOB_TIMEOUT;
        loop {
            if Instant::now() > deadline {
                return Err(WorkerError::Timeout(job_id.to_string()));
            }
            if self.state() != WorkerState::Proc {
                return Err(WorkerError::Interrupted(job_id.to_string()));
            }

            let history: Value = http_client().get(self.endpoint("history")).send()?.error_for_status()?.json()?;
            if let Some(entry) = find_history_entry(&history, job_id) {
                let outputs = entry.get("outputs").and_then(Value::as_object);
                let images = outputs.and_then(|o| {
                    output_node_id
                        .and_then(|id| o.get(id))
                        .or_else(|| o.values().last())
                        .and_then(|n| n.get("images"))
                        .and_then(Value::as_array)
                });
                if let Some(images) = images {
                    if let Some(first) = images.first() {
                        return self.fetch_view(first);
                    }
                }
                return Err(WorkerError::MissingOutput(job_id.to_string()));
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    fn fetch_view(&self, image_ref: &Value) -> WorkerResult<Image> {
        let filename = image_ref.get("filename").and_then(Value::as_str).unwrap_or_default();
        let subfolder = image_ref.get("subfolder").and_then(Value::as_str).unwrap_or_default();
        let kind = image_ref.get("type").and_then(Value::as_str).unwrap_or("output");
        let bytes = http_client()
            .get(self.endpoint("view"))
            .query(&[("filename", filename), ("subfolder", subfolder), ("type", kind)])
            .send()?
            .error_for_status()?
            .bytes()?;

        let tmp = std::env::temp_dir().join(format!("tesserae-fetch-{}-{}.png", self.port, filename));
        std::fs::write(&tmp, &bytes).map_err(|e| WorkerError::BadState {
            expected: "writable temp dir",
            actual: e.to_string(),
        })?;
        let (image, _) = tesserae_io::png::read_with_meta(&tmp).map_err(|e| WorkerError::BadState {
            expected: "decodable PNG",
            actual: e.to_string(),
        })?;
        let _ = std::fs::remove_file(&tmp);
        Ok(image)
    }

    fn clear_queue(&self) -> WorkerResult<()> {
        let queue: Value = http_client().get(self.endpoint("queue")).send()?.error_for_status()?.json()?;
        let pending: Vec<&str> = queue
            .get("queue_pending")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|entry| entry.get(1).and_then(Value::as_str))
            .filter(|_| true)
            .collect();
        if !pending.is_empty() {
            http_client()
                .post(self.endpoint("queue"))
                .json(&json!({"delete": pending}))
                .send()?
                .error_for_status()?;
        }
        let running_matches = queue
            .get("queue_running")
            .and_then(Value::as_array)
            .map(|a| a.iter().any(|e| e.get(3).and_then(|d| d.get("client_id")) == Some(&json!("tesserae"))))
            .unwrap_or(false);
        if running_matches {
            http_client().post(self.endpoint("interrupt")).send()?.error_for_status()?;
        }
        Ok(())
    }
}

fn find_history_entry<'a>(history: &'a Value, job_id: &str) -> Option<&'a Value> {
    history.as_object()?.values().find(|entry| {
        entry
            .get("prompt")
            .and_then(Value::as_array)
            .and_then(|p| p.get(3))
            .and_then(|extra| extra.get("job_id"))
            .and_then(Value::as_str)
            == Some(job_id)
    })
}

/// A local stand-in worker used for dry runs and slicer-logic testing. Never
/// fails; "processes" a tile by darkening it slightly and sleeping to
/// simulate remote latency.
pub struct DebugWorker {
    worker_id: String,
    name: String,
    priority_init: f32,
    inner: Mutex<Inner>,
}

impl DebugWorker {
    /// Builds a debug worker with the given identity and starting priority.
    pub fn new(worker_id: &str, priority: f32, name: Option<String>) -> Self {
        Self {
            worker_id: worker_id.to_string(),
            name: name.unwrap_or_else(|| worker_id.to_string()),
            priority_init: priority,
            inner: Mutex::new(Inner {
                state: WorkerState::Idle,
                priority,
                fails: 0,
                info: WorkerInfo {
                    os: Some("posix".to_string()),
                    gpu: Some("Demo GPU".to_string()),
                    vram_total: Some(24.0),
                    vram_free: Some(24.0),
                    object_info: Some(json!({})),
                },
            }),
        }
    }
}

impl WorkerProxy for DebugWorker {
    fn id(&self) -> &str {
        &self.worker_id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> WorkerState {
        self.inner.lock().unwrap().state
    }

    fn priority(&self) -> f32 {
        self.inner.lock().unwrap().priority
    }

    fn probe(&self) -> WorkerResult<()> {
        Ok(())
    }

    fn process(&self, request: ProcessRequest) -> WorkerResult<Image> {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.state != WorkerState::Idle {
                return Err(WorkerError::BadState {
                    expected: "idle",
                    actual: format!("{:?}", inner.state),
                });
            }
            inner.state = WorkerState::Proc;
        }

        let sleep_ms = 2000 + (rand::random::<f32>() * 500.0) as u64;
        std::thread::sleep(Duration::from_millis(sleep_ms));

        let darkened: Vec<f32> = request.image.data().iter().map(|v| v * 0.6).collect();
        let out = Image::from_vec(darkened, request.image.width(), request.image.height(), request.image.channels())?;

        self.inner.lock().unwrap().state = WorkerState::Idle;
        Ok(out)
    }

    fn abort(&self) {
        let mut inner = self.inner.lock().unwrap();
        if !matches!(inner.state, WorkerState::Fail | WorkerState::Lock) {
            inner.state = WorkerState::Idle;
        }
    }

    fn reset(&self) -> WorkerResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.fails = 0;
        inner.priority = self.priority_init;
        Ok(())
    }

    fn info(&self) -> WorkerInfo {
        self.inner.lock().unwrap().info.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_worker_processes_without_failing() {
        let worker = DebugWorker::new("debug-1", 1.0, None);
        let image = Image::new(4, 4, 3).unwrap();
        let req = ProcessRequest {
            image: image.clone(),
            workflow: json!({}),
            input_filename: "tesserae-debug-1.png".to_string(),
            output_node_id: None,
            downscale_factor: None,
        };
        let out = worker.process(req).unwrap();
        assert_eq!(out.data()[0], 0.0);
        assert_eq!(worker.state(), WorkerState::Idle);
    }

    #[test]
    fn priority_orders_descending() {
        let a = DebugWorker::new("a", 0.5, None);
        let b = DebugWorker::new("b", 0.9, None);
        let workers: Vec<&dyn WorkerProxy> = vec![&a, &b];
        let order = by_priority_desc(&workers);
        assert_eq!(order, vec![1, 0]);
    }

    #[test]
    fn split_authority_parses_host_port() {
        assert_eq!(split_authority("http://127.0.0.1:8188"), ("127.0.0.1".to_string(), 8188));
    }
}
