//! The dispatcher/worker-task/assembler pipeline that drives one tiled
//! upscale job to completion.

use crate::error::{JobError, JobResult};
use crate::previewer::Previewer;
use crate::settings::{Settings, TileSource};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tesserae_core::{put, Image, MaskBuilder, Slicer, Tile};
use tesserae_io::png::OutputMeta;
use tesserae_io::workflow as wf;
use tesserae_worker::{ProcessRequest, WorkerProxy, WorkerState};

/// Pause between dispatcher iterations when no tile is currently ready.
const DISPATCH_IDLE_SLEEP: Duration = Duration::from_millis(300);
/// Pause between dispatcher iterations after a successful dispatch batch.
const DISPATCH_PACE_SLEEP: Duration = Duration::from_millis(150);

/// A single running (or finished) tiled upscale job: the slicer, the worker
/// roster, the running output image, and the previewer, all behind the
/// locks the dispatcher/worker-task/assembler threads need.
pub struct Job {
    slicer: Mutex<Box<dyn Slicer>>,
    workers: Vec<Arc<dyn WorkerProxy>>,
    /// Untouched clone of the source image, present only when
    /// `settings.tile_source == Raw`; otherwise tiles are cropped from the
    /// running `image` itself.
    source: Option<Image>,
    image: Mutex<Image>,
    mask_builder: MaskBuilder,
    settings: Settings,
    previewer: Previewer,
    aborted: AtomicBool,
    out_path: Option<PathBuf>,
}

impl Job {
    /// Builds a new job. Fails if the worker roster is empty or the
    /// settings carry no workflow graph.
    pub fn new(
        slicer: Box<dyn Slicer>,
        workers: Vec<Arc<dyn WorkerProxy>>,
        image: Image,
        mask_builder: MaskBuilder,
        settings: Settings,
        out_path: Option<PathBuf>,
    ) -> JobResult<Self> {
        if workers.is_empty() {
            return Err(JobError::NoWorkers);
        }
        if settings.workflow.is_null() {
            return Err(JobError::MissingWorkflow);
        }
        let previewer = Previewer::new(&image)?;
        let source = match settings.tile_source {
            TileSource::Raw => Some(image.clone()),
            TileSource::Out => None,
        };
        Ok(Self {
            slicer: Mutex::new(slicer),
            workers,
            source,
            image: Mutex::new(image),
            mask_builder,
            settings,
            previewer,
            aborted: AtomicBool::new(false),
            out_path,
        })
    }

    /// `true` once every tile is done, or the job was aborted.
    pub fn finished(&self) -> bool {
        self.aborted.load(Ordering::SeqCst) || self.slicer.lock().unwrap().finished()
    }

    /// `(done, total)` tile counts.
    pub fn progress(&self) -> (usize, usize) {
        let slicer = self.slicer.lock().unwrap();
        let total = slicer.tiles().len();
        let done = slicer.tiles().iter().filter(|t| t.done).count();
        (done, total)
    }

    /// The previewer's change token, for cheap external polling.
    pub fn changed_token(&self) -> u64 {
        self.previewer.changed_token()
    }

    /// The latest overlay-rendered preview snapshot.
    pub fn preview(&self) -> Image {
        let proc_tiles: Vec<Tile> = {
            let slicer = self.slicer.lock().unwrap();
            slicer.tiles().iter().filter(|t| t.proc).cloned().collect()
        };
        self.previewer.get_preview(&proc_tiles, self.finished())
    }

    /// Signals every worker to cancel outstanding remote work and marks the
    /// job aborted; the dispatcher observes this on its next iteration.
    /// No output is persisted for an aborted job.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
        for worker in &self.workers {
            worker.abort();
        }
        self.previewer.mark_change();
    }

    /// Runs the dispatcher loop to completion on the calling thread. Spawns
    /// one assembler thread and one worker-task thread per dispatched tile.
    pub fn run(self: &Arc<Self>) -> JobResult<()> {
        let capacity = self.workers.len().max(1);
        let (tx, rx): (SyncSender<(usize, Tile, Image)>, Receiver<(usize, Tile, Image)>) =
            mpsc::sync_channel(capacity);

        let assembler_job = Arc::clone(self);
        let assembler = thread::spawn(move || assembler_job.assemble(rx));

        loop {
            if self.finished() {
                break;
            }

            let ready = self.slicer.lock().unwrap().ready_tiles();
            if ready.is_empty() {
                thread::sleep(DISPATCH_IDLE_SLEEP);
                continue;
            }

            let mut idle: Vec<Arc<dyn WorkerProxy>> = self
                .workers
                .iter()
                .filter(|w| w.state() == WorkerState::Idle)
                .cloned()
                .collect();
            idle.sort_by(|a, b| b.priority().partial_cmp(&a.priority()).unwrap());

            let mut dispatched = false;
            for idx in ready {
                let Some(worker) = idle.pop() else { break };
                let tile = {
                    let mut slicer = self.slicer.lock().unwrap();
                    let t = &mut slicer.tiles_mut()[idx];
                    t.proc = true;
                    t.worker = Some(worker.id().to_string());
                    t.clone()
                };
                dispatched = true;
                let job = Arc::clone(self);
                let tx = tx.clone();
                thread::spawn(move || job.worker_task(idx, tile, worker, tx));
            }

            if !dispatched {
                thread::sleep(DISPATCH_IDLE_SLEEP);
                continue;
            }
            self.previewer.mark_change();
            thread::sleep(DISPATCH_PACE_SLEEP);
        }

        drop(tx);
        assembler.join().expect("assembler thread panicked");

        let aborted = self.aborted.load(Ordering::SeqCst);
        if !aborted && self.settings.save {
            if let Some(path) = self.out_path.clone() {
                self.persist_output(&path)?;
            }
        }
        for worker in &self.workers {
            let _ = worker.reset();
        }
        self.previewer.mark_change();
        Ok(())
    }

    /// Crops the tile's pixels (from the untouched source or the running
    /// image, per `tile_source`), builds its per-tile workflow and runs it
    /// through the worker. On success enqueues `(idx, tile, image)`; on
    /// failure logs and clears `proc` so the dispatcher retries the tile.
    fn worker_task(
        self: Arc<Self>,
        idx: usize,
        tile: Tile,
        worker: Arc<dyn WorkerProxy>,
        tx: SyncSender<(usize, Tile, Image)>,
    ) {
        let cropped = match &self.source {
            Some(source) => source.crop(tile.rect()),
            None => self.image.lock().unwrap().crop(tile.rect()),
        };
        let cropped = match cropped {
            Ok(image) => image,
            Err(e) => {
                tracing::error!(h = tile.h_id, w = tile.w_id, error = %e, "failed to crop tile");
                self.clear_proc(idx);
                return;
            }
        };

        let request = self.build_request(&tile, cropped);
        match worker.process(request) {
            Ok(processed) => {
                if tx.send((idx, tile, processed)).is_err() {
                    tracing::warn!("completion channel closed; dropping a finished tile");
                }
            }
            Err(e) => {
                tracing::warn!(worker = worker.id(), h = tile.h_id, w = tile.w_id, error = %e, "tile processing failed; returning to pool");
                self.clear_proc(idx);
            }
        }
    }

    fn build_request(&self, tile: &Tile, image: Image) -> ProcessRequest {
        let mut workflow = self.settings.workflow.clone();
        let filename = format!("tesserae-tile-{:03}-{:03}.png", tile.h_id, tile.w_id);
        wf::set_input_image(&mut workflow, &filename);
        if let Some(text) = &self.settings.positive_prompt {
            wf::set_prompt_text(&mut workflow, wf::PromptKind::Positive, text);
        }
        if let Some(text) = &self.settings.negative_prompt {
            wf::set_prompt_text(&mut workflow, wf::PromptKind::Negative, text);
        }
        let workflow = wf::increment_seed(workflow, self.settings.seed_increment.unwrap_or(0));
        let output_node_id = wf::find_output_image_id(&workflow);

        ProcessRequest {
            image,
            workflow,
            input_filename: filename,
            output_node_id,
            downscale_factor: self.settings.upscale_factor,
        }
    }

    fn clear_proc(&self, idx: usize) {
        let mut slicer = self.slicer.lock().unwrap();
        let t = &mut slicer.tiles_mut()[idx];
        t.proc = false;
        t.worker = None;
    }

    fn assemble(self: Arc<Self>, rx: Receiver<(usize, Tile, Image)>) {
        while let Ok((idx, tile, processed)) = rx.recv() {
            let mask = match self.mask_builder.build(tile.width(), tile.height()) {
                Ok(mut mask) => {
                    mask.fix_edge(&tile);
                    Some(mask)
                }
                Err(e) => {
                    tracing::error!(h = tile.h_id, w = tile.w_id, error = %e, "failed to build tile mask; compositing opaquely");
                    None
                }
            };

            {
                let mut image = self.image.lock().unwrap();
                if let Err(e) = put(&mut image, &tile, &processed, mask.as_ref(), 1.0, 1.0) {
                    tracing::error!(h = tile.h_id, w = tile.w_id, error = %e, "failed to composite tile");
                }
            }

            {
                let mut slicer = self.slicer.lock().unwrap();
                let t = &mut slicer.tiles_mut()[idx];
                t.done = true;
                t.proc = false;
                t.worker = None;
            }

            self.previewer.update_tile(&tile, &processed, mask.as_ref());
            self.previewer.mark_change();
        }
    }

    fn persist_output(&self, path: &Path) -> JobResult<()> {
        let image = self.image.lock().unwrap().clone();
        let mut extra = serde_json::Map::new();
        extra.insert("image_scale".into(), Value::from(self.settings.image_scale));
        extra.insert("image_width".into(), Value::from(self.settings.image_width));
        extra.insert("image_height".into(), Value::from(self.settings.image_height));
        if let Some(text) = &self.settings.positive_prompt {
            extra.insert("positive_prompt".into(), Value::String(text.clone()));
        }
        if let Some(text) = &self.settings.negative_prompt {
            extra.insert("negative_prompt".into(), Value::String(text.clone()));
        }
        let meta = OutputMeta {
            prompt: Some(self.settings.workflow.clone()),
            workflow_raw: None,
            extra,
        };
        tesserae_io::png::write(path, &image, &meta)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::TileSource;
    use serde_json::json;
    use tesserae_core::SimpleSlicer;
    use tesserae_worker::DebugWorker;

    fn debug_settings(workflow: Value) -> Settings {
        Settings {
            image_scale: 1.0,
            image_height: 64,
            image_width: 64,
            tile_source: TileSource::Raw,
            upscale_factor: None,
            positive_prompt: None,
            negative_prompt: None,
            seed_increment: None,
            workflow,
            save: false,
        }
    }

    #[test]
    fn rejects_empty_worker_roster() {
        let slicer = Box::new(SimpleSlicer::new(64, 64, 32, 4, false).unwrap());
        let image = Image::new(64, 64, 3).unwrap();
        let result = Job::new(
            slicer,
            vec![],
            image,
            MaskBuilder::new(2, 4),
            debug_settings(json!({"1": {"class_type": "SaveImage", "inputs": {}}})),
            None,
        );
        assert!(matches!(result, Err(JobError::NoWorkers)));
    }

    #[test]
    fn rejects_missing_workflow() {
        let slicer = Box::new(SimpleSlicer::new(64, 64, 32, 4, false).unwrap());
        let image = Image::new(64, 64, 3).unwrap();
        let worker: Arc<dyn WorkerProxy> = Arc::new(DebugWorker::new("d1", 1.0, None));
        let result = Job::new(
            slicer,
            vec![worker],
            image,
            MaskBuilder::new(2, 4),
            debug_settings(Value::Null),
            None,
        );
        assert!(matches!(result, Err(JobError::MissingWorkflow)));
    }

    #[test]
    fn runs_to_completion_with_debug_workers() {
        let slicer = Box::new(SimpleSlicer::new(32, 32, 20, 4, false).unwrap());
        let image = Image::new(32, 32, 3).unwrap();
        let workers: Vec<Arc<dyn WorkerProxy>> = vec![
            Arc::new(DebugWorker::new("d1", 1.0, None)),
            Arc::new(DebugWorker::new("d2", 0.9, None)),
        ];
        let settings = debug_settings(json!({"1": {"class_type": "SaveImage", "inputs": {}}}));
        let job = Arc::new(
            Job::new(slicer, workers, image, MaskBuilder::new(2, 4), settings, None).unwrap(),
        );
        job.run().unwrap();
        assert!(job.finished());
        let (done, total) = job.progress();
        assert_eq!(done, total);
    }
}
