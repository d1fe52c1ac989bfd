//! End-to-end scenarios from the tiled-upscale job's testable-properties
//! list: per-slicer dispatch ordering (S1-S3), worker-failure retry (S4),
//! and abort (S5).

#[cfg(test)]
mod tests {
    use crate::flaky_worker::FlakyWorker;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tesserae_core::{MaskBuilder, NyanTileSlicer, SimpleSlicer, Slicer, UsdusSlicer};
    use tesserae_core::Image;
    use tesserae_job::{Job, Settings, TileSource};
    use tesserae_worker::{DebugWorker, WorkerProxy};

    fn debug_settings(workflow: serde_json::Value) -> Settings {
        Settings {
            image_scale: 1.0,
            image_height: 0,
            image_width: 0,
            tile_source: TileSource::Raw,
            upscale_factor: None,
            positive_prompt: None,
            negative_prompt: None,
            seed_increment: None,
            workflow,
            save: false,
        }
    }

    fn mark_done(slicer: &mut dyn Slicer, idx: usize) {
        slicer.tiles_mut()[idx].done = true;
    }

    /// S1 (USDUS serial): a 1024x1024 image sliced size=768/overlap=64
    /// yields a 2x2 grid, and the slicer's readiness policy never offers
    /// more than one tile at a time, in construction order.
    #[test]
    fn s1_usdus_serial_one_tile_at_a_time() {
        let mut slicer = UsdusSlicer::new(1024, 1024, 768, 64, false).unwrap();
        assert_eq!(slicer.tiles().len(), 4);

        for expected in 0..4 {
            let ready = slicer.ready_tiles();
            assert_eq!(ready, vec![expected]);
            mark_done(&mut slicer, expected);
        }
        assert!(slicer.finished());
    }

    /// S2 (NyanTile wavefront): a 1536x1536 image at size=768 yields a 3x3
    /// grid; the corner dispatches alone, then the wavefront widens, and no
    /// tile is ever offered before its up/left/up-right-diagonal neighbours
    /// are done.
    #[test]
    fn s2_nyantile_wavefront_respects_dependencies() {
        let mut slicer = NyanTileSlicer::new(1536, 1536, 768, false).unwrap();
        assert_eq!(slicer.tiles().len(), 9);

        let first = slicer.ready_tiles();
        assert_eq!(first, vec![0]);
        assert_eq!((slicer.tiles()[0].h_id, slicer.tiles()[0].w_id), (0, 0));
        mark_done(&mut slicer, 0);

        let mut dispatched = vec![0];
        while dispatched.len() < slicer.tiles().len() {
            let ready = slicer.ready_tiles();
            assert!(!ready.is_empty(), "wavefront stalled with {} of 9 tiles done", dispatched.len());
            for &idx in &ready {
                let tile = &slicer.tiles()[idx];
                let h = tile.h_id;
                let w = tile.w_id;
                // Every dependency this tile could have must already be done.
                if h > 0 {
                    if let Some(j) = slicer.tile_at(h - 1, w) {
                        assert!(slicer.tiles()[j].done, "dispatched ({h},{w}) before its up neighbour");
                    }
                }
                if w > 0 {
                    if let Some(j) = slicer.tile_at(h, w - 1) {
                        assert!(slicer.tiles()[j].done, "dispatched ({h},{w}) before its left neighbour");
                    }
                }
                if h > 0 && w < slicer.tiles()[idx].w_max {
                    if let Some(j) = slicer.tile_at(h - 1, w + 1) {
                        assert!(slicer.tiles()[j].done, "dispatched ({h},{w}) before its up-right diagonal");
                    }
                }
            }
            for &idx in &ready {
                mark_done(&mut slicer, idx);
                dispatched.push(idx);
            }
        }
        assert!(slicer.finished());
    }

    /// S3 (Simple parallel): a 2048x1024 image at size=512/overlap=64 never
    /// offers two 8-neighbour tiles in the same ready batch.
    #[test]
    fn s3_simple_never_offers_mutual_neighbours() {
        let mut slicer = SimpleSlicer::new(2048, 1024, 512, 64, false).unwrap();
        let total = slicer.tiles().len();
        assert!(total > 1);

        let mut done = 0;
        let mut rounds = 0;
        while done < total {
            rounds += 1;
            assert!(rounds <= total + 1, "simple slicer made no progress");
            let ready = slicer.ready_tiles();
            assert!(!ready.is_empty(), "simple slicer stalled with {done}/{total} done");
            for i in 0..ready.len() {
                for j in (i + 1)..ready.len() {
                    let a = &slicer.tiles()[ready[i]];
                    let b = &slicer.tiles()[ready[j]];
                    let dh = (a.h_id as i64 - b.h_id as i64).abs();
                    let dw = (a.w_id as i64 - b.w_id as i64).abs();
                    assert!(dh > 1 || dw > 1, "dispatched mutual 8-neighbours {:?}/{:?}", (a.h_id, a.w_id), (b.h_id, b.w_id));
                }
            }
            for &idx in &ready {
                mark_done(&mut slicer, idx);
                done += 1;
            }
        }
        assert!(slicer.finished());
    }

    /// S4 (worker failure): one worker fails its first dispatch; the tile
    /// returns to the pool and is eventually finished by the surviving
    /// worker, and the job completes in full.
    #[test]
    fn s4_failed_tile_is_retried_to_completion() {
        let slicer = Box::new(SimpleSlicer::new(64, 64, 40, 8, false).unwrap());
        let image = Image::new(64, 64, 3).unwrap();
        let workers: Vec<Arc<dyn WorkerProxy>> = vec![
            Arc::new(FlakyWorker::new("flaky", 1.0)),
            Arc::new(DebugWorker::new("steady", 0.9, None)),
        ];
        let settings = Settings {
            image_height: 64,
            image_width: 64,
            ..debug_settings(json!({"1": {"class_type": "SaveImage", "inputs": {}}}))
        };
        let job = Arc::new(Job::new(slicer, workers, image, MaskBuilder::new(2, 4), settings, None).unwrap());
        job.run().unwrap();

        assert!(job.finished());
        let (done, total) = job.progress();
        assert_eq!(done, total);
    }

    /// S5 (abort): aborting a running job returns promptly, and `finished()`
    /// reports true without every tile having been composited.
    #[test]
    fn s5_abort_stops_the_job_without_finishing_every_tile() {
        let slicer = Box::new(SimpleSlicer::new(512, 512, 128, 16, false).unwrap());
        let image = Image::new(512, 512, 3).unwrap();
        let workers: Vec<Arc<dyn WorkerProxy>> = vec![
            Arc::new(DebugWorker::new("d1", 1.0, None)),
            Arc::new(DebugWorker::new("d2", 0.9, None)),
        ];
        let settings = Settings {
            image_height: 512,
            image_width: 512,
            ..debug_settings(json!({"1": {"class_type": "SaveImage", "inputs": {}}}))
        };
        let job = Arc::new(Job::new(slicer, workers, image, MaskBuilder::new(2, 4), settings, None).unwrap());

        let run_handle = Arc::clone(&job);
        let thread = std::thread::spawn(move || run_handle.run());

        // Give the dispatcher a moment to put tiles in flight before aborting.
        std::thread::sleep(Duration::from_millis(200));
        job.abort();

        thread.join().unwrap().unwrap();
        assert!(job.finished());
        let (done, total) = job.progress();
        assert!(done <= total);
    }
}
