//! Fixed-capacity batches and the worker pool that drains them.
//!
//! A [`Batch`] is a slot arena allocated once per run. Each slot owns a
//! reprojection target at color resolution, so steady-state extraction
//! allocates no target buffers regardless of recording length. Workers get
//! disjoint `&mut` ranges of slots, so no locking is needed.

use std::ops::Range;
use std::time::Duration;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};

use super::frame::{ExtractionResult, FrameProcessor};
use crate::core::frames::{DepthImage, FramePair};
use crate::core::recording::{RecordingError, RecordingReader, StreamItem};

/// Worker count used when hardware parallelism cannot be queried.
pub const FALLBACK_WORKERS: usize = 8;

/// Worker count for this machine.
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(FALLBACK_WORKERS)
}

/// One entry of a batch.
#[derive(Debug)]
pub struct Slot {
    pair: Option<FramePair>,
    target: DepthImage,
    result: Option<ExtractionResult>,
}

impl Slot {
    fn new(width: u32, height: u32) -> Self {
        Self {
            pair: None,
            target: DepthImage::new(width, height),
            result: None,
        }
    }

    pub fn result(&self) -> Option<ExtractionResult> {
        self.result
    }

    /// Reprojection target owned by this slot.
    pub fn target(&self) -> &DepthImage {
        &self.target
    }

    fn process(&mut self, processor: &FrameProcessor<'_>) {
        if let Some(pair) = self.pair.take() {
            self.result = Some(processor.process(pair, &mut self.target));
        }
    }
}

/// Why [`Batch::fill`] stopped pulling.
#[derive(Debug)]
pub enum FillEnd {
    /// Every slot is occupied; the recording may hold more pairs.
    Full,
    /// The recording is exhausted.
    EndOfStream,
    /// A pull failed. Pairs pulled before it stay in the batch.
    Failed(RecordingError),
}

/// Ordered, fixed-capacity collection of slots.
#[derive(Debug)]
pub struct Batch {
    slots: Vec<Slot>,
    filled: usize,
}

impl Batch {
    /// Allocate `capacity` slots with targets of `target_size` (width, height).
    pub fn new(capacity: usize, target_size: (u32, u32)) -> Self {
        let (width, height) = target_size;
        Self {
            slots: (0..capacity).map(|_| Slot::new(width, height)).collect(),
            filled: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn filled(&self) -> usize {
        self.filled
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.filled == self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    /// Pull pairs from `reader` into the free slots, in order.
    ///
    /// A pair is only pulled once a slot is known to be free, so the reader
    /// never advances past the batch capacity.
    pub fn fill<R>(&mut self, reader: &mut R) -> FillEnd
    where
        R: RecordingReader + ?Sized,
    {
        while let Some(slot) = self.slots.get_mut(self.filled) {
            match reader.next_pair() {
                Ok(StreamItem::Pair(pair)) => {
                    slot.pair = Some(pair);
                    slot.result = None;
                    self.filled += 1;
                }
                Ok(StreamItem::EndOfStream) => return FillEnd::EndOfStream,
                Err(e) => return FillEnd::Failed(e),
            }
        }
        FillEnd::Full
    }

    /// Forget the previous contents. Target buffers are kept.
    pub fn clear(&mut self) {
        for slot in &mut self.slots[..self.filled] {
            slot.pair = None;
            slot.result = None;
        }
        self.filled = 0;
    }

    /// The occupied prefix of the arena.
    pub fn filled_slots_mut(&mut self) -> &mut [Slot] {
        &mut self.slots[..self.filled]
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Results of the occupied slots, in pull order.
    pub fn results(&self) -> impl Iterator<Item = ExtractionResult> + '_ {
        self.slots[..self.filled].iter().filter_map(Slot::result)
    }
}

/// How a batch is spread over the pool.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum Scheduling {
    /// Contiguous equal sub-ranges, one per worker; the remainder runs on
    /// the dispatching thread.
    #[default]
    Static,
    /// Rayon work stealing over individual slots.
    WorkStealing,
}

/// Split `filled` slots over `workers`.
///
/// Returns the per-worker chunk length and the range left for the
/// dispatching thread. With fewer slots than workers every slot lands in
/// the remainder.
pub fn partition(filled: usize, workers: usize) -> (usize, Range<usize>) {
    let per_worker = filled / workers.max(1);
    let dispatched = per_worker * workers.max(1);
    (per_worker, dispatched..filled)
}

/// Bounded thread pool built once per run.
pub struct WorkerPool {
    pool: ThreadPool,
    workers: usize,
    scheduling: Scheduling,
}

impl WorkerPool {
    /// Build a pool of exactly `workers` threads.
    pub fn new(workers: usize, scheduling: Scheduling) -> Result<Self, ThreadPoolBuildError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("extract-worker-{}", i))
            .build()?;
        Ok(Self {
            pool,
            workers,
            scheduling,
        })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn scheduling(&self) -> Scheduling {
        self.scheduling
    }

    /// Process every slot and return once all of them are done.
    ///
    /// This call is the batch barrier: no slot is touched after it returns.
    /// With [`Scheduling::Static`] the slots are cut into `workers` equal
    /// contiguous chunks and the remainder runs on the calling thread; with
    /// [`Scheduling::WorkStealing`] Rayon balances individual slots.
    ///
    /// # Arguments
    /// * `slots` - Occupied prefix of a batch, see [`Batch::filled_slots_mut`]
    /// * `processor` - Per-frame work shared by every worker
    ///
    /// # Errors
    /// None. Per-frame failures are recorded in each slot's
    /// [`result`](Slot::result).
    ///
    /// # Example
    /// ```no_run
    /// use frame_extractor::core::{MemoryRecording, OutputLayout, PinholeTransform, TransformEngine};
    /// use frame_extractor::processors::batch::{Batch, Scheduling, WorkerPool};
    /// use frame_extractor::processors::{ExtractionMode, FrameProcessor};
    ///
    /// # fn demo(mut recording: MemoryRecording, engine: PinholeTransform) -> Result<(), Box<dyn std::error::Error>> {
    /// let layout = OutputLayout::new("out/");
    /// layout.prepare()?;
    /// let processor = FrameProcessor::new(&engine, &layout, ExtractionMode::Undistort, 96);
    /// let pool = WorkerPool::new(4, Scheduling::Static)?;
    ///
    /// let mut batch = Batch::new(16, engine.color_resolution());
    /// batch.fill(&mut recording);
    /// pool.run(batch.filled_slots_mut(), &processor);
    /// println!("{} frames processed", batch.results().count());
    /// # Ok(())
    /// # }
    /// ```
    pub fn run(&self, slots: &mut [Slot], processor: &FrameProcessor<'_>) {
        if slots.is_empty() {
            return;
        }
        match self.scheduling {
            Scheduling::Static => self.run_static(slots, processor),
            Scheduling::WorkStealing => self.pool.install(|| {
                slots
                    .par_iter_mut()
                    .for_each(|slot| slot.process(processor))
            }),
        }
    }

    fn run_static(&self, slots: &mut [Slot], processor: &FrameProcessor<'_>) {
        let (per_worker, remainder) = partition(slots.len(), self.workers);
        let (dispatched, rest) = slots.split_at_mut(remainder.start);

        self.pool.in_place_scope(|scope| {
            if per_worker > 0 {
                for chunk in dispatched.chunks_mut(per_worker) {
                    scope.spawn(move |_| {
                        chunk.iter_mut().for_each(|slot| slot.process(processor));
                    });
                }
            }
            rest.iter_mut().for_each(|slot| slot.process(processor));
        });
    }
}

/// Outcome counts of one batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    /// 0-based batch number within the run.
    pub index: usize,
    pub frames: usize,
    pub success: usize,
    pub skipped: usize,
    pub transform_failed: usize,
    pub io_failed: usize,
    pub elapsed: Duration,
}

impl BatchReport {
    pub fn from_results<I>(index: usize, results: I, elapsed: Duration) -> Self
    where
        I: IntoIterator<Item = ExtractionResult>,
    {
        let mut report = Self {
            index,
            elapsed,
            ..Self::default()
        };
        for result in results {
            report.frames += 1;
            match result {
                ExtractionResult::Success => report.success += 1,
                ExtractionResult::SkippedIncomplete => report.skipped += 1,
                ExtractionResult::TransformFailed => report.transform_failed += 1,
                ExtractionResult::IoFailed => report.io_failed += 1,
            }
        }
        report
    }

    /// Frames per second over the batch wall-clock time.
    pub fn fps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.frames as f64 / secs
        } else {
            0.0
        }
    }
}
