//! Prioritized, deduplicated tile loading.
//!
//! Tiles submit requests during culling (from any traversal thread). Once
//! per frame the engine dispatches the highest-priority requests to a
//! worker pool and drains finished loads for merging at the sync point.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, unbounded};
use quadterra_common::TileKey;

use crate::source::{LoadError, TerrainTileModel, TileDataSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Idle,
    Queued,
    InFlight,
}

impl RequestState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Queued,
            2 => Self::InFlight,
            _ => Self::Idle,
        }
    }
}

/// A tile's standing request for its data. One per tile, created lazily
/// the first time the tile asks to load.
#[derive(Debug)]
pub struct LoadRequest {
    key: TileKey,
    state: AtomicU8,
    priority: AtomicU32,
    frame: AtomicU64,
}

impl LoadRequest {
    pub fn new(key: TileKey) -> Self {
        Self {
            key,
            state: AtomicU8::new(RequestState::Idle as u8),
            priority: AtomicU32::new(0f32.to_bits()),
            frame: AtomicU64::new(0),
        }
    }

    pub fn key(&self) -> TileKey {
        self.key
    }

    pub fn state(&self) -> RequestState {
        RequestState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Priority of the most recent submission.
    pub fn priority(&self) -> f32 {
        f32::from_bits(self.priority.load(Ordering::Relaxed))
    }

    /// Frame of the most recent submission.
    pub fn last_frame(&self) -> u64 {
        self.frame.load(Ordering::Relaxed)
    }

    fn set_state(&self, state: RequestState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn transition(&self, from: RequestState, to: RequestState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Accepts load submissions from traversal threads.
pub trait Loader: Send + Sync {
    fn load(&self, request: &Arc<LoadRequest>, priority: f32, frame: u64);
}

/// Load order for a tile. Shallow tiles first by default; `high_res_first`
/// flips the LOD term. Within a LOD, nearer tiles come first.
pub fn load_priority(lod: u32, num_lods: u32, distance: f32, lod0_range: f32, high_res_first: bool) -> f32 {
    let lod_term = if high_res_first {
        lod as f32
    } else {
        num_lods as f32 - lod as f32
    };
    lod_term + (1.0 - distance / lod0_range)
}

/// A finished load waiting to be merged.
#[derive(Debug)]
pub struct CompletedLoad {
    pub request: Arc<LoadRequest>,
    pub result: Result<TerrainTileModel, LoadError>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DispatchStats {
    pub dispatched: usize,
    /// Requests that lost out to the per-frame budget.
    pub deferred: usize,
}

/// [`Loader`] that collects one frame's submissions and runs the best
/// `max_loads_per_frame` of them on a worker pool (or inline with no
/// workers).
pub struct PriorityLoader {
    source: Arc<dyn TileDataSource>,
    max_loads_per_frame: usize,
    pending: Mutex<HashMap<TileKey, Arc<LoadRequest>>>,
    jobs: Option<Sender<Arc<LoadRequest>>>,
    completed_tx: Sender<CompletedLoad>,
    completed_rx: Receiver<CompletedLoad>,
    in_flight: Arc<AtomicUsize>,
    workers: Vec<JoinHandle<()>>,
}

impl PriorityLoader {
    pub fn new(
        source: Arc<dyn TileDataSource>,
        threads: usize,
        max_loads_per_frame: usize,
    ) -> std::io::Result<Self> {
        let (completed_tx, completed_rx) = unbounded();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let mut workers = Vec::with_capacity(threads);
        let jobs = if threads == 0 {
            None
        } else {
            let (job_tx, job_rx) = unbounded::<Arc<LoadRequest>>();
            for i in 0..threads {
                let jobs = job_rx.clone();
                let done = completed_tx.clone();
                let source = Arc::clone(&source);
                let in_flight = Arc::clone(&in_flight);
                let handle = std::thread::Builder::new()
                    .name(format!("tile-loader-{i}"))
                    .spawn(move || {
                        while let Ok(request) = jobs.recv() {
                            let result = source.create_tile_model(&request.key);
                            in_flight.fetch_sub(1, Ordering::AcqRel);
                            if done.send(CompletedLoad { request, result }).is_err() {
                                break;
                            }
                        }
                    })?;
                workers.push(handle);
            }
            Some(job_tx)
        };
        Ok(Self {
            source,
            max_loads_per_frame: max_loads_per_frame.max(1),
            pending: Mutex::new(HashMap::new()),
            jobs,
            completed_tx,
            completed_rx,
            in_flight,
            workers,
        })
    }

    /// Submissions collected since the last dispatch.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Start the highest-priority submissions. The rest go back to idle and
    /// must be resubmitted by a later traversal.
    pub fn dispatch(&self) -> DispatchStats {
        let mut batch: Vec<Arc<LoadRequest>> = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            pending.drain().map(|(_, r)| r).collect()
        };
        batch.sort_by(|a, b| b.priority().total_cmp(&a.priority()).then_with(|| a.key.cmp(&b.key)));

        let take = batch.len().min(self.max_loads_per_frame);
        let deferred = batch.split_off(take);
        for request in &deferred {
            request.transition(RequestState::Queued, RequestState::Idle);
        }

        let mut stats = DispatchStats {
            dispatched: 0,
            deferred: deferred.len(),
        };
        for request in batch {
            if !request.transition(RequestState::Queued, RequestState::InFlight) {
                continue;
            }
            stats.dispatched += 1;
            tracing::trace!(key = %request.key, priority = request.priority(), "dispatch load");
            self.in_flight.fetch_add(1, Ordering::AcqRel);
            match &self.jobs {
                Some(jobs) => {
                    if let Err(err) = jobs.send(request) {
                        // Workers gone; finish inline rather than lose the request.
                        self.run_inline(err.into_inner());
                    }
                }
                None => self.run_inline(request),
            }
        }
        stats
    }

    fn run_inline(&self, request: Arc<LoadRequest>) {
        let result = self.source.create_tile_model(&request.key);
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
        // The receiver lives in `self`, so this cannot fail.
        let _ = self.completed_tx.send(CompletedLoad { request, result });
    }

    /// Finished loads, in completion order. Their requests return to idle.
    pub fn drain(&self) -> Vec<CompletedLoad> {
        let done: Vec<CompletedLoad> = self.completed_rx.try_iter().collect();
        for load in &done {
            load.request.set_state(RequestState::Idle);
        }
        done
    }
}

impl Loader for PriorityLoader {
    fn load(&self, request: &Arc<LoadRequest>, priority: f32, frame: u64) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        match request.state() {
            RequestState::InFlight => {}
            RequestState::Queued => {
                if priority > request.priority() {
                    request.priority.store(priority.to_bits(), Ordering::Relaxed);
                }
                request.frame.store(frame, Ordering::Relaxed);
            }
            RequestState::Idle => {
                request.priority.store(priority.to_bits(), Ordering::Relaxed);
                request.frame.store(frame, Ordering::Relaxed);
                request.set_state(RequestState::Queued);
                pending.insert(request.key, Arc::clone(request));
            }
        }
    }
}

impl Drop for PriorityLoader {
    fn drop(&mut self) {
        self.jobs.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl std::fmt::Debug for PriorityLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityLoader")
            .field("max_loads_per_frame", &self.max_loads_per_frame)
            .field("workers", &self.workers.len())
            .field("in_flight", &self.in_flight_count())
            .finish_non_exhaustive()
    }
}
