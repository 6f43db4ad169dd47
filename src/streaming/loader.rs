//! Async tile loading on a bounded worker pool
//!
//! Loads run as blocking tasks on a dedicated tokio runtime whose blocking
//! pool is capped at `io_threads`. Workers only read through the persistence
//! pipeline; results come back to the primary context over a channel and are
//! installed there.

use std::collections::HashSet;

use tokio::runtime::{Builder, Runtime};
use tokio::sync::mpsc;

use crate::core::error::Error;
use crate::streaming::persistence::PersistencePipeline;
use crate::tile::{TileCoord, TileEntity};

/// Result of an async tile load
#[derive(Debug)]
pub enum LoadResult {
    /// Decoded from storage
    Loaded(TileEntity),
    /// Storage had nothing usable (absent, or the load failed and was logged)
    Missing(TileCoord),
    /// The worker task died before producing a result
    Failed(TileCoord, String),
}

impl LoadResult {
    /// Coordinate this result belongs to
    pub fn coord(&self) -> TileCoord {
        match self {
            LoadResult::Loaded(tile) => tile.coord(),
            LoadResult::Missing(coord) => *coord,
            LoadResult::Failed(coord, _) => *coord,
        }
    }
}

/// Worker pool plus completion channel
pub struct AsyncLoader {
    pipeline: PersistencePipeline,
    result_tx: mpsc::UnboundedSender<LoadResult>,
    result_rx: mpsc::UnboundedReceiver<LoadResult>,
    /// Coordinates submitted and not yet received
    pending: HashSet<TileCoord>,
    runtime: Runtime,
}

impl AsyncLoader {
    /// Create a loader with at most `io_threads` concurrent loads
    pub fn new(pipeline: PersistencePipeline, io_threads: usize) -> Result<Self, Error> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(io_threads.max(1))
            .thread_name("chunkhold-io")
            .enable_all()
            .build()
            .map_err(|e| Error::Executor(format!("Failed to create load runtime: {}", e)))?;

        let (result_tx, result_rx) = mpsc::unbounded_channel();

        log::debug!("Async loader started with {} I/O threads", io_threads);

        Ok(Self {
            pipeline,
            result_tx,
            result_rx,
            pending: HashSet::new(),
            runtime,
        })
    }

    /// Submit a load
    ///
    /// Returns `false` if the tile is already pending, `true` if the load was queued.
    pub fn submit(&mut self, coord: TileCoord) -> bool {
        if !self.pending.insert(coord) {
            return false;
        }

        let pipeline = self.pipeline.clone();
        let result_tx = self.result_tx.clone();
        let handle = self.runtime.spawn_blocking(move || pipeline.load(coord));

        self.runtime.spawn(async move {
            let result = match handle.await {
                Ok(Some(tile)) => LoadResult::Loaded(tile),
                Ok(None) => LoadResult::Missing(coord),
                Err(e) => {
                    log::error!("Load task for tile {} died: {}", coord, e);
                    LoadResult::Failed(coord, e.to_string())
                }
            };
            // Receiver lives as long as the loader; a send failure means shutdown
            let _ = result_tx.send(result);
        });

        log::trace!("Submitted async load for tile {}", coord);
        true
    }

    /// Take one completed load without blocking
    pub fn try_recv(&mut self) -> Option<LoadResult> {
        let result = self.result_rx.try_recv().ok()?;
        self.pending.remove(&result.coord());
        Some(result)
    }

    /// Wait for the next completed load; `None` when nothing is pending
    ///
    /// Must not be called from inside an async context.
    pub fn recv_blocking(&mut self) -> Option<LoadResult> {
        if self.pending.is_empty() {
            return None;
        }
        let result = self.result_rx.blocking_recv()?;
        self.pending.remove(&result.coord());
        Some(result)
    }

    /// Number of submitted loads not yet received
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Check if a load for `coord` is in flight
    pub fn is_pending(&self, coord: TileCoord) -> bool {
        self.pending.contains(&coord)
    }
}
