//! Tile residency manager
//!
//! [`TileProvider`] owns the residency cache, the eviction queue and the async
//! loader for one world. It runs on a single primary context: every method
//! takes `&mut self` and workers never touch the cache. Loads finished by the
//! worker pool are installed when the caller drains them with
//! [`TileProvider::process_completed_loads`].

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use glam::IVec3;
use serde::Serialize;

use crate::core::config::ResidencyConfig;
use crate::core::error::{Error, GenerationFailure, GeneratorError};
use crate::events::{EventOutcome, EventSink, NoopSink, TileEvent};
use crate::generation::{CreatureKind, Generator, SpawnEntry};
use crate::streaming::cache::ResidencyCache;
use crate::streaming::eviction::EvictionQueue;
use crate::streaming::loader::{AsyncLoader, LoadResult};
use crate::streaming::persistence::PersistencePipeline;
use crate::streaming::policy::{NoPolicy, ResidencyPolicy};
use crate::streaming::storage::TileStorage;
use crate::tile::{TileCoord, TileEntity, NEIGHBOR_RADIUS};

/// Callback run on the primary context once an async acquisition is resident
pub type Completion = Box<dyn FnOnce(&mut TileEntity)>;

/// Offsets of the three tiles that complete a population square
const POPULATE_SQUARE: [(i32, i32); 3] = [(1, 0), (0, 1), (1, 1)];

/// Answer to [`TileProvider::acquire_async`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireStatus {
    /// Tile was resident (or generated inline); the completion already ran
    Ready,
    /// A load is in flight; the completion runs once it is installed
    Pending,
}

/// Counters describing residency activity since creation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResidencyStats {
    pub loaded_sync: u64,
    pub loaded_async: u64,
    pub generated: u64,
    pub populated: u64,
    pub unloaded: u64,
    pub unload_cancelled: u64,
    pub saves: u64,
    pub save_failures: u64,
    /// Async results dropped because the tile became resident another way
    pub discarded_loads: u64,
}

/// Residency manager for one world
pub struct TileProvider {
    config: ResidencyConfig,
    cache: ResidencyCache,
    eviction: EvictionQueue,
    persistence: PersistencePipeline,
    loader: AsyncLoader,
    /// Completions queued behind in-flight loads
    waiting: HashMap<TileCoord, Vec<Completion>>,
    /// In-flight loads whose tile was installed by a synchronous acquire
    superseded: HashSet<TileCoord>,
    generator: Option<Box<dyn Generator>>,
    events: Box<dyn EventSink>,
    policy: Box<dyn ResidencyPolicy>,
    world_time: u64,
    saving_enabled: bool,
    stats: ResidencyStats,
}

impl TileProvider {
    /// Create a provider over `storage` with no generator, events or policy
    pub fn new(config: ResidencyConfig, storage: Arc<dyn TileStorage>) -> Result<Self, Error> {
        config.validate()?;
        let persistence = PersistencePipeline::new(storage);
        let loader = AsyncLoader::new(persistence.clone(), config.io_threads)?;

        log::info!(
            "Tile provider ready (drain batch {}, flush batch {}, {} I/O threads)",
            config.drain_batch_size,
            config.flush_batch_size,
            config.io_threads
        );

        Ok(Self {
            cache: ResidencyCache::new(config.initial_capacity),
            eviction: EvictionQueue::new(),
            persistence,
            loader,
            waiting: HashMap::new(),
            superseded: HashSet::new(),
            generator: None,
            events: Box::new(NoopSink),
            policy: Box::new(NoPolicy),
            world_time: 0,
            saving_enabled: true,
            stats: ResidencyStats::default(),
            config,
        })
    }

    pub fn with_generator(mut self, generator: impl Generator + 'static) -> Self {
        self.generator = Some(Box::new(generator));
        self
    }

    pub fn with_events(mut self, events: impl EventSink + 'static) -> Self {
        self.events = Box::new(events);
        self
    }

    pub fn with_policy(mut self, policy: impl ResidencyPolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    /// Replace the residency policy (e.g. when the focus moves)
    pub fn set_policy(&mut self, policy: impl ResidencyPolicy + 'static) {
        self.policy = Box::new(policy);
    }

    pub fn config(&self) -> &ResidencyConfig {
        &self.config
    }

    // --- Acquisition ---

    /// Get a tile, loading or generating it inline if needed
    pub fn acquire(&mut self, coord: TileCoord) -> Result<&mut TileEntity, Error> {
        if !self.cache.contains_key(coord) {
            self.load_or_generate(coord)?;
        }
        self.eviction.remove(coord);
        self.cache.get_mut(coord).ok_or(Error::NotResident(coord))
    }

    /// Get a tile without blocking on storage
    ///
    /// Resident tiles (and tiles that have to be generated) are handed to
    /// `completion` before this returns. Tiles present in storage are loaded
    /// by the worker pool; `completion` then runs from
    /// [`process_completed_loads`](Self::process_completed_loads) after the
    /// tile is installed. Only one load per coordinate is in flight.
    pub fn acquire_async(
        &mut self,
        coord: TileCoord,
        completion: impl FnOnce(&mut TileEntity) + 'static,
    ) -> Result<AcquireStatus, Error> {
        if let Some(tile) = self.cache.get_mut(coord) {
            self.eviction.remove(coord);
            completion(tile);
            return Ok(AcquireStatus::Ready);
        }

        if self.loader.is_pending(coord) || self.persistence.exists(coord) {
            self.waiting
                .entry(coord)
                .or_default()
                .push(Box::new(completion));
            // No-op when a load is already in flight
            self.loader.submit(coord);
            return Ok(AcquireStatus::Pending);
        }

        let tile = self.generate(coord)?;
        self.install(tile, true);
        let tile = self.cache.get_mut(coord).ok_or(Error::NotResident(coord))?;
        completion(tile);
        Ok(AcquireStatus::Ready)
    }

    /// Get a tile only if it is already resident
    ///
    /// Unlike [`acquire`](Self::acquire) this leaves an eviction candidate queued.
    pub fn acquire_if_resident(&mut self, coord: TileCoord) -> Option<&mut TileEntity> {
        self.cache.get_mut(coord)
    }

    /// Get the tile containing a block position
    pub fn tile_at_block(&mut self, pos: IVec3) -> Result<&mut TileEntity, Error> {
        self.acquire(TileCoord::from_block_pos(pos))
    }

    /// Read-only view of a resident tile
    pub fn tile(&self, coord: TileCoord) -> Option<&TileEntity> {
        self.cache.get(coord)
    }

    /// Iterate over resident tiles
    pub fn tiles(&self) -> impl Iterator<Item = &TileEntity> {
        self.cache.values()
    }

    /// Install every async load that has finished
    ///
    /// Returns the number of results handled. Fails only when a generation
    /// fallback fails.
    pub fn process_completed_loads(&mut self) -> Result<usize, Error> {
        let mut handled = 0;
        while let Some(result) = self.loader.try_recv() {
            self.complete_load(result)?;
            handled += 1;
        }
        Ok(handled)
    }

    /// Block until every in-flight load has been installed
    pub fn finish_pending_loads(&mut self) -> Result<(), Error> {
        while let Some(result) = self.loader.recv_blocking() {
            self.complete_load(result)?;
        }
        Ok(())
    }

    /// Number of loads in flight
    pub fn pending_loads(&self) -> usize {
        self.loader.pending_count()
    }

    fn complete_load(&mut self, result: LoadResult) -> Result<(), Error> {
        let coord = result.coord();

        if self.superseded.remove(&coord) || self.cache.contains_key(coord) {
            log::debug!("Discarding async load of tile {}: already installed", coord);
            self.stats.discarded_loads += 1;
            if self.cache.contains_key(coord) {
                self.run_completions(coord);
            } else if self.waiting.contains_key(&coord) {
                // Tile was installed and evicted while this load was in flight
                self.loader.submit(coord);
            }
            return Ok(());
        }

        match result {
            LoadResult::Loaded(tile) => {
                self.stats.loaded_async += 1;
                self.install(tile, false);
            }
            LoadResult::Missing(_) => {
                let tile = self.generate(coord)?;
                self.install(tile, true);
            }
            LoadResult::Failed(_, reason) => {
                log::warn!("Async load of tile {} failed ({}); generating", coord, reason);
                let tile = self.generate(coord)?;
                self.install(tile, true);
            }
        }
        Ok(())
    }

    fn load_or_generate(&mut self, coord: TileCoord) -> Result<(), Error> {
        if self.persistence.exists(coord) {
            if let Some(tile) = self.persistence.load(coord) {
                self.stats.loaded_sync += 1;
                self.install(tile, false);
                return Ok(());
            }
            log::warn!("Tile {} is in storage but couldn't be loaded; generating", coord);
        }
        let tile = self.generate(coord)?;
        self.install(tile, true);
        Ok(())
    }

    /// Synthesize a tile; errors and panics both become a [`GenerationFailure`]
    fn generate(&mut self, coord: TileCoord) -> Result<TileEntity, Error> {
        let Some(generator) = self.generator.as_mut() else {
            self.stats.generated += 1;
            return Ok(TileEntity::new(coord));
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| generator.synthesize(coord)));
        let source: GeneratorError = match outcome {
            Ok(Ok(tile)) if tile.coord() == coord => {
                self.stats.generated += 1;
                return Ok(tile);
            }
            Ok(Ok(tile)) => format!("generator returned tile {}", tile.coord()).into(),
            Ok(Err(e)) => e,
            Err(payload) => panic_message(payload).into(),
        };

        let failure = GenerationFailure {
            coord,
            key: coord.key(),
            generator: generator.name().to_string(),
            source,
        };
        log::error!("{}", failure);
        Err(failure.into())
    }

    /// Make a tile resident and wire it into the world
    fn install(&mut self, tile: TileEntity, newly_generated: bool) {
        let coord = tile.coord();
        if self.loader.is_pending(coord) {
            self.superseded.insert(coord);
        }

        self.cache.put(coord, tile);
        self.eviction.remove(coord);
        if let Some(tile) = self.cache.get_mut(coord) {
            tile.attach_objects();
        }
        self.events.notify(&TileEvent::Loaded {
            coord,
            newly_generated,
        });
        self.link_neighbors(coord);

        if !newly_generated {
            let now = self.world_time;
            if let Some(tile) = self.cache.get_mut(coord) {
                tile.set_last_saved(now);
                if let Some(generator) = self.generator.as_mut() {
                    generator.recreate_derived_structures(tile);
                }
            }
        }

        if self.config.populate_requires_neighbors {
            self.populate_squares_around(coord);
        } else {
            self.populate(coord);
        }

        log::trace!(
            "Installed tile {} ({})",
            coord,
            if newly_generated { "generated" } else { "loaded" }
        );
        self.run_completions(coord);
    }

    /// Set neighbor bits on the new tile and on every resident neighbor
    fn link_neighbors(&mut self, coord: TileCoord) {
        let mut resident = Vec::new();
        for dx in -NEIGHBOR_RADIUS..=NEIGHBOR_RADIUS {
            for dz in -NEIGHBOR_RADIUS..=NEIGHBOR_RADIUS {
                if dx == 0 && dz == 0 {
                    continue;
                }
                if let Some(neighbor) = self.cache.get_mut(coord.offset(dx, dz)) {
                    neighbor.set_neighbor_loaded(-dx, -dz);
                    resident.push((dx, dz));
                }
            }
        }
        if let Some(tile) = self.cache.get_mut(coord) {
            for (dx, dz) in resident {
                tile.set_neighbor_loaded(dx, dz);
            }
        }
    }

    /// Clear the bits of a departed tile on every resident neighbor
    fn unlink_neighbors(&mut self, coord: TileCoord) {
        for dx in -NEIGHBOR_RADIUS..=NEIGHBOR_RADIUS {
            for dz in -NEIGHBOR_RADIUS..=NEIGHBOR_RADIUS {
                if dx == 0 && dz == 0 {
                    continue;
                }
                if let Some(neighbor) = self.cache.get_mut(coord.offset(dx, dz)) {
                    neighbor.set_neighbor_unloaded(-dx, -dz);
                }
            }
        }
    }

    /// Re-check the four squares a newly resident tile can complete
    fn populate_squares_around(&mut self, coord: TileCoord) {
        for (dx, dz) in [(0, 0), (-1, 0), (0, -1), (-1, -1)] {
            let origin = coord.offset(dx, dz);
            let complete = POPULATE_SQUARE
                .iter()
                .all(|&(ox, oz)| self.cache.contains_key(origin.offset(ox, oz)));
            if complete {
                self.populate(origin);
            }
        }
    }

    fn populate(&mut self, coord: TileCoord) {
        let Some(generator) = self.generator.as_mut() else {
            return;
        };
        let Some(tile) = self.cache.get_mut(coord) else {
            return;
        };
        if tile.is_populated() {
            return;
        }

        generator.decorate(tile);
        tile.set_populated(true);
        tile.mark_dirty();

        self.stats.populated += 1;
        self.events.notify(&TileEvent::Populated { coord });
        log::trace!("Populated tile {}", coord);
    }

    fn run_completions(&mut self, coord: TileCoord) {
        let Some(waiters) = self.waiting.remove(&coord) else {
            return;
        };
        if let Some(tile) = self.cache.get_mut(coord) {
            for completion in waiters {
                completion(&mut *tile);
            }
        }
    }

    // --- Generator queries ---

    /// Spawn table at `pos`; empty without a generator
    pub fn mob_spawn_table(&self, kind: CreatureKind, pos: IVec3) -> Vec<SpawnEntry> {
        self.generator
            .as_ref()
            .map(|g| g.mob_spawn_table(kind, pos))
            .unwrap_or_default()
    }

    /// Closest feature of type `kind`; `None` without a generator
    pub fn nearest_feature(&self, kind: &str, pos: IVec3) -> Option<IVec3> {
        self.generator.as_ref()?.nearest_feature(kind, pos)
    }

    // --- Eviction ---

    /// Queue a resident tile for unload unless something keeps it resident
    ///
    /// Returns true when the tile was queued. Tiles in the protected region
    /// are never queued but are marked for saving.
    pub fn mark_candidate(&mut self, coord: TileCoord) -> bool {
        let now = self.world_time;
        let Some(tile) = self.cache.get_mut(coord) else {
            return false;
        };

        if self.policy.in_use(coord) {
            return false;
        }
        if self.config.defer_unload_for_pending_updates
            && tile.has_recent_update(now, self.config.recency_window)
        {
            return false;
        }
        if tile.keeps_region_loaded() {
            return false;
        }

        tile.mark_must_save();
        if self.policy.in_protected_region(coord) {
            return false;
        }
        self.eviction.insert(coord);
        true
    }

    /// Run [`mark_candidate`](Self::mark_candidate) over every resident tile
    pub fn mark_all_candidates(&mut self) -> usize {
        let mut queued = 0;
        for coord in self.cache.coords() {
            if self.mark_candidate(coord) {
                queued += 1;
            }
        }
        queued
    }

    /// Unload at most `max_count` queued tiles
    ///
    /// Does nothing while saving is disabled unless `force` is set. Returns
    /// the number of tiles unloaded.
    pub fn drain_batch(&mut self, max_count: usize, force: bool) -> usize {
        if !self.saving_enabled && !force {
            return 0;
        }

        let batch = self.eviction.take_batch(max_count);
        if batch.is_empty() {
            return 0;
        }

        let mut unloaded = 0;
        for coord in &batch {
            if self.unload_tile(*coord) {
                unloaded += 1;
            }
        }
        self.persistence.flush();

        log::debug!(
            "Drained {} of {} eviction candidates ({} still queued)",
            unloaded,
            batch.len(),
            self.eviction.len()
        );
        unloaded
    }

    /// Unload one tile immediately
    pub fn unload(&mut self, coord: TileCoord) -> bool {
        self.eviction.remove(coord);
        let unloaded = self.unload_tile(coord);
        if unloaded {
            self.persistence.flush();
        }
        unloaded
    }

    /// Unload every resident tile; returns the number unloaded
    pub fn unload_all(&mut self) -> usize {
        let mut unloaded = 0;
        for coord in self.cache.coords() {
            if self.unload_tile(coord) {
                unloaded += 1;
            }
        }
        self.eviction.clear();
        self.persistence.flush();
        log::info!("Unloaded {} tiles", unloaded);
        unloaded
    }

    fn unload_tile(&mut self, coord: TileCoord) -> bool {
        if !self.cache.contains_key(coord) {
            return false;
        }
        if self.events.notify(&TileEvent::Unloading { coord }) == EventOutcome::Cancel {
            log::debug!("Unload of tile {} cancelled", coord);
            self.stats.unload_cancelled += 1;
            return false;
        }

        let now = self.world_time;
        if let Some(tile) = self.cache.get_mut(coord) {
            tile.detach_objects();
            tile.set_last_saved(now);
            if self.persistence.save(tile) {
                tile.clear_dirty();
                self.stats.saves += 1;
            } else {
                self.stats.save_failures += 1;
            }
            if !self.persistence.save_dynamic_objects(tile) {
                self.stats.save_failures += 1;
            }
        }

        self.cache.remove(coord);
        self.unlink_neighbors(coord);
        self.stats.unloaded += 1;
        log::trace!("Unloaded tile {}", coord);
        true
    }

    // --- Persistence ---

    /// Save tiles that need it
    ///
    /// A forced flush first writes the dynamic objects of every tile and has
    /// no cap. Otherwise at most `flush_batch_size` tiles are saved and
    /// `false` is returned when the cap cut the pass short.
    pub fn flush_all(&mut self, force: bool) -> bool {
        let now = self.world_time;
        let mut saved = 0;

        for coord in self.cache.coords() {
            let Some(tile) = self.cache.get_mut(coord) else {
                continue;
            };
            if force && !self.persistence.save_dynamic_objects(tile) {
                self.stats.save_failures += 1;
            }
            if !tile.needs_save(force, now, self.config.autosave_interval) {
                continue;
            }

            tile.set_last_saved(now);
            if self.persistence.save(tile) {
                tile.clear_dirty();
                self.stats.saves += 1;
            } else {
                self.stats.save_failures += 1;
            }
            saved += 1;

            if !force && saved >= self.config.flush_batch_size {
                log::debug!("Flush stopped after {} saves", saved);
                return false;
            }
        }

        if saved > 0 {
            log::debug!("Flushed {} tiles", saved);
        }
        true
    }

    /// Finish in-flight loads, save everything and close the storage
    pub fn close(&mut self) -> Result<(), Error> {
        self.finish_pending_loads()?;
        self.flush_all(true);
        self.persistence.close();
        log::info!("Tile provider closed with {} resident tiles", self.cache.len());
        Ok(())
    }

    // --- State ---

    pub fn is_resident(&self, coord: TileCoord) -> bool {
        self.cache.contains_key(coord)
    }

    pub fn is_queued(&self, coord: TileCoord) -> bool {
        self.eviction.contains(coord)
    }

    pub fn resident_count(&self) -> usize {
        self.cache.len()
    }

    pub fn queued_count(&self) -> usize {
        self.eviction.len()
    }

    /// One-line summary for diagnostics
    pub fn describe(&self) -> String {
        format!(
            "ResidencyCache: {} resident, {} queued for eviction",
            self.cache.len(),
            self.eviction.len()
        )
    }

    pub fn world_time(&self) -> u64 {
        self.world_time
    }

    pub fn set_world_time(&mut self, time: u64) {
        self.world_time = time;
    }

    pub fn advance_time(&mut self, ticks: u64) {
        self.world_time = self.world_time.saturating_add(ticks);
    }

    pub fn saving_enabled(&self) -> bool {
        self.saving_enabled
    }

    /// Disable to pause eviction (flushes still run)
    pub fn set_saving_enabled(&mut self, enabled: bool) {
        self.saving_enabled = enabled;
    }

    pub fn stats(&self) -> &ResidencyStats {
        &self.stats
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        return (*msg).to_string();
    }
    if let Some(msg) = payload.downcast_ref::<String>() {
        return msg.clone();
    }
    "generator panicked".to_string()
}
