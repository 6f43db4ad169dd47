use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;

use glam::{DVec3, IVec3};

use chunkhold::core::{Error, GeneratorError, ResidencyConfig};
use chunkhold::events::{RecordingSink, TileEvent};
use chunkhold::generation::Generator;
use chunkhold::streaming::{
    AcquireStatus, DiskStorage, MemoryStorage, ResidencyPolicy, TileProvider, TileStorage,
};
use chunkhold::tile::{DynamicObject, TileCoord, TileEntity};

#[derive(Clone, Default)]
struct Counters {
    synthesized: Rc<Cell<u32>>,
    decorated: Rc<Cell<u32>>,
}

struct CountingGenerator {
    counters: Counters,
}

impl Generator for CountingGenerator {
    fn name(&self) -> &str {
        "counting"
    }

    fn synthesize(&mut self, coord: TileCoord) -> Result<TileEntity, GeneratorError> {
        self.counters.synthesized.set(self.counters.synthesized.get() + 1);
        Ok(TileEntity::new(coord))
    }

    fn decorate(&mut self, _tile: &mut TileEntity) {
        self.counters.decorated.set(self.counters.decorated.get() + 1);
    }
}

struct PanickingGenerator;

impl Generator for PanickingGenerator {
    fn name(&self) -> &str {
        "panicky"
    }

    fn synthesize(&mut self, _coord: TileCoord) -> Result<TileEntity, GeneratorError> {
        panic!("noise table exhausted");
    }

    fn decorate(&mut self, _tile: &mut TileEntity) {}
}

struct FailingGenerator;

impl Generator for FailingGenerator {
    fn name(&self) -> &str {
        "failing"
    }

    fn synthesize(&mut self, _coord: TileCoord) -> Result<TileEntity, GeneratorError> {
        Err("biome lookup failed".into())
    }

    fn decorate(&mut self, _tile: &mut TileEntity) {}
}

/// Keeps exactly one tile in use
struct InUse(TileCoord);

impl ResidencyPolicy for InUse {
    fn in_use(&self, coord: TileCoord) -> bool {
        coord == self.0
    }
}

struct World {
    provider: TileProvider,
    events: RecordingSink,
    counters: Counters,
}

fn world_with(storage: Arc<dyn TileStorage>, config: ResidencyConfig) -> World {
    chunkhold::core::logging::init_for_tests();
    let events = RecordingSink::new();
    let counters = Counters::default();
    let provider = TileProvider::new(config, storage)
        .expect("provider")
        .with_generator(CountingGenerator {
            counters: counters.clone(),
        })
        .with_events(events.clone());
    World {
        provider,
        events,
        counters,
    }
}

fn world(storage: Arc<dyn TileStorage>) -> World {
    world_with(storage, ResidencyConfig::default())
}

fn seeded(coords: &[TileCoord]) -> Arc<MemoryStorage> {
    let storage = MemoryStorage::new();
    for &coord in coords {
        storage.insert(&TileEntity::new(coord)).expect("seed");
    }
    Arc::new(storage)
}

fn loaded_events(events: &RecordingSink, coord: TileCoord) -> Vec<bool> {
    events
        .events()
        .into_iter()
        .filter_map(|e| match e {
            TileEvent::Loaded {
                coord: c,
                newly_generated,
            } if c == coord => Some(newly_generated),
            _ => None,
        })
        .collect()
}

/// Every neighbor bit matches the residency of that neighbor
fn assert_neighbor_masks_consistent(provider: &TileProvider) {
    for tile in provider.tiles() {
        for dx in -2..=2 {
            for dz in -2..=2 {
                if dx == 0 && dz == 0 {
                    continue;
                }
                let neighbor = tile.coord().offset(dx, dz);
                assert_eq!(
                    tile.is_neighbor_loaded(dx, dz),
                    provider.is_resident(neighbor),
                    "tile {} neighbor {}",
                    tile.coord(),
                    neighbor
                );
            }
        }
    }
}

// --- Acquisition ---

#[test]
fn test_acquire_is_idempotent() {
    let mut w = world(Arc::new(MemoryStorage::new()));
    let coord = TileCoord::new(-3, 8);

    w.provider.acquire(coord).expect("acquire").mark_dirty();
    let again = w.provider.acquire(coord).expect("acquire again");
    assert_eq!(again.coord(), coord);
    assert!(again.is_dirty());

    assert_eq!(w.provider.resident_count(), 1);
    assert_eq!(loaded_events(&w.events, coord).len(), 1);
    assert_eq!(w.counters.synthesized.get(), 1);
}

#[test]
fn test_generation_scenario() {
    let mut w = world(Arc::new(MemoryStorage::new()));
    let coord = TileCoord::new(5, 5);

    let tile = w.provider.acquire(coord).expect("acquire");
    assert!(tile.is_populated());
    assert!(tile.is_attached());

    assert_eq!(loaded_events(&w.events, coord), vec![true]);
    assert_eq!(
        w.events
            .count(|e| *e == TileEvent::Populated { coord }),
        1
    );
    assert_eq!(w.counters.synthesized.get(), 1);
    assert_eq!(w.counters.decorated.get(), 1);
    assert!(w.provider.is_resident(coord));
}

#[test]
fn test_stored_tile_is_loaded_not_generated() {
    let coord = TileCoord::new(1, 1);
    let mut w = world(seeded(&[coord]));
    w.provider.set_world_time(77);

    let tile = w.provider.acquire(coord).expect("acquire");
    assert_eq!(tile.last_saved(), 77);
    assert_eq!(loaded_events(&w.events, coord), vec![false]);
    assert_eq!(w.counters.synthesized.get(), 0);
    assert_eq!(w.provider.stats().loaded_sync, 1);
}

#[test]
fn test_load_failure_falls_back_to_generation() {
    let storage = Arc::new(MemoryStorage::new());
    let coord = TileCoord::new(2, 2);
    storage.insert_raw(coord, vec![0x13, 0x37, 0x00]);

    let mut w = world(storage);
    assert!(w.provider.acquire(coord).is_ok());
    assert_eq!(loaded_events(&w.events, coord), vec![true]);
    assert_eq!(w.counters.synthesized.get(), 1);
}

#[test]
fn test_generation_panic_is_fatal() {
    chunkhold::core::logging::init_for_tests();
    let mut provider = TileProvider::new(
        ResidencyConfig::default(),
        Arc::new(MemoryStorage::new()),
    )
    .expect("provider")
    .with_generator(PanickingGenerator);
    let coord = TileCoord::new(-7, 12);

    let err = provider.acquire(coord).unwrap_err();
    assert!(err.is_fatal());
    match err {
        Error::Generation(failure) => {
            assert_eq!(failure.coord, coord);
            assert_eq!(failure.key, coord.key());
            assert_eq!(failure.generator, "panicky");
            assert!(failure.source.to_string().contains("noise table exhausted"));
        }
        other => panic!("unexpected error {other}"),
    }
    assert!(!provider.is_resident(coord));
}

#[test]
fn test_generation_error_is_fatal() {
    let mut provider = TileProvider::new(
        ResidencyConfig::default(),
        Arc::new(MemoryStorage::new()),
    )
    .expect("provider")
    .with_generator(FailingGenerator);

    let err = provider
        .acquire_async(TileCoord::new(0, 0), |_| panic!("must not run"))
        .unwrap_err();
    assert!(err.is_fatal());
    assert!(err.to_string().contains("biome lookup failed"));
}

#[test]
fn test_no_generator_creates_empty_tile() {
    let mut provider = TileProvider::new(
        ResidencyConfig::default(),
        Arc::new(MemoryStorage::new()),
    )
    .expect("provider");

    let tile = provider.acquire(TileCoord::new(4, 4)).expect("acquire");
    assert!(tile.attributes.is_empty());
    assert!(!tile.is_populated());
}

#[test]
fn test_tile_at_block() {
    let mut w = world(Arc::new(MemoryStorage::new()));
    let tile = w
        .provider
        .tile_at_block(IVec3::new(-1, 70, 33))
        .expect("acquire");
    assert_eq!(tile.coord(), TileCoord::new(-1, 2));
}

#[test]
fn test_acquire_if_resident_never_loads() {
    let coord = TileCoord::new(0, 0);
    let mut w = world(seeded(&[coord]));
    assert!(w.provider.acquire_if_resident(coord).is_none());
    assert!(!w.provider.is_resident(coord));
    assert!(w.events.events().is_empty());
}

// --- Async acquisition ---

#[test]
fn test_async_completion_runs_after_install() {
    let coord = TileCoord::new(9, -9);
    let mut w = world(seeded(&[coord]));

    let seen = Rc::new(Cell::new(false));
    let flag = seen.clone();
    let events = w.events.clone();
    let status = w
        .provider
        .acquire_async(coord, move |tile| {
            assert_eq!(tile.coord(), coord);
            assert!(tile.is_attached());
            assert_eq!(loaded_events(&events, coord), vec![false]);
            flag.set(true);
        })
        .expect("acquire_async");

    assert_eq!(status, AcquireStatus::Pending);
    assert!(!seen.get());
    assert!(!w.provider.is_resident(coord));

    w.provider.finish_pending_loads().expect("finish");
    assert!(seen.get());
    assert!(w.provider.is_resident(coord));
    assert_eq!(w.provider.stats().loaded_async, 1);
}

#[test]
fn test_async_process_completed_loads() {
    let coords: Vec<TileCoord> = (0..6).map(|i| TileCoord::new(i, 0)).collect();
    let mut w = world(seeded(&coords));

    let done = Rc::new(Cell::new(0));
    for &coord in &coords {
        let done = done.clone();
        w.provider
            .acquire_async(coord, move |_| done.set(done.get() + 1))
            .expect("acquire_async");
    }

    let mut handled = 0;
    while handled < coords.len() {
        handled += w.provider.process_completed_loads().expect("process");
        std::thread::yield_now();
    }
    assert_eq!(done.get(), coords.len());
    assert_eq!(w.provider.resident_count(), coords.len());
    assert_eq!(w.provider.pending_loads(), 0);
    assert_neighbor_masks_consistent(&w.provider);
}

#[test]
fn test_async_resident_is_ready() {
    let mut w = world(Arc::new(MemoryStorage::new()));
    let coord = TileCoord::new(0, 0);
    w.provider.acquire(coord).expect("acquire");

    let ran = Rc::new(Cell::new(false));
    let flag = ran.clone();
    let status = w
        .provider
        .acquire_async(coord, move |_| flag.set(true))
        .expect("acquire_async");
    assert_eq!(status, AcquireStatus::Ready);
    assert!(ran.get());
    assert_eq!(w.provider.pending_loads(), 0);
}

#[test]
fn test_async_absent_generates_inline() {
    let mut w = world(Arc::new(MemoryStorage::new()));
    let coord = TileCoord::new(3, 0);

    let ran = Rc::new(Cell::new(false));
    let flag = ran.clone();
    let status = w
        .provider
        .acquire_async(coord, move |tile| flag.set(tile.is_populated()))
        .expect("acquire_async");
    assert_eq!(status, AcquireStatus::Ready);
    assert!(ran.get());
    assert_eq!(loaded_events(&w.events, coord), vec![true]);
}

// --- Neighbors ---

#[test]
fn test_neighbor_symmetry_on_load_and_eviction() {
    let mut w = world(Arc::new(MemoryStorage::new()));
    for x in 0..6 {
        for z in 0..6 {
            w.provider.acquire(TileCoord::new(x, z)).expect("acquire");
        }
    }
    assert_neighbor_masks_consistent(&w.provider);

    let center = TileCoord::new(2, 3);
    assert_eq!(w.provider.tile(center).map(|t| t.neighbor_count()), Some(24));

    assert!(w.provider.unload(center));
    assert_neighbor_masks_consistent(&w.provider);
    let corner = w.provider.tile(TileCoord::new(0, 1)).expect("resident");
    assert!(!corner.is_neighbor_loaded(2, 2));

    w.provider.acquire(center).expect("reacquire");
    assert_neighbor_masks_consistent(&w.provider);
}

// --- Eviction ---

#[test]
fn test_drain_batch_is_bounded() {
    let mut w = world(Arc::new(MemoryStorage::new()));
    for i in 0..30 {
        w.provider.acquire(TileCoord::new(i, 0)).expect("acquire");
    }
    assert_eq!(w.provider.mark_all_candidates(), 30);

    assert_eq!(w.provider.drain_batch(10, false), 10);
    assert_eq!(w.provider.resident_count(), 20);
    assert_eq!(w.provider.queued_count(), 20);
    assert_neighbor_masks_consistent(&w.provider);

    assert_eq!(w.provider.drain_batch(100, false), 20);
    assert_eq!(w.provider.resident_count(), 0);
    assert_eq!(w.provider.drain_batch(100, false), 0);
}

#[test]
fn test_evicted_tile_is_saved_and_reloaded() {
    let storage = Arc::new(MemoryStorage::new());
    let mut w = world(storage.clone());
    let coord = TileCoord::new(6, 1);

    let tile = w.provider.acquire(coord).expect("acquire");
    tile.add_object(DynamicObject::new(4, "cart", DVec3::new(97.0, 64.0, 20.0)));
    assert!(w.provider.mark_candidate(coord));
    assert_eq!(w.provider.drain_batch(10, false), 1);
    assert!(storage.exists(coord));
    assert_eq!(w.events.count(|e| *e == TileEvent::Unloading { coord }), 1);

    let tile = w.provider.acquire(coord).expect("reload");
    assert_eq!(tile.dynamic_objects().len(), 1);
    assert!(tile.is_populated());
    assert_eq!(loaded_events(&w.events, coord), vec![true, false]);
    assert_eq!(w.counters.decorated.get(), 1);
}

#[test]
fn test_reacquire_takes_tile_off_eviction_queue() {
    let mut w = world(Arc::new(MemoryStorage::new()));
    let coord = TileCoord::new(3, 3);
    w.provider.acquire(coord).expect("acquire");
    assert!(w.provider.mark_candidate(coord));

    w.provider.acquire(coord).expect("reacquire");
    assert!(!w.provider.is_queued(coord));
    assert_eq!(w.provider.drain_batch(100, false), 0);
    assert!(w.provider.is_resident(coord));

    assert!(w.provider.mark_candidate(coord));
    let status = w
        .provider
        .acquire_async(coord, |_| {})
        .expect("acquire_async");
    assert_eq!(status, AcquireStatus::Ready);
    assert!(!w.provider.is_queued(coord));
    assert_eq!(w.provider.drain_batch(100, false), 0);
    assert!(w.provider.is_resident(coord));
}

#[test]
fn test_acquire_if_resident_leaves_candidate_queued() {
    let mut w = world(Arc::new(MemoryStorage::new()));
    let coord = TileCoord::new(4, 4);
    w.provider.acquire(coord).expect("acquire");
    assert!(w.provider.mark_candidate(coord));

    assert!(w.provider.acquire_if_resident(coord).is_some());
    assert!(w.provider.is_queued(coord));
    assert_eq!(w.provider.drain_batch(100, false), 1);
    assert!(!w.provider.is_resident(coord));
}

#[test]
fn test_in_use_tile_is_never_evicted() {
    let pinned = TileCoord::new(0, 0);
    let mut w = world(Arc::new(MemoryStorage::new()));
    w.provider.set_policy(InUse(pinned));

    for x in -1..=1 {
        for z in -1..=1 {
            w.provider.acquire(TileCoord::new(x, z)).expect("acquire");
        }
    }
    for _ in 0..3 {
        w.provider.mark_all_candidates();
        w.provider.drain_batch(100, true);
    }
    assert!(w.provider.is_resident(pinned));
    assert_eq!(w.provider.resident_count(), 1);
    assert!(!w.provider.is_queued(pinned));
}

#[test]
fn test_recent_update_defers_unload() {
    let mut w = world(Arc::new(MemoryStorage::new()));
    let coord = TileCoord::new(1, 1);
    w.provider.set_world_time(100);
    w.provider.acquire(coord).expect("acquire").begin_deferred_update();
    assert!(!w.provider.mark_candidate(coord));

    w.provider
        .acquire(coord)
        .expect("acquire")
        .finish_deferred_update(100);
    w.provider.set_world_time(119);
    assert!(!w.provider.mark_candidate(coord));
    w.provider.set_world_time(120);
    assert!(w.provider.mark_candidate(coord));
}

#[test]
fn test_recent_update_ignored_when_not_deferring() {
    let config = ResidencyConfig {
        defer_unload_for_pending_updates: false,
        ..Default::default()
    };
    let mut w = world_with(Arc::new(MemoryStorage::new()), config);
    let coord = TileCoord::new(1, 1);
    w.provider.acquire(coord).expect("acquire").begin_deferred_update();
    assert!(w.provider.mark_candidate(coord));
}

#[test]
fn test_object_keeps_region_loaded() {
    let mut w = world(Arc::new(MemoryStorage::new()));
    let coord = TileCoord::new(-4, -4);
    let mut anchor = DynamicObject::new(1, "anchor", DVec3::new(-60.0, 64.0, -60.0));
    anchor.keeps_region_loaded = true;
    w.provider.acquire(coord).expect("acquire").add_object(anchor);

    assert!(!w.provider.mark_candidate(coord));
    assert_eq!(w.provider.queued_count(), 0);
}

#[test]
fn test_cancelled_unload_has_no_side_effects() {
    let mut w = world(Arc::new(MemoryStorage::new()));
    let coord = TileCoord::new(2, 0);
    let neighbor = TileCoord::new(3, 0);
    w.provider.acquire(coord).expect("acquire");
    w.provider.acquire(neighbor).expect("acquire");
    w.events.veto_unload(coord);

    w.provider.mark_all_candidates();
    assert_eq!(w.provider.drain_batch(10, false), 1);

    assert!(w.provider.is_resident(coord));
    assert!(!w.provider.is_queued(coord));
    let tile = w.provider.tile(coord).expect("resident");
    assert!(tile.is_dirty());
    assert!(tile.is_attached());
    assert!(!tile.is_neighbor_loaded(1, 0));
    assert_eq!(w.provider.stats().unload_cancelled, 1);

    w.events.allow_unload(coord);
    w.provider.mark_candidate(coord);
    assert_eq!(w.provider.drain_batch(10, false), 1);
    assert!(!w.provider.is_resident(coord));
}

// --- Flush ---

#[test]
fn test_flush_batch_cap() {
    let mut w = world(Arc::new(MemoryStorage::new()));
    for i in 0..50 {
        // Populated tiles come out dirty
        w.provider.acquire(TileCoord::new(i, i)).expect("acquire");
    }

    assert!(!w.provider.flush_all(false));
    assert_eq!(w.provider.stats().saves, 24);
    assert!(!w.provider.flush_all(false));
    assert_eq!(w.provider.stats().saves, 48);
    assert!(w.provider.flush_all(false));
    assert_eq!(w.provider.stats().saves, 50);
    assert!(w.provider.tiles().all(|t| !t.is_dirty()));
}

#[test]
fn test_forced_flush_has_no_cap() {
    let mut w = world(Arc::new(MemoryStorage::new()));
    for i in 0..40 {
        w.provider.acquire(TileCoord::new(0, i)).expect("acquire");
    }
    assert!(w.provider.flush_all(true));
    assert_eq!(w.provider.stats().saves, 40);
}

#[test]
fn test_periodic_autosave_of_object_tiles() {
    let mut w = world(Arc::new(MemoryStorage::new()));
    let coord = TileCoord::new(0, 0);
    w.provider
        .acquire(coord)
        .expect("acquire")
        .add_object(DynamicObject::new(1, "cart", DVec3::ZERO));
    w.provider.flush_all(false);
    let saves = w.provider.stats().saves;

    w.provider.set_world_time(599);
    w.provider.flush_all(false);
    assert_eq!(w.provider.stats().saves, saves);

    w.provider.set_world_time(600);
    w.provider.flush_all(false);
    assert_eq!(w.provider.stats().saves, saves + 1);
}

// --- Disk storage ---

#[test]
fn test_disk_world_survives_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let coord = TileCoord::new(-2, 5);
    {
        let storage = Arc::new(DiskStorage::open(dir.path()).expect("open"));
        let mut w = world(storage);
        w.provider
            .acquire(coord)
            .expect("acquire")
            .add_object(DynamicObject::new(11, "boat", DVec3::new(-20.0, 62.0, 90.0)));
        w.provider.close().expect("close");
    }

    let storage = Arc::new(DiskStorage::open(dir.path()).expect("reopen"));
    let mut w = world(storage);
    w.provider.set_world_time(5);
    let tile = w.provider.acquire(coord).expect("acquire");
    assert_eq!(tile.dynamic_objects()[0].kind, "boat");
    assert!(tile.is_populated());
    assert_eq!(tile.last_saved(), 5);
    assert_eq!(loaded_events(&w.events, coord), vec![false]);
    assert_eq!(w.counters.synthesized.get(), 0);
}

#[test]
fn test_lock_contention_keeps_tile_dirty() {
    let dir = tempfile::tempdir().expect("tempdir");
    let storage = Arc::new(DiskStorage::open(dir.path()).expect("open"));
    let mut w = world(storage);
    let coord = TileCoord::new(0, 0);
    w.provider.acquire(coord).expect("acquire");

    // Another process opens the same world
    let _intruder = DiskStorage::open(dir.path()).expect("second open");

    assert!(w.provider.flush_all(true));
    assert!(w.provider.stats().save_failures > 0);
    assert_eq!(w.provider.stats().saves, 0);
    assert!(w.provider.tile(coord).is_some_and(TileEntity::is_dirty));

    // Eviction still removes the tile
    assert!(w.provider.unload(coord));
    assert!(!w.provider.is_resident(coord));
}

// --- Misc ---

#[test]
fn test_config_from_json_drives_provider() {
    let config = ResidencyConfig::from_json(r#"{ "flush_batch_size": 2, "io_threads": 1 }"#)
        .expect("config");
    let mut w = world_with(Arc::new(MemoryStorage::new()), config);
    for i in 0..5 {
        w.provider.acquire(TileCoord::new(i, 0)).expect("acquire");
    }
    assert!(!w.provider.flush_all(false));
    assert_eq!(w.provider.stats().saves, 2);
}

#[test]
fn test_invalid_config_rejected() {
    let config = ResidencyConfig {
        drain_batch_size: 0,
        ..Default::default()
    };
    let result = TileProvider::new(config, Arc::new(MemoryStorage::new()));
    assert!(matches!(result, Err(Error::Config(_))));
}
