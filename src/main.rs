//! Residency demo - walks a focal point across a generated world on disk.
//!
//! Usage: cargo run --release -- [OPTIONS]
//!
//! Options:
//!   --world <DIR>     World directory (default: "worlds/demo")
//!   --config <FILE>   ResidencyConfig JSON (default: built-in defaults)
//!   --ticks <N>       Ticks to simulate (default: 2000)
//!   --radius <R>      Tiles kept around the focal tile (default: 4)
//!   --seed <SEED>     Generator seed (default: 12345)
//!
//! Set CHUNKHOLD_DEBUG_PORT to serve residency snapshots over TCP.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;

use chunkhold::core::{Error, ResidencyConfig};
use chunkhold::events::LogSink;
use chunkhold::generation::noise_gen::RUIN;
use chunkhold::generation::{CreatureKind, NoiseGenerator, NoiseParams};
use chunkhold::streaming::{DiskStorage, FocusPolicy, TileProvider};
use chunkhold::tile::{TileCoord, TileEntity};
use chunkhold_debug::{DebugCommand, DebugHandler, DebugResponse, ResponseData, TileInfo};

/// Ticks between eviction passes
const EVICT_EVERY: u64 = 20;
/// Ticks between periodic flushes and status lines
const FLUSH_EVERY: u64 = 100;

struct Options {
    world: PathBuf,
    config: Option<PathBuf>,
    ticks: u64,
    radius: u32,
    seed: u32,
}

/// Residency state published to the debug server
#[derive(Default)]
struct Snapshot {
    description: String,
    resident: usize,
    queued: usize,
    pending_loads: usize,
    world_time: u64,
    counters: BTreeMap<String, u64>,
    tiles: HashMap<(i32, i32), TileInfo>,
}

struct AppDebugHandler {
    state: Arc<StdMutex<Snapshot>>,
}

impl DebugHandler for AppDebugHandler {
    fn handle_command(&mut self, cmd: DebugCommand) -> DebugResponse {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match cmd {
            DebugCommand::Ping => DebugResponse::pong(),
            DebugCommand::Describe => DebugResponse::ok(ResponseData::Summary {
                description: state.description.clone(),
                resident: state.resident,
                queued: state.queued,
                pending_loads: state.pending_loads,
                world_time: state.world_time,
            }),
            DebugCommand::GetStats => DebugResponse::ok(ResponseData::Stats {
                world_time: state.world_time,
                counters: state.counters.clone(),
            }),
            DebugCommand::GetTileInfo { x, z } => {
                let info = state
                    .tiles
                    .get(&(x, z))
                    .cloned()
                    .unwrap_or_else(|| TileInfo::absent(x, z));
                DebugResponse::ok(ResponseData::TileInfo(info))
            }
        }
    }
}

fn main() {
    chunkhold::core::logging::init();

    let args: Vec<String> = std::env::args().collect();
    let opts = Options {
        world: parse_str_arg(&args, "--world")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("worlds/demo")),
        config: parse_str_arg(&args, "--config").map(PathBuf::from),
        ticks: parse_arg(&args, "--ticks").unwrap_or(2000),
        radius: parse_arg(&args, "--radius").unwrap_or(4),
        seed: parse_arg(&args, "--seed").unwrap_or(12345),
    };

    if let Err(e) = run(&opts) {
        if e.is_fatal() {
            log::error!("Fatal: {}", e);
        } else {
            log::error!("{}", e);
        }
        std::process::exit(1);
    }
}

fn run(opts: &Options) -> Result<(), Error> {
    let config = match &opts.config {
        Some(path) => {
            log::info!("Loading residency config from {}", path.display());
            ResidencyConfig::from_json_file(path)?
        }
        None => ResidencyConfig::default(),
    };
    let drain_batch = config.drain_batch_size;

    let storage = Arc::new(DiskStorage::open(&opts.world)?);
    let generator = NoiseGenerator::new(NoiseParams {
        seed: opts.seed,
        ..Default::default()
    });
    let origin = TileCoord::new(0, 0);
    let mut provider = TileProvider::new(config, storage)?
        .with_generator(generator)
        .with_events(LogSink)
        .with_policy(FocusPolicy::new(origin, opts.radius).with_protected_origin(1));

    let debug_state = start_debug_server();
    let radius = opts.radius as i32;
    let start = Instant::now();
    let mut focus = origin;

    for tick in 1..=opts.ticks {
        provider.advance_time(1);

        // Wander east with a slow north-south sway
        let block_x = tick as i32 * 2;
        let block_z = ((tick as f64 * 0.01).sin() * 240.0) as i32;
        focus = TileCoord::from_block(block_x, block_z);
        provider.set_policy(FocusPolicy::new(focus, opts.radius).with_protected_origin(1));

        provider.acquire(focus)?;
        for dx in -radius..=radius {
            for dz in -radius..=radius {
                provider.acquire_async(focus.offset(dx, dz), |_| {})?;
            }
        }
        provider.process_completed_loads()?;

        if tick % EVICT_EVERY == 0 {
            provider.mark_all_candidates();
            provider.drain_batch(drain_batch, false);
        }
        if tick % FLUSH_EVERY == 0 {
            provider.flush_all(false);
            log::info!("tick {}: focus {} - {}", tick, focus, provider.describe());
        }
        if let Some(state) = &debug_state {
            if tick % EVICT_EVERY == 0 {
                publish(&provider, state);
            }
        }
    }

    provider.finish_pending_loads()?;

    let here = focus.block_origin(64);
    match provider.nearest_feature(RUIN, here) {
        Some(pos) => log::info!("Nearest ruin to {} is at {}", focus, pos),
        None => log::info!("No ruins seen"),
    }
    let herd = provider.mob_spawn_table(CreatureKind::Creature, here);
    log::info!("{} creature kinds can spawn at {}", herd.len(), here);

    provider.close()?;

    let stats = provider.stats();
    log::info!(
        "Simulated {} ticks in {:.2}s: {} loaded ({} async), {} generated, {} unloaded, {} save failures",
        opts.ticks,
        start.elapsed().as_secs_f64(),
        stats.loaded_sync + stats.loaded_async,
        stats.loaded_async,
        stats.generated,
        stats.unloaded,
        stats.save_failures
    );
    Ok(())
}

/// Start the debug server on its own runtime thread if CHUNKHOLD_DEBUG_PORT is set
fn start_debug_server() -> Option<Arc<StdMutex<Snapshot>>> {
    let raw = std::env::var("CHUNKHOLD_DEBUG_PORT").ok()?;
    let port = raw.parse().unwrap_or_else(|_| {
        log::warn!(
            "Invalid CHUNKHOLD_DEBUG_PORT {:?}; using {}",
            raw,
            chunkhold_debug::DEFAULT_PORT
        );
        chunkhold_debug::DEFAULT_PORT
    });

    let state = Arc::new(StdMutex::new(Snapshot::default()));
    let handler_state = state.clone();
    std::thread::spawn(move || {
        let rt = match tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
        {
            Ok(rt) => rt,
            Err(e) => {
                log::error!("Failed to create debug runtime: {}", e);
                return;
            }
        };
        rt.block_on(async {
            let handler = Arc::new(tokio::sync::Mutex::new(AppDebugHandler {
                state: handler_state,
            }));
            let server = chunkhold_debug::DebugServer::start(handler, port);
            if let Err(e) = server.await {
                log::error!("Debug server stopped: {}", e);
            }
        });
    });

    Some(state)
}

fn publish(provider: &TileProvider, state: &StdMutex<Snapshot>) {
    let counters = match serde_json::to_value(provider.stats()) {
        Ok(serde_json::Value::Object(map)) => map
            .into_iter()
            .filter_map(|(name, value)| value.as_u64().map(|v| (name, v)))
            .collect(),
        _ => BTreeMap::new(),
    };
    let tiles = provider
        .tiles()
        .map(|tile| {
            let coord = tile.coord();
            ((coord.x, coord.z), tile_info(tile, provider.is_queued(coord)))
        })
        .collect();

    let mut snapshot = state.lock().unwrap_or_else(|e| e.into_inner());
    *snapshot = Snapshot {
        description: provider.describe(),
        resident: provider.resident_count(),
        queued: provider.queued_count(),
        pending_loads: provider.pending_loads(),
        world_time: provider.world_time(),
        counters,
        tiles,
    };
}

fn tile_info(tile: &TileEntity, queued: bool) -> TileInfo {
    TileInfo {
        x: tile.coord().x,
        z: tile.coord().z,
        resident: true,
        queued,
        dirty: tile.is_dirty(),
        populated: tile.is_populated(),
        neighbor_count: tile.neighbor_count(),
        object_count: tile.dynamic_objects().len(),
        last_saved: tile.last_saved(),
    }
}

fn parse_arg<T: std::str::FromStr>(args: &[String], flag: &str) -> Option<T> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_str_arg(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}
