//! Tile lifecycle events

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use crate::tile::TileCoord;

/// Lifecycle notification fired by the residency manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileEvent {
    /// Tile became resident
    Loaded { coord: TileCoord, newly_generated: bool },
    /// Tile was decorated for the first time
    Populated { coord: TileCoord },
    /// Tile is about to be saved and evicted; may be cancelled
    Unloading { coord: TileCoord },
}

impl TileEvent {
    pub fn coord(&self) -> TileCoord {
        match *self {
            TileEvent::Loaded { coord, .. }
            | TileEvent::Populated { coord }
            | TileEvent::Unloading { coord } => coord,
        }
    }
}

/// Listener answer; only `Unloading` honours `Cancel`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventOutcome {
    #[default]
    Proceed,
    Cancel,
}

/// Receives tile lifecycle events
pub trait EventSink {
    fn notify(&mut self, event: &TileEvent) -> EventOutcome;
}

/// Sink that ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn notify(&mut self, _event: &TileEvent) -> EventOutcome {
        EventOutcome::Proceed
    }
}

/// Sink that logs every event at debug level
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn notify(&mut self, event: &TileEvent) -> EventOutcome {
        log::debug!("{:?}", event);
        EventOutcome::Proceed
    }
}

#[derive(Debug, Default)]
struct Recording {
    events: Vec<TileEvent>,
    vetoed: HashSet<TileCoord>,
}

/// Sink that records events and can veto unloads
///
/// Clones share the same log, so a handle kept outside the provider sees
/// everything the provider fired.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    inner: Rc<RefCell<Recording>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel every future unload of `coord`
    pub fn veto_unload(&self, coord: TileCoord) {
        self.inner.borrow_mut().vetoed.insert(coord);
    }

    /// Stop cancelling unloads of `coord`
    pub fn allow_unload(&self, coord: TileCoord) {
        self.inner.borrow_mut().vetoed.remove(&coord);
    }

    /// Every event received so far
    pub fn events(&self) -> Vec<TileEvent> {
        self.inner.borrow().events.clone()
    }

    /// Number of recorded events matching `pred`
    pub fn count(&self, pred: impl Fn(&TileEvent) -> bool) -> usize {
        self.inner.borrow().events.iter().filter(|e| pred(e)).count()
    }

    pub fn clear(&self) {
        self.inner.borrow_mut().events.clear();
    }
}

impl EventSink for RecordingSink {
    fn notify(&mut self, event: &TileEvent) -> EventOutcome {
        let mut inner = self.inner.borrow_mut();
        inner.events.push(*event);
        match event {
            TileEvent::Unloading { coord } if inner.vetoed.contains(coord) => EventOutcome::Cancel,
            _ => EventOutcome::Proceed,
        }
    }
}
