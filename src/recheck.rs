//! Change detection between the persisted state of the previous build and
//! the current declarations.
//!
//! A `Recheck` carries one dirty bit through a sequence of comparisons.  Each
//! comparison is skipped once the bit is set, so the first changed category
//! is the only one reported; later categories are not inspected.

use crate::path::{PathDiff, PathRecordSet};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Why a stage was found dirty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecheckEvent {
    FlagChanged,
    DirChanged,
    ExternalLibChanged,
    PathAdded,
    PathRemoved,
    PathUpdated,
    SourceAdded,
    SourceRemoved,
    SourceUpdated,
    InputAdded,
    InputRemoved,
    InputUpdated,
    OutputChanged,
    CommandChanged,
}

/// Receives recheck decisions.  Purely informational: nothing an observer
/// does affects what gets rebuilt.
pub trait RecheckObserver: Send + Sync {
    /// `path` names the added, removed or updated path for path, source,
    /// input and missing output events.
    fn notify(&self, name: &str, event: RecheckEvent, path: Option<&Path>);
}

type Notification = (String, RecheckEvent, Option<PathBuf>);

/// An observer that remembers every event, in order.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<Notification>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events reported for one target or generator.
    pub fn events_for(&self, name: &str) -> Vec<RecheckEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _, _)| n == name)
            .map(|(_, e, _)| *e)
            .collect()
    }

    /// Events for one target or generator together with the path each one
    /// named, if any.
    pub fn changes_for(&self, name: &str) -> Vec<(RecheckEvent, Option<PathBuf>)> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _, _)| n == name)
            .map(|(_, e, p)| (*e, p.clone()))
            .collect()
    }

    pub fn count(&self, event: RecheckEvent) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, e, _)| *e == event)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl RecheckObserver for EventLog {
    fn notify(&self, name: &str, event: RecheckEvent, path: Option<&Path>) {
        self.events
            .lock()
            .unwrap()
            .push((name.to_owned(), event, path.map(Path::to_path_buf)));
    }
}

/// The three event kinds a path comparison can raise.
#[derive(Debug, Clone, Copy)]
pub struct PathEvents {
    pub added: RecheckEvent,
    pub removed: RecheckEvent,
    pub updated: RecheckEvent,
}

pub const PATH_EVENTS: PathEvents = PathEvents {
    added: RecheckEvent::PathAdded,
    removed: RecheckEvent::PathRemoved,
    updated: RecheckEvent::PathUpdated,
};

pub const INPUT_EVENTS: PathEvents = PathEvents {
    added: RecheckEvent::InputAdded,
    removed: RecheckEvent::InputRemoved,
    updated: RecheckEvent::InputUpdated,
};

/// Which sources the compile stage has to run, and which are carried over
/// from the previous build untouched.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SourceSelection {
    pub compile: Vec<PathBuf>,
    pub dummy: Vec<PathBuf>,
}

pub struct Recheck<'a> {
    name: &'a str,
    observer: Option<&'a dyn RecheckObserver>,
    dirty: bool,
}

impl<'a> Recheck<'a> {
    pub fn new(name: &'a str, observer: Option<&'a dyn RecheckObserver>) -> Self {
        Recheck {
            name,
            observer,
            dirty: false,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Mark dirty without a notification, e.g. for a missing previous state
    /// or an unfinished previous stage.
    pub fn set_dirty(&mut self) {
        self.dirty = true;
    }

    fn fire(&mut self, event: RecheckEvent) {
        self.fire_for(event, None);
    }

    fn fire_for(&mut self, event: RecheckEvent, path: Option<&Path>) {
        self.dirty = true;
        tracing::debug!(name = self.name, ?event, ?path, "recheck");
        if let Some(observer) = self.observer {
            observer.notify(self.name, event, path);
        }
    }

    /// Fire `event` unless an earlier check already made this dirty.
    pub fn trigger(&mut self, event: RecheckEvent) {
        if !self.dirty {
            self.fire(event);
        }
    }

    /// Like `trigger`, naming the path responsible.
    pub fn trigger_path(&mut self, event: RecheckEvent, path: &Path) {
        if !self.dirty {
            self.fire_for(event, Some(path));
        }
    }

    /// Compare two collections as unordered sets.
    fn changed_as_sets<T: Ord>(&mut self, previous: &[T], current: &[T], event: RecheckEvent) {
        if self.dirty {
            return;
        }
        let previous: BTreeSet<&T> = previous.iter().collect();
        let current: BTreeSet<&T> = current.iter().collect();
        if previous != current {
            self.fire(event);
        }
    }

    /// Flags are compared as sets: reordering flags is not a change.
    pub fn flags(&mut self, previous: &[String], current: &[String]) {
        self.changed_as_sets(previous, current, RecheckEvent::FlagChanged)
    }

    pub fn external_libs(&mut self, previous: &[String], current: &[String]) {
        self.changed_as_sets(previous, current, RecheckEvent::ExternalLibChanged)
    }

    pub fn dirs(&mut self, previous: &BTreeSet<PathBuf>, current: &BTreeSet<PathBuf>) {
        if !self.dirty && previous != current {
            self.fire(RecheckEvent::DirChanged);
        }
    }

    /// Any inequality between `previous` and `current` fires `event`.
    pub fn changed<T: PartialEq + ?Sized>(&mut self, previous: &T, current: &T, event: RecheckEvent) {
        if !self.dirty && previous != current {
            self.fire(event);
        }
    }

    /// A removed path is reported first; otherwise the first added or
    /// updated path in iteration order.
    pub fn paths(&mut self, previous: &PathRecordSet, current: &PathRecordSet, events: PathEvents) {
        if self.dirty {
            return;
        }
        if let Some(gone) = previous
            .iter()
            .find(|p| !current.contains(p.pathname.as_path()))
        {
            self.fire_for(events.removed, Some(gone.pathname.as_path()));
            return;
        }
        for record in current {
            match previous.get(record.pathname.as_path()) {
                None => {
                    self.fire_for(events.added, Some(record.pathname.as_path()));
                    return;
                }
                Some(prev) if record.is_updated_from(prev) => {
                    self.fire_for(events.updated, Some(record.pathname.as_path()));
                    return;
                }
                Some(_) => {}
            }
        }
    }

    /// Per-source selection for the compile stage.  When the stage is already
    /// dirty every source is compiled; otherwise only added and updated ones,
    /// each reported individually.
    pub fn sources(&mut self, previous: &PathRecordSet, current: &PathRecordSet) -> SourceSelection {
        if self.dirty {
            return SourceSelection {
                compile: current.iter().map(|r| r.pathname.clone()).collect(),
                dummy: Vec::new(),
            };
        }
        let PathDiff {
            added,
            removed,
            updated,
            unchanged,
        } = crate::path::diff(previous, current);
        for path in &removed {
            self.fire_for(RecheckEvent::SourceRemoved, Some(path.as_path()));
        }
        for path in &added {
            self.fire_for(RecheckEvent::SourceAdded, Some(path.as_path()));
        }
        for path in &updated {
            self.fire_for(RecheckEvent::SourceUpdated, Some(path.as_path()));
        }
        let mut compile = added;
        compile.extend(updated);
        compile.sort();
        SourceSelection {
            compile,
            dummy: unchanged,
        }
    }
}
