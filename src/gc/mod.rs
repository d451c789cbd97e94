//! Stop-the-world mark-and-sweep collector.
//!
//! A cycle runs: mark, reference consistency pass, sweep userdata,
//! finalizers, sweep strings, tables, prototypes and closures, buffer
//! shrink, threshold reset, then the post-collection hook. While a cycle is
//! running, `collecting` is set and further triggers are ignored.

mod finalize;
mod mark;
mod sweep;

use std::fmt;
use std::time::Instant;

use log::debug;
use serde::Serialize;

use crate::error::RuntimeError;
use crate::runtime::Runtime;
use crate::runtime::tagmethod::{NIL_TAG, TagEvent};
use crate::runtime::value::Value;

pub(crate) const LOG_TARGET: &str = "reclaim::gc";

/// Objects reclaimed, per kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FreedCounts {
    pub strings: usize,
    pub userdata: usize,
    pub tables: usize,
    pub closures: usize,
    pub protos: usize,
}

impl FreedCounts {
    pub fn total(&self) -> usize {
        self.strings + self.userdata + self.tables + self.closures + self.protos
    }

    fn add(&mut self, other: &FreedCounts) {
        self.strings += other.strings;
        self.userdata += other.userdata;
        self.tables += other.tables;
        self.closures += other.closures;
        self.protos += other.protos;
    }
}

/// Collector statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GcStats {
    pub cycles: usize,
    pub total_pause_us: u64,
    pub max_pause_us: u64,
    /// Triggers that arrived while a cycle was already running
    pub deferred_triggers: usize,
    pub finalizers_run: usize,
    pub finalizer_errors: usize,
    /// Held references that turned collected
    pub refs_collected: usize,
    pub last_freed: FreedCounts,
    pub total_freed: FreedCounts,
}

impl fmt::Display for GcStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[GC] Collections: {}, Total pause: {}us, Max pause: {}us, Freed: {}, Finalizers: {}, Refs collected: {}",
            self.cycles,
            self.total_pause_us,
            self.max_pause_us,
            self.total_freed.total(),
            self.finalizers_run,
            self.refs_collected
        )
    }
}

pub(crate) struct GcState {
    pub threshold: usize,
    pub collecting: bool,
    pub stats: GcStats,
}

impl GcState {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold,
            collecting: false,
            stats: GcStats::default(),
        }
    }
}

impl Runtime {
    pub fn gc_stats(&self) -> &GcStats {
        &self.gc.stats
    }

    pub fn gc_threshold(&self) -> usize {
        self.gc.threshold
    }

    pub fn is_collecting(&self) -> bool {
        self.gc.collecting
    }

    pub fn set_gc_enabled(&mut self, enabled: bool) {
        self.config.gc_enabled = enabled;
    }

    /// Run a full cycle if the live-block estimate reached the threshold.
    /// Returns whether a cycle ran.
    pub fn check_gc(&mut self) -> Result<bool, RuntimeError> {
        if !self.config.gc_enabled || self.heap.nblocks < self.gc.threshold {
            return Ok(false);
        }
        if self.gc.collecting {
            self.gc.stats.deferred_triggers += 1;
            return Ok(false);
        }
        self.run_cycle(false)?;
        Ok(true)
    }

    /// Unconditional full cycle. Ignored (and counted) when a cycle is
    /// already running.
    pub fn collect_garbage(&mut self) -> Result<(), RuntimeError> {
        if self.gc.collecting {
            self.gc.stats.deferred_triggers += 1;
            debug!(target: LOG_TARGET, "nested collection request ignored");
            return Ok(());
        }
        self.run_cycle(false)
    }

    /// Reclaim every object, fixed strings included, running finalizers
    /// for all userdata. Roots are not marked, so the runtime is left
    /// without globals; meant for teardown.
    pub fn collect_all(&mut self) -> Result<(), RuntimeError> {
        if self.gc.collecting {
            self.gc.stats.deferred_triggers += 1;
            return Ok(());
        }
        self.run_cycle(true)
    }

    /// Tear the runtime down, finalizing every userdata.
    pub fn close(mut self) -> Result<(), RuntimeError> {
        self.collect_all()
    }

    fn run_cycle(&mut self, all: bool) -> Result<(), RuntimeError> {
        let start = Instant::now();
        let blocks_before = self.heap.nblocks;
        debug!(
            target: LOG_TARGET,
            "cycle {} start{}: {} blocks, threshold {}",
            self.gc.stats.cycles + 1,
            if all { " (all)" } else { "" },
            blocks_before,
            self.gc.threshold
        );

        self.gc.collecting = true;
        self.lock.enter();
        let result = self.cycle(all);
        self.lock.leave();
        self.gc.collecting = false;

        let pause = start.elapsed().as_micros() as u64;
        let stats = &mut self.gc.stats;
        stats.cycles += 1;
        stats.total_pause_us += pause;
        stats.max_pause_us = stats.max_pause_us.max(pause);
        debug!(
            target: LOG_TARGET,
            "cycle {} done in {}us: {} -> {} blocks, freed {}, next threshold {}",
            stats.cycles,
            pause,
            blocks_before,
            self.heap.nblocks,
            stats.last_freed.total(),
            self.gc.threshold
        );

        let notified = if all { Ok(()) } else { self.notify_collected() };
        result.and(notified)
    }

    /// The cycle proper. Every phase runs even when an earlier one
    /// reported an error; the first error is returned.
    fn cycle(&mut self, all: bool) -> Result<(), RuntimeError> {
        let mut first_error: Option<RuntimeError> = None;
        let mut keep_first = |r: Result<(), RuntimeError>| {
            if let Err(e) = r {
                first_error.get_or_insert(e);
            }
        };

        let mut refs_collected = 0;
        if !all {
            self.mark_all();
            let heap = &self.heap;
            refs_collected = self.refs.invalidate(|v| heap.is_marked(v));
        }

        let mut freed = FreedCounts::default();
        let (_, shrunk) = self.sweep_userdata(all);
        keep_first(shrunk);

        let finalized = self.run_finalizers();
        freed.userdata = finalized.freed;
        if let Some(e) = finalized.first_error.clone() {
            keep_first(Err(e));
        }

        let (strings, shrunk) = self.sweep_strings(all);
        freed.strings = strings;
        keep_first(shrunk);
        freed.tables = self.sweep_tables();
        freed.protos = self.sweep_protos();
        freed.closures = self.sweep_closures();
        self.shrink_buffer();
        self.gc.threshold = 2 * self.heap.nblocks;

        let stats = &mut self.gc.stats;
        stats.refs_collected += refs_collected + finalized.refs_collected;
        stats.finalizers_run += finalized.ran;
        stats.finalizer_errors += usize::from(finalized.first_error.is_some());
        stats.last_freed = freed;
        stats.total_freed.add(&freed);

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Call the nil tag's `gc` method with nil.
    fn notify_collected(&mut self) -> Result<(), RuntimeError> {
        match self.tags.method(NIL_TAG, TagEvent::Gc)? {
            Some(method) => self.call_gc_method(method, Value::Nil),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::runtime::call::CallFrame;
    use crate::runtime::refs::{RefMode, RefState};

    fn bump(rt: &mut Runtime, _: &CallFrame) -> Result<(), RuntimeError> {
        let n = rt.get_global("notified")?.as_number().unwrap_or(0.0);
        rt.set_global("notified", Value::Number(n + 1.0))
    }

    #[test]
    fn test_threshold_doubles_live_blocks() {
        let mut rt = Runtime::new();
        rt.collect_garbage().unwrap();
        assert_eq!(rt.gc_threshold(), 2 * rt.blocks());
        assert_eq!(rt.gc_stats().cycles, 1);
    }

    #[test]
    fn test_check_gc_respects_threshold_and_enable() {
        let config = RuntimeConfig {
            initial_threshold: usize::MAX,
            ..RuntimeConfig::default()
        };
        let mut rt = Runtime::with_config(config).unwrap();
        assert!(!rt.check_gc().unwrap());

        rt.gc.threshold = 0;
        rt.set_gc_enabled(false);
        assert!(!rt.check_gc().unwrap());
        rt.set_gc_enabled(true);
        assert!(rt.check_gc().unwrap());
    }

    #[test]
    fn test_post_gc_hook_runs_after_cycle() {
        let mut rt = Runtime::new();
        let hook = rt.new_native_closure(bump, vec![]).unwrap();
        rt.set_tag_method(NIL_TAG, TagEvent::Gc, Some(hook)).unwrap();
        rt.collect_garbage().unwrap();
        rt.collect_garbage().unwrap();
        assert_eq!(rt.get_global("notified").unwrap(), Value::Number(2.0));
    }

    #[test]
    fn test_unreachable_objects_freed_reachable_kept() {
        let mut rt = Runtime::new();
        let kept = rt.new_table(0).unwrap();
        rt.set_global("kept", Value::Table(kept)).unwrap();
        let lost = rt.new_table(0).unwrap();
        let s = rt.intern_str("temporary").unwrap();
        let r = rt.acquire_ref(Value::String(s), RefMode::Hold).unwrap();

        rt.collect_garbage().unwrap();
        assert!(rt.table(kept).is_some());
        assert!(rt.table(lost).is_none());
        assert!(rt.string(s).is_none());
        assert_eq!(rt.ref_state(r), Some(RefState::Collected));
        assert_eq!(rt.gc_stats().refs_collected, 1);
        assert!(rt.gc_stats().last_freed.tables >= 1);
    }

    #[test]
    fn test_stats_line() {
        let mut rt = Runtime::new();
        rt.collect_garbage().unwrap();
        let line = rt.gc_stats().to_string();
        assert!(line.starts_with("[GC] Collections: 1,"));
        let json = serde_json::to_value(rt.gc_stats()).unwrap();
        assert_eq!(json["cycles"], 1);
    }
}
