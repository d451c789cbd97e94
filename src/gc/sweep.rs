//! Reclaim passes, one per object kind, plus the intern-table and
//! scratch-buffer shrink heuristics.

use log::trace;

use super::LOG_TARGET;
use crate::error::RuntimeError;
use crate::runtime::object::{FIXMARK, MARKED, TraceMark};
use crate::runtime::tagmethod::USERDATA_TAG;
use crate::runtime::{Heap, Runtime};

impl Runtime {
    /// Unlink unmarked userdata from the intern table and queue each on
    /// its tag's pending-finalization list. The objects stay allocated
    /// until their finalizer has run.
    pub(crate) fn sweep_userdata(&mut self, all: bool) -> (usize, Result<(), RuntimeError>) {
        let Heap { udata, udt, .. } = &mut self.heap;
        let tags = &mut self.tags;
        let ntags = tags.len();
        let mut diverted = 0;
        udt.retain(|id| {
            let Some(u) = udata.get_mut(id) else {
                return false;
            };
            debug_assert!(u.marked <= MARKED);
            if u.marked > 0 && !all {
                u.marked = 0;
                return true;
            }
            let tag = if u.tag < ntags { u.tag } else { USERDATA_TAG };
            if let Ok(entry) = tags.get_mut(tag) {
                entry.collected.push(id);
            }
            diverted += 1;
            false
        });
        let floor = self.config.string_table_floor;
        let shrunk = udt.shrink_if_sparse(floor, |id| udata.get(id).map_or(0, |u| u.hash));
        if let Ok(true) = shrunk {
            trace!(target: LOG_TARGET, "userdata table shrunk to {} buckets", udt.size());
        }
        (diverted, shrunk.map(|_| ()))
    }

    /// Free unmarked strings. Fixed strings survive unless `all` is set.
    pub(crate) fn sweep_strings(&mut self, all: bool) -> (usize, Result<(), RuntimeError>) {
        let Heap {
            strings,
            strt,
            nblocks,
            ..
        } = &mut self.heap;
        let mut freed = 0;
        strt.retain(|id| {
            let Some(s) = strings.get_mut(id) else {
                return false;
            };
            if s.marked > 0 && !all {
                if s.marked < FIXMARK {
                    s.marked = 0;
                }
                return true;
            }
            if let Some(s) = strings.remove(id) {
                *nblocks = nblocks.saturating_sub(s.block_size());
            }
            freed += 1;
            false
        });
        let floor = self.config.string_table_floor;
        let shrunk = strt.shrink_if_sparse(floor, |id| strings.get(id).map_or(0, |s| s.hash));
        if let Ok(true) = shrunk {
            trace!(target: LOG_TARGET, "string table shrunk to {} buckets", strt.size());
        }
        (freed, shrunk.map(|_| ()))
    }

    pub(crate) fn sweep_tables(&mut self) -> usize {
        let heap = &mut self.heap;
        let mut freed = 0;
        let mut released = 0;
        heap.tables.sweep(
            |t| {
                if t.mark.is_marked() {
                    t.mark = TraceMark::Unmarked;
                    true
                } else {
                    false
                }
            },
            |t| {
                released += t.block_size();
                freed += 1;
            },
        );
        heap.release_blocks(released);
        freed
    }

    pub(crate) fn sweep_protos(&mut self) -> usize {
        let heap = &mut self.heap;
        let mut freed = 0;
        let mut released = 0;
        heap.protos.sweep(
            |p| std::mem::replace(&mut p.marked, false),
            |p| {
                released += p.block_size();
                freed += 1;
            },
        );
        heap.release_blocks(released);
        freed
    }

    pub(crate) fn sweep_closures(&mut self) -> usize {
        let heap = &mut self.heap;
        let mut freed = 0;
        let mut released = 0;
        heap.closures.sweep(
            |c| std::mem::replace(&mut c.mark, TraceMark::Unmarked).is_marked(),
            |c| {
                released += c.block_size();
                freed += 1;
            },
        );
        heap.release_blocks(released);
        freed
    }

    /// Halve the scratch buffer when it is larger than twice the floor.
    pub(crate) fn shrink_buffer(&mut self) {
        let floor = self.config.buffer_floor;
        let size = self.buffer.len();
        if size > floor * 2 {
            let new_size = size / 2;
            self.buffer.truncate(new_size);
            self.buffer.shrink_to_fit();
            self.heap.release_blocks(size - new_size);
            trace!(target: LOG_TARGET, "scratch buffer shrunk to {} bytes", new_size);
        }
    }
}
