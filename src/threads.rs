/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::{
    io,
    sync::{atomic::AtomicU64, Arc, Condvar, Mutex, MutexGuard, PoisonError},
    thread::{self, JoinHandle},
};

use log::{debug, warn};

use crate::{search::Search, split::SplitPoint, TadpoleError};

/// Stack size of a search thread. Recursion goes [`crate::MAX_PLY`] deep with a full picker per frame.
const WORKER_STACK_SIZE: usize = 8 * 1024 * 1024;

/// Locks `mutex`, recovering the data if another thread panicked while holding it.
#[inline(always)]
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What a search thread is doing.
#[derive(Default)]
pub(crate) enum WorkerState {
    /// Waiting to be handed a split point.
    #[default]
    Idle,

    /// Busy with its own search.
    Searching,

    /// Waiting for the helpers of its own split point. It may be lent to threads working for that split point.
    HelpfulMaster(Arc<SplitPoint>),

    /// Handed a split point to help at, but not yet started on it.
    Assigned(Arc<SplitPoint>),

    /// Asked to shut down.
    Exit,
}

/// One thread's state and the signal used to wake it.
#[derive(Default)]
struct WorkerSlot {
    state: Mutex<WorkerState>,
    signal: Condvar,
}

/// The part of the pool visible to every search thread.
///
/// Slot `0` belongs to the thread that runs the root search, the others to spawned workers.
pub(crate) struct PoolShared {
    slots: Box<[WorkerSlot]>,

    /// Held while choosing and assigning helpers, so two splits never claim the same thread.
    pub(crate) checkout: Mutex<()>,

    /// Bumped whenever every thread must forget its history tables.
    pub(crate) history_epoch: AtomicU64,
}

impl PoolShared {
    fn new(threads: usize) -> Self {
        let slots: Box<[WorkerSlot]> = (0..threads.max(1)).map(|_| WorkerSlot::default()).collect();
        *lock(&slots[0].state) = WorkerState::Searching;

        Self {
            slots,
            checkout: Mutex::new(()),
            history_epoch: AtomicU64::new(0),
        }
    }

    /// Number of search threads, the root thread included.
    #[inline(always)]
    pub(crate) fn size(&self) -> usize {
        self.slots.len()
    }

    /// Up to `wanted` threads that may help `requester`: idle workers, and masters waiting on a split point that
    /// `requester` is working for, directly or through nested splits.
    ///
    /// Must be called with [`PoolShared::checkout`] held.
    pub(crate) fn available(
        &self,
        requester: usize,
        split_stack: &[Arc<SplitPoint>],
        wanted: usize,
    ) -> Vec<usize> {
        (0..self.slots.len())
            .filter(|&id| id != requester)
            .filter(|&id| match &*lock(&self.slots[id].state) {
                WorkerState::Idle => true,
                WorkerState::HelpfulMaster(sp) => split_stack
                    .last()
                    .is_some_and(|own| own.descends_from(sp)),
                _ => false,
            })
            .take(wanted)
            .collect()
    }

    /// Hands `sp` to thread `id` and wakes it.
    ///
    /// Must be called with [`PoolShared::checkout`] held, for a thread returned by [`PoolShared::available`].
    pub(crate) fn assign(&self, id: usize, sp: &Arc<SplitPoint>) {
        sp.add_slave(id);
        let slot = &self.slots[id];
        *lock(&slot.state) = WorkerState::Assigned(Arc::clone(sp));
        slot.signal.notify_all();
    }

    /// Blocks a worker until it is handed a split point, or returns `None` when it should exit.
    fn wait_for_work(&self, id: usize) -> Option<Arc<SplitPoint>> {
        let slot = &self.slots[id];
        let mut state = lock(&slot.state);
        loop {
            match &*state {
                WorkerState::Exit => return None,
                WorkerState::Assigned(sp) => {
                    let sp = Arc::clone(sp);
                    *state = WorkerState::Searching;
                    return Some(sp);
                }
                _ => state = slot.signal.wait(state).unwrap_or_else(PoisonError::into_inner),
            }
        }
    }

    /// Blocks the master of `sp` until its helpers are done.
    ///
    /// Returns work handed to the master in the meantime, which it must search and then report with
    /// [`PoolShared::finish`] before waiting again. Returns `None` once every helper has finished.
    pub(crate) fn wait_as_master(&self, id: usize, sp: &Arc<SplitPoint>) -> Option<Arc<SplitPoint>> {
        let slot = &self.slots[id];
        let mut state = lock(&slot.state);
        loop {
            // Work handed over must be taken even if our own helpers just finished
            if let WorkerState::Assigned(work) = &*state {
                let work = Arc::clone(work);
                *state = WorkerState::Searching;
                return Some(work);
            }
            if !sp.has_slaves() {
                *state = WorkerState::Searching;
                return None;
            }

            *state = WorkerState::HelpfulMaster(Arc::clone(sp));
            state = slot.signal.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Reports that thread `id` is done helping at `work`, and wakes the master of `work`.
    ///
    /// A worker goes back to being `idle`. A master returns to waiting for its own helpers instead.
    pub(crate) fn finish(&self, id: usize, work: &SplitPoint, idle: bool) {
        if idle {
            let mut state = lock(&self.slots[id].state);
            if matches!(*state, WorkerState::Searching) {
                *state = WorkerState::Idle;
            }
        }

        work.remove_slave(id);
        let master = &self.slots[work.master];
        let _state = lock(&master.state);
        master.signal.notify_all();
    }
}

/// The search threads, and the means to hand them work.
pub(crate) struct ThreadPool {
    shared: Arc<PoolShared>,
    handles: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Starts `threads - 1` workers.
    ///
    /// If they cannot all be started, the pool runs with the root thread only and the error is returned
    /// alongside it.
    pub(crate) fn new(threads: usize) -> (Self, Option<TadpoleError>) {
        match Self::spawn(threads) {
            Ok((shared, handles)) => (Self::from_parts(shared, handles), None),
            Err(err) => {
                warn!("failed to start {threads} search threads: {err}");
                let pool = Self::from_parts(Arc::new(PoolShared::new(1)), Vec::new());
                let err = TadpoleError::ThreadSpawn {
                    requested: threads,
                    available: 1,
                };
                (pool, Some(err))
            }
        }
    }

    fn from_parts(shared: Arc<PoolShared>, handles: Vec<JoinHandle<()>>) -> Self {
        Self { shared, handles }
    }

    /// Handle to the state shared with the search threads.
    #[inline(always)]
    pub(crate) fn shared(&self) -> Arc<PoolShared> {
        Arc::clone(&self.shared)
    }

    /// Number of search threads, the root thread included.
    #[inline(always)]
    pub(crate) fn size(&self) -> usize {
        self.shared.size()
    }

    /// Restarts the pool with `threads` search threads.
    ///
    /// On failure the previous number of threads is kept. Must not be called while a search is running.
    pub(crate) fn resize(&mut self, threads: usize) -> Result<(), TadpoleError> {
        let previous = self.size();
        if threads.max(1) == previous {
            return Ok(());
        }
        self.shutdown();

        match Self::spawn(threads) {
            Ok((shared, handles)) => {
                debug!("search thread pool resized from {previous} to {threads}");
                *self = Self::from_parts(shared, handles);
                Ok(())
            }
            Err(err) => {
                warn!("failed to start {threads} search threads, keeping {previous}: {err}");
                let (shared, handles) = Self::spawn(previous)
                    .unwrap_or_else(|_| (Arc::new(PoolShared::new(1)), Vec::new()));
                *self = Self::from_parts(shared, handles);
                Err(TadpoleError::ThreadSpawn {
                    requested: threads,
                    available: self.size(),
                })
            }
        }
    }

    /// Forgets history tables in every thread before their next search.
    pub(crate) fn clear_history(&self) {
        self.shared
            .history_epoch
            .fetch_add(1, std::sync::atomic::Ordering::AcqRel);
    }

    fn spawn(threads: usize) -> io::Result<(Arc<PoolShared>, Vec<JoinHandle<()>>)> {
        let threads = threads.max(1);
        let shared = Arc::new(PoolShared::new(threads));
        let mut handles = Vec::with_capacity(threads - 1);

        for id in 1..threads {
            let worker = Arc::clone(&shared);
            let spawned = thread::Builder::new()
                .name(format!("tadpole-search-{id}"))
                .stack_size(WORKER_STACK_SIZE)
                .spawn(move || worker_loop(&worker, id));

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    stop_workers(&shared, handles);
                    return Err(err);
                }
            }
        }

        Ok((shared, handles))
    }

    fn shutdown(&mut self) {
        stop_workers(&self.shared, std::mem::take(&mut self.handles));
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Tells every worker to exit and waits for them.
fn stop_workers(shared: &PoolShared, handles: Vec<JoinHandle<()>>) {
    for slot in shared.slots.iter().skip(1) {
        *lock(&slot.state) = WorkerState::Exit;
        slot.signal.notify_all();
    }
    for handle in handles {
        // A worker that panicked has nothing left to clean up
        let _ = handle.join();
    }
}

/// Body of a spawned search thread: help at whatever split point it is handed, until told to exit.
fn worker_loop(shared: &PoolShared, id: usize) {
    let mut search: Option<Box<Search>> = None;

    while let Some(sp) = shared.wait_for_work(id) {
        let search = search.get_or_insert_with(|| Box::new(Search::new(Arc::clone(&sp.ctx), id)));
        search.join_split(&sp);
        shared.finish(id, &sp, true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_size() {
        let (mut pool, err) = ThreadPool::new(3);
        assert!(err.is_none(), "spawning 3 threads failed: {err:?}");
        assert_eq!(pool.size(), 3);

        assert!(pool.resize(2).is_ok());
        assert_eq!(pool.size(), 2);

        // Zero threads still leaves the root thread
        assert!(pool.resize(0).is_ok());
        assert_eq!(pool.size(), 1);
    }

    #[test]
    fn test_available_workers() {
        let (pool, _) = ThreadPool::new(4);
        let shared = pool.shared();
        let _checkout = lock(&shared.checkout);

        // The root thread is busy, every worker is idle
        assert_eq!(shared.available(0, &[], 8), vec![1, 2, 3]);
        assert_eq!(shared.available(2, &[], 2), vec![1, 3]);
        assert!(shared.available(0, &[], 0).is_empty());
    }
}
