#![forbid(unsafe_code)]

//! Threaded auto-save driver.
//!
//! [`AutoSaver`] owns one worker thread and an [`AutoSaveScheduler`]. The
//! worker sleeps on a condition variable until the scheduler's next
//! deadline, a new value, an explicit request, or shutdown. It is the only
//! thread that calls the backend, so at most one save is in flight.
//!
//! The editing thread never blocks on I/O: [`AutoSaver::update`] takes the
//! lock just long enough to record the new snapshot.
//!
//! # Teardown
//!
//! Dropping the saver (or calling [`AutoSaver::shutdown`]) stops all timers,
//! lets an in-flight save finish, performs one final forced save when
//! enabled, and waits at most `final_save_timeout` for it. A worker still
//! busy after that is detached and finishes on its own.

use std::fmt;
use std::io;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use chrono::Utc;
use web_time::{Duration, Instant};

use super::scheduler::{AutoSaveScheduler, SaveTicket};
use super::{AutoSaveConfig, AutoSaveStatus, SaveNotice, SaveTrigger};
use crate::storage::{Persist, PersistError};

type Notifier = Arc<dyn Fn(&SaveNotice) + Send + Sync>;

struct WorkerState<T> {
    scheduler: AutoSaveScheduler<T>,
    /// Explicit requests issued (`save_now` and `flush`).
    requested: u64,
    /// Explicit requests served.
    completed: u64,
    force_requested: bool,
    shutdown: bool,
}

struct Shared<T> {
    state: Mutex<WorkerState<T>>,
    wake: Condvar,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, WorkerState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Background auto-saver for documents of type `T`.
pub struct AutoSaver<T> {
    shared: Arc<Shared<T>>,
    worker: Option<JoinHandle<()>>,
    exited: Option<mpsc::Receiver<()>>,
    final_save_timeout: Duration,
}

impl<T> fmt::Debug for AutoSaver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutoSaver")
            .field("running", &self.worker.is_some())
            .field("final_save_timeout", &self.final_save_timeout)
            .finish_non_exhaustive()
    }
}

impl<T> AutoSaver<T>
where
    T: PartialEq + Send + Sync + 'static,
{
    /// Start a saver whose baseline is `initial`.
    ///
    /// The worker inherits the caller's `tracing` dispatcher.
    pub fn spawn<P>(initial: Arc<T>, config: AutoSaveConfig, persist: P) -> io::Result<Self>
    where
        P: Persist<T> + Send + 'static,
    {
        Self::start(initial, config, persist, None)
    }

    /// Like [`spawn`](Self::spawn), reporting every save outcome to
    /// `notifier`. The notifier runs on the worker thread.
    pub fn spawn_with_notifier<P, N>(
        initial: Arc<T>,
        config: AutoSaveConfig,
        persist: P,
        notifier: N,
    ) -> io::Result<Self>
    where
        P: Persist<T> + Send + 'static,
        N: Fn(&SaveNotice) + Send + Sync + 'static,
    {
        Self::start(initial, config, persist, Some(Arc::new(notifier)))
    }

    fn start<P>(
        initial: Arc<T>,
        config: AutoSaveConfig,
        persist: P,
        notifier: Option<Notifier>,
    ) -> io::Result<Self>
    where
        P: Persist<T> + Send + 'static,
    {
        let final_save_timeout = config.final_save_timeout;
        let shared = Arc::new(Shared {
            state: Mutex::new(WorkerState {
                scheduler: AutoSaveScheduler::new(config, initial, Instant::now()),
                requested: 0,
                completed: 0,
                force_requested: false,
                shutdown: false,
            }),
            wake: Condvar::new(),
        });

        let (exit_tx, exit_rx) = mpsc::channel();
        let dispatch = tracing::dispatcher::get_default(Clone::clone);
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("storyloom-autosave".into())
            .spawn(move || {
                tracing::dispatcher::with_default(&dispatch, || {
                    run(&worker_shared, persist, notifier.as_deref());
                });
                let _ = exit_tx.send(());
            })?;

        Ok(Self {
            shared,
            worker: Some(worker),
            exited: Some(exit_rx),
            final_save_timeout,
        })
    }

    /// Feed the latest value. Re-arms the debounce if it changed.
    pub fn update(&self, data: Arc<T>) -> bool {
        let changed = self.shared.lock().scheduler.observe(data, Instant::now());
        if changed {
            self.shared.wake.notify_all();
        }
        changed
    }

    /// Treat `data` as already persisted (e.g. freshly loaded).
    pub fn rebaseline(&self, data: Arc<T>) {
        self.shared.lock().scheduler.rebaseline(data);
        self.shared.wake.notify_all();
    }

    /// Turn auto-save on or off at runtime.
    pub fn set_enabled(&self, enabled: bool) {
        self.shared
            .lock()
            .scheduler
            .set_enabled(enabled, Instant::now());
        self.shared.wake.notify_all();
    }

    /// Request a forced save regardless of changes. Does not wait.
    pub fn save_now(&self) {
        let mut state = self.shared.lock();
        state.requested += 1;
        state.force_requested = true;
        drop(state);
        self.shared.wake.notify_all();
    }

    /// Persist pending changes now and wait for every request issued so
    /// far to complete.
    ///
    /// Returns `false` if `timeout` elapsed first or the saver is stopped.
    pub fn flush(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.shared.lock();
        if state.shutdown {
            return false;
        }
        state.requested += 1;
        let target = state.requested;
        self.shared.wake.notify_all();

        while state.completed < target {
            state = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    self.shared
                        .wake
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                // Timeout past the end of the clock: wait without a bound.
                None => self
                    .shared
                    .wake
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
        true
    }

    /// Current status snapshot.
    #[must_use]
    pub fn status(&self) -> AutoSaveStatus {
        self.shared.lock().scheduler.status()
    }

    /// The latest value differs from the last successfully saved one.
    #[must_use]
    pub fn has_unsaved_changes(&self) -> bool {
        self.shared.lock().scheduler.has_unsaved_changes()
    }

    /// A backend call is in flight.
    #[must_use]
    pub fn is_saving(&self) -> bool {
        self.shared.lock().scheduler.is_saving()
    }
}

impl<T> AutoSaver<T> {
    /// Stop the worker, running the final save.
    ///
    /// Returns `true` if the worker exited within `final_save_timeout`.
    pub fn shutdown(mut self) -> bool {
        self.stop()
    }

    fn stop(&mut self) -> bool {
        let Some(handle) = self.worker.take() else {
            return true;
        };
        self.shared.lock().shutdown = true;
        self.shared.wake.notify_all();

        let exited = match self.exited.take() {
            Some(rx) => !matches!(
                rx.recv_timeout(self.final_save_timeout),
                Err(RecvTimeoutError::Timeout)
            ),
            None => true,
        };
        if !exited {
            tracing::warn!(
                timeout_ms = u64::try_from(self.final_save_timeout.as_millis()).unwrap_or(u64::MAX),
                "autosave final save did not finish in time, detaching worker"
            );
            return false;
        }
        handle.join().is_ok()
    }
}

impl<T> Drop for AutoSaver<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

fn run<T, P>(shared: &Shared<T>, mut persist: P, notifier: Option<&(dyn Fn(&SaveNotice) + Send + Sync)>)
where
    T: PartialEq,
    P: Persist<T>,
{
    tracing::debug!("autosave worker started");
    let mut state = shared.lock();
    while !state.shutdown {
        let now = Instant::now();
        let (trigger, target) = if state.requested > state.completed {
            let forced = std::mem::take(&mut state.force_requested);
            let trigger = if forced {
                SaveTrigger::Manual
            } else {
                SaveTrigger::Flush
            };
            (Some(trigger), state.requested)
        } else if let Some(queued) = state.scheduler.take_queued() {
            (Some(queued), state.completed)
        } else {
            (state.scheduler.poll(now), state.completed)
        };

        let Some(trigger) = trigger else {
            state = match state.scheduler.next_deadline() {
                Some(deadline) => {
                    let wait = deadline.saturating_duration_since(now);
                    shared
                        .wake
                        .wait_timeout(state, wait)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => shared.wake.wait(state).unwrap_or_else(PoisonError::into_inner),
            };
            continue;
        };

        state = save_once(shared, state, &mut persist, trigger, notifier);
        state.completed = state.completed.max(target);
        shared.wake.notify_all();
    }

    if state.scheduler.config().enabled {
        state = save_once(shared, state, &mut persist, SaveTrigger::Teardown, notifier);
    }
    drop(state);
    tracing::debug!("autosave worker stopped");
}

/// Run one save if the scheduler grants a ticket. The lock is released for
/// the backend call and the notifier.
fn save_once<'a, T, P>(
    shared: &'a Shared<T>,
    mut state: MutexGuard<'a, WorkerState<T>>,
    persist: &mut P,
    trigger: SaveTrigger,
    notifier: Option<&(dyn Fn(&SaveNotice) + Send + Sync)>,
) -> MutexGuard<'a, WorkerState<T>>
where
    T: PartialEq,
    P: Persist<T>,
{
    let Some(ticket) = state.scheduler.begin_save(trigger) else {
        return state;
    };
    drop(state);

    let result = persist_ticket(persist, &ticket);

    state = shared.lock();
    let notice = state.scheduler.finish_save(ticket, result, Utc::now());
    if let Some(notify) = notifier {
        drop(state);
        notify(&notice);
        state = shared.lock();
    }
    state
}

/// Call the backend inside an `autosave.persist` span.
fn persist_ticket<T, P>(persist: &mut P, ticket: &SaveTicket<T>) -> Result<(), PersistError>
where
    P: Persist<T>,
{
    let span = tracing::info_span!(
        "autosave.persist",
        trigger = ticket.trigger().label(),
        ticket = ticket.id(),
        duration_us = tracing::field::Empty,
    );
    let _guard = span.enter();

    let start = Instant::now();
    let result = persist.save(ticket.data());
    let duration_us = u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX);
    span.record("duration_us", duration_us);

    match &result {
        Ok(()) => tracing::debug!(duration_us, "autosave persisted"),
        Err(err) => tracing::warn!(error = %err, duration_us, "autosave failed"),
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    const WAIT: Duration = Duration::from_secs(5);

    fn quiet_config() -> AutoSaveConfig {
        // Long timers so only explicit requests save.
        AutoSaveConfig::default()
            .with_debounce(Duration::from_secs(3_600))
            .with_interval(Duration::from_secs(3_600))
    }

    #[test]
    fn flush_persists_latest_value() {
        let store = MemoryStore::new();
        let saver = AutoSaver::spawn(Arc::new(0u32), quiet_config(), store.clone()).unwrap();

        saver.update(Arc::new(1));
        saver.update(Arc::new(2));
        assert!(saver.has_unsaved_changes());
        assert!(saver.flush(WAIT));

        assert_eq!(store.saves(), vec![2]);
        assert!(!saver.has_unsaved_changes());
        assert!(saver.status().last_saved.is_some());
    }

    #[test]
    fn flush_without_changes_does_not_persist() {
        let store = MemoryStore::new();
        let saver = AutoSaver::spawn(Arc::new(0u32), quiet_config(), store.clone()).unwrap();
        assert!(saver.flush(WAIT));
        assert!(saver.flush(WAIT));
        assert_eq!(store.save_count(), 0);
        drop(saver);
        // Teardown always saves once.
        assert_eq!(store.save_count(), 1);
    }

    #[test]
    fn unbounded_timers_and_flush_do_not_overflow() {
        let store = MemoryStore::new();
        let config = AutoSaveConfig::default()
            .with_debounce(Duration::MAX)
            .with_interval(Duration::MAX);
        let saver = AutoSaver::spawn(Arc::new(0u32), config, store.clone()).unwrap();
        saver.update(Arc::new(3));
        assert!(saver.flush(Duration::MAX));
        assert_eq!(store.saves(), vec![3]);
    }

    #[test]
    fn save_now_forces_a_write() {
        let store = MemoryStore::new();
        let saver = AutoSaver::spawn(Arc::new(5u32), quiet_config(), store.clone()).unwrap();
        saver.save_now();
        assert!(saver.flush(WAIT));
        assert_eq!(store.saves(), vec![5]);
    }

    #[test]
    fn update_reports_change() {
        let saver = AutoSaver::spawn(
            Arc::new(1u32),
            quiet_config(),
            MemoryStore::<u32>::new(),
        )
        .unwrap();
        assert!(!saver.update(Arc::new(1)));
        assert!(saver.update(Arc::new(2)));
    }

    #[test]
    fn shutdown_runs_final_save() {
        let store = MemoryStore::new();
        let saver = AutoSaver::spawn(Arc::new(0u32), quiet_config(), store.clone()).unwrap();
        saver.update(Arc::new(9));
        assert!(saver.shutdown());
        assert_eq!(store.latest(), Some(9));
    }

    #[test]
    fn disabled_saver_skips_final_save() {
        let store = MemoryStore::new();
        let saver =
            AutoSaver::spawn(Arc::new(0u32), AutoSaveConfig::disabled(), store.clone()).unwrap();
        saver.update(Arc::new(1));
        assert!(saver.shutdown());
        assert_eq!(store.save_count(), 0);
    }

    #[test]
    fn failure_is_captured_in_status() {
        let store = MemoryStore::new();
        store.fail_next("network down");
        let saver = AutoSaver::spawn(Arc::new(0u32), quiet_config(), store.clone()).unwrap();

        saver.update(Arc::new(1));
        assert!(saver.flush(WAIT));
        let status = saver.status();
        assert_eq!(status.error.as_deref(), Some("network down"));
        assert_eq!(status.saves_failed, 1);
        assert!(status.has_unsaved_changes);

        assert!(saver.flush(WAIT));
        let status = saver.status();
        assert_eq!(status.error, None);
        assert!(status.last_saved.is_some());
        assert_eq!(store.saves(), vec![1]);
    }

    #[test]
    fn notifier_sees_outcomes() {
        let store = MemoryStore::new();
        store.fail_next("offline");
        let notices = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&notices);
        let saver = AutoSaver::spawn_with_notifier(
            Arc::new(0u32),
            quiet_config(),
            store,
            move |notice: &SaveNotice| sink.lock().unwrap().push(notice.clone()),
        )
        .unwrap();

        saver.update(Arc::new(1));
        assert!(saver.flush(WAIT));
        saver.save_now();
        assert!(saver.flush(WAIT));
        drop(saver);

        let notices = notices.lock().unwrap();
        let summary: Vec<_> = notices.iter().map(|n| (n.trigger, n.success)).collect();
        assert_eq!(
            summary,
            vec![
                (SaveTrigger::Flush, false),
                (SaveTrigger::Manual, true),
                (SaveTrigger::Teardown, true),
            ]
        );
        assert_eq!(notices[0].message, "Save failed: offline");
    }

    #[test]
    fn closure_backend_runs_on_worker() {
        let (tx, rx) = mpsc::channel();
        let backend = move |data: &String| -> Result<(), PersistError> {
            tx.send(data.clone()).map_err(|e| PersistError::backend(e.to_string()))
        };
        let saver = AutoSaver::spawn(Arc::new(String::new()), quiet_config(), backend).unwrap();
        saver.update(Arc::new("hello".to_string()));
        assert!(saver.flush(WAIT));
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), "hello");
    }

    #[test]
    fn flush_after_shutdown_signal_returns_false() {
        let saver = AutoSaver::spawn(Arc::new(0u32), quiet_config(), MemoryStore::new()).unwrap();
        saver.shared.lock().shutdown = true;
        assert!(!saver.flush(Duration::from_millis(10)));
    }
}
