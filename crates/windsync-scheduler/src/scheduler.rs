//! Scheduler implementation.
//!
//! All state lives behind one mutex. Deliveries run in their own task with
//! the lock released:
//!
//! lock -> decide -> unlock -> deliver -> lock -> reconcile
//!
//! Timer tasks carry a generation number; a task whose generation is no
//! longer current does nothing when it wakes.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, trace};

use crate::{Delivery, EventTable, SchedulerError, TimedValue, Tolerance, timer_interval};

/// Delivers values from an [`EventTable`] in step with an external playback clock.
///
/// The owner feeds position samples with [`update`](Self::update) while the
/// media plays and calls [`stop`](Self::stop) when it pauses. Between samples
/// the scheduler extrapolates the position from a monotonic clock and fires a
/// timer when the next value becomes due.
pub struct Scheduler<V> {
    inner: Arc<Inner<V>>,
}

struct Inner<V> {
    table: EventTable<V>,
    default: V,
    delivery: Delivery<V>,
    tolerance: Tolerance,
    runtime: Handle,
    state: Mutex<State<V>>,
}

struct State<V> {
    phase: Phase,
    /// A delivery is executing outside the lock.
    delivering: bool,
    lifecycle: Lifecycle,
    /// Active index, also the search hint. 0 before the first event.
    index: usize,
    /// Position of the next value change; `None` forces re-evaluation.
    next_position: Option<Duration>,
    /// Last value handed to the delivery callback.
    last_value: V,
    timer_generation: u64,
}

enum Phase {
    /// Not following playback.
    Idle,
    /// Anchored to playback with a timer.
    Running(Clock),
}

struct Clock {
    start_position: Duration,
    epoch: Instant,
    timer: Option<JoinHandle<()>>,
}

enum Lifecycle {
    Active,
    /// Disposal is waiting for deliveries to finish.
    Draining {
        done: Option<oneshot::Sender<()>>,
        deliver_default: bool,
    },
    Disposed,
}

impl Clock {
    fn new(position: Duration) -> Self {
        Self {
            start_position: position,
            epoch: Instant::now(),
            timer: None,
        }
    }

    /// Extrapolated playback position.
    fn position(&self) -> Duration {
        self.start_position.saturating_add(self.epoch.elapsed())
    }

    fn rebase(&mut self, position: Duration) {
        self.start_position = position;
        self.epoch = Instant::now();
    }
}

impl Lifecycle {
    fn may_deliver(&self) -> bool {
        match self {
            Lifecycle::Active => true,
            Lifecycle::Draining {
                deliver_default, ..
            } => *deliver_default,
            Lifecycle::Disposed => false,
        }
    }
}

impl<V> State<V> {
    fn cancel_timer(&mut self) {
        if let Phase::Running(clock) = std::mem::replace(&mut self.phase, Phase::Idle)
            && let Some(timer) = clock.timer
        {
            timer.abort();
        }
        self.timer_generation += 1;
    }

    fn drain(&mut self, deliver_default: bool) -> oneshot::Receiver<()> {
        let (done, rx) = oneshot::channel();
        self.lifecycle = Lifecycle::Draining {
            done: Some(done),
            deliver_default,
        };
        rx
    }
}

impl<V: TimedValue> State<V> {
    /// Move `index` to the event active at `position` and return its value.
    fn seek(&mut self, table: &EventTable<V>, default: &V, position: Duration) -> V {
        match table.active_index(position, self.index) {
            Some(index) => {
                self.index = index;
                table.values()[index].clone()
            }
            None => {
                self.index = 0;
                default.clone()
            }
        }
    }
}

impl<V: TimedValue> Scheduler<V> {
    /// Create a scheduler over `events`.
    ///
    /// Must be called from within a Tokio runtime. The default value is
    /// delivered once right away so actuation starts from a known state.
    pub fn new<I>(
        events: I,
        default: V,
        tolerance: Tolerance,
        delivery: Delivery<V>,
    ) -> Result<Self, SchedulerError>
    where
        I: IntoIterator<Item = (Duration, V)>,
    {
        let runtime = Handle::try_current()?;
        let table = EventTable::new(events, &default);
        debug!(events = table.len(), "creating scheduler");

        let inner = Arc::new(Inner {
            table,
            state: Mutex::new(State {
                phase: Phase::Idle,
                delivering: false,
                lifecycle: Lifecycle::Active,
                index: 0,
                next_position: None,
                last_value: default.clone(),
                timer_generation: 0,
            }),
            default,
            delivery,
            tolerance,
            runtime,
        });

        {
            let mut state = inner.lock();
            inner.invoke(&mut state);
        }

        Ok(Self { inner })
    }

    /// Feed a playback position sample.
    ///
    /// Returns false once the scheduler has been disposed.
    pub fn update(&self, current: Duration) -> bool {
        let inner = &self.inner;
        let mut guard = inner.lock();
        let state = &mut *guard;

        match &mut state.phase {
            Phase::Running(clock) => {
                let expected = clock.position();
                let delta = expected.abs_diff(current);
                if delta <= inner.tolerance.sample {
                    return true;
                }

                let since_anchor = current.saturating_sub(clock.start_position);
                clock.rebase(current);

                if current < expected
                    && delta <= inner.tolerance.skip_window
                    && since_anchor > inner.tolerance.skip_window
                {
                    trace!(
                        expected_ms = expected.as_millis() as u64,
                        current_ms = current.as_millis() as u64,
                        "clock drift, rescheduling"
                    );
                    if !state.delivering && state.next_position.is_some_and(|next| current < next)
                    {
                        inner.change(state, current);
                    }
                } else {
                    debug!(
                        expected_ms = expected.as_millis() as u64,
                        current_ms = current.as_millis() as u64,
                        "resyncing to playback position"
                    );
                    inner.update_state_and_change_or_invoke(state, current);
                }
            }
            Phase::Idle => {
                if !matches!(state.lifecycle, Lifecycle::Active) {
                    return false;
                }
                if !inner.table.is_empty() {
                    debug!(current_ms = current.as_millis() as u64, "starting playback clock");
                    state.phase = Phase::Running(Clock::new(current));
                    inner.update_state_and_change_or_invoke(state, current);
                }
            }
        }

        true
    }

    /// Stop following playback.
    ///
    /// If a non-default value is active and no delivery is running, the
    /// default value is delivered once more. Returns whether the scheduler is
    /// still usable.
    pub fn stop(&self) -> bool {
        let inner = &self.inner;
        let mut guard = inner.lock();
        let state = &mut *guard;

        if matches!(state.phase, Phase::Idle) {
            return matches!(state.lifecycle, Lifecycle::Active);
        }

        debug!("stopping playback clock");
        state.cancel_timer();
        if !state.delivering && state.last_value != inner.default {
            inner.invoke(state);
        }
        true
    }

    /// Shut the scheduler down for good.
    ///
    /// With `force_stop` the default value is delivered first if needed. In
    /// both modes this resolves only after any running delivery has finished.
    /// Returns false if the scheduler was already disposed.
    pub async fn dispose(&self, force_stop: bool) -> bool {
        let done = {
            let inner = &self.inner;
            let mut guard = inner.lock();
            let state = &mut *guard;

            if !matches!(state.lifecycle, Lifecycle::Active) {
                return false;
            }

            debug!(force_stop, delivering = state.delivering, "disposing scheduler");
            state.cancel_timer();

            if force_stop {
                if state.delivering {
                    state.drain(true)
                } else if state.last_value == inner.default {
                    state.lifecycle = Lifecycle::Disposed;
                    return true;
                } else {
                    inner.invoke(state);
                    state.drain(true)
                }
            } else if state.delivering {
                state.drain(false)
            } else {
                state.lifecycle = Lifecycle::Disposed;
                return true;
            }
        };

        // A dropped sender means the delivery task was torn down with the runtime.
        let _ = done.await;
        true
    }

    /// Whether the playback clock is currently running.
    pub fn is_running(&self) -> bool {
        matches!(self.inner.lock().phase, Phase::Running(_))
    }
}

impl<V> Drop for Scheduler<V> {
    fn drop(&mut self) {
        let mut state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        state.cancel_timer();
        // Deliveries still in flight must not fall back to the default.
        state.lifecycle = Lifecycle::Disposed;
    }
}

impl<V> Inner<V> {
    fn lock(&self) -> MutexGuard<'_, State<V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<V: TimedValue> Inner<V> {
    /// Re-derive the active value at `current` and either wait for the next
    /// boundary or deliver the change now.
    fn update_state_and_change_or_invoke(self: &Arc<Self>, state: &mut State<V>, current: Duration) {
        if state.delivering {
            // Reconciled when the running delivery returns.
            state.next_position = None;
            return;
        }

        let value = state.seek(&self.table, &self.default, current);
        if value == state.last_value {
            state.next_position = self.table.next_boundary(state.index, current);
            if state.next_position.is_some_and(|next| current < next) {
                self.change(state, current);
            }
        } else {
            self.invoke(state);
        }
    }

    /// Re-arm the timer for the next boundary as seen from `current`.
    fn change(self: &Arc<Self>, state: &mut State<V>, current: Duration) {
        let delay = match state.next_position {
            Some(next) => timer_interval(current, next),
            None => Duration::ZERO,
        };
        self.arm(state, delay);
    }

    /// Fire as soon as possible: through the timer while running, or by
    /// delivering the default value directly while idle.
    fn invoke(self: &Arc<Self>, state: &mut State<V>) {
        match state.phase {
            Phase::Running(_) => {
                state.next_position = None;
                self.arm(state, Duration::ZERO);
            }
            Phase::Idle => {
                state.delivering = true;
                state.last_value = self.default.clone();
                self.spawn_delivery(self.default.clone());
            }
        }
    }

    fn arm(self: &Arc<Self>, state: &mut State<V>, delay: Duration) {
        let Phase::Running(clock) = &mut state.phase else {
            return;
        };

        state.timer_generation += 1;
        let generation = state.timer_generation;
        if let Some(previous) = clock.timer.take() {
            previous.abort();
        }

        trace!(delay_ms = delay.as_millis() as u64, generation, "arming timer");
        let weak: Weak<Self> = Arc::downgrade(self);
        clock.timer = Some(self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.on_timer(generation);
            }
        }));
    }

    fn on_timer(self: &Arc<Self>, generation: u64) {
        let value = {
            let mut guard = self.lock();
            let state = &mut *guard;

            if state.timer_generation != generation || state.delivering {
                return;
            }
            let Phase::Running(clock) = &state.phase else {
                return;
            };

            let current = clock.position();
            let elapsed = match state.next_position {
                Some(next) if current < next => {
                    if next - current > self.tolerance.wake {
                        // Woke early, e.g. after a shortened long wait.
                        self.change(state, current);
                        return;
                    }
                    next
                }
                _ => current,
            };

            let value = state.seek(&self.table, &self.default, elapsed);
            state.next_position = self.table.next_boundary(state.index, elapsed);

            if value == state.last_value {
                if state.next_position.is_some_and(|next| elapsed < next) {
                    self.change(state, current);
                }
                return;
            }

            state.last_value = value.clone();
            state.delivering = true;
            value
        };

        self.spawn_delivery(value);
    }

    fn spawn_delivery(self: &Arc<Self>, value: V) {
        let inner = Arc::clone(self);
        self.runtime.spawn(async move {
            trace!(value = ?value, "delivering");
            let delivery = inner.runtime.spawn((inner.delivery)(value));
            if let Err(e) = delivery.await {
                error!(error = %e, "delivery task failed");
            }
            inner.finish_delivery();
        });
    }

    fn finish_delivery(self: &Arc<Self>) {
        let mut guard = self.lock();
        let state = &mut *guard;
        state.delivering = false;

        if let Phase::Running(clock) = &state.phase {
            let current = clock.position();
            if state.next_position.is_some_and(|next| current < next) {
                self.change(state, current);
            } else {
                self.update_state_and_change_or_invoke(state, current);
            }
        } else if state.last_value != self.default && state.lifecycle.may_deliver() {
            // Stopped while a value was being delivered.
            self.invoke(state);
        } else if let Lifecycle::Draining { done, .. } = &mut state.lifecycle {
            if let Some(done) = done.take() {
                let _ = done.send(());
            }
            state.lifecycle = Lifecycle::Disposed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn silent() -> Delivery<&'static str> {
        Arc::new(|_| Box::pin(async {}))
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_scheduler_accepts_updates() {
        let scheduler = Scheduler::new(
            Vec::<(Duration, &'static str)>::new(),
            "OFF",
            Tolerance::default(),
            silent(),
        )
        .unwrap();

        assert!(scheduler.update(Duration::from_secs(1)));
        assert!(!scheduler.is_running());
        assert!(scheduler.stop());
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_starts_clock() {
        let scheduler = Scheduler::new(
            vec![(Duration::from_secs(5), "HIGH")],
            "OFF",
            Tolerance::default(),
            silent(),
        )
        .unwrap();

        assert!(!scheduler.is_running());
        assert!(scheduler.update(Duration::ZERO));
        assert!(scheduler.is_running());
        assert!(scheduler.stop());
        assert!(!scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_twice() {
        let scheduler =
            Scheduler::new(vec![(Duration::from_secs(5), "HIGH")], "OFF", Tolerance::default(), silent())
                .unwrap();
        tokio::task::yield_now().await;

        assert!(scheduler.dispose(false).await);
        assert!(!scheduler.dispose(true).await);
        assert!(!scheduler.update(Duration::ZERO));
        assert!(!scheduler.stop());
    }

    #[test]
    fn test_new_outside_runtime_fails() {
        let result = Scheduler::new(
            Vec::<(Duration, &'static str)>::new(),
            "OFF",
            Tolerance::default(),
            silent(),
        );
        assert!(matches!(result, Err(SchedulerError::NoRuntime(_))));
    }
}
