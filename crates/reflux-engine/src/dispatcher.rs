//! Observer registration and budgeted notification delivery.
//!
//! [`EventDispatcher::drain`] pops events highest-priority first and
//! invokes every observer registered for the event's state type, checking
//! the elapsed time after each delivery. Whatever is left when the budget
//! runs out stays queued for the next cycle.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use reflux_core::{HandlerError, State, TypeKey};
use smallvec::SmallVec;

use crate::notify::{ChangeEvent, NotificationQueue};

/// Identifies a registered observer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer#{}", self.0)
    }
}

type ErasedObserver = Box<dyn FnMut(&ChangeEvent) + Send>;

/// Most state types have one or two observers.
type ObserverList = SmallVec<[(ObserverId, ErasedObserver); 2]>;

/// Result of one [`EventDispatcher::drain`] call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrainOutcome {
    /// Events popped and delivered.
    pub delivered: usize,
    /// Observer invocations that panicked.
    pub observer_faults: usize,
}

/// Holds observers and delivers change events to them.
#[derive(Default)]
pub struct EventDispatcher {
    observers: IndexMap<TypeKey, ObserverList>,
    next_id: u64,
}

impl EventDispatcher {
    /// Create a dispatcher with no observers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for changes to `S`.
    ///
    /// The callback receives the new value and, unless the singleton was
    /// just created, the old value. It must not block.
    pub fn on_change<S, F>(&mut self, mut callback: F) -> ObserverId
    where
        S: State,
        F: FnMut(&S, Option<&S>) + Send + 'static,
    {
        let id = ObserverId(self.next_id);
        self.next_id += 1;
        let erased: ErasedObserver = Box::new(move |event: &ChangeEvent| {
            if let Some(new) = event.new_value::<S>() {
                callback(new, event.old_value::<S>());
            }
        });
        self.observers
            .entry(TypeKey::of::<S>())
            .or_default()
            .push((id, erased));
        id
    }

    /// Unregister an observer. Returns whether it was registered.
    pub fn remove_observer(&mut self, id: ObserverId) -> bool {
        for list in self.observers.values_mut() {
            if let Some(pos) = list.iter().position(|(oid, _)| *oid == id) {
                list.remove(pos);
                return true;
            }
        }
        false
    }

    /// Number of observers registered for `state`.
    pub fn observer_count(&self, state: TypeKey) -> usize {
        self.observers.get(&state).map_or(0, |list| list.len())
    }

    /// Deliver queued events until the queue empties or `budget` is spent.
    ///
    /// A zero budget delivers nothing. Otherwise at least one event is
    /// delivered, and the budget is checked after every delivery, so it is
    /// exceeded by at most one delivery.
    pub fn drain(&mut self, queue: &mut NotificationQueue, budget: Duration) -> DrainOutcome {
        let mut outcome = DrainOutcome::default();
        if budget.is_zero() {
            return outcome;
        }
        let start = Instant::now();
        while let Some(event) = queue.pop() {
            outcome.observer_faults += self.deliver(&event);
            outcome.delivered += 1;
            if start.elapsed() >= budget {
                break;
            }
        }
        if !queue.is_empty() {
            tracing::debug!(
                delivered = outcome.delivered,
                remaining = queue.len(),
                budget_us = budget.as_micros() as u64,
                "notification budget exhausted"
            );
        }
        outcome
    }

    fn deliver(&mut self, event: &ChangeEvent) -> usize {
        let Some(observers) = self.observers.get_mut(&event.state) else {
            return 0;
        };
        let mut faults = 0;
        for (id, observer) in observers.iter_mut() {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| observer(event))) {
                let error = HandlerError::from_panic(panic);
                tracing::warn!(
                    observer = %id,
                    state = %event.state,
                    %error,
                    "observer panicked"
                );
                faults += 1;
            }
        }
        faults
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(
                self.observers
                    .iter()
                    .map(|(k, v)| (k.short_name(), v.len())),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reflux_core::{CycleId, Priority};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Debug, PartialEq)]
    struct Score(u32);

    #[derive(Clone, Debug, PartialEq)]
    struct Alarm(u32);

    fn event<S: State>(priority: Priority, new: S, old: Option<S>) -> ChangeEvent {
        ChangeEvent {
            state: TypeKey::of::<S>(),
            priority,
            cycle: CycleId(1),
            new: Arc::new(new),
            old: old.map(|o| Arc::new(o) as reflux_core::SharedState),
        }
    }

    #[test]
    fn delivers_highest_priority_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = EventDispatcher::new();
        let l = Arc::clone(&log);
        dispatcher.on_change::<Score, _>(move |new, _| {
            l.lock().unwrap().push(format!("score {}", new.0));
        });
        let l = Arc::clone(&log);
        dispatcher.on_change::<Alarm, _>(move |new, _| {
            l.lock().unwrap().push(format!("alarm {}", new.0));
        });

        let mut queue = NotificationQueue::new();
        queue.push(event(Priority::Normal, Score(1), None));
        queue.push(event(Priority::Critical, Alarm(2), None));
        let outcome = dispatcher.drain(&mut queue, Duration::from_secs(1));
        assert_eq!(outcome.delivered, 2);
        assert_eq!(*log.lock().unwrap(), ["alarm 2", "score 1"]);
    }

    #[test]
    fn old_value_is_passed_through() {
        let seen = Arc::new(Mutex::new(None));
        let mut dispatcher = EventDispatcher::new();
        let s = Arc::clone(&seen);
        dispatcher.on_change::<Score, _>(move |new, old| {
            *s.lock().unwrap() = Some((new.clone(), old.cloned()));
        });
        let mut queue = NotificationQueue::new();
        queue.push(event(Priority::High, Score(5), Some(Score(4))));
        dispatcher.drain(&mut queue, Duration::from_secs(1));
        assert_eq!(
            *seen.lock().unwrap(),
            Some((Score(5), Some(Score(4))))
        );
    }

    #[test]
    fn zero_budget_delivers_nothing() {
        let mut dispatcher = EventDispatcher::new();
        let mut queue = NotificationQueue::new();
        queue.push(event(Priority::Critical, Score(1), None));
        assert_eq!(dispatcher.drain(&mut queue, Duration::ZERO).delivered, 0);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn exhausted_budget_leaves_remainder_queued() {
        let mut dispatcher = EventDispatcher::new();
        dispatcher.on_change::<Score, _>(|_, _| std::thread::sleep(Duration::from_millis(5)));
        let mut queue = NotificationQueue::new();
        for i in 0..10 {
            queue.push(event(Priority::Normal, Score(i), None));
        }
        let outcome = dispatcher.drain(&mut queue, Duration::from_millis(1));
        assert_eq!(outcome.delivered, 1);
        assert_eq!(queue.len(), 9);
    }

    #[test]
    fn panicking_observer_is_isolated() {
        let calls = Arc::new(Mutex::new(0));
        let mut dispatcher = EventDispatcher::new();
        dispatcher.on_change::<Score, _>(|_, _| panic!("observer bug"));
        let c = Arc::clone(&calls);
        dispatcher.on_change::<Score, _>(move |_, _| *c.lock().unwrap() += 1);
        let mut queue = NotificationQueue::new();
        queue.push(event(Priority::Normal, Score(1), None));
        let outcome = dispatcher.drain(&mut queue, Duration::from_secs(1));
        assert_eq!(outcome.observer_faults, 1);
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[test]
    fn removed_observer_is_not_called() {
        let calls = Arc::new(Mutex::new(0));
        let mut dispatcher = EventDispatcher::new();
        let c = Arc::clone(&calls);
        let id = dispatcher.on_change::<Score, _>(move |_, _| *c.lock().unwrap() += 1);
        assert!(dispatcher.remove_observer(id));
        assert!(!dispatcher.remove_observer(id));
        assert_eq!(dispatcher.observer_count(TypeKey::of::<Score>()), 0);
        let mut queue = NotificationQueue::new();
        queue.push(event(Priority::Normal, Score(1), None));
        dispatcher.drain(&mut queue, Duration::from_secs(1));
        assert_eq!(*calls.lock().unwrap(), 0);
    }
}
