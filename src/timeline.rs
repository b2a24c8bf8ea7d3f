//! Shared timed-event service.
//!
//! A `Timeline` owns one worker thread and a timed event queue. Components
//! register a handler, receive a token, and post events under it; the worker
//! parks until the earliest deadline (or a signal, whichever comes first) and
//! invokes the matching handler with the timeline lock released, so handlers
//! are free to post their own re-arm events.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, error, warn};

use crate::clock::now_ns;
use crate::context::{EventHandler, EventQueueFacility};
use crate::events::{EventKind, EventQueue, EventToken};
use crate::types::TimeNs;

struct TimelineShared {
    queue: EventQueue,
    handlers: HashMap<EventToken, Arc<dyn Fn(EventKind) + Send + Sync>>,
    next_token: u64,
    exit: bool,
}

struct TimelineInner {
    shared: Mutex<TimelineShared>,
    cond: Condvar,
}

pub struct Timeline {
    inner: Arc<TimelineInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Timeline {
    pub fn new() -> Self {
        let inner = Arc::new(TimelineInner {
            shared: Mutex::new(TimelineShared {
                queue: EventQueue::new(),
                handlers: HashMap::new(),
                next_token: 1,
                exit: false,
            }),
            cond: Condvar::new(),
        });

        let worker_inner = Arc::clone(&inner);
        let worker = std::thread::Builder::new()
            .name("vrr-timeline".into())
            .spawn(move || Self::worker_body(worker_inner))
            .ok();
        if worker.is_none() {
            error!("failed to spawn timeline worker; timed events will not fire");
        }

        Timeline {
            inner,
            worker: Mutex::new(worker),
        }
    }

    /// Request worker exit and join it. Queued events are discarded.
    pub fn stop(&self) {
        {
            let mut shared = self.inner.shared.lock().unwrap();
            shared.exit = true;
        }
        self.inner.cond.notify_all();
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    fn worker_body(inner: Arc<TimelineInner>) {
        let mut shared = inner.shared.lock().unwrap();
        loop {
            if shared.exit {
                break;
            }
            let Some(next) = shared.queue.peek_earliest() else {
                shared = inner.cond.wait(shared).unwrap();
                continue;
            };
            let now = now_ns();
            if next.when_ns > now {
                let timeout = Duration::from_nanos((next.when_ns - now) as u64);
                let (guard, _) = inner.cond.wait_timeout(shared, timeout).unwrap();
                shared = guard;
                // Re-evaluate: an earlier event, a drop, or exit may have
                // raced with the wait.
                continue;
            }
            let Some(event) = shared.queue.pop_earliest() else {
                error!("timeline queue should not be empty");
                break;
            };
            let handler = shared.handlers.get(&event.token).map(Arc::clone);
            drop(shared);
            match handler {
                Some(handler) => handler(event.kind),
                None => debug!(
                    "dropping {} event for unregistered token {:?}",
                    event.kind.name(),
                    event.token
                ),
            }
            shared = inner.shared.lock().unwrap();
        }
    }
}

impl Default for Timeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Timeline {
    fn drop(&mut self) {
        self.stop();
    }
}

impl EventQueueFacility for Timeline {
    fn register_handler(&self, handler: EventHandler) -> EventToken {
        let mut shared = self.inner.shared.lock().unwrap();
        let token = EventToken(shared.next_token);
        shared.next_token += 1;
        shared.handlers.insert(token, Arc::from(handler));
        token
    }

    fn unregister_handler(&self, token: EventToken) {
        {
            let mut shared = self.inner.shared.lock().unwrap();
            if shared.handlers.remove(&token).is_none() {
                warn!("unregistering unknown timeline token {token:?}");
            }
            shared.queue.drop_by_token(token);
        }
        self.inner.cond.notify_all();
    }

    fn post_event(&self, token: EventToken, kind: EventKind, when_ns: TimeNs) {
        {
            let mut shared = self.inner.shared.lock().unwrap();
            shared.queue.post_with_token(token, kind, when_ns);
        }
        self.inner.cond.notify_all();
    }
}
