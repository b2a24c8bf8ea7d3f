//! Timed event queue.
//!
//! A min-heap of `(when_ns, seq)`-ordered events. `seq` is assigned at post
//! time, so two events due at the same instant dispatch in post order.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fmt::Write as _;

use crate::types::TimeNs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// No present arrived within the grace period; enter hibernation.
    RenderingTimeout,
    /// Periodic keep-alive deadline while hibernated.
    HibernateTimeout,
    /// Emit the next frame of an insertion burst.
    NextFrameInsertion,
    /// The compositor announced the timing of an upcoming present.
    NotifyExpectedPresentConfig,
    /// Periodic statistics refresh.
    StatisticsUpdate,
    /// Periodic refresh-rate measurement.
    RefreshRateMeasure,
}

impl EventKind {
    pub fn name(self) -> &'static str {
        match self {
            EventKind::RenderingTimeout => "RenderingTimeout",
            EventKind::HibernateTimeout => "HibernateTimeout",
            EventKind::NextFrameInsertion => "NextFrameInsertion",
            EventKind::NotifyExpectedPresentConfig => "NotifyExpectedPresentConfig",
            EventKind::StatisticsUpdate => "StatisticsUpdate",
            EventKind::RefreshRateMeasure => "RefreshRateMeasure",
        }
    }
}

/// Registration handle identifying a callback on a shared timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventToken(pub u64);

impl EventToken {
    /// Events dispatched by a controller's own worker carry no token.
    pub const NONE: EventToken = EventToken(0);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub when_ns: TimeNs,
    /// Tiebreaker for events due at the same instant (lower = posted earlier).
    pub seq: u64,
    pub token: EventToken,
    pub kind: EventKind,
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.when_ns
            .cmp(&other.when_ns)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Min-priority queue of timed events.
#[derive(Debug, Default)]
pub struct EventQueue {
    heap: BinaryHeap<Reverse<Event>>,
    next_seq: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post(&mut self, kind: EventKind, when_ns: TimeNs) {
        self.post_with_token(EventToken::NONE, kind, when_ns);
    }

    pub fn post_with_token(&mut self, token: EventToken, kind: EventKind, when_ns: TimeNs) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(Event {
            when_ns,
            seq,
            token,
            kind,
        }));
    }

    pub fn peek_earliest(&self) -> Option<Event> {
        self.heap.peek().map(|Reverse(e)| *e)
    }

    pub fn pop_earliest(&mut self) -> Option<Event> {
        self.heap.pop().map(|Reverse(e)| e)
    }

    pub fn drop_all(&mut self) {
        self.heap.clear();
    }

    /// Remove every queued event of the given kind. O(n).
    pub fn drop_by_kind(&mut self, kind: EventKind) {
        let kept: Vec<Reverse<Event>> =
            self.heap.drain().filter(|Reverse(e)| e.kind != kind).collect();
        self.heap = BinaryHeap::from(kept);
    }

    /// Remove every queued event carrying the given token. O(n).
    pub fn drop_by_token(&mut self, token: EventToken) {
        let kept: Vec<Reverse<Event>> = self
            .heap
            .drain()
            .filter(|Reverse(e)| e.token != token)
            .collect();
        self.heap = BinaryHeap::from(kept);
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Non-destructive snapshot of the queue in dispatch order, one event per
    /// line, for diagnostics.
    pub fn dump(&self) -> String {
        let mut events: Vec<Event> = self.heap.iter().map(|Reverse(e)| *e).collect();
        events.sort();
        let mut out = String::new();
        for e in events {
            let _ = writeln!(out, "{} @ {} ns (seq {})", e.kind.name(), e.when_ns, e.seq);
        }
        out
    }
}
