//! Bounded, priority-laned event queue with anti-starvation.
//!
//! One FIFO lane per priority class. Capacity is shared by all lanes and
//! enforced with a pair of semaphores (free slots / queued items), so
//! producers wait for space and the consumer waits for work without holding
//! the lane lock.
//!
//! Selection serves the highest non-empty lane, except that a waiting lower
//! lane may be bypassed at most `starvation_limit` times in a row before it
//! is served.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::error::{RealtimeError, RealtimeResult};

use super::event::{Event, Priority};

const LANES: usize = Priority::ALL.len();

struct Lanes {
    lanes: [VecDeque<Event>; LANES],
    /// Consecutive times each waiting lane was passed over.
    bypassed: [u32; LANES],
    starvation_limit: u32,
}

impl Lanes {
    fn new(starvation_limit: u32) -> Self {
        Self {
            lanes: Default::default(),
            bypassed: [0; LANES],
            starvation_limit: starvation_limit.max(1),
        }
    }

    fn push(&mut self, event: Event) {
        self.lanes[event.priority().rank()].push_back(event);
    }

    fn take_next(&mut self) -> Option<Event> {
        let natural = (0..LANES).find(|&i| !self.lanes[i].is_empty())?;

        // The most-bypassed starving lane wins; ties go to higher priority.
        let starving = (natural + 1..LANES)
            .filter(|&i| !self.lanes[i].is_empty() && self.bypassed[i] >= self.starvation_limit)
            .max_by(|&a, &b| self.bypassed[a].cmp(&self.bypassed[b]).then(b.cmp(&a)));
        let chosen = starving.unwrap_or(natural);

        for i in chosen + 1..LANES {
            if !self.lanes[i].is_empty() {
                self.bypassed[i] += 1;
            }
        }
        self.bypassed[chosen] = 0;

        let event = self.lanes[chosen].pop_front();
        if self.lanes[chosen].is_empty() {
            self.bypassed[chosen] = 0;
        }
        event
    }

    fn depths(&self) -> [usize; LANES] {
        std::array::from_fn(|i| self.lanes[i].len())
    }
}

pub struct EventQueue {
    lanes: Mutex<Lanes>,
    free: Semaphore,
    queued: Semaphore,
    capacity: usize,
}

impl EventQueue {
    pub fn new(capacity: usize, starvation_limit: u32) -> Self {
        let capacity = capacity.max(1);
        Self {
            lanes: Mutex::new(Lanes::new(starvation_limit)),
            free: Semaphore::new(capacity),
            queued: Semaphore::new(0),
            capacity,
        }
    }

    /// Enqueue, waiting up to `wait` for space. Fails with `QueueSaturated`
    /// if the queue stays full or has been closed.
    pub async fn push(&self, event: Event, wait: Duration) -> RealtimeResult<()> {
        let permit = match tokio::time::timeout(wait, self.free.acquire()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) | Err(_) => return Err(RealtimeError::QueueSaturated),
        };
        permit.forget();
        self.lanes.lock().push(event);
        self.queued.add_permits(1);
        Ok(())
    }

    /// Enqueue without waiting; hands the event back when full.
    pub fn try_push(&self, event: Event) -> Result<(), Event> {
        match self.free.try_acquire() {
            Ok(permit) => {
                permit.forget();
                self.lanes.lock().push(event);
                self.queued.add_permits(1);
                Ok(())
            }
            Err(_) => Err(event),
        }
    }

    /// Wait for the next event. Returns `None` once the queue is closed.
    pub async fn pop(&self) -> Option<Event> {
        let permit = self.queued.acquire().await.ok()?;
        permit.forget();
        self.take()
    }

    pub fn try_pop(&self) -> Option<Event> {
        let permit = self.queued.try_acquire().ok()?;
        permit.forget();
        self.take()
    }

    /// Wake waiting producers and the consumer; further pushes and pops fail.
    pub fn close(&self) {
        self.free.close();
        self.queued.close();
    }

    pub fn depth(&self) -> usize {
        self.depth_by_priority().iter().sum()
    }

    /// Queued events per lane, `Critical` first.
    pub fn depth_by_priority(&self) -> [usize; LANES] {
        self.lanes.lock().depths()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn take(&self) -> Option<Event> {
        let event = self.lanes.lock().take_next();
        if event.is_some() {
            self.free.add_permits(1);
        }
        event
    }
}
