// Copyright (C) 2020 Matthew Waters <matthew@centricular.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::Instant;

use crate::conncheck::ChecklistId;
use crate::manager::EndpointId;

/// The periodic work items of an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) enum Task {
    ServerReflexive(EndpointId),
    ChangePassword(EndpointId),
    Checklist(EndpointId, ChecklistId),
}

impl Task {
    pub(crate) fn endpoint(self) -> EndpointId {
        match self {
            Task::ServerReflexive(id) | Task::ChangePassword(id) | Task::Checklist(id, _) => id,
        }
    }
}

/// Min-heap of tasks keyed by their release time.  A task is queued at most once; queueing it
/// again keeps the earlier of the two release times.
#[derive(Debug, Default)]
pub(crate) struct TaskQueue {
    heap: BinaryHeap<Reverse<(Instant, u64, Task)>>,
    scheduled: HashMap<Task, (Instant, u64)>,
    sequence: u64,
}

impl TaskQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn enqueue(&mut self, task: Task, release_time: Instant) {
        if let Some(&(existing, _)) = self.scheduled.get(&task) {
            if existing <= release_time {
                return;
            }
        }
        self.sequence += 1;
        trace!("enqueue {:?} at {:?}", task, release_time);
        self.scheduled.insert(task, (release_time, self.sequence));
        self.heap.push(Reverse((release_time, self.sequence, task)));
    }

    // drop heap entries superseded by a later enqueue or a cancel
    fn discard_stale(&mut self) {
        while let Some(Reverse((release_time, sequence, task))) = self.heap.peek() {
            if self.scheduled.get(task) == Some(&(*release_time, *sequence)) {
                break;
            }
            self.heap.pop();
        }
    }

    pub(crate) fn next_release_time(&mut self) -> Option<Instant> {
        self.discard_stale();
        self.heap.peek().map(|Reverse((release_time, _, _))| *release_time)
    }

    /// Remove and return the earliest task if it is due at `now`
    pub(crate) fn pop_due(&mut self, now: Instant) -> Option<Task> {
        let release_time = self.next_release_time()?;
        if release_time > now {
            return None;
        }
        let Reverse((_, _, task)) = self.heap.pop()?;
        self.scheduled.remove(&task);
        Some(task)
    }

    #[cfg(test)]
    pub(crate) fn cancel(&mut self, task: Task) {
        self.scheduled.remove(&task);
    }

    pub(crate) fn cancel_endpoint(&mut self, endpoint: EndpointId) {
        self.scheduled.retain(|task, _| task.endpoint() != endpoint);
    }

    pub(crate) fn clear(&mut self) {
        self.heap.clear();
        self.scheduled.clear();
    }

    #[cfg(test)]
    pub(crate) fn is_scheduled(&self, task: Task) -> bool {
        self.scheduled.contains_key(&task)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.scheduled.len()
    }
}
