//! Bus-stop agents: the stop-side half of boarding and alighting.

use mts_core::{BusStopId, SegmentId};
use mts_person::Person;

/// The waiting-person list of one bus stop, ticked by its owning conflux.
///
/// The agent holds the persons whose active role is `WaitBusActivity` at
/// this stop.  When a bus dwells here, the conflux's bus-stop step alights
/// passengers bound for this stop and boards waiters while the bus has
/// spare capacity, in arrival order.
pub struct BusStopAgent {
    pub stop: BusStopId,
    pub segment: SegmentId,
    waiting: Vec<Box<Person>>,
}

impl BusStopAgent {
    pub fn new(stop: BusStopId, segment: SegmentId) -> Self {
        Self { stop, segment, waiting: Vec::new() }
    }

    pub fn add_waiting(&mut self, person: Box<Person>) {
        self.waiting.push(person);
    }

    pub fn waiting_count(&self) -> usize {
        self.waiting.len()
    }

    /// Remove and return the first `max` waiting persons (arrival order).
    pub fn take_boarders(&mut self, max: usize) -> Vec<Box<Person>> {
        let n = max.min(self.waiting.len());
        self.waiting.drain(..n).collect()
    }

    pub fn waiting_mut(&mut self) -> &mut [Box<Person>] {
        &mut self.waiting
    }

    pub fn for_each_person(&self, mut f: impl FnMut(&Person)) {
        for p in &self.waiting {
            f(p);
        }
    }
}
