use std::{collections::HashMap, task::Waker};

use crate::dispatch::EntryId;

/// Data structure for managing the wakers of every handle waiting on a
/// dispatcher's lane. Only a single task needs to actually drive the
/// in-flight request, but other tasks must be able to take its place if that
/// one finishes or is dropped.
///
/// Wakers are keyed by the id of the entry their handle is waiting for.
///
/// The WakerSet maintains the notion of the "driving waker"; this is the
/// waker that most recently polled the lane, and so the one the in-flight
/// request will wake. If the driving waker is discarded from the set, another
/// is selected and awoken, so the lane always has a path forward as long as
/// someone is waiting on it.
#[derive(Debug, Default)]
pub(crate) struct WakerSet {
    wakers: HashMap<EntryId, Waker>,
    driving_waker: Option<EntryId>,
}

impl WakerSet {
    /// Store the waker for an entry, replacing any previous one. This waker
    /// becomes the driving waker, on the assumption that it has just been
    /// used to poll the lane.
    pub(crate) fn register(&mut self, id: EntryId, waker: &Waker) {
        match self.wakers.get_mut(&id) {
            Some(existing) if existing.will_wake(waker) => {}
            Some(existing) => existing.clone_from(waker),
            None => {
                self.wakers.insert(id, waker.clone());
            }
        }

        self.driving_waker = Some(id);
    }

    /// Wake the handle waiting for an entry, if it has ever been polled. The
    /// waker stays in the set until the handle discards it.
    pub(crate) fn wake(&self, id: EntryId) {
        if let Some(waker) = self.wakers.get(&id) {
            waker.wake_by_ref();
        }
    }

    /// Discard a waker from this set. If that waker was the current driving
    /// waker, the current driving waker is unset. This method should only be
    /// used when the lane is idle; otherwise, discard_and_wake should be
    /// preferred to ensure that another waker takes this one's place if it
    /// was the driving waker.
    pub(crate) fn discard_waker(&mut self, id: EntryId) {
        self.wakers.remove(&id);
        if self.driving_waker == Some(id) {
            self.driving_waker = None;
        }
    }

    /// Discard a waker from this set. If that waker was the current driving
    /// waker (or there is currently no driving waker), an arbitrary waker is
    /// made the current driving waker and awoken.
    ///
    /// We create a new driving waker immediately because if a series of drops
    /// happen at the same time we need to ensure that at least one non-dropped
    /// waker is awoken.
    pub(crate) fn discard_and_wake(&mut self, id: EntryId) {
        self.wakers.remove(&id);
        if self.driving_waker == Some(id) || self.driving_waker.is_none() {
            match self.wakers.iter().next() {
                None => self.driving_waker = None,
                Some((&next, waker)) => {
                    self.driving_waker = Some(next);
                    waker.wake_by_ref();
                }
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.wakers.len()
    }
}
