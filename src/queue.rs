use std::collections::VecDeque;

/// Pending entries, kept in a single deque so that both request classes share
/// one ordering:
///
/// - normal entries are pushed at the front,
/// - priority entries are pushed at the back,
/// - entries are always taken from the back.
///
/// This serves every queued priority entry before any normal one, priority
/// entries newest first, and normal entries oldest first. A normal entry
/// pushed while priority entries are waiting lands behind them.
#[derive(Debug)]
pub(crate) struct RequestQueue<T> {
    entries: VecDeque<T>,
}

impl<T> Default for RequestQueue<T> {
    fn default() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }
}

impl<T> RequestQueue<T> {
    pub(crate) fn push(&mut self, entry: T, priority: bool) {
        if priority {
            self.entries.push_back(entry)
        } else {
            self.entries.push_front(entry)
        }
    }

    pub(crate) fn pop(&mut self) -> Option<T> {
        self.entries.pop_back()
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
