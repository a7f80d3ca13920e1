//! Cooperative, cancellable mapping over large sequences.

use std::{
    future::Future,
    num::NonZeroUsize,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use futures_timer::Delay;
use tracing::debug;

use crate::error::Cancelled;

/// Number of elements transformed between pauses when none is given.
pub const DEFAULT_BATCH_SIZE: usize = 20;

/// How long a batch map pauses at each batch boundary by default.
pub const DEFAULT_PAUSE: Duration = Duration::from_millis(1);

/// A shared flag requesting early termination of a batch operation. Clones
/// share the same flag; whoever starts the operation keeps one to cancel it.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Defines the behavior of a batch map.
///
/// - `batch_size` is the number of elements transformed between pauses.
/// - `pause` is an async function called at every batch boundary. It should
///   give the executor a chance to run other work, typically by sleeping very
///   briefly.
#[derive(Debug, Clone)]
pub struct MapRules<Pause> {
    pub batch_size: NonZeroUsize,
    pub pause: Pause,
}

fn default_pause() -> Delay {
    Delay::new(DEFAULT_PAUSE)
}

impl MapRules<fn() -> Delay> {
    /// Rules with a timer-based pause. A `batch_size` of zero selects
    /// [`DEFAULT_BATCH_SIZE`].
    pub fn new(batch_size: usize) -> Self {
        let batch_size = NonZeroUsize::new(batch_size)
            .or_else(|| NonZeroUsize::new(DEFAULT_BATCH_SIZE))
            .unwrap_or(NonZeroUsize::MIN);

        Self {
            batch_size,
            pause: default_pause,
        }
    }
}

impl Default for MapRules<fn() -> Delay> {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE)
    }
}

impl<Pause, P> MapRules<Pause>
where
    Pause: Fn() -> P,
    P: Future<Output = ()>,
{
    /// Apply `transform` to every item, in order, and collect the results.
    ///
    /// After every `batch_size` items (never before the first one, never
    /// after the last one) this pauses and then checks `token`. If the token
    /// is cancelled, the partial output is dropped and the map fails with
    /// [`Cancelled`]. Cancellation is never observed in the middle of a
    /// batch.
    pub async fn map<I, U, F>(
        &self,
        items: I,
        mut transform: F,
        token: &CancellationToken,
    ) -> Result<Vec<U>, Cancelled>
    where
        I: IntoIterator,
        F: FnMut(I::Item) -> U,
    {
        let items = items.into_iter();
        let mut output = Vec::with_capacity(items.size_hint().0);

        for (index, item) in items.enumerate() {
            if index != 0 && index % self.batch_size.get() == 0 {
                (self.pause)().await;

                if token.is_cancelled() {
                    debug!(processed = index, "batch map cancelled");
                    return Err(Cancelled);
                }
            }

            output.push(transform(item));
        }

        Ok(output)
    }
}

/// Map `items` through `transform` in batches of `batch_size` (zero selects
/// [`DEFAULT_BATCH_SIZE`]), pausing briefly between batches and giving up
/// with [`Cancelled`] if `token` is cancelled. See [`MapRules::map`].
pub async fn map_async<I, U, F>(
    items: I,
    transform: F,
    batch_size: usize,
    token: &CancellationToken,
) -> Result<Vec<U>, Cancelled>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> U,
{
    MapRules::new(batch_size).map(items, transform, token).await
}
