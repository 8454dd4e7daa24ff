use std::future::Future;

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};

/// Run `f` over `items` with at most `limit` futures in flight and join
/// them all. Results come back in input order.
// Boxed so callers' futures stay `Send` despite borrowed items (rustc
// cannot prove higher-ranked `Send` through the un-erased stream type).
pub fn fan_out<'a, I, F, Fut, T>(items: I, limit: usize, f: F) -> BoxFuture<'a, Vec<T>>
where
    I: IntoIterator + 'a,
    I::IntoIter: Send + 'a,
    F: FnMut(I::Item) -> Fut + Send + 'a,
    Fut: Future<Output = T> + Send + 'a,
    T: Send + 'a,
{
    stream::iter(items)
        .map(f)
        .buffered(limit.max(1))
        .collect()
        .boxed()
}
