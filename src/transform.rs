use crate::consumer::{Close, ConsumableStream, Packet};

/// Applies a function to every item (and close value) of a wrapped stream.
///
/// Built with [`ConsumableStream::map`]. Cancellation propagates to the
/// wrapped stream, so cancelling a transform chain never leaves a
/// producer-side wait suspended.
#[derive(Debug)]
pub struct Map<S, F> {
    inner: S,
    op: F,
}

impl<S, F> Map<S, F> {
    pub(crate) fn new(inner: S, op: F) -> Self {
        Self { inner, op }
    }
}

impl<S, U, F> ConsumableStream for Map<S, F>
where
    S: ConsumableStream,
    F: FnMut(S::Item) -> U,
{
    type Item = U;

    async fn next(&mut self) -> Packet<U> {
        match self.inner.next().await {
            Packet::Item(value) => Packet::Item((self.op)(value)),
            Packet::Done(Close::Value(value)) => Packet::Done(Close::Value((self.op)(value))),
            Packet::Done(Close::Error(err)) => Packet::Done(Close::Error(err)),
            Packet::Done(Close::Empty) => Packet::Done(Close::Empty),
        }
    }

    fn cancel(&self) {
        self.inner.cancel();
    }
}

/// Skips items rejected by a predicate. Terminal packets pass through
/// untouched. Built with [`ConsumableStream::filter`].
#[derive(Debug)]
pub struct Filter<S, F> {
    inner: S,
    predicate: F,
}

impl<S, F> Filter<S, F> {
    pub(crate) fn new(inner: S, predicate: F) -> Self {
        Self { inner, predicate }
    }
}

impl<S, F> ConsumableStream for Filter<S, F>
where
    S: ConsumableStream,
    F: FnMut(&S::Item) -> bool,
{
    type Item = S::Item;

    async fn next(&mut self) -> Packet<S::Item> {
        loop {
            match self.inner.next().await {
                Packet::Item(value) => {
                    if (self.predicate)(&value) {
                        return Packet::Item(value);
                    }
                }
                done => return done,
            }
        }
    }

    fn cancel(&self) {
        self.inner.cancel();
    }
}

/// Yields items while a predicate holds, then cancels the wrapped stream.
///
/// Built with [`ConsumableStream::take_while`]. The inner cancellation on
/// rejection is what releases the underlying cursor, so the source stream
/// can prune and close down cleanly.
#[derive(Debug)]
pub struct TakeWhile<S, F> {
    inner: S,
    predicate: F,
}

impl<S, F> TakeWhile<S, F> {
    pub(crate) fn new(inner: S, predicate: F) -> Self {
        Self { inner, predicate }
    }
}

impl<S, F> ConsumableStream for TakeWhile<S, F>
where
    S: ConsumableStream,
    F: FnMut(&S::Item) -> bool,
{
    type Item = S::Item;

    async fn next(&mut self) -> Packet<S::Item> {
        match self.inner.next().await {
            Packet::Item(value) => {
                if (self.predicate)(&value) {
                    Packet::Item(value)
                } else {
                    self.inner.cancel();
                    Packet::Done(Close::Empty)
                }
            }
            done => done,
        }
    }

    fn cancel(&self) {
        self.inner.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::WritableStream;

    #[tokio::test]
    async fn test_map_transforms_items_and_close_value() {
        let stream = WritableStream::new();
        let mut doubled = stream.consumer().map(|n: i32| n * 2);
        stream.write(1).unwrap();
        stream.write(2).unwrap();
        stream.close_with(5);

        assert_eq!(doubled.next().await, Packet::Item(2));
        assert_eq!(doubled.next().await, Packet::Item(4));
        assert_eq!(doubled.next().await, Packet::Done(Close::Value(10)));
        assert_eq!(doubled.next().await, Packet::Done(Close::Empty));
    }

    #[tokio::test]
    async fn test_filter_skips_rejected_items() {
        let stream = WritableStream::new();
        let mut evens = stream.consumer().filter(|n: &i32| n % 2 == 0);
        for i in 1..=6 {
            stream.write(i).unwrap();
        }
        stream.close();

        assert_eq!(evens.next().await, Packet::Item(2));
        assert_eq!(evens.next().await, Packet::Item(4));
        assert_eq!(evens.next().await, Packet::Item(6));
        assert_eq!(evens.next().await, Packet::Done(Close::Empty));
    }

    #[tokio::test]
    async fn test_take_while_cancels_inner_on_rejection() {
        let stream = WritableStream::new();
        let mut prefix = stream.consumer().take_while(|n: &i32| *n < 3);
        for i in 1..=5 {
            stream.write(i).unwrap();
        }

        assert_eq!(prefix.next().await, Packet::Item(1));
        assert_eq!(prefix.next().await, Packet::Item(2));
        assert_eq!(prefix.next().await, Packet::Done(Close::Empty));
        assert_eq!(prefix.next().await, Packet::Done(Close::Empty));

        // The wrapped cursor was cancelled, so the stream has no live
        // consumers left and the unread tail was pruned.
        assert_eq!(stream.consumer_count(), 0);
        assert_eq!(stream.buffered(), 0);
    }

    #[tokio::test]
    async fn test_cancel_propagates_through_chain() {
        let stream = WritableStream::new();
        let chained = stream
            .consumer()
            .map(|n: i32| n + 1)
            .filter(|n: &i32| *n > 0);
        stream.write(1).unwrap();

        chained.cancel();
        assert_eq!(stream.consumer_count(), 0);

        let mut chained = chained;
        assert_eq!(chained.next().await, Packet::Done(Close::Empty));
    }
}
