//! Eventual values
//!
//! An `Eventual<T>` holds the latest successfully computed value of an
//! asynchronous derivation and broadcasts changes downstream. It is the
//! spine the agent's reconciliation graph is built from: timers feed
//! derivations, derivations are joined, and a terminal `pipe` consumes
//! joined snapshots.
//!
//! Failure quarantine is first class: a derivation that fails keeps its
//! previous value, the error handler runs once, and downstream consumers
//! never observe the failed attempt.
//!
//! Writes are deduplicated by equality, so a refresh that produces the
//! same value does not ripple through the graph. Built on
//! `tokio::sync::watch`, which provides exactly the latest-value
//! semantics needed: slow consumers observe the newest value only, so
//! pipe invocations are serialized and coalesced without extra buffering.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Timer output; the sequence number makes consecutive ticks distinct
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick(pub u64);

/// The latest value of an asynchronous derivation
pub struct Eventual<T> {
    rx: watch::Receiver<Option<T>>,
}

impl<T> Clone for Eventual<T> {
    fn clone(&self) -> Self {
        Self {
            rx: self.rx.clone(),
        }
    }
}

/// Write side of an eventual
pub struct EventualWriter<T> {
    tx: watch::Sender<Option<T>>,
}

impl<T: Clone + PartialEq + Send + Sync + 'static> EventualWriter<T> {
    /// Push a value downstream; a value equal to the current one is a
    /// no-op and does not wake consumers.
    pub fn write(&self, value: T) {
        self.tx.send_if_modified(|current| {
            if current.as_ref() == Some(&value) {
                return false;
            }
            *current = Some(value);
            true
        });
    }

    /// Whether every downstream receiver is gone
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once every downstream receiver is gone
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

impl<T: Clone + PartialEq + Send + Sync + 'static> Eventual<T> {
    /// Create an eventual with no value yet, plus its writer
    pub fn new() -> (EventualWriter<T>, Eventual<T>) {
        let (tx, rx) = watch::channel(None);
        (EventualWriter { tx }, Eventual { rx })
    }

    /// The latest value, if any has been produced
    pub fn latest(&self) -> Option<T> {
        self.rx.borrow().clone()
    }

    /// Wait for the next value; `None` once the writer is gone for good
    pub async fn value(&self) -> Option<T> {
        let mut rx = self.rx.clone();
        loop {
            if let Some(value) = rx.borrow_and_update().clone() {
                return Some(value);
            }
            if rx.changed().await.is_err() {
                return rx.borrow().clone();
            }
        }
    }

    /// Derive a new eventual by applying `f` to every value
    pub fn map<U, F, Fut>(&self, f: F) -> Eventual<U>
    where
        U: Clone + PartialEq + Send + Sync + 'static,
        F: Fn(T) -> Fut + Send + 'static,
        Fut: Future<Output = U> + Send,
    {
        self.try_map(
            move |value| {
                let fut = f(value);
                async move { Ok::<U, std::convert::Infallible>(fut.await) }
            },
            |_| {},
        )
    }

    /// Derive a new eventual by applying a fallible `f` to every value
    ///
    /// When `f` fails, `on_error` runs exactly once for that attempt and
    /// the previous successful value is retained; nothing propagates
    /// downstream.
    pub fn try_map<U, E, F, Fut, H>(&self, f: F, on_error: H) -> Eventual<U>
    where
        U: Clone + PartialEq + Send + Sync + 'static,
        E: Send + 'static,
        F: Fn(T) -> Fut + Send + 'static,
        Fut: Future<Output = Result<U, E>> + Send,
        H: Fn(E) + Send + 'static,
    {
        let (writer, out) = Eventual::new();
        let mut rx = self.rx.clone();
        tokio::spawn(async move {
            // Process the value present at subscription time, then every
            // change after it. A change arriving while `f` runs collapses
            // into the latest snapshot.
            let mut current = rx.borrow_and_update().clone();
            loop {
                if let Some(value) = current.take() {
                    match f(value).await {
                        Ok(output) => {
                            if writer.is_closed() {
                                break;
                            }
                            writer.write(output);
                        }
                        Err(e) => on_error(e),
                    }
                }
                if rx.changed().await.is_err() {
                    break;
                }
                current = rx.borrow_and_update().clone();
            }
        });
        out
    }

    /// Terminal consumer: run `f` on every new value
    ///
    /// Invocations are serialized; values arriving while `f` runs coalesce
    /// so only the most recent pending snapshot runs next.
    pub fn pipe<F, Fut>(&self, f: F) -> PipeHandle
    where
        F: Fn(T) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let mut rx = self.rx.clone();
        let handle = tokio::spawn(async move {
            let mut current = rx.borrow_and_update().clone();
            loop {
                if let Some(value) = current.take() {
                    f(value).await;
                }
                if rx.changed().await.is_err() {
                    break;
                }
                current = rx.borrow_and_update().clone();
            }
        });
        PipeHandle { handle }
    }
}

/// Handle to a running pipe task
pub struct PipeHandle {
    handle: JoinHandle<()>,
}

impl PipeHandle {
    /// Stop the pipe task
    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for PipeHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// An eventual that fires on a steady cadence, first fire immediate
///
/// The timer task exits once all downstream receivers are dropped.
pub fn timer(period: Duration) -> Eventual<Tick> {
    let (writer, out) = Eventual::new();
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sequence = 0u64;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if writer.is_closed() {
                        break;
                    }
                    writer.write(Tick(sequence));
                    sequence += 1;
                }
                _ = writer.closed() => break,
            }
        }
    });
    out
}

/// Join two eventuals: fires once both have a value, then on any change
pub fn join2<A, B>(a: &Eventual<A>, b: &Eventual<B>) -> Eventual<(A, B)>
where
    A: Clone + PartialEq + Send + Sync + 'static,
    B: Clone + PartialEq + Send + Sync + 'static,
{
    let (writer, out) = Eventual::new();
    let mut ra = a.rx.clone();
    let mut rb = b.rx.clone();
    tokio::spawn(async move {
        loop {
            let snapshot = {
                let va = ra.borrow_and_update().clone();
                let vb = rb.borrow_and_update().clone();
                match (va, vb) {
                    (Some(a), Some(b)) => Some((a, b)),
                    _ => None,
                }
            };
            if let Some(snapshot) = snapshot {
                if writer.is_closed() {
                    break;
                }
                writer.write(snapshot);
            }
            tokio::select! {
                r = ra.changed() => if r.is_err() { break; },
                r = rb.changed() => if r.is_err() { break; },
            }
        }
    });
    out
}

/// Join three eventuals; see [`join2`]
pub fn join3<A, B, C>(a: &Eventual<A>, b: &Eventual<B>, c: &Eventual<C>) -> Eventual<(A, B, C)>
where
    A: Clone + PartialEq + Send + Sync + 'static,
    B: Clone + PartialEq + Send + Sync + 'static,
    C: Clone + PartialEq + Send + Sync + 'static,
{
    join2(&join2(a, b), c).map(|((a, b), c)| async move { (a, b, c) })
}

/// Join four eventuals; see [`join2`]
pub fn join4<A, B, C, D>(
    a: &Eventual<A>,
    b: &Eventual<B>,
    c: &Eventual<C>,
    d: &Eventual<D>,
) -> Eventual<(A, B, C, D)>
where
    A: Clone + PartialEq + Send + Sync + 'static,
    B: Clone + PartialEq + Send + Sync + 'static,
    C: Clone + PartialEq + Send + Sync + 'static,
    D: Clone + PartialEq + Send + Sync + 'static,
{
    join2(&join2(a, b), &join2(c, d)).map(|((a, b), (c, d))| async move { (a, b, c, d) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_map_transforms_values() {
        let (writer, source) = Eventual::<u32>::new();
        let doubled = source.map(|v| async move { v * 2 });

        writer.write(21);
        assert_eq!(doubled.value().await, Some(42));
    }

    #[tokio::test]
    async fn test_try_map_quarantines_errors() {
        let (writer, source) = Eventual::<u32>::new();
        let errors = Arc::new(AtomicUsize::new(0));
        let errors_seen = errors.clone();
        let derived = source.try_map(
            |v| async move {
                if v % 2 == 0 {
                    Ok(v)
                } else {
                    Err("odd")
                }
            },
            move |_| {
                errors_seen.fetch_add(1, Ordering::SeqCst);
            },
        );

        writer.write(2);
        assert_eq!(derived.value().await, Some(2));

        writer.write(3);
        // Give the derivation task a chance to run the failing attempt.
        sleep(Duration::from_millis(50)).await;
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        // The previous successful value is retained.
        assert_eq!(derived.latest(), Some(2));

        writer.write(4);
        assert_eq!(derived.value().await, Some(4));
    }

    #[tokio::test]
    async fn test_equal_writes_do_not_ripple() {
        let (writer, source) = Eventual::<u32>::new();
        let fires = Arc::new(AtomicUsize::new(0));
        let fires_inner = fires.clone();
        let _derived = source.map(move |v| {
            let fires = fires_inner.clone();
            async move {
                fires.fetch_add(1, Ordering::SeqCst);
                v
            }
        });

        writer.write(7);
        sleep(Duration::from_millis(50)).await;
        writer.write(7);
        writer.write(7);
        sleep(Duration::from_millis(50)).await;

        assert_eq!(fires.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_join_waits_for_all_inputs() {
        let (wa, a) = Eventual::<u32>::new();
        let (wb, b) = Eventual::<&'static str>::new();
        let joined = join2(&a, &b);

        wa.write(1);
        sleep(Duration::from_millis(20)).await;
        assert_eq!(joined.latest(), None);

        wb.write("ready");
        assert_eq!(joined.value().await, Some((1, "ready")));

        wa.write(2);
        sleep(Duration::from_millis(20)).await;
        assert_eq!(joined.latest(), Some((2, "ready")));
    }

    #[tokio::test]
    async fn test_join4_delivers_latest_snapshot() {
        let (wa, a) = Eventual::<u8>::new();
        let (wb, b) = Eventual::<u8>::new();
        let (wc, c) = Eventual::<u8>::new();
        let (wd, d) = Eventual::<u8>::new();
        let joined = join4(&a, &b, &c, &d);

        wa.write(1);
        wb.write(2);
        wc.write(3);
        wd.write(4);
        assert_eq!(joined.value().await, Some((1, 2, 3, 4)));
    }

    #[tokio::test]
    async fn test_pipe_coalesces_bursts() {
        let (writer, source) = Eventual::<u32>::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let last = Arc::new(AtomicUsize::new(0));

        let runs_inner = runs.clone();
        let last_inner = last.clone();
        let _pipe = source.pipe(move |v| {
            let runs = runs_inner.clone();
            let last = last_inner.clone();
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                // Slow body so the burst below lands while it runs.
                sleep(Duration::from_millis(100)).await;
                last.store(v as usize, Ordering::SeqCst);
            }
        });

        writer.write(1);
        sleep(Duration::from_millis(30)).await;
        for v in 2..=10 {
            writer.write(v);
        }
        sleep(Duration::from_millis(300)).await;

        // One run for the first value, one for the coalesced burst.
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(last.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_timer_fires_repeatedly() {
        let ticks = timer(Duration::from_millis(20));
        let count = Arc::new(AtomicUsize::new(0));
        let count_inner = count.clone();
        let counted = ticks.map(move |_| {
            let count = count_inner.clone();
            async move { count.fetch_add(1, Ordering::SeqCst) + 1 }
        });

        assert!(counted.value().await.is_some());
        sleep(Duration::from_millis(90)).await;
        assert!(count.load(Ordering::SeqCst) >= 3);
    }
}
