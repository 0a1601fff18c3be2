use std::sync::Arc;
use std::time::Duration;

use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::Counter;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio::time::Interval;
use tokio::time::MissedTickBehavior;
use tokio::time::interval_at;
use tokio_util::sync::CancellationToken;
use tokio_util::sync::DropGuard;
use tracing::debug;
use tracing::trace;

use crate::request::PendingRequest;
use crate::ring::Ring;

/// Shortest replenishment period. Faster tickers start losing ticks.
pub(crate) const MIN_INTERVAL: Duration = Duration::from_millis(2);

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Replenishment period and per-tick grant for `limit` units per second.
///
/// The per-tick grant is rounded down, so the effective rate can sit
/// slightly below `limit` when it is not a multiple of the tick rate.
pub(crate) fn cadence(limit: usize) -> (Duration, usize) {
    let limit = limit.max(1);
    let period = Duration::from_nanos(NANOS_PER_SEC / limit as u64).max(MIN_INTERVAL);
    let ticks_per_sec = (NANOS_PER_SEC / period.as_nanos() as u64).max(1) as usize;
    (period, (limit / ticks_per_sec).max(1))
}

#[derive(Clone, Debug)]
struct ScheduleMetrics {
    granted: Counter<u64>,
    queued: Counter<u64>,
    discarded: Counter<u64>,
    attributes: [KeyValue; 1],
}

impl ScheduleMetrics {
    fn new(limit: usize) -> Self {
        let meter = global::meter("token_bucket_scheduler");
        Self {
            granted: meter.u64_counter("granted").build(),
            queued: meter.u64_counter("queued").build(),
            discarded: meter.u64_counter("discarded").build(),
            attributes: [KeyValue::new("limit", i64::try_from(limit).unwrap_or(i64::MAX))],
        }
    }
}

/// Bucket balance plus the queue of requests waiting on it.
///
/// Only the scheduler task touches this, one event at a time.
#[derive(Debug)]
pub(crate) struct Schedule {
    bucket: usize,
    limit: usize,
    token: usize,
    queue: Ring<Arc<PendingRequest>>,
    metrics: ScheduleMetrics,
}

impl Schedule {
    pub(crate) fn new(limit: usize, token: usize) -> Self {
        Self {
            bucket: 0,
            limit,
            token,
            queue: Ring::new(),
            metrics: ScheduleMetrics::new(limit),
        }
    }

    pub(crate) fn bucket(&self) -> usize {
        self.bucket
    }

    #[cfg(test)]
    pub(crate) fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Adds one tick's worth of quota, capped at the limit, then serves the queue.
    pub(crate) fn replenish(&mut self) {
        self.bucket = self.bucket.saturating_add(self.token).min(self.limit);
        self.drain();
    }

    /// Grants `req` straight away if nobody is waiting ahead of it and the
    /// bucket covers it. Otherwise it joins the tail of the queue.
    pub(crate) fn arrive(&mut self, req: Arc<PendingRequest>) {
        if self.queue.is_empty() && self.bucket >= req.size() {
            self.grant(&req);
            return;
        }
        self.queue.append(req);
        self.metrics.queued.add(1, &self.metrics.attributes);
        // A tick may have landed between this request being sent and received.
        self.drain();
    }

    /// Serves the queue head-first until the head no longer fits.
    ///
    /// Canceled entries are reclaimed here and nowhere else. A head that does
    /// not fit blocks everything behind it, however small.
    pub(crate) fn drain(&mut self) {
        loop {
            let (canceled, size) = match self.queue.peek_first() {
                Some(head) => (head.is_canceled(), head.size()),
                None => break,
            };
            if canceled {
                self.queue.pop_first();
                self.metrics.discarded.add(1, &self.metrics.attributes);
                continue;
            }
            if self.bucket < size {
                break;
            }
            if let Some(head) = self.queue.pop_first() {
                self.grant(&head);
            }
        }
    }

    /// Final pass when the limiter stops. Returns how many requests were left
    /// waiting; their callers stay blocked until they cancel.
    pub(crate) fn shutdown(&mut self) -> usize {
        self.drain();
        self.queue.len()
    }

    fn grant(&mut self, req: &PendingRequest) {
        let granted = req.mark_done();
        self.bucket -= granted;
        if granted > 0 {
            trace!(granted, bucket = self.bucket, "quota granted");
            self.metrics
                .granted
                .add(granted as u64, &self.metrics.attributes);
        }
    }
}

/// The worker that owns a [`Schedule`] for the lifetime of a limiter.
#[derive(Debug)]
pub(crate) struct Scheduler {
    schedule: Schedule,
    ticker: Interval,
    requests: mpsc::Receiver<Arc<PendingRequest>>,
    stop: CancellationToken,
    // Fires once the scheduler is gone, stop pass included.
    stopped: DropGuard,
}

impl Scheduler {
    pub(crate) fn new(
        limit: usize,
        period: Duration,
        token: usize,
        requests: mpsc::Receiver<Arc<PendingRequest>>,
        stop: CancellationToken,
        stopped: CancellationToken,
    ) -> Self {
        // The first tick lands one period in, the bucket starts empty.
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self {
            schedule: Schedule::new(limit, token),
            ticker,
            requests,
            stop,
            stopped: stopped.drop_guard(),
        }
    }

    pub(crate) async fn run(mut self) {
        debug!(
            limit = self.schedule.limit,
            token = self.schedule.token,
            period = ?self.ticker.period(),
            "token bucket scheduler started"
        );

        loop {
            tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                _ = self.ticker.tick() => self.schedule.replenish(),
                req = self.requests.recv() => match req {
                    Some(req) => self.schedule.arrive(req),
                    // Every sender is gone, so the limiter itself was dropped.
                    None => break,
                },
            }
        }

        let left_waiting = self.schedule.shutdown();
        debug!(
            bucket = self.schedule.bucket(),
            left_waiting, "token bucket scheduler stopped"
        );
        drop(self.stopped);
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::oneshot;

    use super::*;

    fn request(size: usize) -> (Arc<PendingRequest>, CancellationToken, oneshot::Receiver<()>) {
        let cancel = CancellationToken::new();
        let (req, rx) = PendingRequest::new(size, cancel.clone());
        (Arc::new(req), cancel, rx)
    }

    fn granted(rx: &mut oneshot::Receiver<()>) -> bool {
        rx.try_recv().is_ok()
    }

    #[test]
    fn it_derives_cadence() {
        assert_eq!(cadence(1), (Duration::from_secs(1), 1));
        assert_eq!(cadence(10), (Duration::from_millis(100), 1));
        assert_eq!(cadence(250), (Duration::from_millis(4), 1));
        // Floors at 2ms, 500 ticks per second.
        assert_eq!(cadence(1000), (MIN_INTERVAL, 2));
        assert_eq!(cadence(10 * (1 << 20)), (MIN_INTERVAL, 20_971));
    }

    #[test]
    fn it_clamps_the_limit_attribute() {
        let metrics = ScheduleMetrics::new(usize::MAX);
        assert_eq!(metrics.attributes[0].value, opentelemetry::Value::I64(i64::MAX));
        let metrics = ScheduleMetrics::new(1000);
        assert_eq!(metrics.attributes[0].value, opentelemetry::Value::I64(1000));
    }

    #[test]
    fn it_caps_the_bucket_at_the_limit() {
        let mut schedule = Schedule::new(5, 2);
        for _ in 0..10 {
            schedule.replenish();
            assert!(schedule.bucket() <= 5);
        }
        assert_eq!(schedule.bucket(), 5);
    }

    #[test]
    fn it_grants_immediately_when_idle_and_covered() {
        let mut schedule = Schedule::new(10, 4);
        schedule.replenish();

        let (req, _cancel, mut rx) = request(3);
        schedule.arrive(req);
        assert!(granted(&mut rx));
        assert_eq!(schedule.bucket(), 1);
        assert_eq!(schedule.queued(), 0);
    }

    #[test]
    fn it_queues_until_replenished() {
        let mut schedule = Schedule::new(10, 2);
        let (req, _cancel, mut rx) = request(3);
        schedule.arrive(req);
        assert_eq!(schedule.queued(), 1);

        schedule.replenish();
        assert!(!granted(&mut rx));
        assert_eq!(schedule.bucket(), 2);

        schedule.replenish();
        assert!(granted(&mut rx));
        assert_eq!(schedule.bucket(), 1);
        assert_eq!(schedule.queued(), 0);
    }

    #[test]
    fn it_never_lets_small_requests_overtake() {
        let mut schedule = Schedule::new(10, 1);
        let (big, _big_cancel, mut big_rx) = request(8);
        let (small, _small_cancel, mut small_rx) = request(1);
        schedule.arrive(big);
        schedule.arrive(small);

        for _ in 0..7 {
            schedule.replenish();
            assert!(!granted(&mut big_rx));
            assert!(!granted(&mut small_rx));
        }

        schedule.replenish();
        assert!(granted(&mut big_rx));
        assert!(!granted(&mut small_rx));
        assert_eq!(schedule.bucket(), 0);

        schedule.replenish();
        assert!(granted(&mut small_rx));
    }

    #[test]
    fn it_queues_behind_waiters_even_when_covered() {
        let mut schedule = Schedule::new(10, 3);
        let (big, _big_cancel, _big_rx) = request(5);
        schedule.arrive(big);
        schedule.replenish();
        assert_eq!(schedule.bucket(), 3);

        // The bucket could cover this one, but it arrived later.
        let (small, _small_cancel, mut small_rx) = request(1);
        schedule.arrive(small);
        assert!(!granted(&mut small_rx));
        assert_eq!(schedule.queued(), 2);
    }

    #[test]
    fn it_reclaims_canceled_requests_without_charging() {
        let mut schedule = Schedule::new(10, 1);
        let (gone, gone_cancel, mut gone_rx) = request(5);
        let (next, _next_cancel, mut next_rx) = request(1);
        schedule.arrive(gone);
        schedule.arrive(next);
        gone_cancel.cancel();
        assert_eq!(schedule.queued(), 2);

        schedule.replenish();
        assert!(!granted(&mut gone_rx));
        assert!(granted(&mut next_rx));
        assert_eq!(schedule.bucket(), 0);
        assert_eq!(schedule.queued(), 0);
    }

    #[test]
    fn it_charges_nothing_for_a_canceled_arrival() {
        let mut schedule = Schedule::new(10, 5);
        schedule.replenish();

        let (req, cancel, mut rx) = request(2);
        cancel.cancel();
        schedule.arrive(req);
        assert!(!granted(&mut rx));
        assert_eq!(schedule.bucket(), 5);
    }

    #[test]
    fn it_grants_what_it_can_on_shutdown() {
        let mut schedule = Schedule::new(10, 3);
        let (blocker, blocker_cancel, _blocker_rx) = request(5);
        let (fits, _fits_cancel, mut fits_rx) = request(2);
        let (too_big, _too_big_cancel, mut too_big_rx) = request(4);
        schedule.arrive(blocker);
        schedule.arrive(fits);
        schedule.arrive(too_big);
        schedule.replenish();
        assert_eq!(schedule.bucket(), 3);
        assert!(!granted(&mut fits_rx));

        // The head gives up between ticks; only the stop pass is left to notice.
        blocker_cancel.cancel();
        assert_eq!(schedule.shutdown(), 1);
        assert!(granted(&mut fits_rx));
        assert!(!granted(&mut too_big_rx));
        assert_eq!(schedule.bucket(), 1);
    }
}
