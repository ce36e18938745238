use std::time::Duration;

use tokio::time::Instant;

/// Trailing-edge debounce over a single pending payload.
///
/// Every [`submit`](Self::submit) replaces the payload and pushes the
/// deadline out to `now + interval`; [`poll`](Self::poll) hands the payload
/// back once the deadline has passed. Time is always passed in, so the owner
/// decides what "now" is.
#[derive(Debug)]
pub struct Debouncer<T> {
    interval: Duration,
    pending: Option<(T, Instant)>,
}

impl<T> Debouncer<T> {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            pending: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Replaces any pending payload and restarts the window. Returns the
    /// payload that was displaced, if any.
    pub fn submit(&mut self, payload: T, now: Instant) -> Option<T> {
        self.pending
            .replace((payload, now + self.interval))
            .map(|(old, _)| old)
    }

    /// Drops the pending payload without firing.
    pub fn cancel(&mut self) -> Option<T> {
        self.pending.take().map(|(payload, _)| payload)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|(_, deadline)| *deadline)
    }

    /// Takes the payload if its window has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<T> {
        match &self.pending {
            Some((_, deadline)) if *deadline <= now => self.cancel(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_burst_coalesces_into_last_payload() {
        let t0 = Instant::now();
        let mut debouncer = Debouncer::new(ms(1000));

        debouncer.submit("first", t0);
        debouncer.submit("second", t0 + ms(100));
        debouncer.submit("third", t0 + ms(200));

        let mut fired = Vec::new();
        for step in 0..=30 {
            let now = t0 + ms(step * 50);
            if let Some(payload) = debouncer.poll(now) {
                fired.push((payload, now - t0));
            }
        }
        assert_eq!(fired, vec![("third", ms(1200))]);
        assert!(!debouncer.is_pending());
    }

    #[test]
    fn test_not_ready_before_deadline() {
        let t0 = Instant::now();
        let mut debouncer = Debouncer::new(ms(750));
        assert_eq!(debouncer.submit(1, t0), None);
        assert_eq!(debouncer.deadline(), Some(t0 + ms(750)));
        assert_eq!(debouncer.poll(t0 + ms(749)), None);
        assert_eq!(debouncer.poll(t0 + ms(750)), Some(1));
        assert_eq!(debouncer.poll(t0 + ms(2000)), None);
    }

    #[test]
    fn test_cancel_discards_payload() {
        let t0 = Instant::now();
        let mut debouncer = Debouncer::new(ms(10));
        debouncer.submit("meta", t0);
        assert_eq!(debouncer.submit("meta2", t0), Some("meta"));
        assert_eq!(debouncer.cancel(), Some("meta2"));
        assert_eq!(debouncer.deadline(), None);
        assert_eq!(debouncer.poll(t0 + ms(100)), None);
    }
}
