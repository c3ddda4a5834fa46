use std::time::{Duration, Instant};

/// Cancel-and-reschedule timer: every `schedule` replaces the pending value
/// and restarts the quiet period.
#[derive(Debug, Clone)]
pub struct Debouncer<T> {
    delay: Duration,
    pending: Option<(T, Instant)>,
}

impl<T> Debouncer<T> {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
        }
    }

    pub fn schedule(&mut self, value: T, now: Instant) {
        self.pending = Some((value, now));
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }

    /// Hands back the pending value once the quiet period has elapsed.
    pub fn fire_if_due(&mut self, now: Instant) -> Option<T> {
        let (_, queued_at) = self.pending.as_ref()?;
        if now.saturating_duration_since(*queued_at) >= self.delay {
            self.pending.take().map(|(value, _)| value)
        } else {
            None
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Time left until the pending value fires.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.pending
            .as_ref()
            .map(|(_, queued_at)| self.delay.saturating_sub(now.saturating_duration_since(*queued_at)))
    }
}

/// A task that runs once, at or after a deadline.
#[derive(Debug, Clone)]
pub struct OneShot<T> {
    due: Option<(T, Instant)>,
}

impl<T> Default for OneShot<T> {
    fn default() -> Self {
        Self { due: None }
    }
}

impl<T> OneShot<T> {
    pub fn after(value: T, now: Instant, delay: Duration) -> Self {
        Self {
            due: Some((value, now + delay)),
        }
    }

    pub fn arm(&mut self, value: T, now: Instant, delay: Duration) {
        self.due = Some((value, now + delay));
    }

    pub fn take_if_due(&mut self, now: Instant) -> Option<T> {
        let (_, deadline) = self.due.as_ref()?;
        if now >= *deadline {
            self.due.take().map(|(value, _)| value)
        } else {
            None
        }
    }

    pub fn is_armed(&self) -> bool {
        self.due.is_some()
    }

    pub fn cancel(&mut self) {
        self.due = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debouncer_coalesces_bursts() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(300));
        debouncer.schedule(800, start);
        debouncer.schedule(900, start + Duration::from_millis(200));
        assert_eq!(debouncer.fire_if_due(start + Duration::from_millis(400)), None);
        assert_eq!(
            debouncer.remaining(start + Duration::from_millis(400)),
            Some(Duration::from_millis(100))
        );
        assert_eq!(
            debouncer.fire_if_due(start + Duration::from_millis(500)),
            Some(900)
        );
        assert!(!debouncer.is_pending());
        assert_eq!(debouncer.fire_if_due(start + Duration::from_secs(5)), None);
    }

    #[test]
    fn cancelled_debounce_never_fires() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(10));
        debouncer.schedule((), start);
        debouncer.cancel();
        assert_eq!(debouncer.fire_if_due(start + Duration::from_secs(1)), None);
    }

    #[test]
    fn one_shot_fires_once() {
        let start = Instant::now();
        let mut task = OneShot::after("load", start, Duration::from_millis(100));
        assert!(task.take_if_due(start + Duration::from_millis(99)).is_none());
        assert_eq!(task.take_if_due(start + Duration::from_millis(100)), Some("load"));
        assert!(!task.is_armed());
        assert!(task.take_if_due(start + Duration::from_secs(1)).is_none());
    }
}
