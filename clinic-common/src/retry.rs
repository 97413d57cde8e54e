use std::time;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
/// The retry policy the retrying consumer uses to decide whether and when a
/// failed record is handled again. Retries block the partition, so the policy
/// uses a fixed interval rather than an exponential backoff.
pub struct RetryPolicy {
    /// Time to wait between two attempts.
    interval: time::Duration,
    /// Total number of attempts, including the first one.
    max_attempts: u32,
    /// Time after the first attempt past which no attempt is started.
    max_elapsed: Option<time::Duration>,
}

impl RetryPolicy {
    pub fn new(interval: time::Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: max_attempts.max(1),
            max_elapsed: None,
        }
    }

    /// Stops retrying once the next attempt would start more than
    /// `max_elapsed` after the first one.
    pub fn with_max_elapsed(self, max_elapsed: time::Duration) -> Self {
        Self {
            max_elapsed: Some(max_elapsed),
            ..self
        }
    }

    pub fn max_elapsed(&self) -> Option<time::Duration> {
        self.max_elapsed
    }

    pub fn interval(&self) -> time::Duration {
        self.interval
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether another attempt is allowed after `attempt` attempts failed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Time until the next attempt, or `None` once the attempts are exhausted.
    pub fn time_until_next_retry(&self, attempt: u32) -> Option<time::Duration> {
        self.should_retry(attempt).then_some(self.interval)
    }

    /// Like `time_until_next_retry`, for a record first attempted `elapsed` ago.
    pub fn retry_after(&self, attempt: u32, elapsed: time::Duration) -> Option<time::Duration> {
        let delay = self.time_until_next_retry(attempt)?;
        match self.max_elapsed {
            Some(max_elapsed) if elapsed + delay > max_elapsed => None,
            _ => Some(delay),
        }
    }
}

impl Default for RetryPolicy {
    /// One attempt a minute for a day.
    fn default() -> Self {
        Self {
            interval: time::Duration::from_secs(60),
            max_attempts: 1440,
            max_elapsed: None,
        }
    }
}

/// Delays of a cascading retry pipeline. Stage 0 is the source topic and is
/// never delayed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DelayStages(Vec<time::Duration>);

impl DelayStages {
    pub fn new(delays: impl IntoIterator<Item = time::Duration>) -> Self {
        let mut stages = vec![time::Duration::ZERO];
        stages.extend(delays.into_iter().skip_while(|delay| delay.is_zero()));
        Self(stages)
    }

    pub fn delay(&self, stage: usize) -> Option<time::Duration> {
        self.0.get(stage).copied()
    }

    pub fn is_last(&self, stage: usize) -> bool {
        stage + 1 >= self.0.len()
    }

    pub fn last_stage(&self) -> usize {
        self.0.len() - 1
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Topic consumed by `stage`.
    pub fn topic(base: &str, stage: usize) -> String {
        if stage == 0 {
            base.to_owned()
        } else {
            format!("{base}.retry-{stage}")
        }
    }
}

impl Default for DelayStages {
    fn default() -> Self {
        Self::new([60, 300, 900, 3600].map(time::Duration::from_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_interval_until_exhausted() {
        let policy = RetryPolicy::new(time::Duration::from_secs(5), 3);

        assert_eq!(
            policy.time_until_next_retry(1),
            Some(time::Duration::from_secs(5))
        );
        assert_eq!(
            policy.time_until_next_retry(2),
            Some(time::Duration::from_secs(5))
        );
        assert_eq!(policy.time_until_next_retry(3), None);
    }

    #[test]
    fn at_least_one_attempt() {
        let policy = RetryPolicy::new(time::Duration::ZERO, 0);
        assert_eq!(policy.max_attempts(), 1);
        assert!(!policy.should_retry(1));
    }

    #[test]
    fn no_attempt_starts_past_the_elapsed_budget() {
        let policy = RetryPolicy::new(time::Duration::from_secs(60), 1440)
            .with_max_elapsed(time::Duration::from_secs(3600));

        assert_eq!(
            policy.retry_after(2, time::Duration::from_secs(3540)),
            Some(time::Duration::from_secs(60))
        );
        assert_eq!(policy.retry_after(2, time::Duration::from_secs(3541)), None);
        assert_eq!(
            RetryPolicy::new(time::Duration::from_secs(60), 1440)
                .retry_after(2, time::Duration::from_secs(7 * 24 * 3600)),
            Some(time::Duration::from_secs(60))
        );
    }

    #[test]
    fn default_retries_for_a_day() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.interval() * policy.max_attempts(),
            time::Duration::from_secs(24 * 3600)
        );
    }

    #[test]
    fn stage_zero_is_never_delayed() {
        let stages = DelayStages::new([0, 30, 120].map(time::Duration::from_secs));

        assert_eq!(stages.len(), 3);
        assert_eq!(stages.delay(0), Some(time::Duration::ZERO));
        assert_eq!(stages.delay(2), Some(time::Duration::from_secs(120)));
        assert!(!stages.is_last(1));
        assert!(stages.is_last(2));
        assert_eq!(stages.last_stage(), 2);
    }

    #[test]
    fn stage_topics() {
        assert_eq!(DelayStages::topic("clinic.redox", 0), "clinic.redox");
        assert_eq!(DelayStages::topic("clinic.redox", 3), "clinic.redox.retry-3");
    }
}
