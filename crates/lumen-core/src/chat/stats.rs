//! Rough throughput statistics for a streamed response.

use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

const TOKEN_SEPARATORS: &[char] = &[',', '.', '!', '?', ';', ':', '"', '\'', '-'];

/// Approximate the number of tokens in newly received text.
///
/// Splits on whitespace and common punctuation and counts the non-empty
/// fragments. Every non-empty fragment of text counts as at least one token.
pub fn count_tokens(new_text: &str) -> usize {
    if new_text.is_empty() {
        return 0;
    }
    new_text
        .split(|c: char| c.is_whitespace() || TOKEN_SEPARATORS.contains(&c))
        .filter(|fragment| !fragment.is_empty())
        .count()
        .max(1)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamStats {
    pub token_count: usize,
    pub tokens_per_second: f64,
    pub elapsed: Duration,
}

impl StreamStats {
    /// Stats for `token_count` tokens over `elapsed`. Zero elapsed time reports
    /// a rate of zero.
    pub fn compute(token_count: usize, elapsed: Duration) -> Self {
        let secs = elapsed.as_secs_f64();
        let tokens_per_second = if secs > 0.0 {
            token_count as f64 / secs
        } else {
            0.0
        };
        Self {
            token_count,
            tokens_per_second,
            elapsed,
        }
    }
}

impl fmt::Display for StreamStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} tokens | {:.1} tokens/s",
            self.token_count, self.tokens_per_second
        )
    }
}

/// Accumulates token counts from the send time onwards.
#[derive(Debug, Clone)]
pub struct RateMeter {
    started: Instant,
    token_count: usize,
    min_interval: Option<Duration>,
    last: Option<(Instant, StreamStats)>,
}

impl RateMeter {
    pub fn new(started: Instant, min_interval: Option<Duration>) -> Self {
        Self {
            started,
            token_count: 0,
            min_interval,
            last: None,
        }
    }

    /// Count `new_text` and report stats as of now.
    ///
    /// With a minimum interval configured, the rate is only recomputed once the
    /// interval has passed since the previous computation; the token count is
    /// always current.
    pub fn record(&mut self, new_text: &str) -> StreamStats {
        self.token_count += count_tokens(new_text);
        let now = Instant::now();

        if let (Some(interval), Some((at, stats))) = (self.min_interval, self.last) {
            if now.duration_since(at) < interval {
                return StreamStats {
                    token_count: self.token_count,
                    ..stats
                };
            }
        }

        let stats = StreamStats::compute(self.token_count, now.duration_since(self.started));
        self.last = Some((now, stats));
        stats
    }

    /// Final stats, always freshly computed.
    pub fn finish(&self) -> StreamStats {
        StreamStats::compute(self.token_count, self.started.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("", 0)]
    #[case("hello world", 2)]
    #[case("Hi, there! How's it going?", 6)]
    #[case("   ", 1)]
    #[case("...", 1)]
    #[case("well-known", 2)]
    fn counts_rough_tokens(#[case] text: &str, #[case] expected: usize) {
        assert_eq!(count_tokens(text), expected);
    }

    #[test]
    fn zero_elapsed_reports_zero_rate() {
        let stats = StreamStats::compute(42, Duration::ZERO);
        assert_eq!(stats.tokens_per_second, 0.0);
        assert!(stats.tokens_per_second.is_finite());
        assert_eq!(stats.to_string(), "42 tokens | 0.0 tokens/s");
    }

    #[test]
    fn formats_rate_to_one_decimal() {
        let stats = StreamStats::compute(10, Duration::from_millis(3000));
        assert_eq!(stats.to_string(), "10 tokens | 3.3 tokens/s");
    }

    #[tokio::test(start_paused = true)]
    async fn meter_measures_from_send_time() {
        let mut meter = RateMeter::new(Instant::now(), None);
        tokio::time::advance(Duration::from_secs(2)).await;

        let stats = meter.record("one two three four");
        assert_eq!(stats.token_count, 4);
        assert_eq!(stats.elapsed, Duration::from_secs(2));
        assert!((stats.tokens_per_second - 2.0).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn meter_throttles_rate_but_not_count() {
        let mut meter = RateMeter::new(Instant::now(), Some(Duration::from_millis(500)));
        tokio::time::advance(Duration::from_secs(1)).await;
        let first = meter.record("a b");

        tokio::time::advance(Duration::from_millis(100)).await;
        let throttled = meter.record("c d");
        assert_eq!(throttled.token_count, 4);
        assert_eq!(throttled.tokens_per_second, first.tokens_per_second);

        tokio::time::advance(Duration::from_millis(500)).await;
        let refreshed = meter.record("e");
        assert_eq!(refreshed.token_count, 5);
        assert!(refreshed.tokens_per_second != first.tokens_per_second);
    }

    #[tokio::test(start_paused = true)]
    async fn meter_without_elapsed_time_reports_zero() {
        let mut meter = RateMeter::new(Instant::now(), None);
        let stats = meter.record("instant");
        assert_eq!(stats.tokens_per_second, 0.0);
        assert_eq!(meter.finish().tokens_per_second, 0.0);
    }
}
