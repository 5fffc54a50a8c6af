/// Trade execution latency tracking

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

const SAMPLE_WINDOW: usize = 100;

/// Latency metrics over the last hundred trades, plus a component
/// breakdown of the most recent one.
pub struct Metrics {
    samples: Mutex<SampleRing>,

    total_trades: AtomicI64,
    success_trades: AtomicI64,
    failed_trades: AtomicI64,

    last_parse_ms: AtomicI64,
    last_resolve_ms: AtomicI64,
    last_quote_ms: AtomicI64,
    last_sign_ms: AtomicI64,
    last_send_ms: AtomicI64,
    last_total_ms: AtomicI64,
}

struct SampleRing {
    samples: [i64; SAMPLE_WINDOW],
    idx: usize,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            samples: Mutex::new(SampleRing {
                samples: [0; SAMPLE_WINDOW],
                idx: 0,
            }),
            total_trades: AtomicI64::new(0),
            success_trades: AtomicI64::new(0),
            failed_trades: AtomicI64::new(0),
            last_parse_ms: AtomicI64::new(0),
            last_resolve_ms: AtomicI64::new(0),
            last_quote_ms: AtomicI64::new(0),
            last_sign_ms: AtomicI64::new(0),
            last_send_ms: AtomicI64::new(0),
            last_total_ms: AtomicI64::new(0),
        }
    }

    pub fn record_trade(
        &self,
        success: bool,
        parse_ms: i64,
        resolve_ms: i64,
        quote_ms: i64,
        sign_ms: i64,
        send_ms: i64,
    ) {
        let total_ms = parse_ms + resolve_ms + quote_ms + sign_ms + send_ms;

        {
            let mut ring = self.samples.lock().unwrap();
            let pos = ring.idx % SAMPLE_WINDOW;
            ring.samples[pos] = total_ms;
            ring.idx += 1;
        }

        self.total_trades.fetch_add(1, Ordering::Relaxed);
        if success {
            self.success_trades.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_trades.fetch_add(1, Ordering::Relaxed);
        }

        self.last_parse_ms.store(parse_ms, Ordering::Relaxed);
        self.last_resolve_ms.store(resolve_ms, Ordering::Relaxed);
        self.last_quote_ms.store(quote_ms, Ordering::Relaxed);
        self.last_sign_ms.store(sign_ms, Ordering::Relaxed);
        self.last_send_ms.store(send_ms, Ordering::Relaxed);
        self.last_total_ms.store(total_ms, Ordering::Relaxed);
    }

    pub fn p50(&self) -> i64 {
        self.percentile(50)
    }

    pub fn p95(&self) -> i64 {
        self.percentile(95)
    }

    pub fn p99(&self) -> i64 {
        self.percentile(99)
    }

    pub fn avg(&self) -> i64 {
        let ring = self.samples.lock().unwrap();
        let count = ring.idx.min(SAMPLE_WINDOW);
        if count == 0 {
            return 0;
        }
        ring.samples[..count].iter().sum::<i64>() / count as i64
    }

    fn percentile(&self, p: usize) -> i64 {
        let ring = self.samples.lock().unwrap();
        let count = ring.idx.min(SAMPLE_WINDOW);
        if count == 0 {
            return 0;
        }

        let mut sorted = ring.samples[..count].to_vec();
        sorted.sort_unstable();
        let idx = (p * count / 100).min(count - 1);
        sorted[idx]
    }

    /// (parse, resolve, quote, sign, send, total) of the last trade.
    pub fn last_breakdown(&self) -> (i64, i64, i64, i64, i64, i64) {
        (
            self.last_parse_ms.load(Ordering::Relaxed),
            self.last_resolve_ms.load(Ordering::Relaxed),
            self.last_quote_ms.load(Ordering::Relaxed),
            self.last_sign_ms.load(Ordering::Relaxed),
            self.last_send_ms.load(Ordering::Relaxed),
            self.last_total_ms.load(Ordering::Relaxed),
        )
    }

    /// (total, success, failed, success rate percent).
    pub fn stats(&self) -> (i64, i64, i64, f64) {
        let total = self.total_trades.load(Ordering::Relaxed);
        let success = self.success_trades.load(Ordering::Relaxed);
        let failed = self.failed_trades.load(Ordering::Relaxed);
        let rate = if total > 0 {
            success as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        (total, success, failed, rate)
    }
}

/// Wall-clock phase timer for a single trade.
pub struct TradeTimer {
    start: Instant,
    parse_end: Option<Instant>,
    resolve_end: Option<Instant>,
    quote_end: Option<Instant>,
    sign_end: Option<Instant>,
    send_end: Option<Instant>,
}

impl Default for TradeTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl TradeTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            parse_end: None,
            resolve_end: None,
            quote_end: None,
            sign_end: None,
            send_end: None,
        }
    }

    pub fn mark_parse_done(&mut self) {
        self.parse_end = Some(Instant::now());
    }

    pub fn mark_resolve_done(&mut self) {
        self.resolve_end = Some(Instant::now());
    }

    pub fn mark_quote_done(&mut self) {
        self.quote_end = Some(Instant::now());
    }

    pub fn mark_sign_done(&mut self) {
        self.sign_end = Some(Instant::now());
    }

    pub fn mark_send_done(&mut self) {
        self.send_end = Some(Instant::now());
    }

    /// Per-phase milliseconds: (parse, resolve, quote, sign, send).
    /// Each phase is measured from the end of the previous one.
    pub fn breakdown(&self) -> (i64, i64, i64, i64, i64) {
        let span = |from: Option<Instant>, to: Option<Instant>| -> i64 {
            match (from, to) {
                (Some(from), Some(to)) => to.duration_since(from).as_millis() as i64,
                _ => 0,
            }
        };

        let parse = span(Some(self.start), self.parse_end);
        let resolve = span(self.parse_end, self.resolve_end);
        let quote = span(self.resolve_end.or(self.parse_end).or(Some(self.start)), self.quote_end);
        let sign = span(self.quote_end, self.sign_end);
        let send = span(self.sign_end, self.send_end);
        (parse, resolve, quote, sign, send)
    }

    pub fn total_ms(&self) -> i64 {
        self.start.elapsed().as_millis() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_metrics_report_zero() {
        let metrics = Metrics::new();
        assert_eq!(metrics.p50(), 0);
        assert_eq!(metrics.avg(), 0);
        let (total, _, _, rate) = metrics.stats();
        assert_eq!(total, 0);
        assert_eq!(rate, 0.0);
    }

    #[test]
    fn test_success_rate() {
        let metrics = Metrics::new();
        metrics.record_trade(true, 1, 0, 10, 1, 5);
        metrics.record_trade(true, 1, 0, 12, 1, 4);
        metrics.record_trade(false, 1, 0, 30, 0, 0);

        let (total, success, failed, rate) = metrics.stats();
        assert_eq!((total, success, failed), (3, 2, 1));
        assert!((rate - 66.666).abs() < 0.01);
    }

    #[test]
    fn test_percentiles_over_known_samples() {
        let metrics = Metrics::new();
        for ms in 1..=10 {
            metrics.record_trade(true, 0, 0, ms, 0, 0);
        }

        assert_eq!(metrics.p50(), 6);
        assert_eq!(metrics.p99(), 10);
        assert_eq!(metrics.avg(), 5); // (1+..+10)/10 = 5.5 truncated
    }

    #[test]
    fn test_ring_wraps_past_window() {
        let metrics = Metrics::new();
        for _ in 0..150 {
            metrics.record_trade(true, 0, 0, 7, 0, 0);
        }
        assert_eq!(metrics.p50(), 7);
        assert_eq!(metrics.avg(), 7);
        let (total, ..) = metrics.stats();
        assert_eq!(total, 150);
    }

    #[test]
    fn test_last_breakdown() {
        let metrics = Metrics::new();
        metrics.record_trade(true, 1, 2, 3, 4, 5);
        assert_eq!(metrics.last_breakdown(), (1, 2, 3, 4, 5, 15));
    }

    #[test]
    fn test_timer_phases_are_sequential() {
        let mut timer = TradeTimer::new();
        timer.mark_parse_done();
        timer.mark_resolve_done();
        timer.mark_quote_done();
        timer.mark_sign_done();
        timer.mark_send_done();

        let (parse, resolve, quote, sign, send) = timer.breakdown();
        for phase in [parse, resolve, quote, sign, send] {
            assert!(phase >= 0);
        }
        assert!(timer.total_ms() >= 0);
    }
}
