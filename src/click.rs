use std::{
    sync::{
        atomic::{AtomicI64, Ordering},
        Mutex,
    },
    time::{SystemTime, UNIX_EPOCH},
};

use crate::config::DEFAULT_DOUBLE_CLICK_INTERVAL_MS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Single,
    Double,
}

/// Turns raw `Activate` calls into single and double clicks.
#[derive(Debug)]
pub struct ClickArbiter {
    /// 0 until the first activation.
    last_activate_ms: Mutex<i64>,
    min_interval_ms: AtomicI64,
    last_click_xy: Mutex<(i32, i32)>,
}

impl Default for ClickArbiter {
    fn default() -> Self {
        Self::new(DEFAULT_DOUBLE_CLICK_INTERVAL_MS)
    }
}

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

impl ClickArbiter {
    pub fn new(min_interval_ms: i64) -> Self {
        Self {
            last_activate_ms: Mutex::new(0),
            min_interval_ms: AtomicI64::new(min_interval_ms),
            last_click_xy: Mutex::new((0, 0)),
        }
    }

    pub fn set_min_interval(&self, ms: i64) {
        self.min_interval_ms.store(ms, Ordering::Relaxed);
    }

    pub fn min_interval(&self) -> i64 {
        self.min_interval_ms.load(Ordering::Relaxed)
    }

    pub fn record_position(&self, x: i32, y: i32) {
        *self
            .last_click_xy
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = (x, y);
    }

    pub fn last_click_xy(&self) -> (i32, i32) {
        *self
            .last_click_xy
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    /// Classify an `Activate(x, y)` received at `now_ms`.
    ///
    /// After a double click the timestamp is latched to the interval itself, so the
    /// next activation is always measured against a point far in the past and
    /// can't produce a second double click.
    pub fn activate(&self, x: i32, y: i32, now_ms: i64) -> Activation {
        self.record_position(x, y);
        let min_interval = self.min_interval();
        let mut last = self
            .last_activate_ms
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if *last == 0 {
            *last = now_ms;
            return Activation::Single;
        }
        if now_ms - *last < min_interval {
            *last = min_interval;
            Activation::Double
        } else {
            *last = now_ms;
            Activation::Single
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    // wall clock times, the latch only works against real timestamps
    const T0: i64 = 1_700_000_000_000;

    #[test]
    fn double_click_synthesis() {
        let arbiter = ClickArbiter::new(500);

        assert_eq!(arbiter.activate(10, 20, T0), Activation::Single);
        assert_eq!(arbiter.last_click_xy(), (10, 20));

        assert_eq!(arbiter.activate(11, 21, T0 + 300), Activation::Double);
        assert_eq!(arbiter.last_click_xy(), (11, 21));

        assert_eq!(arbiter.activate(12, 22, T0 + 700), Activation::Single);
        assert_eq!(arbiter.last_click_xy(), (12, 22));
    }

    #[test]
    fn latch_blocks_a_second_double_click() {
        let arbiter = ClickArbiter::new(500);
        arbiter.activate(0, 0, T0);
        assert_eq!(arbiter.activate(0, 0, T0 + 100), Activation::Double);
        assert_eq!(arbiter.activate(0, 0, T0 + 200), Activation::Single);
        assert_eq!(arbiter.activate(0, 0, T0 + 300), Activation::Double);
    }

    #[test]
    fn slow_clicks_stay_single() {
        let arbiter = ClickArbiter::new(500);
        for i in 0..4 {
            assert_eq!(arbiter.activate(0, 0, T0 + i * 600), Activation::Single);
        }
    }

    #[test]
    fn interval_is_adjustable() {
        let arbiter = ClickArbiter::default();
        assert_eq!(arbiter.min_interval(), 500);
        arbiter.set_min_interval(100);
        arbiter.activate(0, 0, T0);
        assert_eq!(arbiter.activate(0, 0, T0 + 150), Activation::Single);
        assert_eq!(arbiter.activate(0, 0, T0 + 200), Activation::Double);
    }
}
