//! 固定窗口请求配额
//!
//! 模拟积分计算服务的限流：每个窗口内最多放行 `limit` 个请求，超出时返回
//! 窗口剩余时间（向上取整到秒），对应响应中的 Retry-After。

use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug)]
struct Window {
    started_at: Instant,
    used: u32,
}

/// 固定窗口配额
#[derive(Debug)]
pub struct QuotaWindow {
    limit: u32,
    length: Duration,
    window: Mutex<Window>,
}

impl QuotaWindow {
    /// 每分钟最多 `requests_per_minute` 个请求
    pub fn per_minute(requests_per_minute: u32) -> Self {
        Self::new(requests_per_minute, Duration::from_secs(60))
    }

    /// 每 `length` 最多 `limit` 个请求
    pub fn new(limit: u32, length: Duration) -> Self {
        Self {
            limit,
            length: length.max(Duration::from_millis(1)),
            window: Mutex::new(Window {
                started_at: Instant::now(),
                used: 0,
            }),
        }
    }

    /// 折算成每分钟请求数，用于限流响应的说明文字
    pub fn advertised_requests_per_minute(&self) -> u32 {
        let per_minute = self.limit as f64 * 60.0 / self.length.as_secs_f64();
        per_minute.round().max(1.0) as u32
    }

    /// 尝试占用一个配额，失败时返回需要等待的整秒数
    pub fn try_acquire(&self) -> Result<(), u64> {
        self.try_acquire_at(Instant::now())
    }

    fn try_acquire_at(&self, now: Instant) -> Result<(), u64> {
        let mut window = self.window.lock();

        let elapsed = now.saturating_duration_since(window.started_at);
        if elapsed >= self.length {
            window.started_at = now;
            window.used = 0;
        }

        if window.used < self.limit {
            window.used += 1;
            return Ok(());
        }

        let remaining = self
            .length
            .saturating_sub(now.saturating_duration_since(window.started_at));
        Err(remaining.as_secs_f64().ceil().max(1.0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_within_window() {
        let quota = QuotaWindow::per_minute(2);
        let start = Instant::now();

        assert!(quota.try_acquire_at(start).is_ok());
        assert!(quota.try_acquire_at(start + Duration::from_secs(1)).is_ok());
        assert_eq!(quota.try_acquire_at(start + Duration::from_secs(20)), Err(40));
        assert_eq!(
            quota.try_acquire_at(start + Duration::from_millis(59_500)),
            Err(1)
        );
    }

    #[test]
    fn test_window_resets() {
        let quota = QuotaWindow::per_minute(1);
        let start = Instant::now();

        assert!(quota.try_acquire_at(start).is_ok());
        assert!(quota.try_acquire_at(start + Duration::from_secs(30)).is_err());
        assert!(quota.try_acquire_at(start + Duration::from_secs(60)).is_ok());
    }

    #[test]
    fn test_advertised_rate() {
        assert_eq!(QuotaWindow::per_minute(10).advertised_requests_per_minute(), 10);
        assert_eq!(
            QuotaWindow::new(2, Duration::from_secs(1)).advertised_requests_per_minute(),
            120
        );
        assert_eq!(QuotaWindow::per_minute(0).advertised_requests_per_minute(), 1);
    }
}
