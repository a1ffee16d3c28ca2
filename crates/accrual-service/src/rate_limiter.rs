//! 自适应限流器
//!
//! 所有对账 worker 共享同一个实例，统一控制对积分计算服务的请求速率。
//! 外部服务只在拒绝请求（HTTP 429）时才告知配额，因此限流参数在运行中由
//! `reconfigure` 实时调整：暂停到 Retry-After 指定时刻，之后按新配额放行。
//!
//! ## 实现
//!
//! 令牌桶以"理论到达时间"（GCRA）形式表示：`next_free` 是下一个令牌可用的时刻，
//! 每放行一次向后推进一个发放间隔，突发容量允许提前 `(burst - 1)` 个间隔放行。
//! 状态只在 Mutex 内读写，令牌在锁内扣减，不会出现同一令牌被两个调用方拿到。
//! 等待方不持锁睡眠；`reconfigure` 通过 Notify 唤醒所有等待方重新计算。

use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::AccrualError;

/// 限流状态，受 Mutex 保护
#[derive(Debug)]
struct LimiterState {
    /// 两个令牌之间的发放间隔，None 表示不限流
    interval: Option<Duration>,
    /// 瞬时突发容量
    burst: u32,
    /// 在此时刻之前暂停一切放行
    effective_from: Option<Instant>,
    /// 下一个令牌可用的理论时刻
    next_free: Instant,
}

impl LimiterState {
    /// 尝试在 now 时刻取走一个令牌
    ///
    /// 成功返回 Ok，否则返回最早可能成功的时刻。
    fn try_acquire(&mut self, now: Instant) -> Result<(), Instant> {
        if let Some(from) = self.effective_from {
            if now < from {
                return Err(from);
            }
        }

        let Some(interval) = self.interval else {
            return Ok(());
        };

        let tolerance = interval * self.burst.saturating_sub(1);
        let earliest = self
            .next_free
            .checked_sub(tolerance)
            .unwrap_or(self.next_free);

        if now < earliest {
            return Err(earliest);
        }

        self.next_free = self.next_free.max(now) + interval;
        Ok(())
    }
}

/// 当前限流配置快照（用于日志和测试）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterSnapshot {
    pub interval: Option<Duration>,
    pub burst: u32,
    pub paused_until: Option<Instant>,
}

/// 自适应限流器
///
/// 线程安全，通过 Arc 在所有 worker 间共享。
#[derive(Debug)]
pub struct AdaptiveRateLimiter {
    state: Mutex<LimiterState>,
    reconfigured: Notify,
}

impl AdaptiveRateLimiter {
    /// 不限流，直到第一次收到限流响应
    pub fn unlimited() -> Self {
        Self::with_state(None, 0)
    }

    /// 按每分钟请求数限流，突发容量为 1
    pub fn per_minute(requests_per_minute: u32) -> Self {
        Self::with_state(per_minute_interval(requests_per_minute), 1)
    }

    /// 按配置创建：未设置配额时不限流
    pub fn from_config(initial_requests_per_minute: Option<u32>) -> Self {
        match initial_requests_per_minute {
            Some(rpm) => Self::per_minute(rpm),
            None => Self::unlimited(),
        }
    }

    fn with_state(interval: Option<Duration>, burst: u32) -> Self {
        Self {
            state: Mutex::new(LimiterState {
                interval,
                burst,
                effective_from: None,
                next_free: Instant::now(),
            }),
            reconfigured: Notify::new(),
        }
    }

    /// 等待一个令牌
    ///
    /// 取消信号先于令牌到达时返回 `AccrualError::Cancelled`。
    /// 不保证公平性，但保证不会超发。
    pub async fn wait(&self, cancel: &CancellationToken) -> Result<(), AccrualError> {
        loop {
            if cancel.is_cancelled() {
                return Err(AccrualError::Cancelled);
            }

            // 先登记通知再检查状态，避免错过检查与等待之间发生的 reconfigure
            let reconfigured = self.reconfigured.notified();

            let retry_at = match self.state.lock().try_acquire(Instant::now()) {
                Ok(()) => return Ok(()),
                Err(at) => at,
            };

            tokio::select! {
                _ = cancel.cancelled() => return Err(AccrualError::Cancelled),
                _ = sleep_until(retry_at) => {}
                _ = reconfigured => {
                    debug!("限流配置已变更，重新计算等待时间");
                }
            }
        }
    }

    /// 按外部服务的限流响应调整配置
    ///
    /// 突发容量置为 1，速率改为 `requests_per_minute` 折算的间隔，
    /// 并在 `pause_until` 之前暂停放行。正在等待的调用方会立即看到新配置。
    /// `requests_per_minute` 为 0 时保留原速率，只应用暂停。
    pub fn reconfigure(&self, pause_until: Instant, requests_per_minute: u32) {
        {
            let mut state = self.state.lock();
            if let Some(interval) = per_minute_interval(requests_per_minute) {
                state.interval = Some(interval);
            }
            state.burst = 1;
            state.effective_from = Some(pause_until);
            state.next_free = pause_until;
        }

        info!(
            requests_per_minute,
            pause_ms = pause_until
                .saturating_duration_since(Instant::now())
                .as_millis() as u64,
            "限流器已按外部配额重新配置"
        );

        self.reconfigured.notify_waiters();
    }

    pub fn snapshot(&self) -> LimiterSnapshot {
        let state = self.state.lock();
        LimiterSnapshot {
            interval: state.interval,
            burst: state.burst,
            paused_until: state
                .effective_from
                .filter(|from| *from > Instant::now()),
        }
    }
}

fn per_minute_interval(requests_per_minute: u32) -> Option<Duration> {
    (requests_per_minute > 0).then(|| Duration::from_secs(60) / requests_per_minute)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio_test::{assert_pending, assert_ready_ok, task};

    #[tokio::test(start_paused = true)]
    async fn test_unlimited_admits_immediately() {
        let limiter = AdaptiveRateLimiter::unlimited();
        let token = CancellationToken::new();
        let start = Instant::now();

        for _ in 0..100 {
            limiter.wait(&token).await.unwrap();
        }

        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(limiter.snapshot().interval, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconfigure_pauses_then_spaces_requests() {
        let limiter = AdaptiveRateLimiter::unlimited();
        let token = CancellationToken::new();
        let start = Instant::now();

        // Retry-After: 60, "No more than 10 requests per minute allowed"
        limiter.reconfigure(start + Duration::from_secs(60), 10);

        limiter.wait(&token).await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(60));

        limiter.wait(&token).await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(66));

        limiter.wait(&token).await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(72));
    }

    #[tokio::test(start_paused = true)]
    async fn test_nothing_admitted_during_pause() {
        let limiter = AdaptiveRateLimiter::unlimited();
        let token = CancellationToken::new();
        limiter.reconfigure(Instant::now() + Duration::from_secs(60), 10);

        let mut waiting = task::spawn(limiter.wait(&token));
        assert_pending!(waiting.poll());

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_pending!(waiting.poll());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_ready_ok!(waiting.poll());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_waiters_never_share_a_token() {
        let limiter = Arc::new(AdaptiveRateLimiter::per_minute(60));
        let token = CancellationToken::new();
        let start = Instant::now();
        limiter.reconfigure(start, 60);

        let mut handles = Vec::new();
        for _ in 0..5 {
            let limiter = limiter.clone();
            let token = token.clone();
            handles.push(tokio::spawn(async move {
                limiter.wait(&token).await.unwrap();
                Instant::now()
            }));
        }

        let mut admitted = Vec::new();
        for handle in handles {
            admitted.push(handle.await.unwrap());
        }
        admitted.sort();

        for pair in admitted.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(1));
        }
        assert_eq!(admitted[4] - start, Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiters_observe_reconfiguration() {
        let limiter = Arc::new(AdaptiveRateLimiter::unlimited());
        let token = CancellationToken::new();
        let start = Instant::now();
        limiter.reconfigure(start + Duration::from_secs(3600), 10);

        let waiter = {
            let limiter = limiter.clone();
            let token = token.clone();
            tokio::spawn(async move { limiter.wait(&token).await })
        };
        tokio::task::yield_now().await;

        // 新的限流响应把暂停缩短到 5 秒
        limiter.reconfigure(start + Duration::from_secs(5), 10);

        waiter.await.unwrap().unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_wait() {
        let limiter = Arc::new(AdaptiveRateLimiter::unlimited());
        let token = CancellationToken::new();
        limiter.reconfigure(Instant::now() + Duration::from_secs(600), 1);

        let waiter = {
            let limiter = limiter.clone();
            let token = token.clone();
            tokio::spawn(async move { limiter.wait(&token).await })
        };
        tokio::task::yield_now().await;
        token.cancel();

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(AccrualError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_quota_keeps_previous_rate() {
        let limiter = AdaptiveRateLimiter::per_minute(30);
        let until = Instant::now() + Duration::from_secs(10);
        limiter.reconfigure(until, 0);

        let snapshot = limiter.snapshot();
        assert_eq!(snapshot.interval, Some(Duration::from_secs(2)));
        assert_eq!(snapshot.burst, 1);
        assert_eq!(snapshot.paused_until, Some(until));
    }

    #[test]
    fn test_from_config() {
        let unlimited = AdaptiveRateLimiter::from_config(None);
        assert_eq!(unlimited.snapshot().interval, None);

        let limited = AdaptiveRateLimiter::from_config(Some(120));
        assert_eq!(limited.snapshot().interval, Some(Duration::from_millis(500)));
    }
}
