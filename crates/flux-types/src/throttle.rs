use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// 按时间间隔采样的日志节流器
///
/// 每个间隔内最多放行一次，放行时返回期间被抑制的次数。
pub struct LogThrottle {
    origin: Instant,
    interval_ms: u64,
    // 下次允许放行的时间点（相对 origin 的毫秒数）
    next_allowed_ms: AtomicU64,
    suppressed: AtomicU64,
}

impl LogThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            origin: Instant::now(),
            interval_ms: interval.as_millis().max(1) as u64,
            next_allowed_ms: AtomicU64::new(0),
            suppressed: AtomicU64::new(0),
        }
    }

    /// 记录一次事件；若本次应当输出日志，返回 `Some(被抑制次数)`
    pub fn hit(&self) -> Option<u64> {
        let now_ms = self.origin.elapsed().as_millis() as u64;
        let next = self.next_allowed_ms.load(Ordering::Relaxed);

        if now_ms >= next
            && self
                .next_allowed_ms
                .compare_exchange(next, now_ms + self.interval_ms, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
        {
            return Some(self.suppressed.swap(0, Ordering::AcqRel));
        }

        self.suppressed.fetch_add(1, Ordering::Relaxed);
        None
    }
}
