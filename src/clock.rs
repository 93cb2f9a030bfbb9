use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use time::{Duration, OffsetDateTime, PrimitiveDateTime};

/// Source of the current local wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> PrimitiveDateTime;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> PrimitiveDateTime {
        let now = OffsetDateTime::now_local().unwrap_or_else(|err| {
            static WARNED: OnceCell<()> = OnceCell::new();
            WARNED.get_or_init(|| {
                tracing::warn!(%err, "local UTC offset unavailable, using UTC");
            });
            OffsetDateTime::now_utc()
        });
        PrimitiveDateTime::new(now.date(), now.time())
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<PrimitiveDateTime>,
}

impl FixedClock {
    pub fn new(now: PrimitiveDateTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: PrimitiveDateTime) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> PrimitiveDateTime {
        *self.now.lock()
    }
}
