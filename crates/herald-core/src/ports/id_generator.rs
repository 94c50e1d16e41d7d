//! IdGenerator port - ID 生成の抽象化
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース。timestamp 部分は Clock から取る

use crate::domain::ids::{ContentId, JobId, LeaseId};
use crate::ports::Clock;
use ulid::Ulid;

/// Generates ids for queue records and content items.
pub trait IdGenerator: Send + Sync {
    fn job_id(&self) -> JobId;

    /// A fresh lease id per dequeue.
    fn lease_id(&self) -> LeaseId;

    fn content_id(&self) -> ContentId;
}

/// ULID generator.
///
/// Clock を使って timestamp を決めるので、FixedClock を渡せば timestamp 部分は
/// 決定的になる（ランダム部分は別）。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn job_id(&self) -> JobId {
        JobId::from(self.next())
    }

    fn lease_id(&self) -> LeaseId {
        LeaseId::from(self.next())
    }

    fn content_id(&self) -> ContentId {
        ContentId::from(self.next())
    }
}
