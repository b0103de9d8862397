//! IdGenerator port - ID 生成の抽象化
//!
//! ULID の時刻部分を Clock から取るので、FixedClock を渡せば
//! 生成順と時刻がテストで固定できます。

use std::sync::Arc;

use ulid::Ulid;

use crate::domain::ids::{AttemptId, JobId, TaskId};
use crate::ports::Clock;

pub trait IdGenerator: Send + Sync {
    fn generate_job_id(&self) -> JobId;

    fn generate_task_id(&self) -> TaskId;

    fn generate_attempt_id(&self) -> AttemptId;
}

/// UlidGenerator は ULID ベースの ID 生成器
pub struct UlidGenerator {
    clock: Arc<dyn Clock>,
}

impl UlidGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    fn next(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl IdGenerator for UlidGenerator {
    fn generate_job_id(&self) -> JobId {
        JobId::from(self.next())
    }

    fn generate_task_id(&self) -> TaskId {
        TaskId::from(self.next())
    }

    fn generate_attempt_id(&self) -> AttemptId {
        AttemptId::from(self.next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::{TimeZone, Utc};

    #[test]
    fn ids_are_unique() {
        let id_gen = UlidGenerator::new(Arc::new(SystemClock));
        let a = id_gen.generate_task_id();
        let b = id_gen.generate_task_id();
        assert_ne!(a, b);
    }

    #[test]
    fn timestamp_part_follows_the_clock() {
        let fixed = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let id_gen = UlidGenerator::new(Arc::new(FixedClock::new(fixed)));

        let id1 = id_gen.generate_job_id();
        let id2 = id_gen.generate_job_id();
        assert_ne!(id1, id2);
        assert_eq!(id1.as_ulid().timestamp_ms(), fixed.timestamp_millis() as u64);
        assert_eq!(id2.as_ulid().timestamp_ms(), fixed.timestamp_millis() as u64);
    }
}
