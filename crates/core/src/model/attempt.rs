use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::definition::SkillKind;
use crate::model::ids::{ResultId, StudentId, TestGroupId, TestId};

/// Address of the answers that belong to one attempt. Attempts are numbered
/// per battery, so the group is part of the address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttemptKey {
    pub test_id: TestId,
    pub student_id: StudentId,
    pub attempt_number: u32,
    pub test_group_id: Option<TestGroupId>,
}

/// Request to record a finished attempt. Scoring happens elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAttempt {
    pub test_id: TestId,
    pub student_id: StudentId,
    pub attempt_number: u32,
    pub time_spent_seconds: u32,
    pub test_type: SkillKind,
    pub test_group_id: Option<TestGroupId>,
}

impl NewAttempt {
    #[must_use]
    pub fn key(&self) -> AttemptKey {
        AttemptKey {
            test_id: self.test_id,
            student_id: self.student_id,
            attempt_number: self.attempt_number,
            test_group_id: self.test_group_id,
        }
    }
}

/// Immutable record of a submitted attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptResult {
    pub id: ResultId,
    pub attempt: NewAttempt,
    pub submitted_at: DateTime<Utc>,
}

/// Ordered list of tests taken back to back (e.g. listening → reading → writing).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestGroup {
    pub id: TestGroupId,
    pub tests: Vec<TestId>,
}

impl TestGroup {
    /// The test that follows `current`, if any.
    #[must_use]
    pub fn next_after(&self, current: TestId) -> Option<TestId> {
        let pos = self.tests.iter().position(|t| *t == current)?;
        self.tests.get(pos + 1).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn battery_walks_tests_in_order() {
        let group = TestGroup {
            id: TestGroupId::new(9),
            tests: vec![TestId::new(1), TestId::new(2), TestId::new(3)],
        };
        assert_eq!(group.next_after(TestId::new(1)), Some(TestId::new(2)));
        assert_eq!(group.next_after(TestId::new(3)), None);
        assert_eq!(group.next_after(TestId::new(42)), None);
    }
}
