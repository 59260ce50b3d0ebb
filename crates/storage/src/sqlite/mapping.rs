use exam_core::model::{StudentId, TestGroupId, TestId};

use crate::repository::StorageError;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn conn<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

pub(crate) fn id_to_i64(field: &'static str, v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

fn i64_to_u64(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} sign overflow")))
}

pub(crate) fn u32_from_i64(field: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

pub(crate) fn opt_u32_from_i64(
    field: &'static str,
    v: Option<i64>,
) -> Result<Option<u32>, StorageError> {
    v.map(|v| u32_from_i64(field, v)).transpose()
}

pub(crate) fn test_id_from_i64(v: i64) -> Result<TestId, StorageError> {
    Ok(TestId::new(i64_to_u64("test_id", v)?))
}

pub(crate) fn student_id_from_i64(v: i64) -> Result<StudentId, StorageError> {
    Ok(StudentId::new(i64_to_u64("student_id", v)?))
}

pub(crate) fn group_id_from_i64(v: Option<i64>) -> Result<Option<TestGroupId>, StorageError> {
    v.map(|v| i64_to_u64("test_group_id", v).map(TestGroupId::new))
        .transpose()
}

pub(crate) fn group_id_to_i64(v: Option<TestGroupId>) -> Result<Option<i64>, StorageError> {
    v.map(|g| id_to_i64("test_group_id", g.value())).transpose()
}
