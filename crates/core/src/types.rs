/// Organization identifier as issued by the surrounding platform.
pub type OrgId = i64;

/// Project identifier as issued by the surrounding platform.
pub type ProjectId = i64;

/// Detector identifier as issued by the surrounding platform.
pub type DetectorId = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
