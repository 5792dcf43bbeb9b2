// Error taxonomy for the dashboard-file lifecycle.
//
// Every variant carries a stable snake_case reason code that is written
// verbatim into a resource's `status.reason` and used as a metrics label.
// Codes are part of the external contract and must not change.

use thiserror::Error;

use crate::path::PathError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("dashboard json has invalid syntax")]
    InvalidJson,

    #[error("dashboard json is missing the uid field")]
    MissingUid,

    #[error("dashboard json uid field is longer than 40 characters")]
    UidTooLong,

    #[error("dashboard json uid field includes unexpected characters")]
    UidBadChars,

    #[error("dashboard json is missing the title field")]
    MissingTitle,

    #[error("dashboard json title field includes unexpected characters")]
    TitleBadChars,

    #[error("uid in the dashboard json is used by another dashboard")]
    DuplicateUid,

    #[error("dashboard json title field matches the resource dir name")]
    TitleMatchesDir,

    #[error("no changes between the filesystem dashboard and the resource")]
    NothingToDo,

    #[error("expected dashboard file not found on the filesystem")]
    NoFileExists,

    #[error("json on the filesystem differs from the resource payload")]
    JsonMismatch,

    #[error("dir/name target is already used by another dashboard file")]
    DuplicateName,

    #[error("parent directory for the dashboard file does not exist")]
    ParentDirMissing,

    #[error("no permission to write to the working directory")]
    IncorrectPermissions,

    #[error("old dashboard path does not exist on the filesystem")]
    OldPathMissing,

    #[error("path is not a directory")]
    PathNotDir,

    #[error("directory is not empty")]
    DirNotEmpty,

    #[error("invalid dashboard path: {0}")]
    InvalidPath(#[from] PathError),

    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Stable reason code, written into `status.reason`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidJson => "invalid_json",
            Self::MissingUid => "invalid_json_no_uid",
            Self::UidTooLong => "invalid_json_uid_too_long",
            Self::UidBadChars => "invalid_json_uid_unexpected_characters",
            Self::MissingTitle => "invalid_json_no_title",
            Self::TitleBadChars => "invalid_json_title_unexpected_characters",
            Self::DuplicateUid => "duplicate_dashboard_uid",
            Self::TitleMatchesDir => "json_title_matches_dir_name",
            Self::NothingToDo => "nothing_to_do",
            Self::NoFileExists => "no_file_exists",
            Self::JsonMismatch => "json_mismatch",
            Self::DuplicateName => "duplicate_name",
            Self::ParentDirMissing => "parent_dir_does_not_exist",
            Self::IncorrectPermissions => "incorrect_permissions",
            Self::OldPathMissing => "old_path_does_not_exist",
            Self::PathNotDir => "path_not_dir",
            Self::DirNotEmpty => "dir_not_empty",
            Self::InvalidPath(_) => "invalid_path",
            Self::Io(_) => "io_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_the_status_reason_contract() {
        assert_eq!(SyncError::InvalidJson.code(), "invalid_json");
        assert_eq!(SyncError::MissingUid.code(), "invalid_json_no_uid");
        assert_eq!(SyncError::UidTooLong.code(), "invalid_json_uid_too_long");
        assert_eq!(
            SyncError::UidBadChars.code(),
            "invalid_json_uid_unexpected_characters"
        );
        assert_eq!(SyncError::MissingTitle.code(), "invalid_json_no_title");
        assert_eq!(
            SyncError::TitleBadChars.code(),
            "invalid_json_title_unexpected_characters"
        );
        assert_eq!(SyncError::DuplicateUid.code(), "duplicate_dashboard_uid");
        assert_eq!(
            SyncError::TitleMatchesDir.code(),
            "json_title_matches_dir_name"
        );
        assert_eq!(SyncError::NothingToDo.code(), "nothing_to_do");
        assert_eq!(SyncError::NoFileExists.code(), "no_file_exists");
        assert_eq!(SyncError::JsonMismatch.code(), "json_mismatch");
        assert_eq!(SyncError::DuplicateName.code(), "duplicate_name");
        assert_eq!(
            SyncError::ParentDirMissing.code(),
            "parent_dir_does_not_exist"
        );
        assert_eq!(
            SyncError::IncorrectPermissions.code(),
            "incorrect_permissions"
        );
        assert_eq!(SyncError::OldPathMissing.code(), "old_path_does_not_exist");
        assert_eq!(SyncError::PathNotDir.code(), "path_not_dir");
        assert_eq!(SyncError::DirNotEmpty.code(), "dir_not_empty");
    }

    #[test]
    fn io_errors_map_to_generic_code() {
        let err = SyncError::Io(std::io::Error::other("boom"));
        assert_eq!(err.code(), "io_error");
    }

    #[test]
    fn path_errors_convert_and_map() {
        let err: SyncError = crate::path::PathError::Empty.into();
        assert_eq!(err.code(), "invalid_path");
    }
}
