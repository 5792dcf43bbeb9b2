// Dashboard path composition: NFKC normalization, traversal rejection,
// 512 char max. Every file the sidecar touches lives at
// `<working root>/<dir>/<name>.json`; this module builds the relative part.

use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

/// Maximum allowed relative path length in characters.
const MAX_PATH_CHARS: usize = 512;

/// File extension for all materialized dashboards.
pub const DASHBOARD_EXT: &str = "json";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("path is empty")]
    Empty,

    #[error("path exceeds maximum length of {MAX_PATH_CHARS} characters")]
    TooLong,

    #[error("path contains directory traversal component: {0}")]
    Traversal(String),

    #[error("path contains null byte")]
    NullByte,

    #[error("path contains invalid component: {0}")]
    InvalidComponent(String),
}

/// Compose the working-root-relative path for a resource's `dir`/`name`
/// pair: `dir/name.json`.
///
/// `dir` may contain multiple segments; `name` must normalize to a single
/// segment (a name containing a separator would silently change the
/// directory layout).
pub fn dashboard_rel_path(dir: &str, name: &str) -> Result<String, PathError> {
    let dir = normalize_rel(dir)?;
    let name = normalize_rel(name)?;
    if name.contains('/') {
        return Err(PathError::InvalidComponent(name));
    }
    Ok(format!("{dir}/{name}.{DASHBOARD_EXT}"))
}

/// Normalize a relative path for safe joining under the working root.
///
/// Rules:
/// - Apply Unicode NFKC normalization
/// - Convert all separators to `/`
/// - Collapse consecutive `/` into one
/// - Strip leading and trailing `/`
/// - Reject `.` and `..` path components (traversal)
/// - Reject null bytes, empty input, whitespace-only components
/// - Enforce max 512 character limit (after normalization)
pub fn normalize_rel(input: &str) -> Result<String, PathError> {
    if input.is_empty() {
        return Err(PathError::Empty);
    }

    if input.contains('\0') {
        return Err(PathError::NullByte);
    }

    let normalized: String = input.nfkc().collect();
    let unified = normalized.replace('\\', "/");

    let components: Vec<&str> = unified.split('/').filter(|s| !s.is_empty()).collect();

    if components.is_empty() {
        return Err(PathError::Empty);
    }

    for component in &components {
        if *component == "." {
            return Err(PathError::Traversal(".".to_string()));
        }
        if *component == ".." {
            return Err(PathError::Traversal("..".to_string()));
        }
        if component.trim().is_empty() {
            return Err(PathError::InvalidComponent(
                "(whitespace-only component)".to_string(),
            ));
        }
    }

    let result = components.join("/");

    if result.chars().count() > MAX_PATH_CHARS {
        return Err(PathError::TooLong);
    }

    Ok(result)
}

/// The parent directory of a normalized relative path, if it has one.
pub fn parent_rel(rel: &str) -> Option<&str> {
    rel.rsplit_once('/').map(|(parent, _)| parent)
}
