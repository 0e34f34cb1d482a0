use serde::{Deserialize, Serialize};

use crate::error::{TypesError, TypesResult};

/// Maximum allowed length for a scan identifier.
pub const MAX_SCAN_ID_LEN: usize = 64;
/// Maximum allowed length for a space key.
pub const MAX_SPACE_KEY_LEN: usize = 128;
/// Maximum allowed length for a page identifier.
pub const MAX_PAGE_ID_LEN: usize = 128;
/// Maximum allowed length for an attachment name.
pub const MAX_ATTACHMENT_NAME_LEN: usize = 512;

/// Opaque scan identifier, allocated fresh by the scan engine for every
/// `startAll` call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScanId(String);

impl ScanId {
    /// Construct a scan id, validating length and non-emptiness.
    pub fn new(value: impl Into<String>) -> TypesResult<Self> {
        let value = value.into();
        validate_len("scan_id", &value, MAX_SCAN_ID_LEN)?;
        Ok(Self(value))
    }

    /// Borrow the underlying string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ScanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key of a space in the content platform (e.g. `"ENGINEERING"`).
///
/// Ordering is derived so that canonical space iteration order is stable and
/// reproducible across resumes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpaceKey(String);

impl SpaceKey {
    /// Construct a space key, validating length and non-emptiness.
    pub fn new(value: impl Into<String>) -> TypesResult<Self> {
        let value = value.into();
        validate_len("space_key", &value, MAX_SPACE_KEY_LEN)?;
        Ok(Self(value))
    }

    /// Borrow the underlying string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SpaceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a page within a space. `Ord` reflects ascending
/// lexicographic order, the canonical iteration order used for resume.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageId(String);

impl PageId {
    /// Construct a page id, validating length and non-emptiness.
    pub fn new(value: impl Into<String>) -> TypesResult<Self> {
        let value = value.into();
        validate_len("page_id", &value, MAX_PAGE_ID_LEN)?;
        Ok(Self(value))
    }

    /// Borrow the underlying string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of an attachment within a page. `Ord` reflects ascending
/// lexicographic order, the canonical order within a page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttachmentName(String);

impl AttachmentName {
    /// Construct an attachment name, validating length and non-emptiness.
    pub fn new(value: impl Into<String>) -> TypesResult<Self> {
        let value = value.into();
        validate_len("attachment_name", &value, MAX_ATTACHMENT_NAME_LEN)?;
        Ok(Self(value))
    }

    /// Borrow the underlying string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AttachmentName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn validate_len(field: &'static str, value: &str, max: usize) -> TypesResult<()> {
    if value.trim().is_empty() {
        return Err(TypesError::Empty { field });
    }
    if value.len() > max {
        return Err(TypesError::TooLong {
            field,
            len: value.len(),
            max,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_id_rejects_empty() {
        assert!(ScanId::new("").is_err());
        assert!(ScanId::new("   ").is_err());
    }

    #[test]
    fn scan_id_rejects_too_long() {
        let long = "x".repeat(MAX_SCAN_ID_LEN + 1);
        assert!(ScanId::new(long).is_err());
    }

    #[test]
    fn scan_id_accepts_boundary_length() {
        let boundary = "x".repeat(MAX_SCAN_ID_LEN);
        assert!(ScanId::new(boundary).is_ok());
    }

    #[test]
    fn page_id_ordering_is_lexicographic() {
        let a = PageId::new("p1").unwrap();
        let b = PageId::new("p2").unwrap();
        assert!(a < b);
    }

    #[test]
    fn attachment_name_ordering_is_lexicographic() {
        let a = AttachmentName::new("a.pdf").unwrap();
        let b = AttachmentName::new("b.pdf").unwrap();
        assert!(a < b);
    }
}
