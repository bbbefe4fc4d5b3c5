//! Status-code and content-type acceptability rules.

use std::collections::BTreeSet;
use std::ops::RangeInclusive;

use super::request::media_type_essence;

/// Status codes a fetch treats as success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusCodes {
    /// A closed range of codes.
    Range(RangeInclusive<u16>),
    /// An explicit set of codes.
    Set(BTreeSet<u16>),
}

impl Default for StatusCodes {
    fn default() -> Self {
        Self::Range(200..=299)
    }
}

impl StatusCodes {
    /// Creates a set of individual codes.
    pub fn set(codes: impl IntoIterator<Item = u16>) -> Self {
        Self::Set(codes.into_iter().collect())
    }

    /// Returns true if `status` is acceptable.
    #[must_use]
    pub fn contains(&self, status: u16) -> bool {
        match self {
            Self::Range(range) => range.contains(&status),
            Self::Set(codes) => codes.contains(&status),
        }
    }
}

impl From<RangeInclusive<u16>> for StatusCodes {
    fn from(range: RangeInclusive<u16>) -> Self {
        Self::Range(range)
    }
}

/// Acceptability rules configured on a fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Acceptance {
    status_codes: StatusCodes,
    /// Lower-cased media types; `None` or empty accepts anything.
    content_types: Option<BTreeSet<String>>,
}

impl Acceptance {
    /// Creates rules; content types are reduced to lower-cased essences.
    #[must_use]
    pub fn new(status_codes: StatusCodes, content_types: Option<BTreeSet<String>>) -> Self {
        let content_types = content_types.map(|types| {
            types
                .iter()
                .filter_map(|t| media_type_essence(t))
                .collect::<BTreeSet<_>>()
        });
        Self {
            status_codes,
            content_types,
        }
    }

    /// Returns the acceptable status codes.
    #[must_use]
    pub fn status_codes(&self) -> &StatusCodes {
        &self.status_codes
    }

    /// Returns the acceptable media types, if restricted.
    #[must_use]
    pub fn content_types(&self) -> Option<&BTreeSet<String>> {
        self.content_types.as_ref()
    }

    /// Returns true if `status` is among the acceptable status codes.
    #[must_use]
    pub fn is_status_code_acceptable(&self, status: u16) -> bool {
        self.status_codes.contains(status)
    }

    /// A missing media type is acceptable: only a declared, unlisted type is rejected.
    #[must_use]
    pub fn is_content_type_acceptable(&self, media_type: Option<&str>) -> bool {
        match (&self.content_types, media_type) {
            (None, _) | (_, None) => true,
            (Some(types), Some(media_type)) => types.is_empty() || types.contains(media_type),
        }
    }
}
