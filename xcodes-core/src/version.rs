//! Lenient version parsing.
//!
//! Catalog names carry qualifiers ("11.4 beta 2", "4.3 for Lion") and short
//! numeric forms ("12.4") that `semver` rejects outright. Every version in
//! this crate goes through [`parse_lenient`], which takes the first
//! whitespace-separated token and pads missing components with zeros.

use semver::Version;

/// Oldest release the resolver will list.
pub fn minimum() -> Version {
    Version::new(4, 3, 0)
}

/// Parse a version out of a display name or identifier.
///
/// Returns `None` when not even a major component can be read; callers that
/// must always produce a version fall back to [`minimum`].
pub fn parse_lenient(input: &str) -> Option<Version> {
    let token = input.split_whitespace().next()?;
    let mut parts = token.split('.');

    let major = parts.next()?.parse().ok()?;
    let minor = match parts.next() {
        Some(p) => p.parse().ok()?,
        None => 0,
    };
    let patch = match parts.next() {
        Some(p) => p.parse().ok()?,
        None => 0,
    };

    Some(Version::new(major, minor, patch))
}
