//! Catalog resolution and caching.
//!
//! The resolver fetches the downloads catalog from the developer portal,
//! merges in scraped prerelease entries, persists the merged list as an
//! opaque blob (`xcodes.bin`) and answers identifier lookups against it.
//! The blob is a cache, never a source of truth: the `installed` flag on
//! each release is re-derived from the local inventory on every read.

mod client;
mod prerelease;
mod release;
mod seedlist;

pub use client::{AppleDevCenterClient, CatalogClient, Credentials};
pub use release::Xcode;
pub use seedlist::{parse_seedlist, Seedlist};
