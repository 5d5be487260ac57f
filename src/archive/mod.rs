//! Archive handling utilities.
//!
//! Provides extraction for ZIP (zip crate), RAR (unrar) and tarballs
//! (tar, with flate2 or lz4_flex for compressed ones). Archives that wrap
//! their payload in one or more single-child directories can be extracted
//! with the wrappers stripped, see [`reroot`].

mod error;
mod extract;
pub mod reader;
pub mod reroot;

pub use error::ExtractError;
pub use extract::{extract_package, extract_rerooted, ExtractStats};
pub use reader::{ArchiveKind, ArchiveMember, ArchiveReader};
pub use reroot::{PrefixIndex, RerootPlan};
