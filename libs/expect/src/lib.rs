//! # verity-expect
//!
//! Expectation types and comparison functions used by verification checks.
//!
//! - [`ConfigDocument`]: an INI-style file parsed into `section -> key -> value`
//! - [`Expected`]: a literal value or a semantic predicate (`<valid-ip>`, `<not-null>`)
//! - [`subset_match`] / [`match_bag`]: subset comparison producing named [`Mismatch`]es
//! - [`identical_mappings`]: pairwise identity of per-unit resource maps
//! - [`SampleSeries`]: before / after-create / after-delete sample validation
//! - [`ProcessCount`]: acceptable process counts per unit

mod compare;
mod error;
mod expected;
mod ini;
mod process;
mod samples;

pub use compare::{
    identical_mappings, match_bag, missing_from, subset_match, Mismatch, SectionExpectations,
};
pub use error::IniError;
pub use expected::Expected;
pub use ini::ConfigDocument;
pub use process::{count_pids, ProcessCount};
pub use samples::{SamplePattern, SampleSeries};
