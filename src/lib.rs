//! MEMBER SWEEP
//! Walks a paginated member directory through a WebDriver-controlled browser,
//! realigns every member's listing text into a fixed record, enriches it from the
//! member's profile and flushes each page to a CSV file and a Postgres table.

#[macro_use]
mod macros;

pub mod browser;
pub mod config;
pub mod enrich;
mod error;
pub mod logger;
pub mod pacing;
pub mod pagination;
mod parse;
pub mod process;
pub mod record;
pub mod resolve;
pub mod session;
pub mod sink;
pub mod trace;
pub mod upload;
pub mod webdriver;

pub use error::{Error, Result, StoreError};

/// Written in place of every field that could not be resolved.
pub const NOT_AVAILABLE: &str = "N/A";
/// Number of course column triples in both sinks.
pub const COURSE_SLOTS: usize = 29;
/// Assumed size of the course catalog. Used as the denominator of
/// `CourseEntry::catalog_percent` regardless of how many courses a member has.
pub const COURSE_CATALOG_SIZE: u32 = 29;
/// Browser launch attempts on a "session not created" failure.
const LAUNCH_ATTEMPTS: u32 = 3;
/// Relational insert attempts on a connection failure.
const STORE_ATTEMPTS: u32 = 3;
/// Members processed between two short pacing pauses.
const MEMBERS_PER_PAUSE: usize = 10;
