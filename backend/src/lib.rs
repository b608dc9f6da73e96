pub mod types;
pub mod helpers;
pub mod logger;
pub mod config;
pub mod section_extract;
pub mod diff;
pub mod change_summary;
pub mod dailymed;
pub mod openfda;
pub mod filters;

pub use types::{FetchError, FilterError, LabelUpdate, SectionMap};
