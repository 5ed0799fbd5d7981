mod args;
mod discovery;
mod driver;
mod progress;
mod time_range;
mod write;

pub use args::*;
pub use discovery::{discover_fragment_folder, find_files_in_subfolders, DiscoveredFile, FragmentFolder};
pub use driver::{IsoXRatioer, IsoXRatioerError};
pub use progress::ProgressRecord;
pub use time_range::{TimeRange, TimeRangeParseError};
