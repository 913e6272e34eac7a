pub mod clock;
pub mod file_names;

pub use clock::{Clock, ManualClock, SystemClock};
pub use file_names::{TimestampSource, minute_bucket, parse_file_timestamp};
