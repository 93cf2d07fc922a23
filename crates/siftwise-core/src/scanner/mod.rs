pub mod record;
pub mod walk;

pub use record::{capture_record, capture_records};
pub use walk::{collect_files, WalkResult};
