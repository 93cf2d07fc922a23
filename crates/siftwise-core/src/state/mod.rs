pub mod artifacts;

pub use artifacts::{RunInfo, SiftDir};
