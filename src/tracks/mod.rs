//! Track module: per-file decode state and mix settings

pub mod track;

pub use track::{FillStatus, Track};
