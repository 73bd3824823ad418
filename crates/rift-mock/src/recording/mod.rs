//! Recording of request/response pairs.
//!
//! The engine hands every pair of a recording-enabled rule set to a
//! [`Recorder`] once handling is finished, whatever the outcome.
//!
//! # Module Structure
//!
//! - `types` - the recorded pair
//! - `store` - recorder trait and implementations (bounded memory, JSON lines file)

mod store;
mod types;

pub use store::{FileRecorder, InMemoryRecorder, NoOpRecorder, Recorder, DEFAULT_CAPACITY};
pub use types::RecordedPair;
