pub mod harness;

pub use harness::*;
pub use recording_observer::*;
