pub mod handoff;

pub use handoff::{frame_handoff, FrameReader, FrameWriter, WaitOutcome};
