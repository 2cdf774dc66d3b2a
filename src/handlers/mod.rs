pub mod transcribe;

pub use transcribe::{index, transcribe_audio, transcribe_stream};
