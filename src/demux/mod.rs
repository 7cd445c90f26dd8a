//! DV system-stream demuxing.

pub mod adapter;
pub mod codec;
pub mod constants;
pub mod convert;
pub(crate) mod core;
pub mod element;
pub mod header;
pub mod output;
pub mod pull;
pub mod push;
pub mod segment;
pub mod synth;
pub mod timecode;
pub mod types;

pub use codec::{DifCodec, DvCodec};
pub use element::{ActiveMode, DvDemux};
pub use output::{BusMessage, Caps, Downstream, OutputBuffer, StreamEvent, TagList};
pub use push::InputChunk;
pub use segment::{SeekEvent, SeekFlags, SeekType, SegmentEvent};
pub use timecode::SmpteTimecode;
pub use types::{DvSystem, Format, StreamKind};
