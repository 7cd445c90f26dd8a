pub mod common;
pub mod configs;
pub mod demux;
pub mod source;
