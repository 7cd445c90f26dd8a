pub mod base;
pub mod demux;
pub mod logging;
pub mod output;

pub use base::*;
pub use demux::*;
pub use logging::*;
pub use output::*;
