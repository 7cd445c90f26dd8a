use serde::{Deserialize, Serialize};

/// How the element picks its scheduling mode at activation.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SchedulingPreference {
    /// Pull when upstream supports random access, push otherwise.
    #[default]
    Auto,
    Push,
    Pull,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DemuxConfig {
    #[serde(default)]
    pub scheduling: SchedulingPreference,
    /// Chunk size used when a file is fed to the element in push mode.
    #[serde(default = "default_push_chunk_size")]
    pub push_chunk_size: usize,
}

impl Default for DemuxConfig {
    fn default() -> Self {
        Self {
            scheduling: SchedulingPreference::Auto,
            push_chunk_size: default_push_chunk_size(),
        }
    }
}

fn default_push_chunk_size() -> usize {
    64 * 1024
}
