use serde::{Deserialize, Serialize};

/// Where the binary writes the demuxed streams.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct OutputConfig {
    /// Raw interleaved signed 16-bit native-endian PCM.
    #[serde(default = "default_audio_path")]
    pub audio_path: String,
    /// Concatenated DV video frames.
    #[serde(default = "default_video_path")]
    pub video_path: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            audio_path: default_audio_path(),
            video_path: default_video_path(),
        }
    }
}

fn default_audio_path() -> String {
    "out/audio.pcm".to_string()
}

fn default_video_path() -> String {
    "out/video.dv".to_string()
}
