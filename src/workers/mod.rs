pub mod ffmpeg;
pub mod reaper;
pub mod transcoder;
