//! Audio output: the playback gate and its backends.

pub mod playback;
