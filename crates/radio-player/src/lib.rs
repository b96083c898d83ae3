pub mod channel;
pub mod config;
pub mod decode;
pub mod device;
pub mod error;
pub mod frame;
pub mod http_stream;
pub mod playback;
pub mod player;
pub mod prefetch;
pub mod queue;
pub mod resample;
pub mod speaker;
pub mod status;
pub mod volume;

#[cfg(test)]
mod testutil;
