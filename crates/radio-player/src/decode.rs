//! Streaming audio decode stage.
//!
//! Uses Symphonia to probe the incoming container and decode packets into interleaved
//! `f32` frames. Decoding is pull-driven: a packet is decoded only when the consumer
//! has drained the previous one, so memory stays at one packet regardless of how long
//! the broadcast runs.

use symphonia::core::audio::{SampleBuffer, SignalSpec};
use symphonia::core::codecs::{CODEC_TYPE_NULL, CodecParameters, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::{RadioError, Result};
use crate::frame::{FrameSource, map_frame};
use crate::status::{PlaybackEndReason, SessionEnd};

/// Consecutive undecodable packets tolerated before the stream is abandoned.
const MAX_CONSECUTIVE_DECODE_ERRORS: usize = 64;

/// Decoded frames from a probed byte stream.
pub struct DecodedStream {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    rate: u32,
    channels: usize,
    codec: Option<String>,
    sample_buf: Option<(SampleBuffer<f32>, SignalSpec, usize)>,
    pending: Vec<f32>,
    pos: usize,
    done: bool,
    end: SessionEnd,
}

/// Probe `source` and decode its first packet.
///
/// Blocks until the container header and the first audio packet have arrived, which
/// is what pins down the sample rate and channel layout. Anything that is not audio
/// Symphonia can decode is a [`RadioError::Decode`].
pub fn open_stream(source: Box<dyn MediaSource>, hint: &Hint, end: SessionEnd) -> Result<DecodedStream> {
    let mss = MediaSourceStream::new(source, Default::default());

    let probed = symphonia::default::get_probe().format(
        hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let format = probed.format;

    let track = format
        .default_track()
        .filter(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .or_else(|| {
            format
                .tracks()
                .iter()
                .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        })
        .ok_or_else(|| RadioError::decode("no audio track"))?;
    let track_id = track.id;
    let codec_params: CodecParameters = track.codec_params.clone();

    let decoder = symphonia::default::get_codecs().make(&codec_params, &DecoderOptions::default())?;

    let mut stream = DecodedStream {
        format,
        decoder,
        track_id,
        rate: 0,
        channels: 0,
        codec: codec_name_from_params(&codec_params),
        sample_buf: None,
        pending: Vec::new(),
        pos: 0,
        done: false,
        end,
    };

    match stream.decode_next() {
        Ok(()) => {}
        Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(RadioError::decode("stream ended before the first audio frame"));
        }
        Err(e) => return Err(e.into()),
    }
    if stream.rate == 0 || stream.channels == 0 {
        return Err(RadioError::decode("unknown sample rate or channel layout"));
    }

    tracing::debug!(
        rate_hz = stream.rate,
        channels = stream.channels,
        codec = stream.codec.as_deref().unwrap_or("unknown"),
        "stream probed"
    );
    Ok(stream)
}

impl DecodedStream {
    /// Best-effort codec label.
    pub fn codec(&self) -> Option<&str> {
        self.codec.as_deref()
    }

    /// Decode the next packet of our track into `pending`.
    fn decode_next(&mut self) -> std::result::Result<(), SymphoniaError> {
        let mut failures = 0usize;
        loop {
            let packet = self.format.next_packet()?;
            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(e)) => {
                    failures += 1;
                    if failures >= MAX_CONSECUTIVE_DECODE_ERRORS {
                        return Err(SymphoniaError::DecodeError(e));
                    }
                    tracing::debug!("skipping undecodable packet: {e}");
                    continue;
                }
                Err(e) => return Err(e),
            };

            let spec = *decoded.spec();
            let frames = decoded.frames();
            if frames == 0 {
                continue;
            }

            let realloc = match &self.sample_buf {
                Some((_, buf_spec, cap)) => *buf_spec != spec || *cap < frames,
                None => true,
            };
            if realloc {
                self.sample_buf = Some((SampleBuffer::new(frames as u64, spec), spec, frames));
            }
            let Some((buf, _, _)) = self.sample_buf.as_mut() else {
                continue;
            };
            buf.copy_interleaved_ref(decoded);

            let src_channels = spec.channels.count();
            if self.channels == 0 {
                self.channels = src_channels;
                self.rate = spec.rate;
            }

            self.pending.clear();
            self.pos = 0;
            if src_channels == self.channels {
                self.pending.extend_from_slice(buf.samples());
            } else {
                for frame in buf.samples().chunks_exact(src_channels.max(1)) {
                    let start = self.pending.len();
                    self.pending.resize(start + self.channels, 0.0);
                    map_frame(frame, &mut self.pending[start..]);
                }
            }
            return Ok(());
        }
    }

    /// Refill `pending`; marks the stream finished when nothing more can be decoded.
    fn refill(&mut self) -> bool {
        match self.decode_next() {
            Ok(()) => true,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                self.finish(PlaybackEndReason::Eof);
                false
            }
            Err(e) => {
                tracing::warn!("stream decode stopped: {e}");
                self.finish(PlaybackEndReason::Error);
                false
            }
        }
    }

    fn finish(&mut self, reason: PlaybackEndReason) {
        self.done = true;
        self.pending.clear();
        self.pos = 0;
        if self.end.record(reason) {
            tracing::info!(reason = ?reason, "stream ended");
        }
    }
}

impl FrameSource for DecodedStream {
    fn channels(&self) -> usize {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.rate
    }

    fn fill(&mut self, out: &mut [f32]) -> usize {
        if self.done {
            return 0;
        }
        if self.pos >= self.pending.len() && !self.refill() {
            return 0;
        }
        let available = self.pending.len() - self.pos;
        let take = available.min(out.len()) / self.channels * self.channels;
        out[..take].copy_from_slice(&self.pending[self.pos..self.pos + take]);
        self.pos += take;
        take / self.channels
    }
}

/// Best-effort codec label used for status.
fn codec_name_from_params(params: &CodecParameters) -> Option<String> {
    use symphonia::core::codecs::*;
    let name = match params.codec {
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_MP2 => "MP2",
        CODEC_TYPE_AAC => "AAC",
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_VORBIS => "VORBIS",
        CODEC_TYPE_OPUS => "OPUS",
        CODEC_TYPE_ALAC => "ALAC",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "PCM_S16",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "PCM_S24",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "PCM_F32",
        _ => return None,
    };
    Some(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_stream::{StreamBody, StreamHandle};
    use crate::testutil::wav_tone;
    use std::io::Cursor;
    use symphonia::core::codecs::*;

    fn open_bytes(bytes: Vec<u8>, end: SessionEnd) -> (StreamHandle, Result<DecodedStream>) {
        let (handle, body) = StreamBody::from_reader(Cursor::new(bytes));
        (handle, open_stream(Box::new(body), &Hint::new(), end))
    }

    #[test]
    fn codec_name_from_params_maps_known_codecs() {
        let mut params = CodecParameters::new();
        params.codec = CODEC_TYPE_MP3;
        assert_eq!(codec_name_from_params(&params), Some("MP3".to_string()));
        params.codec = CODEC_TYPE_PCM_S16LE;
        assert_eq!(codec_name_from_params(&params), Some("PCM_S16".to_string()));
    }

    #[test]
    fn codec_name_from_params_unknown_returns_none() {
        let params = CodecParameters::new();
        assert!(codec_name_from_params(&params).is_none());
    }

    #[test]
    fn plain_text_is_a_decode_error() {
        let (_handle, opened) =
            open_bytes(b"this is not audio, just text\n".repeat(64), SessionEnd::default());
        let err = opened.err().unwrap();
        assert!(err.is_decode());
    }

    #[test]
    fn empty_body_is_a_decode_error() {
        let (_handle, opened) = open_bytes(Vec::new(), SessionEnd::default());
        let err = opened.err().unwrap();
        assert!(err.is_decode());
    }

    #[test]
    fn decodes_wav_lazily_and_records_eof() {
        let end = SessionEnd::default();
        let (_handle, opened) = open_bytes(wav_tone(22_050, 1, 5_000), end.clone());
        let mut stream = opened.unwrap();
        assert_eq!(stream.sample_rate(), 22_050);
        assert_eq!(stream.channels(), 1);
        assert_eq!(stream.codec(), Some("PCM_S16"));

        let mut out = vec![0.0; 512];
        let mut total = 0usize;
        loop {
            let n = stream.fill(&mut out);
            if n == 0 {
                break;
            }
            total += n;
        }
        assert_eq!(total, 5_000);
        assert_eq!(end.get(), Some(PlaybackEndReason::Eof));
        assert_eq!(stream.fill(&mut out), 0);
    }

    #[test]
    fn closing_the_body_ends_the_sequence() {
        let (handle, body) = StreamBody::from_reader(Cursor::new(wav_tone(44_100, 2, 200_000)));
        let end = SessionEnd::default();
        let mut stream = open_stream(Box::new(body), &Hint::new(), end.clone()).unwrap();
        let mut out = vec![0.0; 2 * 256];
        assert!(stream.fill(&mut out) > 0);

        handle.close();
        let mut after_close = 0usize;
        loop {
            let n = stream.fill(&mut out);
            if n == 0 {
                break;
            }
            after_close += n;
        }
        // Only what symphonia had already buffered can still come out.
        assert!(after_close < 200_000);
        assert!(end.get().is_some());
    }
}
