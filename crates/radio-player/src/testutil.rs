//! Fixtures shared by unit tests: synthetic sources, a capture sink, and a loopback
//! HTTP server.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::frame::FrameSource;
use crate::speaker::SampleSink;

/// Source yielding a constant sample value, optionally for a limited number of frames.
pub(crate) struct ConstSource {
    channels: usize,
    rate: u32,
    value: f32,
    remaining: Option<usize>,
}

impl ConstSource {
    pub(crate) fn new(channels: usize, rate: u32, value: f32, frames: Option<usize>) -> Self {
        Self {
            channels,
            rate,
            value,
            remaining: frames,
        }
    }
}

impl FrameSource for ConstSource {
    fn channels(&self) -> usize {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.rate
    }

    fn fill(&mut self, out: &mut [f32]) -> usize {
        let mut frames = out.len() / self.channels;
        if let Some(left) = self.remaining.as_mut() {
            frames = frames.min(*left);
            *left -= frames;
        }
        out[..frames * self.channels].fill(self.value);
        frames
    }
}

/// What a [`CaptureSink`] has seen so far.
#[derive(Default)]
pub(crate) struct Captured {
    pub(crate) frames: AtomicU64,
    pub(crate) nonzero_samples: AtomicU64,
    pub(crate) last_cycle: Mutex<Vec<f32>>,
}

/// Sample sink that records output instead of playing it.
pub(crate) struct CaptureSink {
    channels: usize,
    rate: u32,
    captured: Arc<Captured>,
}

impl CaptureSink {
    pub(crate) fn new(channels: usize, rate: u32) -> (Self, Arc<Captured>) {
        let captured = Arc::new(Captured::default());
        (
            Self {
                channels,
                rate,
                captured: captured.clone(),
            },
            captured,
        )
    }
}

impl SampleSink for CaptureSink {
    fn channels(&self) -> usize {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.rate
    }

    fn write(&mut self, samples: &[f32]) -> anyhow::Result<()> {
        let nonzero = samples.iter().filter(|s| **s != 0.0).count() as u64;
        self.captured
            .frames
            .fetch_add((samples.len() / self.channels) as u64, Ordering::Relaxed);
        self.captured
            .nonzero_samples
            .fetch_add(nonzero, Ordering::Relaxed);
        *self.captured.last_cycle.lock().unwrap() = samples.to_vec();
        thread::sleep(Duration::from_millis(1));
        Ok(())
    }
}

/// Build a 16-bit PCM WAV file holding a sine tone.
pub(crate) fn wav_tone(rate: u32, channels: u16, frames: u32) -> Vec<u8> {
    let block_align = channels as u32 * 2;
    let data_len = frames * block_align;
    let mut out = Vec::with_capacity(44 + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&rate.to_le_bytes());
    out.extend_from_slice(&(rate * block_align).to_le_bytes());
    out.extend_from_slice(&(block_align as u16).to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for i in 0..frames {
        let t = i as f32 / rate as f32;
        let v = ((t * 440.0 * std::f32::consts::TAU).sin() * 12_000.0) as i16;
        for _ in 0..channels {
            out.extend_from_slice(&v.to_le_bytes());
        }
    }
    out
}

/// Serve `body` with `content_type` to every connection on a loopback port.
///
/// Returns the base URL.
pub(crate) fn serve(content_type: &'static str, body: Vec<u8>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let body = Arc::new(body);
    thread::spawn(move || {
        for conn in listener.incoming() {
            let Ok(conn) = conn else { break };
            let body = body.clone();
            thread::spawn(move || respond(conn, content_type, &body));
        }
    });
    format!("http://{addr}/stream")
}

/// Like [`serve`], but only the first `sent` bytes of `body` are written. The
/// connection then stays open without sending anything more, as a stalled
/// broadcast would.
pub(crate) fn serve_stalling(content_type: &'static str, body: Vec<u8>, sent: usize) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let body = Arc::new(body);
    thread::spawn(move || {
        for conn in listener.incoming() {
            let Ok(conn) = conn else { break };
            let body = body.clone();
            thread::spawn(move || {
                let Some(mut conn) = read_request(conn) else {
                    return;
                };
                write_head(&mut conn, content_type, body.len());
                let _ = conn.write_all(&body[..sent.min(body.len())]);
                let _ = conn.flush();
                thread::sleep(Duration::from_secs(60));
            });
        }
    });
    format!("http://{addr}/stream")
}

fn respond(conn: TcpStream, content_type: &str, body: &[u8]) {
    let Some(mut conn) = read_request(conn) else {
        return;
    };
    write_head(&mut conn, content_type, body.len());
    let _ = conn.write_all(body);
    let _ = conn.flush();
}

/// Consume the request head; `None` if the client went away first.
fn read_request(conn: TcpStream) -> Option<TcpStream> {
    let mut reader = BufReader::new(conn.try_clone().ok()?);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) | Err(_) => return None,
            Ok(_) if line == "\r\n" || line == "\n" => return Some(conn),
            Ok(_) => {}
        }
    }
}

fn write_head(conn: &mut TcpStream, content_type: &str, len: usize) {
    let head = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nConnection: close\r\n\r\n"
    );
    let _ = conn.write_all(head.as_bytes());
}

/// A URL on a loopback port with nothing listening.
pub(crate) fn unreachable_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}/stream")
}

/// Poll `cond` until it holds or `timeout` elapses.
pub(crate) fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}
