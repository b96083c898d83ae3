//! HTTP stream acquisition.
//!
//! Opens a streaming GET for a channel URL and hands the response body to the decoder
//! as a non-seekable [`MediaSource`]. The body's lifetime is controlled by a separate
//! [`StreamHandle`], so the control thread can close the stream while the decoder is
//! still waiting on the network.

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use symphonia::core::io::MediaSource;
use symphonia::core::probe::Hint;

use crate::config::PlayerConfig;
use crate::error::{RadioError, Result};

/// Opens network byte streams.
#[derive(Clone, Debug)]
pub struct StreamAcquirer {
    connect_timeout: Duration,
    response_timeout: Duration,
    user_agent: String,
}

/// A freshly opened stream: its close handle, its body, and a decoder hint.
pub struct OpenedStream {
    pub handle: StreamHandle,
    pub body: StreamBody,
    pub hint: Hint,
    pub content_type: Option<String>,
}

impl StreamAcquirer {
    pub fn new(config: &PlayerConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout,
            response_timeout: config.response_timeout,
            user_agent: config.user_agent.clone(),
        }
    }

    /// Issue a GET for `url` and return the streaming body.
    ///
    /// Any transport failure or non-success status is a [`RadioError::Network`].
    pub fn open(&self, url: &str) -> Result<OpenedStream> {
        let resp = ureq::get(url)
            .config()
            .timeout_connect(Some(self.connect_timeout))
            .timeout_recv_response(Some(self.response_timeout))
            .build()
            .header("User-Agent", self.user_agent.as_str())
            .header("Icy-MetaData", "0")
            .call()
            .map_err(|e| RadioError::network(url, e))?;

        let content_type = resp
            .headers()
            .get("Content-Type")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        tracing::debug!(
            url,
            status = resp.status().as_u16(),
            content_type = content_type.as_deref().unwrap_or(""),
            "stream response"
        );

        let hint = hint_for(content_type.as_deref(), url);
        let (_, body) = resp.into_parts();
        let (handle, body) = attach(Box::new(body.into_reader()), url);

        Ok(OpenedStream {
            handle,
            body,
            hint,
            content_type,
        })
    }
}

/// Network chunks buffered between the socket reader thread and the decoder.
const PUMP_CHUNKS: usize = 16;
const PUMP_CHUNK_BYTES: usize = 16 * 1024;

/// Move `reader` onto its own thread and return a closable body fed from it.
///
/// Socket reads happen on that thread only. Closing the handle wakes a body read that
/// is waiting for data; the reader thread exits once its own read returns.
fn attach(reader: Box<dyn Read + Send>, url: &str) -> (StreamHandle, StreamBody) {
    let closed = Arc::new(AtomicBool::new(false));
    let (cancel_tx, cancel_rx) = crossbeam_channel::bounded::<()>(0);
    let chunks = spawn_pump(reader, url.to_string(), closed.clone(), cancel_rx.clone());

    (
        StreamHandle {
            url: url.to_string(),
            closed: closed.clone(),
            cancel: Mutex::new(Some(cancel_tx)),
        },
        StreamBody {
            chunks,
            cancel: cancel_rx,
            closed,
            chunk: Vec::new(),
            pos: 0,
            eof: false,
        },
    )
}

fn spawn_pump(
    mut reader: Box<dyn Read + Send>,
    url: String,
    closed: Arc<AtomicBool>,
    cancel: Receiver<()>,
) -> Receiver<io::Result<Vec<u8>>> {
    let (tx, rx) = crossbeam_channel::bounded(PUMP_CHUNKS);
    std::thread::spawn(move || {
        let mut buf = vec![0u8; PUMP_CHUNK_BYTES];
        loop {
            let msg = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => Ok(buf[..n].to_vec()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => Err(e),
            };
            if closed.load(Ordering::SeqCst) {
                break;
            }
            let failed = msg.is_err();
            crossbeam_channel::select! {
                send(tx, msg) -> res => {
                    if res.is_err() {
                        break;
                    }
                }
                recv(cancel) -> _ => break,
            }
            if failed {
                break;
            }
        }
        tracing::trace!(url = %url, "stream reader finished");
    });
    rx
}

/// Close handle for an open byte stream. Dropping it closes the stream.
#[derive(Debug)]
pub struct StreamHandle {
    url: String,
    closed: Arc<AtomicBool>,
    // Dropped on close; the disconnect wakes every waiter on the stream.
    cancel: Mutex<Option<Sender<()>>>,
}

impl StreamHandle {
    /// Close the stream. Returns `false` if it was already closed.
    ///
    /// A body read waiting for data returns end-of-stream right away.
    pub fn close(&self) -> bool {
        let first = !self.closed.swap(true, Ordering::SeqCst);
        if first {
            drop(
                self.cancel
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take(),
            );
            tracing::debug!(url = %self.url, "stream closed");
        }
        first
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Response body of an open stream.
pub struct StreamBody {
    chunks: Receiver<io::Result<Vec<u8>>>,
    cancel: Receiver<()>,
    closed: Arc<AtomicBool>,
    chunk: Vec<u8>,
    pos: usize,
    eof: bool,
}

impl StreamBody {
    #[cfg(test)]
    pub(crate) fn from_reader(reader: impl Read + Send + 'static) -> (StreamHandle, Self) {
        attach(Box::new(reader), "memory:")
    }
}

impl Read for StreamBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Ok(0);
            }
            if self.pos < self.chunk.len() {
                let n = (self.chunk.len() - self.pos).min(buf.len());
                buf[..n].copy_from_slice(&self.chunk[self.pos..self.pos + n]);
                self.pos += n;
                return Ok(n);
            }
            if self.eof {
                return Ok(0);
            }

            crossbeam_channel::select! {
                recv(self.chunks) -> msg => match msg {
                    Ok(Ok(chunk)) => {
                        self.chunk = chunk;
                        self.pos = 0;
                    }
                    Ok(Err(e)) => {
                        self.eof = true;
                        if self.closed.load(Ordering::SeqCst) {
                            return Ok(0);
                        }
                        return Err(e);
                    }
                    Err(_) => {
                        self.eof = true;
                        return Ok(0);
                    }
                },
                recv(self.cancel) -> _ => return Ok(0),
            }
        }
    }
}

impl Seek for StreamBody {
    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "live stream is not seekable",
        ))
    }
}

impl MediaSource for StreamBody {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}

/// Build a decoder hint from the response content type, falling back to the URL.
pub fn hint_for(content_type: Option<&str>, url: &str) -> Hint {
    let mut hint = Hint::new();
    if let Some(mime) = content_type {
        let essence = mime.split(';').next().unwrap_or(mime).trim();
        hint.mime_type(essence);
    }
    if let Some(ext) = content_type
        .and_then(ext_for_content_type)
        .map(str::to_string)
        .or_else(|| infer_ext_from_url(url))
    {
        hint.with_extension(&ext);
    }
    hint
}

/// Map common streaming MIME types to a container extension.
fn ext_for_content_type(content_type: &str) -> Option<&'static str> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim()
        .to_ascii_lowercase();
    let ext = match essence.as_str() {
        "audio/mpeg" | "audio/mp3" | "audio/mpeg3" | "audio/x-mpeg" => "mp3",
        "audio/aac" | "audio/aacp" | "audio/x-aac" => "aac",
        "audio/ogg" | "application/ogg" => "ogg",
        "audio/flac" | "audio/x-flac" => "flac",
        "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
        _ => return None,
    };
    Some(ext)
}

/// Infer a file extension from the URL path if present.
fn infer_ext_from_url(url: &str) -> Option<String> {
    let tail = url.split('?').next().unwrap_or(url);
    let path = tail.split_once("://").map_or(tail, |(_, rest)| rest);
    let (_, path) = path.split_once('/')?;
    let file = path.rsplit('/').next().unwrap_or(path);
    let mut parts = file.rsplit('.');
    let ext = parts.next()?;
    if parts.next().is_some() && !ext.is_empty() {
        Some(ext.to_ascii_lowercase())
    } else {
        None
    }
}
