//! MJPEG frame decoder.
//!
//! The capture process writes concatenated JPEG images to its stdout. This
//! module cuts that byte stream into frames by scanning for the JPEG
//! start-of-image (`FF D8`) and end-of-image (`FF D9`) markers. Images are not
//! decoded; the frame payload is the JPEG exactly as produced.

use anyhow::{anyhow, Error, Result};
use std::collections::VecDeque;
use std::io::{ErrorKind, Read};

use crate::frame::Frame;

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;
const READ_CHUNK_BYTES: usize = 64 * 1024;

/// Incremental marker scanner.
///
/// Bytes are accumulated until a start marker followed by an end marker is
/// present; each complete pair becomes one frame and the consumed prefix is
/// dropped.
#[derive(Debug, Default)]
pub struct MjpegDecoder {
    buffer: Vec<u8>,
}

impl MjpegDecoder {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(READ_CHUNK_BYTES),
        }
    }

    /// Feed newly read bytes and return every frame completed by them.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
            frames.push(Frame::new(self.buffer[start..end].to_vec()));
            self.buffer.drain(..end);
        }

        // Garbage or an oversized image: keep the last byte in case it is the
        // first half of a marker.
        if self.buffer.len() > MAX_JPEG_BYTES * 2 {
            let drain_len = self.buffer.len() - 1;
            self.buffer.drain(..drain_len);
        }
        frames
    }

    /// Bytes waiting for a complete marker pair.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}

/// Lazy frame sequence over a byte reader.
///
/// Yields frames in stream order. When the reader reports end of stream the
/// sequence yields one error and then ends; it cannot be restarted.
pub struct FrameStream<R> {
    reader: R,
    decoder: MjpegDecoder,
    pending: VecDeque<Frame>,
    chunk: Vec<u8>,
    finished: bool,
}

impl<R: Read> FrameStream<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            decoder: MjpegDecoder::new(),
            pending: VecDeque::new(),
            chunk: vec![0u8; READ_CHUNK_BYTES],
            finished: false,
        }
    }
}

impl<R: Read> Iterator for FrameStream<R> {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Some(Ok(frame));
            }
            if self.finished {
                return None;
            }
            match self.reader.read(&mut self.chunk) {
                Ok(0) => {
                    self.finished = true;
                    return Some(Err(anyhow!(
                        "mjpeg stream ended ({} bytes of partial frame discarded)",
                        self.decoder.buffered_len()
                    )));
                }
                Ok(read) => {
                    let frames = self.decoder.push(&self.chunk[..read]);
                    self.pending.extend(frames);
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    self.finished = true;
                    return Some(Err(Error::new(err).context("read mjpeg chunk")));
                }
            }
        }
    }
}

/// Locate the first complete JPEG: `(start, end)` with `end` exclusive.
fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = find_marker(buffer, 0, 0xD8)?;
    let end = find_marker(buffer, start + 2, 0xD9)?;
    Some((start, end + 2))
}

fn find_marker(buffer: &[u8], from: usize, code: u8) -> Option<usize> {
    let mut i = from;
    while i + 1 < buffer.len() {
        if buffer[i] == 0xFF && buffer[i + 1] == code {
            return Some(i);
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jpeg(body: &[u8]) -> Vec<u8> {
        let mut out = vec![0xFF, 0xD8];
        out.extend_from_slice(body);
        out.extend_from_slice(&[0xFF, 0xD9]);
        out
    }

    #[test]
    fn extracts_each_complete_pair() {
        let mut stream = Vec::new();
        for body in [b"one".as_slice(), b"two", b"three"] {
            stream.extend_from_slice(b"--boundary\r\n");
            stream.extend(jpeg(body));
        }
        let mut decoder = MjpegDecoder::new();
        let frames = decoder.push(&stream);

        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].payload(), jpeg(b"one").as_slice());
        assert_eq!(frames[2].payload(), jpeg(b"three").as_slice());
        for frame in &frames {
            assert_eq!(&frame.payload()[..2], &[0xFF, 0xD8]);
            assert_eq!(&frame.payload()[frame.len() - 2..], &[0xFF, 0xD9]);
        }
        assert_eq!(decoder.buffered_len(), 0);
    }

    #[test]
    fn waits_for_end_marker_across_chunks() {
        let data = jpeg(b"split-frame");
        let mut decoder = MjpegDecoder::new();

        assert!(decoder.push(&data[..5]).is_empty());
        // Marker split between chunks.
        let cut = data.len() - 1;
        assert!(decoder.push(&data[5..cut]).is_empty());
        let frames = decoder.push(&data[cut..]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload(), data.as_slice());
    }

    #[test]
    fn no_start_marker_yields_nothing() {
        let mut decoder = MjpegDecoder::new();
        assert!(decoder.push(b"no markers here \xFF\xD9 at all").is_empty());
    }

    #[test]
    fn end_before_start_is_not_a_frame() {
        let mut decoder = MjpegDecoder::new();
        // A lone end marker followed by an unterminated start.
        assert!(decoder.push(&[0xFF, 0xD9, 0x00, 0xFF, 0xD8, 0x01]).is_empty());

        // Completing the started image yields exactly that image.
        let frames = decoder.push(&[0x02, 0xFF, 0xD9]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload(), &[0xFF, 0xD8, 0x01, 0x02, 0xFF, 0xD9]);
    }

    #[test]
    fn stream_yields_frames_then_end_error() {
        let mut data = Vec::new();
        data.extend(jpeg(b"a"));
        data.extend(jpeg(b"b"));
        data.extend_from_slice(&[0xFF, 0xD8, 0x42]);

        let mut stream = FrameStream::new(std::io::Cursor::new(data));
        assert_eq!(stream.next().unwrap().unwrap().payload(), jpeg(b"a").as_slice());
        assert_eq!(stream.next().unwrap().unwrap().payload(), jpeg(b"b").as_slice());
        let err = stream.next().unwrap().unwrap_err();
        assert!(err.to_string().contains("mjpeg stream ended"));
        assert!(stream.next().is_none());
    }

    #[test]
    fn oversized_garbage_is_trimmed() {
        let mut decoder = MjpegDecoder::new();
        let garbage = vec![0u8; MAX_JPEG_BYTES * 2 + 10];
        assert!(decoder.push(&garbage).is_empty());
        assert_eq!(decoder.buffered_len(), 1);
    }
}
