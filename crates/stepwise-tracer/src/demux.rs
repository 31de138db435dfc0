//! Line reassembly for tracer output
//!
//! Pipes deliver bytes in chunks whose boundaries have nothing to do with the
//! line structure of the protocol. [`LineBuffer`] folds chunks into complete
//! newline-terminated lines for one stream; [`LineDemultiplexer`] keeps one
//! buffer per origin so interleaved stdout/stderr chunks never mix.
//!
//! Splitting happens on raw bytes before UTF-8 decoding, so a multi-byte
//! character cut by a chunk boundary is reassembled intact. Invalid UTF-8 is
//! decoded lossily.
//!
//! A trailing fragment with no newline is only released by
//! [`LineBuffer::finish`] when the stream ends, marked `terminated: false`.
//! The protocol only recognizes newline-terminated lines, so delivery of that
//! fragment is best effort.

use stepwise_core::events::{Line, StreamOrigin};

/// Reassembly buffer for a single output stream
#[derive(Debug)]
pub struct LineBuffer {
    origin: StreamOrigin,
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new(origin: StreamOrigin) -> Self {
        Self {
            origin,
            pending: Vec::new(),
        }
    }

    pub fn origin(&self) -> StreamOrigin {
        self.origin
    }

    /// Feed a chunk, returning every line it completes (possibly none).
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Line> {
        let mut lines = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            let (head, tail) = rest.split_at(pos);
            self.pending.extend_from_slice(head);
            lines.push(self.flush(true));
            rest = &tail[1..];
        }

        self.pending.extend_from_slice(rest);
        lines
    }

    /// Release the trailing fragment at end of stream, if any.
    pub fn finish(&mut self) -> Option<Line> {
        if self.pending.is_empty() {
            None
        } else {
            Some(self.flush(false))
        }
    }

    /// Bytes held back waiting for a newline
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn flush(&mut self, terminated: bool) -> Line {
        let bytes = std::mem::take(&mut self.pending);
        let text = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        };
        Line {
            origin: self.origin,
            text,
            terminated,
        }
    }
}

/// One reassembly buffer per output stream.
#[derive(Debug)]
pub struct LineDemultiplexer {
    stdout: LineBuffer,
    stderr: LineBuffer,
}

impl Default for LineDemultiplexer {
    fn default() -> Self {
        Self::new()
    }
}

impl LineDemultiplexer {
    pub fn new() -> Self {
        Self {
            stdout: LineBuffer::new(StreamOrigin::Stdout),
            stderr: LineBuffer::new(StreamOrigin::Stderr),
        }
    }

    pub fn push(&mut self, origin: StreamOrigin, chunk: &[u8]) -> Vec<Line> {
        self.buffer(origin).push(chunk)
    }

    pub fn finish(&mut self, origin: StreamOrigin) -> Option<Line> {
        self.buffer(origin).finish()
    }

    fn buffer(&mut self, origin: StreamOrigin) -> &mut LineBuffer {
        match origin {
            StreamOrigin::Stdout => &mut self.stdout,
            StreamOrigin::Stderr => &mut self.stderr,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(lines: &[Line]) -> Vec<&str> {
        lines.iter().map(|l| l.text.as_str()).collect()
    }

    /// Feed `data` split at every position in `cuts` and collect all lines.
    fn feed_split(data: &[u8], cuts: &[usize]) -> Vec<Line> {
        let mut buf = LineBuffer::new(StreamOrigin::Stdout);
        let mut lines = Vec::new();
        let mut start = 0;
        for &cut in cuts.iter().chain(std::iter::once(&data.len())) {
            lines.extend(buf.push(&data[start..cut]));
            start = cut;
        }
        lines.extend(buf.finish());
        lines
    }

    #[test]
    fn test_single_chunk_multiple_lines() {
        let mut buf = LineBuffer::new(StreamOrigin::Stdout);
        let lines = buf.push(b"[{\"kind\":\"step\"}]\n[{\"kind\":\"completed\"}]\n");
        assert_eq!(
            texts(&lines),
            vec!["[{\"kind\":\"step\"}]", "[{\"kind\":\"completed\"}]"]
        );
        assert!(lines.iter().all(|l| l.terminated));
        assert_eq!(buf.pending_len(), 0);
    }

    #[test]
    fn test_line_split_across_chunks() {
        let mut buf = LineBuffer::new(StreamOrigin::Stdout);
        assert!(buf.push(b"[{\"kind\":").is_empty());
        assert!(buf.push(b"\"step\"").is_empty());
        let lines = buf.push(b"}]\n[");
        assert_eq!(texts(&lines), vec!["[{\"kind\":\"step\"}]"]);
        assert_eq!(buf.pending_len(), 1);
    }

    #[test]
    fn test_empty_chunk_is_noop() {
        let mut buf = LineBuffer::new(StreamOrigin::Stdout);
        buf.push(b"abc");
        assert!(buf.push(b"").is_empty());
        assert_eq!(buf.pending_len(), 3);
    }

    #[test]
    fn test_empty_lines_are_kept() {
        let mut buf = LineBuffer::new(StreamOrigin::Stdout);
        let lines = buf.push(b"\n\nx\n");
        assert_eq!(texts(&lines), vec!["", "", "x"]);
    }

    #[test]
    fn test_finish_flushes_unterminated_fragment() {
        let mut buf = LineBuffer::new(StreamOrigin::Stderr);
        buf.push(b"done\npartial");
        let last = buf.finish().expect("fragment");
        assert_eq!(last.text, "partial");
        assert!(!last.terminated);
        assert_eq!(last.origin, StreamOrigin::Stderr);
        assert!(buf.finish().is_none());
    }

    #[test]
    fn test_multibyte_char_split_across_chunks() {
        let data = "print: héllo ✓\n".as_bytes();
        // Cut inside the three-byte check mark
        let check = data.len() - 3;
        let lines = feed_split(data, &[check]);
        assert_eq!(texts(&lines), vec!["print: héllo ✓"]);
    }

    #[test]
    fn test_fragmentation_invariance() {
        let data = b"[{\"kind\":\"step\",\"line\":1}]\n\n[{\"kind\":\"print\",\"text\":\"a\"}]\ntail";
        let expected = feed_split(data, &[]);

        // Every single cut point
        for cut in 0..=data.len() {
            assert_eq!(feed_split(data, &[cut]), expected, "cut at {}", cut);
        }
        // Every pair of cut points
        for a in 0..=data.len() {
            for b in a..=data.len() {
                assert_eq!(feed_split(data, &[a, b]), expected, "cuts at {} {}", a, b);
            }
        }
        // Byte at a time
        let cuts: Vec<usize> = (1..data.len()).collect();
        assert_eq!(feed_split(data, &cuts), expected);
    }

    #[test]
    fn test_lines_reproduce_stream() {
        let data = b"one\ntwo\n\nthree\n";
        let lines = feed_split(data, &[2, 5, 9]);
        let mut rebuilt = String::new();
        for line in &lines {
            rebuilt.push_str(&line.text);
            rebuilt.push('\n');
        }
        assert_eq!(rebuilt.as_bytes(), data);
    }

    #[test]
    fn test_demultiplexer_keeps_origins_apart() {
        let mut demux = LineDemultiplexer::new();
        assert!(demux.push(StreamOrigin::Stdout, b"[{\"ki").is_empty());
        let err = demux.push(StreamOrigin::Stderr, b"Traceback\n");
        assert_eq!(err, vec![Line::stderr("Traceback")]);
        let out = demux.push(StreamOrigin::Stdout, b"nd\":\"step\"}]\n");
        assert_eq!(out, vec![Line::stdout("[{\"kind\":\"step\"}]")]);
        assert!(demux.finish(StreamOrigin::Stdout).is_none());
        assert!(demux.finish(StreamOrigin::Stderr).is_none());
    }
}
