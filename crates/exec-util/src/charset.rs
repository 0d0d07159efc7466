//! Character encodings for process streams
//!
//! Process output arrives as raw bytes in whatever encoding the child uses.
//! [`DecodeReader`] turns it into UTF-8 on the fly, [`TextReader`] adds
//! buffering on top so handlers can read line by line, and [`TextWriter`]
//! goes the other way for standard input.

use std::fmt;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};

use encoding_rs::{Decoder, Encoder, EncoderResult, Encoding};

use crate::error::{Error, Result};

/// Line separator written by [`TextWriter::new_line`]
#[cfg(windows)]
pub const LINE_SEPARATOR: &str = "\r\n";

/// Line separator written by [`TextWriter::new_line`]
#[cfg(not(windows))]
pub const LINE_SEPARATOR: &str = "\n";

const RAW_BUFFER_SIZE: usize = 8 * 1024;

/// A character encoding used to read or write a process stream
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Charset(&'static Encoding);

impl Charset {
    /// UTF-8, the default for every stream
    pub fn utf_8() -> Self {
        Self(encoding_rs::UTF_8)
    }

    /// Look up an encoding by one of its WHATWG labels, e.g. `"shift_jis"` or `"latin1"`
    pub fn for_label(label: &str) -> Result<Self> {
        Encoding::for_label(label.trim().as_bytes())
            .map(Self)
            .ok_or_else(|| Error::UnknownEncoding {
                label: label.to_string(),
            })
    }

    /// The canonical name of the encoding
    pub fn name(&self) -> &'static str {
        self.0.name()
    }

    /// The underlying encoding
    pub fn encoding(&self) -> &'static Encoding {
        self.0
    }

    fn is_utf_8(&self) -> bool {
        self.0 == encoding_rs::UTF_8
    }
}

impl Default for Charset {
    fn default() -> Self {
        Self::utf_8()
    }
}

impl From<&'static Encoding> for Charset {
    fn from(encoding: &'static Encoding) -> Self {
        Self(encoding)
    }
}

impl fmt::Debug for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Charset").field(&self.name()).finish()
    }
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A reader that decodes bytes in some [`Charset`] into UTF-8
///
/// Malformed sequences become U+FFFD. A byte order mark is passed through as
/// data rather than being sniffed.
pub struct DecodeReader<R> {
    inner: R,
    decoder: Decoder,
    raw: Box<[u8]>,
    decoded: Vec<u8>,
    pos: usize,
    finished: bool,
}

impl<R: Read> DecodeReader<R> {
    /// Wrap `inner`, decoding it from `charset`
    pub fn new(inner: R, charset: Charset) -> Self {
        Self {
            inner,
            decoder: charset.encoding().new_decoder_without_bom_handling(),
            raw: vec![0; RAW_BUFFER_SIZE].into_boxed_slice(),
            decoded: Vec::new(),
            pos: 0,
            finished: false,
        }
    }

    /// Get back the wrapped reader
    pub fn into_inner(self) -> R {
        self.inner
    }

    fn refill(&mut self) -> io::Result<()> {
        let n = self.inner.read(&mut self.raw)?;
        let last = n == 0;

        let needed = self
            .decoder
            .max_utf8_buffer_length(n)
            .ok_or_else(|| io::Error::other("decode buffer length overflow"))?;
        self.decoded.resize(needed, 0);

        let (_, read, written, _) =
            self.decoder
                .decode_to_utf8(&self.raw[..n], &mut self.decoded, last);
        debug_assert_eq!(read, n);

        self.decoded.truncate(written);
        self.pos = 0;
        self.finished = last;
        Ok(())
    }
}

impl<R: Read> Read for DecodeReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos >= self.decoded.len() {
            if self.finished {
                return Ok(0);
            }
            self.refill()?;
        }

        let available = &self.decoded[self.pos..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.pos += n;
        Ok(n)
    }
}

/// Buffered, decoded view of a process output stream
///
/// This is what raw output handlers receive. It implements [`BufRead`], so
/// `reader.lines()` yields lines with `\n` or `\r\n` stripped.
pub struct TextReader {
    inner: BufReader<DecodeReader<Box<dyn Read + Send>>>,
}

impl TextReader {
    /// Wrap a byte stream, decoding it from `charset`
    pub fn new(inner: Box<dyn Read + Send>, charset: Charset) -> Self {
        Self {
            inner: BufReader::new(DecodeReader::new(inner, charset)),
        }
    }

    /// Read and throw away everything left in the stream
    pub fn discard(&mut self) -> io::Result<u64> {
        io::copy(self, &mut io::sink())
    }
}

impl Read for TextReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl BufRead for TextReader {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.inner.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.inner.consume(amt)
    }
}

/// Buffered writer that encodes text into a [`Charset`]
///
/// Used for process standard input. `write` and `write_line` hand back
/// `&mut Self` so calls chain:
///
/// ```no_run
/// # fn demo(w: &mut exec_util::TextWriter) -> std::io::Result<()> {
/// w.write_line("python --version")?.write_line("exit")?;
/// # Ok(())
/// # }
/// ```
pub struct TextWriter<W: Write = Box<dyn Write + Send>> {
    inner: BufWriter<W>,
    charset: Charset,
    encoder: Option<Encoder>,
    scratch: Vec<u8>,
}

impl<W: Write> TextWriter<W> {
    /// Wrap `inner`, encoding text into `charset`
    pub fn new(inner: W, charset: Charset) -> Self {
        let encoder = if charset.is_utf_8() || is_utf_16(charset) {
            None
        } else {
            Some(charset.encoding().new_encoder())
        };
        Self {
            inner: BufWriter::new(inner),
            charset,
            encoder,
            scratch: Vec::new(),
        }
    }

    /// The charset text is encoded into
    pub fn charset(&self) -> Charset {
        self.charset
    }

    /// Write `text` as is
    pub fn write(&mut self, text: &str) -> io::Result<&mut Self> {
        self.encode(text, false)?;
        Ok(self)
    }

    /// Write `text` followed by a line separator
    pub fn write_line(&mut self, text: &str) -> io::Result<&mut Self> {
        self.encode(text, false)?;
        self.new_line()
    }

    /// Write a line separator
    pub fn new_line(&mut self) -> io::Result<&mut Self> {
        self.encode(LINE_SEPARATOR, false)?;
        Ok(self)
    }

    /// Flush buffered output to the underlying writer
    pub fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }

    /// Flush any pending encoder state and buffered output, returning the writer
    pub fn finish(mut self) -> io::Result<W> {
        self.encode("", true)?;
        self.inner.into_inner().map_err(|e| e.into_error())
    }

    fn encode(&mut self, text: &str, last: bool) -> io::Result<()> {
        let Some(encoder) = self.encoder.as_mut() else {
            return match self.charset.encoding() {
                enc if enc == encoding_rs::UTF_16LE => {
                    for unit in text.encode_utf16() {
                        self.inner.write_all(&unit.to_le_bytes())?;
                    }
                    Ok(())
                }
                enc if enc == encoding_rs::UTF_16BE => {
                    for unit in text.encode_utf16() {
                        self.inner.write_all(&unit.to_be_bytes())?;
                    }
                    Ok(())
                }
                _ => self.inner.write_all(text.as_bytes()),
            };
        };

        let mut src = text;
        loop {
            let needed = encoder
                .max_buffer_length_from_utf8_without_replacement(src.len())
                .ok_or_else(|| io::Error::other("encode buffer length overflow"))?;
            self.scratch.resize(needed.max(16), 0);

            let (result, read, written) =
                encoder.encode_from_utf8_without_replacement(src, &mut self.scratch, last);
            self.inner.write_all(&self.scratch[..written])?;
            src = &src[read..];

            match result {
                EncoderResult::InputEmpty => return Ok(()),
                EncoderResult::OutputFull => continue,
                EncoderResult::Unmappable(_) => self.inner.write_all(b"?")?,
            }
        }
    }
}

fn is_utf_16(charset: Charset) -> bool {
    let enc = charset.encoding();
    enc == encoding_rs::UTF_16LE || enc == encoding_rs::UTF_16BE
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn decode_all(bytes: &[u8], charset: Charset) -> String {
        let mut out = String::new();
        DecodeReader::new(Cursor::new(bytes.to_vec()), charset)
            .read_to_string(&mut out)
            .unwrap();
        out
    }

    #[test]
    fn test_for_label() {
        assert_eq!(Charset::for_label("utf8").unwrap(), Charset::utf_8());
        assert_eq!(Charset::for_label(" Shift_JIS ").unwrap().name(), "Shift_JIS");
        assert!(matches!(
            Charset::for_label("klingon"),
            Err(Error::UnknownEncoding { .. })
        ));
    }

    #[test]
    fn test_decode_shift_jis() {
        // "初音" in Shift_JIS
        let bytes = [0x8f, 0x89, 0x89, 0xb9];
        let charset = Charset::for_label("shift_jis").unwrap();
        assert_eq!(decode_all(&bytes, charset), "初音");
    }

    #[test]
    fn test_decode_replaces_malformed_input() {
        let bytes = b"ok\xffthen";
        assert_eq!(decode_all(bytes, Charset::utf_8()), "ok\u{fffd}then");

        // truncated multi-byte sequence at end of stream
        let bytes = b"tail\xe3\x81";
        assert_eq!(decode_all(bytes, Charset::utf_8()), "tail\u{fffd}");
    }

    #[test]
    fn test_decode_split_across_reads() {
        struct OneByte(Cursor<Vec<u8>>);
        impl Read for OneByte {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                let len = buf.len().min(1);
                self.0.read(&mut buf[..len])
            }
        }

        let src = "ミク\n".as_bytes().to_vec();
        let mut out = String::new();
        DecodeReader::new(OneByte(Cursor::new(src)), Charset::utf_8())
            .read_to_string(&mut out)
            .unwrap();
        assert_eq!(out, "ミク\n");
    }

    #[test]
    fn test_text_reader_lines() {
        let reader = TextReader::new(
            Box::new(Cursor::new(b"first\r\nsecond\nthird".to_vec())),
            Charset::utf_8(),
        );
        let lines: Vec<String> = reader.lines().map(|l| l.unwrap()).collect();
        assert_eq!(lines, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_writer_chaining() -> io::Result<()> {
        let mut writer = TextWriter::new(Vec::new(), Charset::utf_8());
        writer.write("a")?.write_line("b")?.write_line("c")?;
        let bytes = writer.finish()?;
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            format!("ab{LINE_SEPARATOR}c{LINE_SEPARATOR}")
        );
        Ok(())
    }

    #[test]
    fn test_writer_encodes_legacy_charset() {
        let charset = Charset::for_label("windows-1252").unwrap();
        let mut writer = TextWriter::new(Vec::new(), charset);
        writer.write("café €").unwrap();
        let bytes = writer.finish().unwrap();
        assert_eq!(bytes, vec![b'c', b'a', b'f', 0xe9, b' ', 0x80]);
    }

    #[test]
    fn test_writer_replaces_unmappable() {
        let charset = Charset::for_label("iso-8859-2").unwrap();
        let mut writer = TextWriter::new(Vec::new(), charset);
        writer.write("a初b").unwrap();
        assert_eq!(writer.finish().unwrap(), b"a?b".to_vec());
    }

    #[test]
    fn test_writer_utf_16() {
        let charset = Charset::for_label("utf-16be").unwrap();
        let mut writer = TextWriter::new(Vec::new(), charset);
        writer.write("hi").unwrap();
        assert_eq!(writer.finish().unwrap(), vec![0, b'h', 0, b'i']);
    }
}
