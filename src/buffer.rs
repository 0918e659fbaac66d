use anyhow::{anyhow, bail};

use crate::util::PrecheckedCast;

/// Byte order applied to all multi-byte reads and writes of a [ByteBuf] until changed.
#[derive(Clone, Copy, Eq, PartialEq, Debug, Default)]
pub enum Endian {
    #[default]
    Big,
    Little,
}

/// Growable byte buffer with a single read/write cursor, used as the wire codec for
///  message payloads.
///
/// `position` is the cursor for the next read or write, `len` is the high-water mark of
///  written bytes - the two are independent, i.e. rewinding the cursor does not truncate
///  the buffer. When a write would exceed the allocated storage, the storage grows to the
///  next multiple of the extension quantum (or to the exact required size if the quantum
///  is 0), copying previously written bytes.
///
/// Reading past the written high-water mark is a boundary violation and fails with an
///  error naming the offending offset, leaving the cursor where it was. Returning
///  undefined data instead is explicitly not an option.
///
/// A buffer has exactly one reader/writer at a time - ownership passes through the
///  [crate::buffer_pool::BufferPool] between the transport side and the session engine.
pub struct ByteBuf {
    data: Vec<u8>,
    position: usize,
    length: usize,
    endian: Endian,
    extension_quantum: usize,
    strict_utf8: bool,
}

const REPLACEMENT_CHARACTER: char = '\u{FFFD}';

impl ByteBuf {
    pub fn new() -> ByteBuf {
        Self::with_quantum(0)
    }

    /// An empty buffer whose storage grows in multiples of `extension_quantum` bytes.
    pub fn with_quantum(extension_quantum: usize) -> ByteBuf {
        ByteBuf {
            data: vec![0; extension_quantum],
            position: 0,
            length: 0,
            endian: Endian::default(),
            extension_quantum,
            strict_utf8: false,
        }
    }

    /// A buffer initialised from an existing byte region, cursor at the start,
    ///  high-water mark after the copied bytes.
    pub fn from_slice(bytes: &[u8], extension_quantum: usize) -> ByteBuf {
        let mut buf = Self::with_quantum(extension_quantum);
        buf.ensure_capacity(bytes.len());
        buf.data[..bytes.len()].copy_from_slice(bytes);
        buf.length = bytes.len();
        buf
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    pub fn set_endian(&mut self, endian: Endian) {
        self.endian = endian;
    }

    /// Strict mode makes UTF-8 decoding fail on malformed sequences instead of
    ///  substituting U+FFFD.
    pub fn set_strict_utf8(&mut self, strict: bool) {
        self.strict_utf8 = strict;
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// Moves the cursor. Moving it past the high-water mark raises the mark (and secures
    ///  storage), so a subsequent read at the old mark sees zero bytes rather than
    ///  out-of-range storage.
    pub fn set_position(&mut self, position: usize) {
        if position > self.length {
            self.ensure_capacity(position);
            self.length = position;
        }
        self.position = position;
    }

    /// High-water mark of written bytes.
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Bytes available for reading from the cursor up to the high-water mark.
    pub fn remaining(&self) -> usize {
        self.length.saturating_sub(self.position)
    }

    /// The written bytes, irrespective of the cursor.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.length]
    }

    /// Resets cursor and high-water mark to 0 and shrinks storage back to the extension
    ///  quantum.
    pub fn clear(&mut self) {
        self.data = vec![0; self.extension_quantum];
        self.position = 0;
        self.length = 0;
    }

    fn ensure_capacity(&mut self, required: usize) {
        if required <= self.data.len() {
            return;
        }
        let new_size = if self.extension_quantum == 0 {
            required
        } else {
            ((required / self.extension_quantum) + 1) * self.extension_quantum
        };
        self.data.resize(new_size, 0);
    }

    fn check_readable(&self, n: usize) -> anyhow::Result<()> {
        if self.position + n > self.length {
            bail!(
                "read of {} bytes at position {} exceeds available {} bytes",
                n,
                self.position,
                self.remaining()
            );
        }
        Ok(())
    }

    fn take_array<const N: usize>(&mut self) -> anyhow::Result<[u8; N]> {
        self.check_readable(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[self.position..self.position + N]);
        self.position += N;
        Ok(out)
    }

    fn put_slice(&mut self, bytes: &[u8]) {
        let end = self.position + bytes.len();
        self.ensure_capacity(end);
        self.data[self.position..end].copy_from_slice(bytes);
        self.position = end;
        if end > self.length {
            self.length = end;
        }
    }

    pub fn read_bool(&mut self) -> anyhow::Result<bool> {
        Ok(self.take_array::<1>()?[0] != 0)
    }

    pub fn write_bool(&mut self, value: bool) {
        self.put_slice(&[value as u8]);
    }

    pub fn read_i8(&mut self) -> anyhow::Result<i8> {
        Ok(self.take_array::<1>()?[0] as i8)
    }

    pub fn write_i8(&mut self, value: i8) {
        self.put_slice(&[value as u8]);
    }

    pub fn read_u8(&mut self) -> anyhow::Result<u8> {
        Ok(self.take_array::<1>()?[0])
    }

    pub fn write_u8(&mut self, value: u8) {
        self.put_slice(&[value]);
    }

    pub fn read_i16(&mut self) -> anyhow::Result<i16> {
        let b = self.take_array::<2>()?;
        Ok(match self.endian {
            Endian::Big => i16::from_be_bytes(b),
            Endian::Little => i16::from_le_bytes(b),
        })
    }

    pub fn write_i16(&mut self, value: i16) {
        match self.endian {
            Endian::Big => self.put_slice(&value.to_be_bytes()),
            Endian::Little => self.put_slice(&value.to_le_bytes()),
        }
    }

    pub fn read_u16(&mut self) -> anyhow::Result<u16> {
        let b = self.take_array::<2>()?;
        Ok(match self.endian {
            Endian::Big => u16::from_be_bytes(b),
            Endian::Little => u16::from_le_bytes(b),
        })
    }

    pub fn write_u16(&mut self, value: u16) {
        match self.endian {
            Endian::Big => self.put_slice(&value.to_be_bytes()),
            Endian::Little => self.put_slice(&value.to_le_bytes()),
        }
    }

    pub fn read_i32(&mut self) -> anyhow::Result<i32> {
        let b = self.take_array::<4>()?;
        Ok(match self.endian {
            Endian::Big => i32::from_be_bytes(b),
            Endian::Little => i32::from_le_bytes(b),
        })
    }

    pub fn write_i32(&mut self, value: i32) {
        match self.endian {
            Endian::Big => self.put_slice(&value.to_be_bytes()),
            Endian::Little => self.put_slice(&value.to_le_bytes()),
        }
    }

    pub fn read_u32(&mut self) -> anyhow::Result<u32> {
        let b = self.take_array::<4>()?;
        Ok(match self.endian {
            Endian::Big => u32::from_be_bytes(b),
            Endian::Little => u32::from_le_bytes(b),
        })
    }

    pub fn write_u32(&mut self, value: u32) {
        match self.endian {
            Endian::Big => self.put_slice(&value.to_be_bytes()),
            Endian::Little => self.put_slice(&value.to_le_bytes()),
        }
    }

    pub fn read_i64(&mut self) -> anyhow::Result<i64> {
        let b = self.take_array::<8>()?;
        Ok(match self.endian {
            Endian::Big => i64::from_be_bytes(b),
            Endian::Little => i64::from_le_bytes(b),
        })
    }

    pub fn write_i64(&mut self, value: i64) {
        match self.endian {
            Endian::Big => self.put_slice(&value.to_be_bytes()),
            Endian::Little => self.put_slice(&value.to_le_bytes()),
        }
    }

    pub fn read_u64(&mut self) -> anyhow::Result<u64> {
        let b = self.take_array::<8>()?;
        Ok(match self.endian {
            Endian::Big => u64::from_be_bytes(b),
            Endian::Little => u64::from_le_bytes(b),
        })
    }

    pub fn write_u64(&mut self, value: u64) {
        match self.endian {
            Endian::Big => self.put_slice(&value.to_be_bytes()),
            Endian::Little => self.put_slice(&value.to_le_bytes()),
        }
    }

    pub fn read_f32(&mut self) -> anyhow::Result<f32> {
        let b = self.take_array::<4>()?;
        Ok(match self.endian {
            Endian::Big => f32::from_be_bytes(b),
            Endian::Little => f32::from_le_bytes(b),
        })
    }

    pub fn write_f32(&mut self, value: f32) {
        match self.endian {
            Endian::Big => self.put_slice(&value.to_be_bytes()),
            Endian::Little => self.put_slice(&value.to_le_bytes()),
        }
    }

    pub fn read_f64(&mut self) -> anyhow::Result<f64> {
        let b = self.take_array::<8>()?;
        Ok(match self.endian {
            Endian::Big => f64::from_be_bytes(b),
            Endian::Little => f64::from_le_bytes(b),
        })
    }

    pub fn write_f64(&mut self, value: f64) {
        match self.endian {
            Endian::Big => self.put_slice(&value.to_be_bytes()),
            Endian::Little => self.put_slice(&value.to_le_bytes()),
        }
    }

    /// Reads a UTF-8 string prefixed by a 16-bit byte-length header.
    pub fn read_utf(&mut self) -> anyhow::Result<String> {
        let len = self.read_u16()?;
        self.read_utf_bytes(len as usize)
    }

    /// Reads `len` bytes and decodes them as UTF-8.
    pub fn read_utf_bytes(&mut self, len: usize) -> anyhow::Result<String> {
        self.check_readable(len)?;
        let decoded = decode_utf8(
            &self.data[self.position..self.position + len],
            self.strict_utf8,
        )?;
        self.position += len;
        Ok(decoded)
    }

    /// Writes a UTF-8 string prefixed by a 16-bit byte-length header. Fails if the
    ///  encoded string does not fit the 16-bit header.
    pub fn write_utf(&mut self, value: &str) -> anyhow::Result<()> {
        let encoded = encode_utf8(value);
        if encoded.len() > u16::MAX as usize {
            bail!(
                "string of {} UTF-8 bytes exceeds the 16-bit length prefix",
                encoded.len()
            );
        }
        self.write_u16(encoded.len().prechecked_cast());
        self.put_slice(&encoded);
        Ok(())
    }

    /// Writes a UTF-8 string without a length prefix.
    pub fn write_utf_bytes(&mut self, value: &str) {
        let encoded = encode_utf8(value);
        self.put_slice(&encoded);
    }

    /// Copies `len` readable bytes from this buffer into `dest` starting at `offset`
    ///  (growing `dest` as needed). `len == 0` means "all remaining bytes". The
    ///  destination cursor is left untouched.
    pub fn read_into(&mut self, dest: &mut ByteBuf, offset: usize, len: usize) -> anyhow::Result<()> {
        let available = self.remaining();
        let len = if len == 0 { available } else { len };
        if len > available {
            bail!(
                "read of {} bytes at position {} exceeds available {} bytes",
                len,
                self.position,
                available
            );
        }

        let end = offset + len;
        dest.ensure_capacity(end);
        dest.data[offset..end].copy_from_slice(&self.data[self.position..self.position + len]);
        if end > dest.length {
            dest.length = end;
        }
        self.position += len;
        Ok(())
    }

    /// Appends bytes from `src` (starting at `offset` within its written region) at this
    ///  buffer's cursor. The copied length is clamped to the bytes `src` actually holds;
    ///  an offset past the end of `src` copies nothing.
    pub fn write_from(&mut self, src: &ByteBuf, offset: usize, len: usize) {
        if offset >= src.length {
            return;
        }
        let available = src.length - offset;
        let len = if len == 0 { available } else { len.min(available) };
        if len == 0 {
            return;
        }

        let end = self.position + len;
        self.ensure_capacity(end);
        // src and self are distinct buffers by the one-owner rule, no aliasing concern
        let tmp = src.data[offset..offset + len].to_vec();
        self.data[self.position..end].copy_from_slice(&tmp);
        self.position = end;
        if end > self.length {
            self.length = end;
        }
    }
}

impl Default for ByteBuf {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ByteBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ByteBuf{{len:{}, position:{}, capacity:{}}}",
            self.length, self.position, self.data.len()
        )
    }
}

/// Interop with the `bytes` ecosystem: the readable region of a [ByteBuf] acts as a
///  regular [bytes::Buf].
impl bytes::Buf for ByteBuf {
    fn remaining(&self) -> usize {
        ByteBuf::remaining(self)
    }

    fn chunk(&self) -> &[u8] {
        &self.data[self.position..self.length]
    }

    fn advance(&mut self, cnt: usize) {
        assert!(
            cnt <= ByteBuf::remaining(self),
            "advance of {} bytes past the readable region",
            cnt
        );
        self.position += cnt;
    }
}

/// Hand-rolled UTF-8 encoder: 1 to 4 bytes per scalar value. Rust strings hold scalar
///  values only, so there is no surrogate range to reject on the encode side.
fn encode_utf8(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len());
    for c in s.chars() {
        let cp = c as u32;
        if cp < 0x80 {
            out.push(cp as u8);
        } else if cp < 0x800 {
            out.push(0xC0 | (cp >> 6) as u8);
            out.push(0x80 | (cp & 0x3F) as u8);
        } else if cp < 0x10000 {
            out.push(0xE0 | (cp >> 12) as u8);
            out.push(0x80 | ((cp >> 6) & 0x3F) as u8);
            out.push(0x80 | (cp & 0x3F) as u8);
        } else {
            out.push(0xF0 | (cp >> 18) as u8);
            out.push(0x80 | ((cp >> 12) & 0x3F) as u8);
            out.push(0x80 | ((cp >> 6) & 0x3F) as u8);
            out.push(0x80 | (cp & 0x3F) as u8);
        }
    }
    out
}

/// Hand-rolled incremental UTF-8 decoder.
///
/// Strict mode fails on the first malformed sequence, naming the byte offset. Lenient
///  mode substitutes U+FFFD and resynchronises on the offending byte, i.e. a byte that
///  breaks a multi-byte sequence is re-examined as the potential start of the next one.
///  Overlong encodings and encoded surrogates (U+D800..U+DFFF) are malformed.
fn decode_utf8(data: &[u8], strict: bool) -> anyhow::Result<String> {
    let mut result = String::new();
    let mut pos = 0usize;

    let mut code_point = 0u32;
    let mut bytes_needed = 0u32;
    let mut bytes_seen = 0u32;
    // per-lead bounds for the next continuation byte, catching overlong encodings,
    // encoded surrogates and code points above U+10FFFF at the earliest byte
    let mut lower_cont = 0x80u8;
    let mut upper_cont = 0xBFu8;

    let mut malformed = |at: usize, result: &mut String| -> anyhow::Result<()> {
        if strict {
            return Err(anyhow!("malformed UTF-8 sequence at byte offset {}", at));
        }
        result.push(REPLACEMENT_CHARACTER);
        Ok(())
    };

    while pos < data.len() {
        let byte = data[pos];
        pos += 1;

        if bytes_needed == 0 {
            match byte {
                0x00..=0x7F => result.push(byte as char),
                0xC2..=0xDF => {
                    bytes_needed = 1;
                    code_point = (byte & 0x1F) as u32;
                }
                0xE0..=0xEF => {
                    bytes_needed = 2;
                    if byte == 0xE0 {
                        lower_cont = 0xA0;
                    }
                    if byte == 0xED {
                        upper_cont = 0x9F; // excludes the surrogate range
                    }
                    code_point = (byte & 0x0F) as u32;
                }
                0xF0..=0xF4 => {
                    bytes_needed = 3;
                    if byte == 0xF0 {
                        lower_cont = 0x90;
                    }
                    if byte == 0xF4 {
                        upper_cont = 0x8F; // caps at U+10FFFF
                    }
                    code_point = (byte & 0x07) as u32;
                }
                _ => malformed(pos - 1, &mut result)?,
            }
        } else if byte < lower_cont || byte > upper_cont {
            code_point = 0;
            bytes_needed = 0;
            bytes_seen = 0;
            lower_cont = 0x80;
            upper_cont = 0xBF;

            // report, then re-examine this byte as a potential sequence start
            pos -= 1;
            malformed(pos, &mut result)?;
        } else {
            lower_cont = 0x80;
            upper_cont = 0xBF;
            code_point = (code_point << 6) | (byte & 0x3F) as u32;
            bytes_seen += 1;

            if bytes_seen == bytes_needed {
                let cp = code_point;
                code_point = 0;
                bytes_needed = 0;
                bytes_seen = 0;

                match char::from_u32(cp) {
                    // > U+FFFF decodes to one scalar value, no surrogate pair needed
                    Some(c) => result.push(c),
                    None => malformed(pos - 1, &mut result)?,
                }
            }
        }
    }

    if bytes_needed != 0 {
        // input ended in the middle of a multi-byte sequence
        malformed(data.len(), &mut result)?;
    }

    Ok(result)
}
