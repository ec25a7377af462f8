// bytes.rs — wire codec primitives
//
// Everything on the wire is little-endian. Strings come in two shapes:
// fixed-width NUL-padded fields (player names) and u8-length-prefixed
// runs (chat, sound names).

use thiserror::Error;

use crate::math3d::Vec3;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("unexpected end of packet")]
    UnexpectedEof,
    #[error("unknown packet id {0}")]
    UnknownPacket(u8),
    #[error("value {value} out of range for {what}")]
    BadEnum { what: &'static str, value: i32 },
}

/// A simple RGB triple, three bytes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl From<(u8, u8, u8)> for Rgb {
    fn from((r, g, b): (u8, u8, u8)) -> Self {
        Self { r, g, b }
    }
}

// ============================================================
// ByteWriter
// ============================================================

#[derive(Debug, Default)]
pub struct ByteWriter {
    data: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self { data: Vec::with_capacity(64) }
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn write_u8(&mut self, v: u8) {
        self.data.push(v);
    }

    pub fn write_i8(&mut self, v: i8) {
        self.data.push(v as u8);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.data.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_i16(&mut self, v: i16) {
        self.data.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.data.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_i32(&mut self, v: i32) {
        self.data.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_f32(&mut self, v: f32) {
        self.data.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_bytes(&mut self, v: &[u8]) {
        self.data.extend_from_slice(v);
    }

    pub fn write_color(&mut self, c: Rgb) {
        self.data.extend_from_slice(&[c.r, c.g, c.b]);
    }

    pub fn write_vec3(&mut self, v: Vec3) {
        self.write_f32(v.x);
        self.write_f32(v.y);
        self.write_f32(v.z);
    }

    /// Write `s` into a fixed `width`-byte field, NUL padded. Truncates
    /// at a char boundary if the UTF-8 bytes do not fit.
    pub fn write_fixed_str(&mut self, s: &str, width: usize) {
        let mut end = s.len().min(width);
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        let bytes = &s.as_bytes()[..end];
        self.data.extend_from_slice(bytes);
        self.data.extend(std::iter::repeat(0).take(width - bytes.len()));
    }

    /// u8 length prefix followed by the UTF-8 bytes, capped at 255.
    pub fn write_str(&mut self, s: &str) {
        let mut end = s.len().min(255);
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        self.data.push(end as u8);
        self.data.extend_from_slice(&s.as_bytes()[..end]);
    }
}

// ============================================================
// ByteReader
// ============================================================

pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::UnexpectedEof);
        }
        let s = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8, CodecError> {
        Ok(self.take(1)?[0] as i8)
    }

    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_i16(&mut self) -> Result<i16, CodecError> {
        let b = self.take(2)?;
        Ok(i16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_f32(&mut self) -> Result<f32, CodecError> {
        let b = self.take(4)?;
        Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        self.take(n)
    }

    /// All bytes from the cursor to the end of the packet.
    pub fn read_all(&mut self) -> &'a [u8] {
        let s = &self.data[self.pos..];
        self.pos = self.data.len();
        s
    }

    pub fn read_color(&mut self) -> Result<Rgb, CodecError> {
        let b = self.take(3)?;
        Ok(Rgb { r: b[0], g: b[1], b: b[2] })
    }

    pub fn read_vec3(&mut self) -> Result<Vec3, CodecError> {
        Ok(Vec3::new(self.read_f32()?, self.read_f32()?, self.read_f32()?))
    }

    /// Fixed `width`-byte field; decodes up to the first NUL, replacing
    /// invalid UTF-8 lossily.
    pub fn read_fixed_str(&mut self, width: usize) -> Result<String, CodecError> {
        let b = self.take(width)?;
        let end = b.iter().position(|&c| c == 0).unwrap_or(width);
        Ok(String::from_utf8_lossy(&b[..end]).into_owned())
    }

    pub fn read_str(&mut self) -> Result<String, CodecError> {
        let len = self.read_u8()? as usize;
        let b = self.take(len)?;
        Ok(String::from_utf8_lossy(b).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_roundtrip() {
        let mut w = ByteWriter::new();
        w.write_u8(0xab);
        w.write_i8(-5);
        w.write_u16(0xbeef);
        w.write_i16(-1234);
        w.write_u32(0xdeadbeef);
        w.write_i32(-123456);
        w.write_f32(3.5);

        let buf = w.into_vec();
        let mut r = ByteReader::new(&buf);
        assert_eq!(r.read_u8().unwrap(), 0xab);
        assert_eq!(r.read_i8().unwrap(), -5);
        assert_eq!(r.read_u16().unwrap(), 0xbeef);
        assert_eq!(r.read_i16().unwrap(), -1234);
        assert_eq!(r.read_u32().unwrap(), 0xdeadbeef);
        assert_eq!(r.read_i32().unwrap(), -123456);
        assert_eq!(r.read_f32().unwrap(), 3.5);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_eof() {
        let mut r = ByteReader::new(&[1, 2]);
        assert_eq!(r.read_u32(), Err(CodecError::UnexpectedEof));
    }

    #[test]
    fn test_fixed_str_padding_and_truncation() {
        let mut w = ByteWriter::new();
        w.write_fixed_str("Deuce", 16);
        let buf = w.into_vec();
        assert_eq!(buf.len(), 16);
        assert_eq!(&buf[..5], b"Deuce");
        assert!(buf[5..].iter().all(|&b| b == 0));

        let mut r = ByteReader::new(&buf);
        assert_eq!(r.read_fixed_str(16).unwrap(), "Deuce");

        // multibyte char straddling the boundary gets dropped whole
        let mut w = ByteWriter::new();
        w.write_fixed_str("aaaaaaaaaaaaaaaé", 16);
        let buf = w.into_vec();
        assert_eq!(buf.len(), 16);
        let mut r = ByteReader::new(&buf);
        assert_eq!(r.read_fixed_str(16).unwrap(), "aaaaaaaaaaaaaaa");
    }

    #[test]
    fn test_prefixed_str() {
        let mut w = ByteWriter::new();
        w.write_str("hello there");
        let buf = w.into_vec();
        assert_eq!(buf[0], 11);
        let mut r = ByteReader::new(&buf);
        assert_eq!(r.read_str().unwrap(), "hello there");
    }

    #[test]
    fn test_vec3_and_color() {
        let mut w = ByteWriter::new();
        w.write_vec3(Vec3::new(1.0, -2.0, 0.25));
        w.write_color(Rgb::new(10, 20, 30));
        let buf = w.into_vec();
        let mut r = ByteReader::new(&buf);
        assert_eq!(r.read_vec3().unwrap(), Vec3::new(1.0, -2.0, 0.25));
        assert_eq!(r.read_color().unwrap(), Rgb::new(10, 20, 30));
    }
}
