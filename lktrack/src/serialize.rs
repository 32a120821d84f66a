//! Flat, versionless binary snapshots.
//!
//! Every object and every field is preceded by two fixed-width, zero-padded
//! description strings: a type name and an object (or field) name. Scalars are
//! little-endian.

use crate::error::{Result, TrackerError};

/// Width of each description string in bytes.
pub const DESCRIPTION_STRING_LENGTH: usize = 32;

pub(crate) struct SerializedWriter {
    buf: Vec<u8>,
    capacity: usize,
}

impl SerializedWriter {
    pub fn new(capacity: usize) -> Self {
        Self { buf: Vec::with_capacity(capacity), capacity }
    }

    pub fn description(&mut self, type_name: &str, object_name: &str) -> Result<()> {
        self.string(type_name)?;
        self.string(object_name)
    }

    fn string(&mut self, s: &str) -> Result<()> {
        let bytes = s.as_bytes();
        if bytes.len() >= DESCRIPTION_STRING_LENGTH {
            return Err(TrackerError::param(format!(
                "description string '{s}' longer than {} bytes",
                DESCRIPTION_STRING_LENGTH - 1
            )));
        }
        let mut field = [0u8; DESCRIPTION_STRING_LENGTH];
        field[..bytes.len()].copy_from_slice(bytes);
        self.bytes(&field)
    }

    fn bytes(&mut self, b: &[u8]) -> Result<()> {
        if self.buf.len() + b.len() > self.capacity {
            return Err(TrackerError::OutOfMemory {
                requested: b.len(),
                available: self.capacity - self.buf.len(),
            });
        }
        self.buf.extend_from_slice(b);
        Ok(())
    }

    pub fn bool(&mut self, name: &str, v: bool) -> Result<()> {
        self.description("bool", name)?;
        self.bytes(&[v as u8])
    }

    pub fn i32(&mut self, name: &str, v: i32) -> Result<()> {
        self.description("s32", name)?;
        self.bytes(&v.to_le_bytes())
    }

    /// A 2D f32 array: height and width as u32, then row-major values.
    pub fn f32_array(&mut self, name: &str, height: u32, width: u32, values: &[f32]) -> Result<()> {
        self.description("Array<f32>", name)?;
        self.bytes(&height.to_le_bytes())?;
        self.bytes(&width.to_le_bytes())?;
        for v in values {
            self.bytes(&v.to_le_bytes())?;
        }
        Ok(())
    }

    /// A fixed group of f32 values under a composite type name.
    pub fn f32_group(&mut self, type_name: &str, name: &str, values: &[f32]) -> Result<()> {
        self.description(type_name, name)?;
        for v in values {
            self.bytes(&v.to_le_bytes())?;
        }
        Ok(())
    }

    /// Zero-pad to the full capacity.
    pub fn finish(mut self) -> Vec<u8> {
        self.buf.resize(self.capacity, 0);
        self.buf
    }
}

pub(crate) struct SerializedReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> SerializedReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(TrackerError::Deserialize(format!(
                "buffer ends at {} bytes, needed {}",
                self.buf.len(),
                self.pos + n
            )));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn string(&mut self) -> Result<String> {
        let raw = self.take(DESCRIPTION_STRING_LENGTH)?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        String::from_utf8(raw[..end].to_vec())
            .map_err(|_| TrackerError::Deserialize("description string is not UTF-8".into()))
    }

    /// Read a description and check its type name; returns the object name.
    pub fn description(&mut self, expected_type: &str) -> Result<String> {
        let type_name = self.string()?;
        let object_name = self.string()?;
        if type_name != expected_type {
            return Err(TrackerError::Deserialize(format!(
                "expected type '{expected_type}', found '{type_name}'"
            )));
        }
        Ok(object_name)
    }

    fn f32(&mut self) -> Result<f32> {
        let b = self.take(4)?;
        Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn bool(&mut self) -> Result<bool> {
        self.description("bool")?;
        Ok(self.take(1)?[0] != 0)
    }

    pub fn i32(&mut self) -> Result<i32> {
        self.description("s32")?;
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn f32_array(&mut self) -> Result<(u32, u32, Vec<f32>)> {
        self.description("Array<f32>")?;
        let height = self.u32()?;
        let width = self.u32()?;
        let n = (height as usize)
            .checked_mul(width as usize)
            .filter(|&n| n <= self.buf.len() / 4)
            .ok_or_else(|| TrackerError::Deserialize(format!("bad array size {height}x{width}")))?;
        let values = (0..n).map(|_| self.f32()).collect::<Result<Vec<_>>>()?;
        Ok((height, width, values))
    }

    pub fn f32_group<const N: usize>(&mut self, type_name: &str) -> Result<[f32; N]> {
        self.description(type_name)?;
        let mut out = [0.0; N];
        for v in &mut out {
            *v = self.f32()?;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_read_back_in_order() {
        let mut w = SerializedWriter::new(512);
        w.description("Thing", "thing0").unwrap();
        w.bool("flag", true).unwrap();
        w.i32("code", -42).unwrap();
        w.f32_array("m", 1, 2, &[1.5, -2.0]).unwrap();
        w.f32_group("Point<f32>", "p", &[3.0, 4.0]).unwrap();
        let buf = w.finish();
        assert_eq!(buf.len(), 512);

        let mut r = SerializedReader::new(&buf);
        assert_eq!(r.description("Thing").unwrap(), "thing0");
        assert!(r.bool().unwrap());
        assert_eq!(r.i32().unwrap(), -42);
        assert_eq!(r.f32_array().unwrap(), (1, 2, vec![1.5, -2.0]));
        assert_eq!(r.f32_group::<2>("Point<f32>").unwrap(), [3.0, 4.0]);
    }

    #[test]
    fn type_mismatch_is_reported() {
        let mut w = SerializedWriter::new(256);
        w.i32("code", 1).unwrap();
        let buf = w.finish();
        let err = SerializedReader::new(&buf).bool().unwrap_err();
        assert!(matches!(err, TrackerError::Deserialize(_)));
    }

    #[test]
    fn writer_respects_capacity() {
        let mut w = SerializedWriter::new(70);
        assert!(w.bool("a", true).is_ok());
        assert!(matches!(w.bool("b", true), Err(TrackerError::OutOfMemory { .. })));
    }

    #[test]
    fn truncated_buffer_is_an_error() {
        let mut w = SerializedWriter::new(128);
        w.i32("code", 7).unwrap();
        let buf = w.finish();
        let err = SerializedReader::new(&buf[..40]).i32().unwrap_err();
        assert!(matches!(err, TrackerError::Deserialize(_)));
    }
}
