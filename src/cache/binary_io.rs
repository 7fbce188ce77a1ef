//! Shared little-endian reader/writer for the `u32 version, u32 count, ...`
//! cache-file convention (spec §6.3).

use crate::error::SerializationError;

pub struct ByteWriter {
    bytes: Vec<u8>,
}

impl ByteWriter {
    pub fn new(version: u32, entry_count: u32) -> Self {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&version.to_le_bytes());
        bytes.extend_from_slice(&entry_count.to_le_bytes());
        Self { bytes }
    }

    pub fn write_u32(&mut self, value: u32) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn write_u64(&mut self, value: u64) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn write_str(&mut self, s: &str) -> &mut Self {
        self.write_u32(s.len() as u32);
        self.bytes.extend_from_slice(s.as_bytes());
        self
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.write_u32(bytes.len() as u32);
        self.bytes.extend_from_slice(bytes);
        self
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

pub struct ByteReader<'a> {
    bytes: &'a [u8],
    cursor: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(bytes: &'a [u8], expected_version: u32) -> Result<(Self, u32), SerializationError> {
        let mut reader = Self { bytes, cursor: 0 };
        let version = reader.read_u32()?;
        if version != expected_version {
            return Err(SerializationError::BadVersion {
                expected: expected_version,
                found: version,
            });
        }
        let entry_count = reader.read_u32()?;
        Ok((reader, entry_count))
    }

    pub fn read_u32(&mut self) -> Result<u32, SerializationError> {
        let slice = self
            .bytes
            .get(self.cursor..self.cursor + 4)
            .ok_or(SerializationError::UnexpectedEof)?;
        self.cursor += 4;
        Ok(u32::from_le_bytes(slice.try_into().unwrap()))
    }

    pub fn read_u64(&mut self) -> Result<u64, SerializationError> {
        let slice = self
            .bytes
            .get(self.cursor..self.cursor + 8)
            .ok_or(SerializationError::UnexpectedEof)?;
        self.cursor += 8;
        Ok(u64::from_le_bytes(slice.try_into().unwrap()))
    }

    pub fn read_str(&mut self) -> Result<String, SerializationError> {
        let len = self.read_u32()? as usize;
        let slice = self
            .bytes
            .get(self.cursor..self.cursor + len)
            .ok_or(SerializationError::UnexpectedEof)?;
        self.cursor += len;
        String::from_utf8(slice.to_vec()).map_err(|e| SerializationError::Corrupt(e.to_string()))
    }

    pub fn read_bytes(&mut self) -> Result<Vec<u8>, SerializationError> {
        let len = self.read_u32()? as usize;
        let slice = self
            .bytes
            .get(self.cursor..self.cursor + len)
            .ok_or(SerializationError::UnexpectedEof)?;
        self.cursor += len;
        Ok(slice.to_vec())
    }
}
