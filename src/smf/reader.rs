use crate::error::{MidiError, Result};

/// Largest value a four-byte variable-length quantity can hold.
pub(crate) const MAX_VLQ: u32 = 0x0FFF_FFFF;

/// Appends `value` as a big-endian variable-length quantity.
pub(crate) fn write_vlq(out: &mut Vec<u8>, value: u32) {
    debug_assert!(value <= MAX_VLQ);
    let mut shift = 21;
    while shift > 0 && (value >> shift) == 0 {
        shift -= 7;
    }
    while shift > 0 {
        out.push(((value >> shift) & 0x7F) as u8 | 0x80);
        shift -= 7;
    }
    out.push((value & 0x7F) as u8);
}

/// Cursor over a byte slice. Offsets in errors are absolute within the
/// whole file, so a reader over a track chunk carries the chunk's base.
pub(crate) struct Reader<'a> {
    data: &'a [u8],
    position: usize,
    base: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(data: &'a [u8], base: usize) -> Self {
        Self {
            data,
            position: 0,
            base,
        }
    }

    pub(crate) fn offset(&self) -> usize {
        self.base + self.position
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.position >= self.data.len()
    }

    pub(crate) fn read_bytes(&mut self, len: usize, what: &str) -> Result<&'a [u8]> {
        let end = self.position.checked_add(len).filter(|&end| end <= self.data.len());
        let Some(end) = end else {
            return Err(MidiError::corrupt(
                self.offset(),
                format!(
                    "{what} needs {len} bytes, only {} left",
                    self.data.len().saturating_sub(self.position)
                ),
            ));
        };
        let bytes = &self.data[self.position..end];
        self.position = end;
        Ok(bytes)
    }

    pub(crate) fn read_u8(&mut self, what: &str) -> Result<u8> {
        Ok(self.read_bytes(1, what)?[0])
    }

    pub(crate) fn read_u16(&mut self, what: &str) -> Result<u16> {
        let bytes = self.read_bytes(2, what)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub(crate) fn read_u32(&mut self, what: &str) -> Result<u32> {
        let bytes = self.read_bytes(4, what)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// At most four bytes, seven bits each, high bit set on all but the last.
    pub(crate) fn read_vlq(&mut self, what: &str) -> Result<u32> {
        let start = self.offset();
        let mut value = 0u32;
        for _ in 0..4 {
            let byte = self.read_u8(what)?;
            value = (value << 7) | u32::from(byte & 0x7F);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(MidiError::corrupt(
            start,
            format!("{what} is longer than four bytes"),
        ))
    }
}
