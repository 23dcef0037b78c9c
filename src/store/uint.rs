//! Unsigned integer columns sized to their largest value

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

/// Column of unsigned integers stored at the narrowest width holding its maximum
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UIntArray {
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
    U64(Vec<u64>),
}

impl Default for UIntArray {
    fn default() -> Self {
        UIntArray::U8(Vec::new())
    }
}

/// Bytes per element needed for `max`
pub fn width_for(max: u64) -> u8 {
    if max <= u8::MAX as u64 {
        1
    } else if max <= u16::MAX as u64 {
        2
    } else if max <= u32::MAX as u64 {
        4
    } else {
        8
    }
}

impl UIntArray {
    /// Two passes over `values`: the first finds the maximum, the second
    /// fills an array of the chosen width
    pub fn collect<I>(values: I) -> Self
    where
        I: Iterator<Item = u64> + Clone,
    {
        let max = values.clone().max().unwrap_or(0);
        Self::with_width(width_for(max), values)
    }

    fn with_width<I: Iterator<Item = u64>>(width: u8, values: I) -> Self {
        match width {
            1 => UIntArray::U8(values.map(|v| v as u8).collect()),
            2 => UIntArray::U16(values.map(|v| v as u16).collect()),
            4 => UIntArray::U32(values.map(|v| v as u32).collect()),
            _ => UIntArray::U64(values.collect()),
        }
    }

    pub fn from_slice(values: &[u64]) -> Self {
        Self::collect(values.iter().copied())
    }

    pub fn len(&self) -> usize {
        match self {
            UIntArray::U8(v) => v.len(),
            UIntArray::U16(v) => v.len(),
            UIntArray::U32(v) => v.len(),
            UIntArray::U64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes per element
    pub fn width(&self) -> u8 {
        match self {
            UIntArray::U8(_) => 1,
            UIntArray::U16(_) => 2,
            UIntArray::U32(_) => 4,
            UIntArray::U64(_) => 8,
        }
    }

    #[inline]
    pub fn get(&self, i: usize) -> u64 {
        match self {
            UIntArray::U8(v) => v[i] as u64,
            UIntArray::U16(v) => v[i] as u64,
            UIntArray::U32(v) => v[i] as u64,
            UIntArray::U64(v) => v[i],
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        (0..self.len()).map(move |i| self.get(i))
    }

    /// Raw bytes of an 8-bit column
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            UIntArray::U8(v) => Some(v),
            _ => None,
        }
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u8(self.width())?;
        writer.write_u64::<LittleEndian>(self.len() as u64)?;
        match self {
            UIntArray::U8(v) => writer.write_all(v)?,
            UIntArray::U16(v) => v.iter().try_for_each(|&x| writer.write_u16::<LittleEndian>(x))?,
            UIntArray::U32(v) => v.iter().try_for_each(|&x| writer.write_u32::<LittleEndian>(x))?,
            UIntArray::U64(v) => v.iter().try_for_each(|&x| writer.write_u64::<LittleEndian>(x))?,
        }
        Ok(())
    }

    /// Serialized size: width byte, length and values
    pub fn encoded_len(&self) -> u64 {
        9 + self.memory_bytes() as u64
    }

    /// Read a column, refusing lengths that need more than `available` bytes
    pub fn read_from<R: Read>(reader: &mut R, available: u64) -> io::Result<Self> {
        let width = reader.read_u8()?;
        let len = reader.read_u64::<LittleEndian>()?;
        let fits = len
            .checked_mul(width as u64)
            .map_or(false, |bytes| bytes <= available.saturating_sub(9));
        if !fits {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("column of {} values of width {} overruns the file", len, width),
            ));
        }
        let len = len as usize;
        Ok(match width {
            1 => {
                let mut v = vec![0u8; len];
                reader.read_exact(&mut v)?;
                UIntArray::U8(v)
            }
            2 => {
                let mut v = vec![0u16; len];
                reader.read_u16_into::<LittleEndian>(&mut v)?;
                UIntArray::U16(v)
            }
            4 => {
                let mut v = vec![0u32; len];
                reader.read_u32_into::<LittleEndian>(&mut v)?;
                UIntArray::U32(v)
            }
            8 => {
                let mut v = vec![0u64; len];
                reader.read_u64_into::<LittleEndian>(&mut v)?;
                UIntArray::U64(v)
            }
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unknown column width {}", other),
                ))
            }
        })
    }

    pub fn memory_bytes(&self) -> usize {
        self.len() * self.width() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_width_follows_maximum() {
        assert_eq!(UIntArray::from_slice(&[]).width(), 1);
        assert_eq!(UIntArray::from_slice(&[3, 255]).width(), 1);
        assert_eq!(UIntArray::from_slice(&[256]).width(), 2);
        assert_eq!(UIntArray::from_slice(&[1, 70_000]).width(), 4);
        assert_eq!(UIntArray::from_slice(&[u32::MAX as u64 + 1]).width(), 8);
    }

    #[test]
    fn test_write_read_wide_column() {
        let values = [0u64, 12, 65_536, 4_000_000_000];
        let column = UIntArray::from_slice(&values);
        let mut buf = Vec::new();
        column.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), 1 + 8 + 4 * 4);
        let back = UIntArray::read_from(&mut &buf[..], buf.len() as u64).unwrap();
        assert_eq!(back.encoded_len(), buf.len() as u64);
        assert_eq!(back.iter().collect::<Vec<_>>(), values.to_vec());
    }

    #[test]
    fn test_unknown_width_rejected() {
        let buf = [3u8, 0, 0, 0, 0, 0, 0, 0, 0];
        assert!(UIntArray::read_from(&mut &buf[..], 9).is_err());
    }

    #[test]
    fn test_oversized_length_rejected() {
        let mut buf = vec![8u8];
        buf.extend_from_slice(&(u64::MAX / 4).to_le_bytes());
        buf.extend_from_slice(&[0; 16]);
        let err = UIntArray::read_from(&mut &buf[..], buf.len() as u64).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        // two u64 values fit exactly
        let mut buf = vec![8u8];
        buf.extend_from_slice(&2u64.to_le_bytes());
        buf.extend_from_slice(&[0; 16]);
        assert_eq!(UIntArray::read_from(&mut &buf[..], 25).unwrap().len(), 2);
        assert!(UIntArray::read_from(&mut &buf[..], 24).is_err());
    }
}
