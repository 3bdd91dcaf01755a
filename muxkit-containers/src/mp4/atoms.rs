//! MP4 atom (box) headers and builders.

use muxkit_core::error::{Error, Result};
use std::io::{Read, Seek, SeekFrom};

/// Size of a compact atom header.
pub(crate) const HEADER_SIZE: usize = 8;

/// Atom header.
#[derive(Debug, Clone)]
pub struct AtomHeader {
    /// Atom type (4 bytes).
    pub atom_type: [u8; 4],
    /// Atom size (including header).
    pub size: u64,
    /// Header size (8 or 16 bytes).
    pub header_size: u8,
    /// Offset in file.
    pub offset: u64,
}

impl AtomHeader {
    /// Read atom header from reader.
    ///
    /// Returns `None` at a clean end of file.
    pub fn read<R: Read + Seek + ?Sized>(reader: &mut R) -> Result<Option<Self>> {
        let offset = reader.stream_position()?;

        let mut header = [0u8; 8];
        match reader.read_exact(&mut header) {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let size = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        let atom_type = [header[4], header[5], header[6], header[7]];

        let mut ext_size = None;
        if size == 1 {
            // Extended size
            let mut bytes = [0u8; 8];
            reader.read_exact(&mut bytes)?;
            ext_size = Some(u64::from_be_bytes(bytes));
        }

        let current = reader.stream_position()?;
        let stream_len = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(current))?;

        let (size, header_size) = match (size, ext_size) {
            (_, Some(ext)) => (ext, 16),
            // Size extends to end of file
            (0, None) => (stream_len.saturating_sub(offset), 8),
            (size, None) => (size as u64, 8),
        };

        let invalid = |reason: &str| {
            Error::Container(format!(
                "atom {} at offset {} has invalid size {}: {}",
                String::from_utf8_lossy(&atom_type),
                offset,
                size,
                reason
            ))
        };
        if size < header_size as u64 {
            return Err(invalid("smaller than its header"));
        }
        match offset.checked_add(size) {
            Some(end) if end <= stream_len => {}
            _ => return Err(invalid("extends past the end of the stream")),
        }

        Ok(Some(Self {
            atom_type,
            size,
            header_size,
            offset,
        }))
    }

    /// Get content size (size - header).
    pub fn content_size(&self) -> u64 {
        self.size.saturating_sub(self.header_size as u64)
    }

    /// Get content offset.
    pub fn content_offset(&self) -> u64 {
        self.offset.saturating_add(self.header_size as u64)
    }

    /// Offset of the first byte after this atom.
    pub fn end_offset(&self) -> u64 {
        self.offset.saturating_add(self.size)
    }

    /// Check if this is a container atom.
    pub fn is_container(&self) -> bool {
        matches!(
            &self.atom_type,
            b"moov" | b"trak" | b"mdia" | b"minf" | b"stbl" | b"edts" | b"dinf" | b"udta"
        )
    }
}

/// Wrap `payload` into an atom of the given type.
pub(crate) fn make_box(atom_type: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(payload.len() + HEADER_SIZE);
    result.extend_from_slice(&((payload.len() + HEADER_SIZE) as u32).to_be_bytes());
    result.extend_from_slice(atom_type);
    result.extend_from_slice(payload);
    result
}

/// Wrap `payload` into a full atom (version and 24-bit flags first).
pub(crate) fn make_full_box(atom_type: &[u8; 4], version: u8, flags: u32, payload: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(payload.len() + 4);
    data.push(version);
    data.extend_from_slice(&flags.to_be_bytes()[1..]);
    data.extend_from_slice(payload);
    make_box(atom_type, &data)
}

/// Concatenate already built atoms into a container atom.
pub(crate) fn make_container<I, B>(atom_type: &[u8; 4], children: I) -> Vec<u8>
where
    I: IntoIterator<Item = B>,
    B: AsRef<[u8]>,
{
    let mut payload = Vec::new();
    for child in children {
        payload.extend_from_slice(child.as_ref());
    }
    make_box(atom_type, &payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_make_box() {
        let atom = make_box(b"free", &[1, 2, 3]);
        assert_eq!(atom, vec![0, 0, 0, 11, b'f', b'r', b'e', b'e', 1, 2, 3]);
    }

    #[test]
    fn test_make_full_box() {
        let atom = make_full_box(b"tkhd", 0, 0x7, &[]);
        assert_eq!(atom, vec![0, 0, 0, 12, b't', b'k', b'h', b'd', 0, 0, 0, 7]);
    }

    #[test]
    fn test_read_header_compact_and_extended() {
        let mut data = make_box(b"moov", &[0u8; 4]);
        // Extended-size mdat with 4 payload bytes.
        data.extend_from_slice(&[0, 0, 0, 1]);
        data.extend_from_slice(b"mdat");
        data.extend_from_slice(&20u64.to_be_bytes());
        data.extend_from_slice(&[0u8; 4]);

        let mut cursor = Cursor::new(data);
        let moov = AtomHeader::read(&mut cursor).unwrap().unwrap();
        assert_eq!(&moov.atom_type, b"moov");
        assert!(moov.is_container());
        assert_eq!(moov.content_size(), 4);

        cursor.set_position(moov.end_offset());
        let mdat = AtomHeader::read(&mut cursor).unwrap().unwrap();
        assert_eq!(&mdat.atom_type, b"mdat");
        assert_eq!(mdat.header_size, 16);
        assert_eq!(mdat.content_offset(), 28);
        assert_eq!(mdat.content_size(), 4);

        cursor.set_position(mdat.end_offset());
        assert!(AtomHeader::read(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn test_read_header_rejects_oversized_atoms() {
        let mut data = make_box(b"ftyp", b"isom\0\0\x02\0");
        data.extend_from_slice(&[0, 0, 0, 1]);
        data.extend_from_slice(b"free");
        data.extend_from_slice(&u64::MAX.to_be_bytes());

        let mut cursor = Cursor::new(data);
        let ftyp = AtomHeader::read(&mut cursor).unwrap().unwrap();
        cursor.set_position(ftyp.end_offset());
        assert!(matches!(AtomHeader::read(&mut cursor), Err(Error::Container(_))));

        // Compact size pointing past the end of the data.
        let mut cursor = Cursor::new(vec![0, 0, 0, 64, b'm', b'o', b'o', b'v', 0, 0]);
        assert!(matches!(AtomHeader::read(&mut cursor), Err(Error::Container(_))));
    }

    #[test]
    fn test_read_header_rejects_tiny_size() {
        let mut cursor = Cursor::new(vec![0, 0, 0, 4, b'f', b'r', b'e', b'e']);
        assert!(AtomHeader::read(&mut cursor).is_err());
    }
}
