//! The optional JBIG2 file header (T.88, Annex D.4).
//!
//! Streams extracted from containers start directly with segments; stand
//! alone files carry an eight-byte signature, a flag byte, and (when the
//! page count is known) a four-byte page count. Decoding always operates
//! on the raw segment bytes, so the header is recognised and stripped
//! here.

use crate::error::{DecodeError, Result, bail};

/// "This is an 8-byte sequence containing 0x97 0x4A 0x42 0x32 0x0D 0x0A
/// 0x1A 0x0A." (D.4.1)
const FILE_SIGNATURE: [u8; 8] = [0x97, 0x4A, 0x42, 0x32, 0x0D, 0x0A, 0x1A, 0x0A];

/// Parsed file header fields.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FileHeader {
    /// The file header flag byte (D.4.2).
    pub(crate) flags: u8,
    /// "Number of pages" (D.4.3); absent when bit 1 of the flags is set.
    pub(crate) num_pages: Option<u32>,
}

/// Strip the file header from `data` if one is present.
///
/// Returns the remaining segment bytes and the parsed header. Data that
/// does not start with the signature passes through untouched.
pub(crate) fn strip_file_header(data: &[u8]) -> Result<(&[u8], Option<FileHeader>)> {
    if data.len() < FILE_SIGNATURE.len() || data[..FILE_SIGNATURE.len()] != FILE_SIGNATURE {
        return Ok((data, None));
    }

    let Some(&flags) = data.get(FILE_SIGNATURE.len()) else {
        bail!(DecodeError::TruncatedInput);
    };
    let mut offset = FILE_SIGNATURE.len() + 1;

    // "Bit 1: Unknown number of pages." When clear, a four-byte page
    // count follows. (D.4.2, D.4.3)
    let num_pages = if flags & 0x02 == 0 {
        let bytes = data
            .get(offset..offset + 4)
            .ok_or(DecodeError::TruncatedInput)?;
        offset += 4;
        Some(u32::from_be_bytes(bytes.try_into().unwrap_or_default()))
    } else {
        None
    };

    Ok((&data[offset..], Some(FileHeader { flags, num_pages })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_with_page_count_is_stripped() {
        let data = [
            0x97, 0x4A, 0x42, 0x32, 0x0D, 0x0A, 0x1A, 0x0A, // signature
            0x01, // flags: sequential, known page count
            0x00, 0x00, 0x00, 0x02, // two pages
            0xAB, 0xCD, // segment bytes
        ];
        let (rest, header) = strip_file_header(&data).unwrap();
        let header = header.unwrap();
        assert_eq!(header.flags, 0x01);
        assert_eq!(header.num_pages, Some(2));
        assert_eq!(rest, &[0xAB, 0xCD]);
    }

    #[test]
    fn unknown_page_count_skips_the_count_field() {
        let data = [
            0x97, 0x4A, 0x42, 0x32, 0x0D, 0x0A, 0x1A, 0x0A, 0x03, 0x11,
        ];
        let (rest, header) = strip_file_header(&data).unwrap();
        assert_eq!(header.unwrap().num_pages, None);
        assert_eq!(rest, &[0x11]);
    }

    #[test]
    fn raw_segment_streams_pass_through() {
        let data = [0x00, 0x00, 0x00, 0x01, 0x30];
        let (rest, header) = strip_file_header(&data).unwrap();
        assert!(header.is_none());
        assert_eq!(rest, &data);
    }

    #[test]
    fn truncated_headers_are_rejected() {
        let data = [0x97, 0x4A, 0x42, 0x32, 0x0D, 0x0A, 0x1A, 0x0A];
        assert_eq!(
            strip_file_header(&data).unwrap_err(),
            DecodeError::TruncatedInput
        );
        let data = [0x97, 0x4A, 0x42, 0x32, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00];
        assert_eq!(
            strip_file_header(&data).unwrap_err(),
            DecodeError::TruncatedInput
        );
    }
}
