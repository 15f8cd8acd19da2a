//! Huffman tables and the table-driven decode loop (T.88, Annex B).
//!
//! The fifteen standard tables of Annex B are built once as statics; custom
//! tables arrive inside `Tables` segments (B.2). Codes are assigned
//! canonically from the prefix lengths (B.3) and decoded by accumulating
//! bits and scanning for an exact `(length, code)` pair (B.4).

use std::sync::LazyLock;

use crate::bitstream::Bitstream;
use crate::error::{DecodeError, Result, bail};

/// One table line: an assigned prefix code plus the value range it selects.
#[derive(Debug, Clone)]
pub(crate) struct HuffmanLine {
    /// "PREFLEN" - length of the prefix code; zero marks an unused line.
    code_len: u32,
    /// The canonical code assigned to this line.
    code: u32,
    /// "RANGELEN" - number of extension bits following the prefix.
    range_len: u32,
    /// "RANGELOW" - lowest value of the line's range (highest for the
    /// below-range line).
    range_low: i32,
}

/// A Huffman table: ordered lines plus the out-of-band marker flag.
///
/// The last two lines (last three when `has_oob`) are the below-range and
/// above-range extension lines with 32 extension bits each.
#[derive(Debug, Clone)]
pub struct HuffmanTable {
    has_oob: bool,
    lines: Vec<HuffmanLine>,
}

impl HuffmanTable {
    /// Build a table from `(code_len, range_len, range_low)` triples and
    /// assign canonical codes.
    fn build(definition: &[(u32, u32, i32)], has_oob: bool) -> Result<Self> {
        let mut lines: Vec<HuffmanLine> = definition
            .iter()
            .map(|&(code_len, range_len, range_low)| HuffmanLine {
                code_len,
                code: 0,
                range_len,
                range_low,
            })
            .collect();
        assign_codes(&mut lines)?;
        Ok(Self { has_oob, lines })
    }

    /// Whether the table's final line encodes the out-of-band value.
    pub fn has_oob(&self) -> bool {
        self.has_oob
    }

    /// Parse a custom table from a `Tables` segment payload (B.2).
    pub(crate) fn from_stream(stream: &mut Bitstream<'_>) -> Result<Self> {
        let flags = stream.read_byte().ok_or(DecodeError::TruncatedInput)?;

        // "Bit 0 is HTOOB. Bits 1-3 specify HTPS - 1. Bits 4-6 specify
        // HTRS - 1." (B.2.1)
        let has_oob = flags & 0x01 != 0;
        let htps = (((flags >> 1) & 0x07) + 1) as u32;
        let htrs = (((flags >> 4) & 0x07) + 1) as u32;

        let low = stream.read_u32().ok_or(DecodeError::TruncatedInput)? as i32;
        let high = stream.read_u32().ok_or(DecodeError::TruncatedInput)? as i32;
        if low > high {
            bail!(DecodeError::InvalidSegment);
        }

        let mut definition: Vec<(u32, u32, i32)> = Vec::new();

        // "Continue reading table lines until CURRANGELOW > HTHIGH." (B.2)
        let mut cur_low = low as i64;
        loop {
            let code_len = stream.read_bits(htps).ok_or(DecodeError::TruncatedInput)?;
            let range_len = stream.read_bits(htrs).ok_or(DecodeError::TruncatedInput)?;
            if range_len >= 32 {
                bail!(DecodeError::InvalidSegment);
            }
            definition.push((code_len, range_len, cur_low as i32));

            cur_low += 1_i64 << range_len;
            if cur_low < i32::MIN as i64 || cur_low > i32::MAX as i64 {
                bail!(DecodeError::InvalidSegment);
            }
            if cur_low >= high as i64 {
                break;
            }
        }

        // The below-range line: values less than HTLOW, 32 extension bits.
        let code_len = stream.read_bits(htps).ok_or(DecodeError::TruncatedInput)?;
        if low == i32::MIN {
            bail!(DecodeError::InvalidSegment);
        }
        definition.push((code_len, 32, low - 1));

        // The above-range line: values of HTHIGH and up.
        let code_len = stream.read_bits(htps).ok_or(DecodeError::TruncatedInput)?;
        definition.push((code_len, 32, high));

        if has_oob {
            let code_len = stream.read_bits(htps).ok_or(DecodeError::TruncatedInput)?;
            definition.push((code_len, 0, 0));
        }

        Self::build(&definition, has_oob)
    }

    /// Decode one value (B.4).
    ///
    /// Bits are accumulated MSB-first until they match a line's prefix
    /// code; the line's extension bits then select the value within its
    /// range. Returns `Ok(None)` for the out-of-band line.
    pub(crate) fn decode(&self, stream: &mut Bitstream<'_>) -> Result<Option<i64>> {
        let mut code: u32 = 0;
        let mut bits: u32 = 0;

        loop {
            code = (code << 1) | stream.read_bit().ok_or(DecodeError::TruncatedInput)?;
            bits += 1;
            if bits > 32 {
                bail!(DecodeError::InvalidSegment);
            }

            for (i, line) in self.lines.iter().enumerate() {
                if line.code_len != bits || line.code != code {
                    continue;
                }

                if self.has_oob && i == self.lines.len() - 1 {
                    return Ok(None);
                }

                let extra = if line.range_len > 0 {
                    stream
                        .read_bits(line.range_len)
                        .ok_or(DecodeError::TruncatedInput)?
                } else {
                    0
                };

                // "The lower range line means that the decoded value is
                // HTLOW - 1 - HTOFFSET." (B.4)
                let value = if i == self.lines.len() - self.below_range_offset() {
                    line.range_low as i64 - extra as i64
                } else {
                    line.range_low as i64 + extra as i64
                };
                return Ok(Some(value));
            }
        }
    }

    /// Position of the below-range line, counted from the end.
    fn below_range_offset(&self) -> usize {
        if self.has_oob { 3 } else { 2 }
    }

    #[cfg(test)]
    pub(crate) fn lines(&self) -> &[HuffmanLine] {
        &self.lines
    }
}

/// Canonical prefix-code assignment (B.3).
///
/// "FIRSTCODE[CURLEN] = (FIRSTCODE[CURLEN - 1] + LENCOUNT[CURLEN - 1]) x 2"
pub(crate) fn assign_codes(lines: &mut [HuffmanLine]) -> Result<()> {
    let max_len = lines.iter().map(|line| line.code_len).max().unwrap_or(0) as usize;
    if max_len == 0 {
        return Ok(());
    }
    if max_len > 32 {
        bail!(DecodeError::InvalidSegment);
    }

    let mut len_count = vec![0_u32; max_len + 1];
    for line in lines.iter() {
        len_count[line.code_len as usize] += 1;
    }
    len_count[0] = 0;

    let mut first_code = vec![0_i64; max_len + 1];
    for len in 1..=max_len {
        let shifted = (first_code[len - 1] + len_count[len - 1] as i64) << 1;
        if shifted > u32::MAX as i64 {
            bail!(DecodeError::InvalidSegment);
        }
        first_code[len] = shifted;

        let mut cur = shifted;
        for line in lines.iter_mut() {
            if line.code_len as usize == len {
                if cur > u32::MAX as i64 {
                    bail!(DecodeError::InvalidSegment);
                }
                line.code = cur as u32;
                cur += 1;
            }
        }
    }
    Ok(())
}

/// A bare `(length, code)` pair, used by the text region's run-coded
/// symbol-ID table where values are the line indices themselves.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct HuffmanCode {
    pub(crate) code_len: u32,
    pub(crate) code: u32,
}

/// Assign canonical codes to a bare code list (same procedure as B.3).
pub(crate) fn assign_bare_codes(codes: &mut [HuffmanCode]) -> Result<()> {
    let mut lines: Vec<HuffmanLine> = codes
        .iter()
        .map(|c| HuffmanLine {
            code_len: c.code_len,
            code: 0,
            range_len: 0,
            range_low: 0,
        })
        .collect();
    assign_codes(&mut lines)?;
    for (code, line) in codes.iter_mut().zip(&lines) {
        code.code = line.code;
    }
    Ok(())
}

macro_rules! standard_table {
    ($name:ident, $oob:expr, [$(($len:expr, $range:expr, $low:expr)),+ $(,)?]) => {
        static $name: LazyLock<HuffmanTable> = LazyLock::new(|| {
            HuffmanTable::build(&[$(($len, $range, $low)),+], $oob)
                .expect("standard table definitions are well-formed")
        });
    };
}

// Annex B, Tables B.1 - B.15. Each line is (PREFLEN, RANGELEN, RANGELOW);
// a PREFLEN of zero marks a line that is never used.
standard_table!(TABLE_B1, false, [
    (1, 4, 0), (2, 8, 16), (3, 16, 272), (0, 32, -1), (3, 32, 65808),
]);
standard_table!(TABLE_B2, true, [
    (1, 0, 0), (2, 0, 1), (3, 0, 2), (4, 3, 3), (5, 6, 11), (0, 32, -1),
    (6, 32, 75), (6, 0, 0),
]);
standard_table!(TABLE_B3, true, [
    (8, 8, -256), (1, 0, 0), (2, 0, 1), (3, 0, 2), (4, 3, 3), (5, 6, 11),
    (8, 32, -257), (7, 32, 75), (6, 0, 0),
]);
standard_table!(TABLE_B4, false, [
    (1, 0, 1), (2, 0, 2), (3, 0, 3), (4, 3, 4), (5, 6, 12), (0, 32, -1),
    (5, 32, 76),
]);
standard_table!(TABLE_B5, false, [
    (7, 8, -255), (1, 0, 1), (2, 0, 2), (3, 0, 3), (4, 3, 4), (5, 6, 12),
    (7, 32, -256), (6, 32, 76),
]);
standard_table!(TABLE_B6, false, [
    (5, 10, -2048), (4, 9, -1024), (4, 8, -512), (4, 7, -256), (5, 6, -128),
    (5, 5, -64), (4, 5, -32), (2, 7, 0), (3, 7, 128), (3, 8, 256),
    (4, 9, 512), (4, 10, 1024), (6, 32, -2049), (6, 32, 2048),
]);
standard_table!(TABLE_B7, false, [
    (4, 9, -1024), (3, 8, -512), (4, 7, -256), (5, 6, -128), (5, 5, -64),
    (4, 5, -32), (4, 5, 0), (5, 5, 32), (5, 6, 64), (4, 7, 128),
    (3, 8, 256), (3, 9, 512), (3, 10, 1024), (5, 32, -1025), (5, 32, 2048),
]);
standard_table!(TABLE_B8, true, [
    (8, 3, -15), (9, 1, -7), (8, 1, -5), (9, 0, -3), (7, 0, -2), (4, 0, -1),
    (2, 1, 0), (5, 0, 2), (6, 0, 3), (3, 4, 4), (6, 1, 20), (4, 4, 22),
    (4, 5, 38), (5, 6, 70), (5, 7, 134), (6, 7, 262), (7, 8, 390),
    (6, 10, 646), (9, 32, -16), (9, 32, 1670), (2, 0, 0),
]);
standard_table!(TABLE_B9, true, [
    (8, 4, -31), (9, 2, -15), (8, 2, -11), (9, 1, -7), (7, 1, -5),
    (4, 1, -3), (3, 1, -1), (3, 1, 1), (5, 1, 3), (6, 1, 5), (3, 5, 7),
    (6, 2, 39), (4, 5, 43), (4, 6, 75), (5, 7, 139), (5, 8, 267),
    (6, 8, 523), (7, 9, 779), (6, 11, 1291), (9, 32, -32), (9, 32, 3339),
    (2, 0, 0),
]);
standard_table!(TABLE_B10, true, [
    (7, 4, -21), (8, 0, -5), (7, 0, -4), (5, 0, -3), (2, 2, -2), (5, 0, 2),
    (6, 0, 3), (7, 0, 4), (8, 0, 5), (2, 6, 6), (5, 5, 70), (6, 5, 102),
    (6, 6, 134), (6, 7, 198), (6, 8, 326), (6, 9, 582), (6, 10, 1094),
    (7, 11, 2118), (8, 32, -22), (8, 32, 4166), (2, 0, 0),
]);
standard_table!(TABLE_B11, false, [
    (1, 0, 1), (2, 1, 2), (4, 0, 4), (4, 1, 5), (5, 1, 7), (5, 2, 9),
    (6, 2, 13), (7, 2, 17), (7, 3, 21), (7, 4, 29), (7, 5, 45), (7, 6, 77),
    (0, 32, 0), (7, 32, 141),
]);
standard_table!(TABLE_B12, false, [
    (1, 0, 1), (2, 0, 2), (3, 1, 3), (5, 0, 5), (5, 1, 6), (6, 1, 8),
    (7, 0, 10), (7, 1, 11), (7, 2, 13), (7, 3, 17), (7, 4, 25), (8, 5, 41),
    (0, 32, 0), (8, 32, 73),
]);
standard_table!(TABLE_B13, false, [
    (1, 0, 1), (3, 0, 2), (4, 0, 3), (5, 0, 4), (4, 1, 5), (3, 3, 7),
    (6, 1, 15), (6, 2, 17), (6, 3, 21), (6, 4, 29), (6, 5, 45), (7, 6, 77),
    (0, 32, 0), (7, 32, 141),
]);
standard_table!(TABLE_B14, false, [
    (3, 0, -2), (3, 0, -1), (1, 0, 0), (3, 0, 1), (3, 0, 2), (0, 32, -3),
    (0, 32, 3),
]);
standard_table!(TABLE_B15, false, [
    (7, 4, -24), (6, 2, -8), (5, 1, -4), (4, 0, -2), (3, 0, -1), (1, 0, 0),
    (3, 0, 1), (4, 0, 2), (5, 1, 3), (6, 2, 5), (7, 4, 9), (7, 32, -25),
    (7, 32, 25),
]);

/// The standard table with the given Annex B number (1..=15).
pub(crate) fn standard_table(number: u32) -> Result<&'static HuffmanTable> {
    Ok(match number {
        1 => &TABLE_B1,
        2 => &TABLE_B2,
        3 => &TABLE_B3,
        4 => &TABLE_B4,
        5 => &TABLE_B5,
        6 => &TABLE_B6,
        7 => &TABLE_B7,
        8 => &TABLE_B8,
        9 => &TABLE_B9,
        10 => &TABLE_B10,
        11 => &TABLE_B11,
        12 => &TABLE_B12,
        13 => &TABLE_B13,
        14 => &TABLE_B14,
        15 => &TABLE_B15,
        _ => bail!(DecodeError::Unsupported),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_one(table: &HuffmanTable, data: &[u8]) -> Option<i64> {
        let mut stream = Bitstream::new(data, 0);
        table.decode(&mut stream).unwrap()
    }

    #[test]
    fn canonical_codes_are_distinct_and_within_kraft_bound() {
        for number in 1..=15 {
            let table = standard_table(number).unwrap();
            let used: Vec<_> = table
                .lines()
                .iter()
                .filter(|line| line.code_len > 0)
                .collect();

            for (i, a) in used.iter().enumerate() {
                for b in &used[i + 1..] {
                    assert!(
                        a.code_len != b.code_len || a.code != b.code,
                        "duplicate code in table B.{number}"
                    );
                }
            }

            let kraft: f64 = used.iter().map(|line| 2f64.powi(-(line.code_len as i32))).sum();
            assert!(kraft <= 1.0 + 1e-9, "table B.{number} exceeds the Kraft bound");
        }
    }

    #[test]
    fn table_b4_decodes_small_deltas() {
        let table = standard_table(4).unwrap();
        assert_eq!(decode_one(table, &[0b0_0000000]), Some(1));
        assert_eq!(decode_one(table, &[0b10_000000]), Some(2));
        assert_eq!(decode_one(table, &[0b110_00000]), Some(3));
        // 1110 + 3 extension bits.
        assert_eq!(decode_one(table, &[0b1110_101_0]), Some(4 + 5));
    }

    #[test]
    fn table_b2_out_of_band() {
        let table = standard_table(2).unwrap();
        assert!(table.has_oob());
        assert_eq!(decode_one(table, &[0b0_0000000]), Some(0));
        assert_eq!(decode_one(table, &[0b10_000000]), Some(1));
        assert_eq!(decode_one(table, &[0b111111_00]), None);
    }

    #[test]
    fn table_b1_range_extension() {
        let table = standard_table(1).unwrap();
        // Prefix 0 carries four extension bits.
        assert_eq!(decode_one(table, &[0b0_1111_000]), Some(15));
        // Prefix 10 carries eight.
        assert_eq!(decode_one(table, &[0b10_000000, 0b01_000000]), Some(17));
    }

    #[test]
    fn below_range_line_subtracts_extension() {
        let table = standard_table(5).unwrap();
        // B.5's below-range line has code length 7; its value is
        // -256 - extension.
        let lower = &table.lines()[6];
        assert_eq!(lower.code_len, 7);
        let mut data = Vec::new();
        let mut bits = BitSink::new();
        bits.push(lower.code, 7);
        bits.push(5, 32);
        bits.finish(&mut data);
        assert_eq!(decode_one(table, &data), Some(-256 - 5));
    }

    #[test]
    fn custom_table_worked_example() {
        // The B.2 worked example: a custom table equivalent to B.1.
        let data = [
            0x42, // flags: HTOOB=0, HTPS=2, HTRS=5
            0x00, 0x00, 0x00, 0x00, // HTLOW = 0
            0x00, 0x01, 0x01, 0x10, // HTHIGH = 65808
            0x49, 0x23, 0x81, 0x80, // table lines
        ];
        let mut stream = Bitstream::new(&data, 0);
        let table = HuffmanTable::from_stream(&mut stream).unwrap();

        assert_eq!(decode_one(&table, &[0b0_0000_000]), Some(0));
        assert_eq!(decode_one(&table, &[0b0_0111_000]), Some(7));
        assert_eq!(decode_one(&table, &[0b10_111111, 0b11_000000]), Some(271));
        assert_eq!(
            decode_one(&table, &[0b110_00000, 0x00, 0b0_0000000]),
            Some(272)
        );
        assert_eq!(
            decode_one(&table, &[0b111_00000, 0x00, 0x00, 0x00, 0b00000_000]),
            Some(65808)
        );
    }

    #[test]
    fn truncated_custom_table_reports_truncation() {
        // Flags and low bound only; the high bound is missing.
        let data = [0x42, 0x00, 0x00, 0x00, 0x00, 0x00];
        let mut stream = Bitstream::new(&data, 0);
        assert_eq!(
            HuffmanTable::from_stream(&mut stream).unwrap_err(),
            DecodeError::TruncatedInput
        );
    }

    #[test]
    fn empty_range_custom_table_parses() {
        // HTLOW = HTHIGH = 0 still carries one table line and the two
        // extension lines.
        let data = [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        let mut stream = Bitstream::new(&data, 0);
        let table = HuffmanTable::from_stream(&mut stream).unwrap();
        assert_eq!(table.lines().len(), 3);
    }

    /// MSB-first bit collector for building test inputs.
    struct BitSink {
        bits: Vec<bool>,
    }

    impl BitSink {
        fn new() -> Self {
            Self { bits: Vec::new() }
        }

        fn push(&mut self, value: u32, count: u32) {
            for i in (0..count).rev() {
                self.bits.push((value >> i) & 1 != 0);
            }
        }

        fn finish(&self, out: &mut Vec<u8>) {
            for chunk in self.bits.chunks(8) {
                let mut byte = 0_u8;
                for (i, &bit) in chunk.iter().enumerate() {
                    if bit {
                        byte |= 1 << (7 - i);
                    }
                }
                out.push(byte);
            }
        }
    }
}
