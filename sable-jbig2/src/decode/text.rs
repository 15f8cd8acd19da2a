//! Text region decoding (T.88, 6.4).
//!
//! "This procedure decodes a text region. A text region is a region
//! containing text; it is decoded with the aid of a symbol dictionary."
//! (6.4.1)
//!
//! Symbol instances are placed strip by strip: each strip carries a T
//! coordinate, instances within it advance along the S axis, and each
//! instance names a symbol (optionally refined against itself) that is
//! composed onto the region at a corner-dependent position.

use crate::bitstream::Bitstream;
use crate::decode::generic_refinement::RefinementRegionDecoder;
use crate::error::{DecodeError, Result, bail};
use crate::huffman_table::{HuffmanCode, HuffmanTable};
use crate::image::{ComposeOp, Image, MAX_IMAGE_SIZE};
use crate::integer_decoder::{IaidDecoder, IntegerDecoder};
use crate::{ArithContext, ArithDecoder};

/// "REFCORNER" - which corner of a symbol instance the S/T coordinates
/// address (6.4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Corner {
    BottomLeft,
    TopLeft,
    BottomRight,
    TopRight,
}

impl Corner {
    pub(crate) fn from_bits(bits: u8) -> Corner {
        match bits & 0x03 {
            0 => Corner::BottomLeft,
            1 => Corner::TopLeft,
            2 => Corner::BottomRight,
            _ => Corner::TopRight,
        }
    }
}

/// The arithmetic integer decoders shared by one text region decode, and
/// reused across aggregation passes inside a symbol dictionary.
pub(crate) struct IntDecoderState {
    pub(crate) iadt: IntegerDecoder,
    pub(crate) iafs: IntegerDecoder,
    pub(crate) iads: IntegerDecoder,
    pub(crate) iait: IntegerDecoder,
    pub(crate) iari: IntegerDecoder,
    pub(crate) iardw: IntegerDecoder,
    pub(crate) iardh: IntegerDecoder,
    pub(crate) iardx: IntegerDecoder,
    pub(crate) iardy: IntegerDecoder,
    pub(crate) iaid: IaidDecoder,
}

impl IntDecoderState {
    pub(crate) fn new(sym_code_len: u32) -> Self {
        Self {
            iadt: IntegerDecoder::new(),
            iafs: IntegerDecoder::new(),
            iads: IntegerDecoder::new(),
            iait: IntegerDecoder::new(),
            iari: IntegerDecoder::new(),
            iardw: IntegerDecoder::new(),
            iardh: IntegerDecoder::new(),
            iardx: IntegerDecoder::new(),
            iardy: IntegerDecoder::new(),
            iaid: IaidDecoder::new(sym_code_len),
        }
    }
}

/// The Huffman tables selected for one text region (7.4.3.1.6).
pub(crate) struct TextRegionTables<'a> {
    pub(crate) first_s: &'a HuffmanTable,
    pub(crate) delta_s: &'a HuffmanTable,
    pub(crate) delta_t: &'a HuffmanTable,
    pub(crate) refinement_dw: &'a HuffmanTable,
    pub(crate) refinement_dh: &'a HuffmanTable,
    pub(crate) refinement_dx: &'a HuffmanTable,
    pub(crate) refinement_dy: &'a HuffmanTable,
    pub(crate) refinement_size: &'a HuffmanTable,
}

/// Parameters of one text region decode.
pub(crate) struct TextRegionDecoder<'a> {
    /// "SBHUFF" / "SBREFINE" / "SBRTEMPLATE".
    pub(crate) huffman: bool,
    pub(crate) refine: bool,
    pub(crate) refinement_template: bool,
    /// "TRANSPOSED".
    pub(crate) transposed: bool,
    /// "SBDEFPIXEL".
    pub(crate) def_pixel: bool,
    /// "SBDSOFFSET" - in [-16, 15].
    pub(crate) ds_offset: i8,
    /// "SBSYMCODELEN".
    pub(crate) sym_code_len: u32,
    /// "SBW" / "SBH".
    pub(crate) width: u32,
    pub(crate) height: u32,
    /// "SBNUMINSTANCES".
    pub(crate) num_instances: u32,
    /// "SBSTRIPS" - 1, 2, 4 or 8.
    pub(crate) strips: u32,
    /// "SBSYMS". Symbols with zero width or height are absent; selecting
    /// one is an error.
    pub(crate) symbols: Vec<Option<&'a Image<'static>>>,
    /// "SBSYMCODES" - the run-coded symbol-ID table (Huffman mode).
    pub(crate) sym_codes: Vec<HuffmanCode>,
    /// "SBCOMBOP" / "REFCORNER".
    pub(crate) comb_op: ComposeOp,
    pub(crate) ref_corner: Corner,
    /// The selected Huffman tables; absent in arithmetic mode.
    pub(crate) tables: Option<TextRegionTables<'a>>,
    /// "SBRAT" - refinement adaptive pixel offsets, x/y interleaved.
    pub(crate) refinement_at: [i32; 4],
}

/// The entropy coder driving one text region decode.
enum Coder<'c, 'd> {
    Huffman(&'c mut Bitstream<'d>),
    Arith {
        decoder: &'c mut ArithDecoder<'d>,
        ids: &'c mut IntDecoderState,
    },
}

impl<'a> TextRegionDecoder<'a> {
    /// Decode a Huffman-coded text region (6.4, SBHUFF = 1).
    pub(crate) fn decode_huffman(
        &self,
        stream: &mut Bitstream<'_>,
        gr_contexts: &mut [ArithContext],
    ) -> Result<Image<'static>> {
        if self.tables.is_none() {
            bail!(DecodeError::MissingReference);
        }
        self.decode_with(&mut Coder::Huffman(stream), gr_contexts)
    }

    /// Decode an arithmetically coded text region (6.4, SBHUFF = 0).
    pub(crate) fn decode_arith(
        &self,
        decoder: &mut ArithDecoder<'_>,
        ids: &mut IntDecoderState,
        gr_contexts: &mut [ArithContext],
    ) -> Result<Image<'static>> {
        // The shared IAID decoder only carries over between invocations
        // with the same code length; otherwise it starts fresh.
        if ids.iaid.code_len() != self.sym_code_len {
            ids.iaid = IaidDecoder::new(self.sym_code_len);
        }
        self.decode_with(&mut Coder::Arith { decoder, ids }, gr_contexts)
    }

    fn decode_with(
        &self,
        coder: &mut Coder<'_, '_>,
        gr_contexts: &mut [ArithContext],
    ) -> Result<Image<'static>> {
        let mut region =
            Image::new(self.width, self.height).ok_or(DecodeError::DimensionOverflow)?;
        region.fill(self.def_pixel);

        // "Decode the initial STRIPT value ... Negate the decoded value
        // and assign the negated value to STRIPT." (6.4.5, step 1)
        let stript = self
            .read_strip_delta_t(coder)?
            .ok_or(DecodeError::DecodeInconsistency)?;
        let mut strip_t = -(stript as i64);
        let mut first_s: i64 = 0;
        let mut instances: u32 = 0;

        while instances < self.num_instances {
            // "b) Decode the strip's delta T ... STRIPT = STRIPT + DT"
            let dt = self
                .read_strip_delta_t(coder)?
                .ok_or(DecodeError::DecodeInconsistency)?;
            strip_t += dt as i64;

            let mut cur_s: i64 = 0;
            let mut first_symbol = true;

            loop {
                if first_symbol {
                    // "i) ... FIRSTS = FIRSTS + DFS; CURS = FIRSTS"
                    let dfs = self
                        .read_first_s(coder)?
                        .ok_or(DecodeError::DecodeInconsistency)?;
                    first_s += dfs as i64;
                    cur_s = first_s;
                    first_symbol = false;
                } else {
                    // "ii) ... If the result of this decoding is OOB then
                    // the last symbol instance of the strip has been
                    // decoded."
                    let Some(ds) = self.read_delta_s(coder)? else {
                        break;
                    };
                    cur_s += ds as i64 + self.ds_offset as i64;
                }
                if instances >= self.num_instances {
                    break;
                }

                // "iii) Decode the symbol instance's T coordinate."
                let cur_t = if self.strips == 1 {
                    0
                } else {
                    self.read_symbol_t(coder)?
                };
                let t = strip_t + cur_t as i64;
                if !(-(1_i64 << 30)..=(1_i64 << 30)).contains(&t) {
                    bail!(DecodeError::DecodeInconsistency);
                }

                // "iv) Decode the symbol instance's symbol ID."
                let symbol_id = self.read_symbol_id(coder)?;
                if symbol_id >= self.symbols.len() as u32 {
                    bail!(DecodeError::DecodeInconsistency);
                }

                let glyph = self.symbols[symbol_id as usize]
                    .ok_or(DecodeError::DecodeInconsistency)?;

                // "v) Determine the symbol instance's bitmap." Refinement
                // replaces the glyph with a freshly decoded bitmap.
                let refined = if self.refine && self.read_refinement_flag(coder)? != 0 {
                    Some(self.decode_refined_instance(coder, gr_contexts, glyph)?)
                } else {
                    None
                };
                let glyph: &Image<'_> = refined.as_ref().unwrap_or(glyph);

                let glyph_w = glyph.width() as i64;
                let glyph_h = glyph.height() as i64;

                // "vi) Update CURS" for trailing-edge corners before the
                // draw, per Table 24.
                if !self.transposed
                    && matches!(self.ref_corner, Corner::TopRight | Corner::BottomRight)
                {
                    cur_s += glyph_w - 1;
                } else if self.transposed
                    && matches!(self.ref_corner, Corner::BottomLeft | Corner::BottomRight)
                {
                    cur_s += glyph_h - 1;
                }

                let (x, y, advance) = self.placement(cur_s, t, glyph_w, glyph_h);
                glyph.compose_to(&mut region, x, y, self.comb_op);
                cur_s += advance;

                instances += 1;
            }
        }

        Ok(region)
    }

    /// The destination of a glyph's upper-left pixel and the post-draw
    /// advance of CURS, per the corner/transposition table (6.4.5).
    fn placement(&self, s: i64, t: i64, w: i64, h: i64) -> (i64, i64, i64) {
        if !self.transposed {
            match self.ref_corner {
                Corner::TopLeft => (s, t, w - 1),
                Corner::TopRight => (s - w + 1, t, 0),
                Corner::BottomLeft => (s, t - h + 1, w - 1),
                Corner::BottomRight => (s - w + 1, t - h + 1, 0),
            }
        } else {
            match self.ref_corner {
                Corner::TopLeft => (t, s, h - 1),
                Corner::TopRight => (t - w + 1, s, h - 1),
                Corner::BottomLeft => (t, s - h + 1, 0),
                Corner::BottomRight => (t - w + 1, s - h + 1, 0),
            }
        }
    }

    /// Decode the refined bitmap for one symbol instance (6.4.11).
    fn decode_refined_instance(
        &self,
        coder: &mut Coder<'_, '_>,
        gr_contexts: &mut [ArithContext],
        glyph: &Image<'static>,
    ) -> Result<Image<'static>> {
        let (rdw, rdh, rdx, rdy) = match coder {
            Coder::Huffman(stream) => {
                let tables = self.tables.as_ref().ok_or(DecodeError::MissingReference)?;
                let mut read = |table: &HuffmanTable| -> Result<i32> {
                    let value = table
                        .decode(stream)?
                        .ok_or(DecodeError::DecodeInconsistency)?;
                    i32::try_from(value).map_err(|_| DecodeError::DecodeInconsistency)
                };
                (
                    read(tables.refinement_dw)?,
                    read(tables.refinement_dh)?,
                    read(tables.refinement_dx)?,
                    read(tables.refinement_dy)?,
                )
            }
            Coder::Arith { decoder, ids } => (
                ids.iardw
                    .decode(decoder)?
                    .ok_or(DecodeError::DecodeInconsistency)?,
                ids.iardh
                    .decode(decoder)?
                    .ok_or(DecodeError::DecodeInconsistency)?,
                ids.iardx
                    .decode(decoder)?
                    .ok_or(DecodeError::DecodeInconsistency)?,
                ids.iardy
                    .decode(decoder)?
                    .ok_or(DecodeError::DecodeInconsistency)?,
            ),
        };

        let width = checked_dimension(glyph.width(), rdw)?;
        let height = checked_dimension(glyph.height(), rdh)?;
        let reference_dx = checked_reference_offset(rdw, rdx)?;
        let reference_dy = checked_reference_offset(rdh, rdy)?;

        let mut refinement = RefinementRegionDecoder::new();
        refinement.template = self.refinement_template;
        refinement.tpgron = false;
        refinement.width = width;
        refinement.height = height;
        refinement.reference_dx = reference_dx;
        refinement.reference_dy = reference_dy;
        refinement.grat = self.refinement_at;

        match coder {
            Coder::Arith { decoder, .. } => refinement.decode(decoder, gr_contexts, glyph),
            Coder::Huffman(stream) => {
                // "Decode the size in bytes of the refinement data using
                // the SBHUFFRSIZE table, then skip to a byte boundary."
                // (6.4.11)
                let tables = self.tables.as_ref().ok_or(DecodeError::MissingReference)?;
                let rsize = tables
                    .refinement_size
                    .decode(stream)?
                    .ok_or(DecodeError::DecodeInconsistency)?;
                if rsize < 0 {
                    bail!(DecodeError::DecodeInconsistency);
                }
                stream.align_to_byte();
                let start = stream.offset();

                let mut decoder = ArithDecoder::new(stream);
                let refined = refinement.decode(&mut decoder, gr_contexts, glyph)?;

                stream.set_offset(decoder.offset());
                stream.align_to_byte();
                stream.add_offset(2);
                if rsize as usize != stream.offset() - start {
                    bail!(DecodeError::DecodeInconsistency);
                }
                Ok(refined)
            }
        }
    }

    fn read_strip_delta_t(&self, coder: &mut Coder<'_, '_>) -> Result<Option<i32>> {
        let value = match coder {
            Coder::Huffman(stream) => {
                let tables = self.tables.as_ref().ok_or(DecodeError::MissingReference)?;
                tables.delta_t.decode(stream)?.map(|v| v as i32)
            }
            Coder::Arith { decoder, ids } => ids.iadt.decode(decoder)?,
        };
        // "DT ... multiply by SBSTRIPS" (6.4.6).
        Ok(value.map(|v| v.saturating_mul(self.strips as i32)))
    }

    fn read_first_s(&self, coder: &mut Coder<'_, '_>) -> Result<Option<i32>> {
        match coder {
            Coder::Huffman(stream) => {
                let tables = self.tables.as_ref().ok_or(DecodeError::MissingReference)?;
                Ok(tables.first_s.decode(stream)?.map(|v| v as i32))
            }
            Coder::Arith { decoder, ids } => ids.iafs.decode(decoder),
        }
    }

    fn read_delta_s(&self, coder: &mut Coder<'_, '_>) -> Result<Option<i32>> {
        match coder {
            Coder::Huffman(stream) => {
                let tables = self.tables.as_ref().ok_or(DecodeError::MissingReference)?;
                Ok(tables.delta_s.decode(stream)?.map(|v| v as i32))
            }
            Coder::Arith { decoder, ids } => ids.iads.decode(decoder),
        }
    }

    /// "If SBSTRIPS > 1, decode the instance's T coordinate: as a
    /// log2(SBSTRIPS)-bit value if SBHUFF is 1, or using the IAIT
    /// procedure otherwise." (6.4.9)
    fn read_symbol_t(&self, coder: &mut Coder<'_, '_>) -> Result<i32> {
        match coder {
            Coder::Huffman(stream) => {
                let bits = self.strips.trailing_zeros();
                stream
                    .read_bits(bits)
                    .map(|v| v as i32)
                    .ok_or(DecodeError::TruncatedInput)
            }
            Coder::Arith { decoder, ids } => ids
                .iait
                .decode(decoder)?
                .ok_or(DecodeError::DecodeInconsistency),
        }
    }

    /// "Decode the symbol instance's symbol ID: using the symbol ID code
    /// table if SBHUFF is 1, or the IAID procedure otherwise." (6.4.10)
    fn read_symbol_id(&self, coder: &mut Coder<'_, '_>) -> Result<u32> {
        match coder {
            Coder::Huffman(stream) => {
                let mut code: u32 = 0;
                let mut bits: u32 = 0;
                loop {
                    code = (code << 1) | stream.read_bit().ok_or(DecodeError::TruncatedInput)?;
                    bits += 1;
                    if bits > 32 {
                        bail!(DecodeError::DecodeInconsistency);
                    }
                    for (id, entry) in self.sym_codes.iter().enumerate() {
                        if entry.code_len == bits && entry.code == code {
                            return Ok(id as u32);
                        }
                    }
                }
            }
            Coder::Arith { decoder, ids } => ids.iaid.decode(decoder),
        }
    }

    /// "R_I" - whether this instance refines its symbol: one raw bit if
    /// SBHUFF is 1, the IARI procedure otherwise (6.4.11).
    fn read_refinement_flag(&self, coder: &mut Coder<'_, '_>) -> Result<u32> {
        match coder {
            Coder::Huffman(stream) => stream.read_bit().ok_or(DecodeError::TruncatedInput),
            Coder::Arith { decoder, ids } => ids
                .iari
                .decode(decoder)?
                .map(|v| v as u32)
                .ok_or(DecodeError::DecodeInconsistency),
        }
    }

}

/// A refined dimension must stay within the 16-bit image bound.
pub(crate) fn checked_dimension(base: u32, delta: i32) -> Result<u32> {
    let value = base as i64 + delta as i64;
    if !(0..=MAX_IMAGE_SIZE as i64).contains(&value) {
        bail!(DecodeError::DimensionOverflow);
    }
    Ok(value as u32)
}

/// A refinement reference offset is `floor(delta / 2) + offset`, bounded
/// to +-2^30.
pub(crate) fn checked_reference_offset(delta: i32, offset: i32) -> Result<i32> {
    let value = offset as i64 + (delta >> 1) as i64;
    if !(-(1_i64 << 30)..=(1_i64 << 30)).contains(&value) {
        bail!(DecodeError::DecodeInconsistency);
    }
    Ok(value as i32)
}

/// Decode the run-coded symbol-ID code lengths (7.4.3.1.7) and assign
/// canonical codes.
///
/// Thirty-five 4-bit run-code lengths are read first; the run codes then
/// produce one code length per symbol: 0-31 set the length directly, 32
/// repeats the previous length 3-6 times, 33 writes 3-10 zero lengths and
/// 34 writes 11-138 zero lengths.
pub(crate) fn decode_symbol_id_codes(
    stream: &mut Bitstream<'_>,
    num_syms: u32,
) -> Result<Vec<HuffmanCode>> {
    const RUN_CODES: usize = 35;

    let mut run_codes = [HuffmanCode::default(); RUN_CODES];
    for code in &mut run_codes {
        code.code_len = stream.read_bits(4).ok_or(DecodeError::TruncatedInput)?;
    }
    crate::huffman_table::assign_bare_codes(&mut run_codes)?;

    let mut codes = vec![HuffmanCode::default(); num_syms as usize];
    let mut index = 0_usize;
    while index < num_syms as usize {
        // Match the next run code by accumulating bits.
        let mut value: u32 = 0;
        let mut bits: u32 = 0;
        let run_code = loop {
            value = (value << 1) | stream.read_bit().ok_or(DecodeError::TruncatedInput)?;
            bits += 1;
            if bits > 32 {
                bail!(DecodeError::DecodeInconsistency);
            }
            if let Some(pos) = run_codes
                .iter()
                .position(|c| c.code_len == bits && c.code == value)
            {
                break pos;
            }
        };

        match run_code {
            0..32 => {
                codes[index].code_len = run_code as u32;
                index += 1;
            }
            32 => {
                let extra = stream.read_bits(2).ok_or(DecodeError::TruncatedInput)?;
                let run = extra as usize + 3;
                if index == 0 || index + run > num_syms as usize {
                    bail!(DecodeError::DecodeInconsistency);
                }
                let previous = codes[index - 1].code_len;
                for code in &mut codes[index..index + run] {
                    code.code_len = previous;
                }
                index += run;
            }
            33 | 34 => {
                let run = if run_code == 33 {
                    stream.read_bits(3).ok_or(DecodeError::TruncatedInput)? as usize + 3
                } else {
                    stream.read_bits(7).ok_or(DecodeError::TruncatedInput)? as usize + 11
                };
                if index + run > num_syms as usize {
                    bail!(DecodeError::DecodeInconsistency);
                }
                index += run;
            }
            _ => bail!(DecodeError::DecodeInconsistency),
        }
    }

    crate::huffman_table::assign_bare_codes(&mut codes)?;
    Ok(codes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder_with_corner(transposed: bool, corner: Corner) -> TextRegionDecoder<'static> {
        TextRegionDecoder {
            huffman: false,
            refine: false,
            refinement_template: false,
            transposed,
            def_pixel: false,
            ds_offset: 0,
            sym_code_len: 0,
            width: 1,
            height: 1,
            num_instances: 0,
            strips: 1,
            symbols: Vec::new(),
            sym_codes: Vec::new(),
            comb_op: ComposeOp::Or,
            ref_corner: corner,
            tables: None,
            refinement_at: [0; 4],
        }
    }

    #[test]
    fn placement_follows_the_corner_table() {
        // (transposed, corner) -> (x, y, advance) for s=10, t=20, w=4, h=3.
        let cases = [
            (false, Corner::TopLeft, (10, 20, 3)),
            (false, Corner::TopRight, (7, 20, 0)),
            (false, Corner::BottomLeft, (10, 18, 3)),
            (false, Corner::BottomRight, (7, 18, 0)),
            (true, Corner::TopLeft, (20, 10, 2)),
            (true, Corner::TopRight, (17, 10, 2)),
            (true, Corner::BottomLeft, (20, 8, 0)),
            (true, Corner::BottomRight, (17, 8, 0)),
        ];
        for (transposed, corner, expected) in cases {
            let decoder = decoder_with_corner(transposed, corner);
            assert_eq!(
                decoder.placement(10, 20, 4, 3),
                expected,
                "transposed={transposed}, corner={corner:?}"
            );
        }
    }

    #[test]
    fn refined_dimensions_are_bounded() {
        assert_eq!(checked_dimension(10, -3).unwrap(), 7);
        assert!(checked_dimension(10, -11).is_err());
        assert!(checked_dimension(65535, 1).is_err());
        // floor(delta / 2) for negative deltas.
        assert_eq!(checked_reference_offset(-3, 0).unwrap(), -2);
        assert_eq!(checked_reference_offset(5, 1).unwrap(), 3);
    }

    #[test]
    fn symbol_id_code_lengths_from_run_codes() {
        // Run-code table: only run code 1 usable, with a 1-bit code. Three
        // symbols then each get code length 1 ... except only two may: use
        // two symbols of length 1, decoded as "0" and "1".
        let mut bits = Vec::new();
        for i in 0..35 {
            bits.push(if i == 1 { 1_u8 } else { 0 });
        }
        // 35 x 4-bit lengths, then two "length 1" run codes (one bit each,
        // code 0 after canonical assignment).
        let mut data = Vec::new();
        let mut acc = 0_u32;
        let mut count = 0_u32;
        for &len in &bits {
            acc = (acc << 4) | len as u32;
            count += 4;
            while count >= 8 {
                data.push((acc >> (count - 8)) as u8);
                count -= 8;
            }
        }
        // Two run codes "0" "0" and padding.
        acc = acc << 2;
        count += 2;
        while count % 8 != 0 {
            acc <<= 1;
            count += 1;
        }
        while count >= 8 {
            data.push((acc >> (count - 8)) as u8);
            count -= 8;
        }

        let mut stream = Bitstream::new(&data, 0);
        let codes = decode_symbol_id_codes(&mut stream, 2).unwrap();
        assert_eq!(codes.len(), 2);
        assert_eq!(codes[0].code_len, 1);
        assert_eq!(codes[1].code_len, 1);
        assert_eq!(codes[0].code, 0);
        assert_eq!(codes[1].code, 1);
    }
}
