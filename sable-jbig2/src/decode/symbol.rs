//! Symbol dictionary decoding (T.88, 6.5).
//!
//! "This decoding procedure is used to decode a symbol dictionary. A
//! symbol dictionary consists of a set of symbols, which may be used by a
//! text region." (6.5.1)
//!
//! Symbols are decoded in height classes: the outer loop accumulates
//! height deltas, the inner loop width deltas until an OOB ends the class.
//! Each symbol is either generically coded, refined from an earlier
//! symbol, or aggregated through the text region procedure; in Huffman
//! mode without refinement a whole height class shares one collective
//! bitmap that is sliced afterwards.

use crate::bitstream::Bitstream;
use crate::decode::generic::GenericRegionDecoder;
use crate::decode::generic_refinement::RefinementRegionDecoder;
use crate::decode::text::{Corner, IntDecoderState, TextRegionDecoder, TextRegionTables};
use crate::error::{DecodeError, Result, bail};
use crate::huffman_table::{HuffmanCode, HuffmanTable, standard_table};
use crate::image::{ComposeOp, Image, MAX_IMAGE_SIZE};
use crate::integer_decoder::IntegerDecoder;
use crate::{ArithContext, ArithDecoder};

/// "The maximum number of symbols exported from a dictionary."
pub(crate) const MAX_EXPORT_SYMBOLS: u32 = 65535;
/// "The maximum number of newly decoded symbols."
pub(crate) const MAX_NEW_SYMBOLS: u32 = 65535;

/// A decoded symbol dictionary: the exported symbol bitmaps, plus the
/// arithmetic context arrays when the producing segment asked for them to
/// be retained.
#[derive(Debug, Default)]
pub struct SymbolDictionary {
    symbols: Vec<Option<Image<'static>>>,
    gb_contexts: Vec<ArithContext>,
    gr_contexts: Vec<ArithContext>,
}

impl SymbolDictionary {
    /// The number of exported symbols.
    pub fn num_symbols(&self) -> usize {
        self.symbols.len()
    }

    /// The exported symbol at `index`; `None` for indices out of range and
    /// for symbols with zero area.
    pub fn symbol(&self, index: usize) -> Option<&Image<'static>> {
        self.symbols.get(index)?.as_ref()
    }

    pub(crate) fn symbol_slots(&self) -> &[Option<Image<'static>>] {
        &self.symbols
    }

    /// Duplicate the dictionary, including its bitmaps, so the copy cannot
    /// be mutated through aliases.
    pub(crate) fn deep_copy(&self) -> SymbolDictionary {
        SymbolDictionary {
            symbols: self
                .symbols
                .iter()
                .map(|slot| slot.as_ref().map(Image::duplicate))
                .collect(),
            gb_contexts: self.gb_contexts.clone(),
            gr_contexts: self.gr_contexts.clone(),
        }
    }

    pub(crate) fn set_gb_contexts(&mut self, contexts: &[ArithContext]) {
        self.gb_contexts = contexts.to_vec();
    }

    pub(crate) fn set_gr_contexts(&mut self, contexts: &[ArithContext]) {
        self.gr_contexts = contexts.to_vec();
    }

    pub(crate) fn gb_contexts(&self) -> &[ArithContext] {
        &self.gb_contexts
    }

    pub(crate) fn gr_contexts(&self) -> &[ArithContext] {
        &self.gr_contexts
    }

    #[cfg(test)]
    pub(crate) fn from_symbols(symbols: Vec<Option<Image<'static>>>) -> SymbolDictionary {
        SymbolDictionary {
            symbols,
            ..SymbolDictionary::default()
        }
    }

    #[cfg(test)]
    pub(crate) fn symbol_mut(&mut self, index: usize) -> Option<&mut Image<'static>> {
        self.symbols.get_mut(index)?.as_mut()
    }
}

/// The Huffman tables selected for one symbol dictionary (7.4.2.1.6).
pub(crate) struct SymbolDictionaryTables<'a> {
    /// "SDHUFFDH" / "SDHUFFDW" / "SDHUFFBMSIZE" / "SDHUFFAGGINST".
    pub(crate) delta_height: &'a HuffmanTable,
    pub(crate) delta_width: &'a HuffmanTable,
    pub(crate) bitmap_size: &'a HuffmanTable,
    pub(crate) aggregate_instances: &'a HuffmanTable,
}

/// Parameters of one symbol dictionary decode.
pub(crate) struct SymbolDictionaryDecoder<'a> {
    /// "SDHUFF" / "SDREFAGG" / "SDTEMPLATE" / "SDRTEMPLATE".
    pub(crate) huffman: bool,
    pub(crate) refagg: bool,
    pub(crate) template: u8,
    pub(crate) refinement_template: bool,
    /// "SDNUMNEWSYMS" / "SDNUMEXSYMS".
    pub(crate) num_new_syms: u32,
    pub(crate) num_ex_syms: u32,
    /// "SDINSYMS" - the concatenated input dictionaries.
    pub(crate) in_syms: Vec<Option<&'a Image<'static>>>,
    /// The Huffman tables; absent in arithmetic mode.
    pub(crate) tables: Option<SymbolDictionaryTables<'a>>,
    /// "SDAT" / "SDRAT" - adaptive pixel offsets, x/y interleaved.
    pub(crate) at: [i32; 8],
    pub(crate) refinement_at: [i32; 4],
}

impl<'a> SymbolDictionaryDecoder<'a> {
    /// Decode the dictionary with arithmetic coding (6.5.5, SDHUFF = 0).
    pub(crate) fn decode_arith(
        &self,
        decoder: &mut ArithDecoder<'_>,
        gb_contexts: &mut [ArithContext],
        gr_contexts: &mut [ArithContext],
    ) -> Result<SymbolDictionary> {
        let num_in = self.in_syms.len() as u32;
        let total = num_in + self.num_new_syms;
        let mut new_symbols: Vec<Option<Image<'static>>> =
            (0..self.num_new_syms).map(|_| None).collect();

        let mut iadh = IntegerDecoder::new();
        let mut iadw = IntegerDecoder::new();
        let mut iaai = IntegerDecoder::new();
        let mut iaex = IntegerDecoder::new();
        let mut ids = IntDecoderState::new(symbol_code_length(total));

        // "HCHEIGHT = 0; NSYMSDECODED = 0" (6.5.5, step 3)
        let mut height: u32 = 0;
        let mut decoded: u32 = 0;

        while decoded < self.num_new_syms {
            // "Decode the height class delta height ... HCHEIGHT =
            // HCHEIGHT + HCDH" (6.5.5, step 4b)
            let delta = iadh
                .decode(decoder)?
                .ok_or(DecodeError::DecodeInconsistency)?;
            height = checked_symbol_dimension(height, delta)?;

            // "SYMWIDTH = 0" (6.5.5, step 4c)
            let mut width: u32 = 0;
            loop {
                // "If the result of this decoding is OOB then all the
                // symbols in this height class have been decoded."
                let Some(delta) = iadw.decode(decoder)? else {
                    break;
                };
                if decoded >= self.num_new_syms {
                    bail!(DecodeError::DecodeInconsistency);
                }
                width = checked_symbol_dimension(width, delta)?;

                let symbol = if height == 0 || width == 0 {
                    None
                } else if !self.refagg {
                    // "Decode the symbol's bitmap using a generic region
                    // decoding procedure" (6.5.8.1)
                    let mut generic = GenericRegionDecoder::new();
                    generic.template = self.template;
                    generic.tpgdon = false;
                    generic.use_skip = false;
                    generic.width = width;
                    generic.height = height;
                    generic.at = self.at;
                    Some(generic.decode_arith(decoder, gb_contexts)?)
                } else {
                    // "Decode the number of symbol instances contained in
                    // the aggregation" (6.5.8.2.1)
                    let instances = iaai
                        .decode(decoder)?
                        .ok_or(DecodeError::DecodeInconsistency)?;
                    if instances < 0 {
                        bail!(DecodeError::DecodeInconsistency);
                    }

                    if instances > 1 {
                        Some(self.decode_aggregate_arith(
                            decoder,
                            gr_contexts,
                            &mut ids,
                            &new_symbols,
                            width,
                            height,
                            decoded,
                            instances as u32,
                        )?)
                    } else {
                        Some(self.decode_refined_arith(
                            decoder,
                            gr_contexts,
                            &mut ids,
                            &new_symbols,
                            width,
                            height,
                            decoded,
                        )?)
                    }
                };

                new_symbols[decoded as usize] = symbol;
                decoded += 1;
            }
        }

        let flags = self.decode_export_flags(total, || {
            iaex.decode(decoder).map(|value| value.map(i64::from))
        })?;
        self.build_exported(new_symbols, &flags)
    }

    /// Decode the dictionary with Huffman coding (6.5.5, SDHUFF = 1).
    pub(crate) fn decode_huffman(
        &self,
        stream: &mut Bitstream<'_>,
        gr_contexts: &mut [ArithContext],
    ) -> Result<SymbolDictionary> {
        let tables = self.tables.as_ref().ok_or(DecodeError::MissingReference)?;
        let num_in = self.in_syms.len() as u32;
        let total = num_in + self.num_new_syms;
        let mut new_symbols: Vec<Option<Image<'static>>> =
            (0..self.num_new_syms).map(|_| None).collect();
        let mut widths = vec![0_u32; self.num_new_syms as usize];

        let mut height: u32 = 0;
        let mut decoded: u32 = 0;

        while decoded < self.num_new_syms {
            let delta = tables
                .delta_height
                .decode(stream)?
                .ok_or(DecodeError::DecodeInconsistency)?;
            height = checked_symbol_dimension(height, i64_to_i32(delta)?)?;

            let mut width: u32 = 0;
            let mut total_width: u32 = 0;
            let first_symbol = decoded;

            loop {
                let Some(delta) = tables.delta_width.decode(stream)? else {
                    break;
                };
                if decoded >= self.num_new_syms {
                    bail!(DecodeError::DecodeInconsistency);
                }
                width = checked_symbol_dimension(width, i64_to_i32(delta)?)?;
                total_width = total_width
                    .checked_add(width)
                    .filter(|&w| w <= MAX_IMAGE_SIZE)
                    .ok_or(DecodeError::DimensionOverflow)?;

                if self.refagg {
                    let instances = tables
                        .aggregate_instances
                        .decode(stream)?
                        .ok_or(DecodeError::DecodeInconsistency)?;
                    if instances < 0 {
                        bail!(DecodeError::DecodeInconsistency);
                    }
                    let symbol = if height == 0 || width == 0 {
                        None
                    } else if instances > 1 {
                        Some(self.decode_aggregate_huffman(
                            stream,
                            gr_contexts,
                            &new_symbols,
                            width,
                            height,
                            decoded,
                            instances as u32,
                        )?)
                    } else {
                        Some(self.decode_refined_huffman(
                            stream,
                            gr_contexts,
                            &new_symbols,
                            width,
                            height,
                            decoded,
                        )?)
                    };
                    new_symbols[decoded as usize] = symbol;
                } else {
                    widths[decoded as usize] = width;
                }
                decoded += 1;
            }

            if !self.refagg {
                self.decode_collective_bitmap(
                    stream,
                    tables,
                    &mut new_symbols,
                    &widths,
                    first_symbol,
                    decoded,
                    total_width,
                    height,
                )?;
            }
        }

        // "Decode a value using Table B.1 if SDHUFF is 1 ... Let
        // EXRUNLENGTH be the decoded value." (6.5.10)
        let export_table = standard_table(1)?;
        let flags = self.decode_export_flags(total, || export_table.decode(stream))?;
        self.build_exported(new_symbols, &flags)
    }

    /// "If REFAGGNINST is greater than one, then decode the bitmap using a
    /// text region decoding procedure" with the Table 17 parameters
    /// (6.5.8.2).
    #[allow(clippy::too_many_arguments)]
    fn decode_aggregate_arith(
        &self,
        decoder: &mut ArithDecoder<'_>,
        gr_contexts: &mut [ArithContext],
        ids: &mut IntDecoderState,
        new_symbols: &[Option<Image<'static>>],
        width: u32,
        height: u32,
        decoded: u32,
        instances: u32,
    ) -> Result<Image<'static>> {
        let text = self.aggregate_text_decoder(new_symbols, width, height, decoded, instances, None);
        text.decode_arith(decoder, ids, gr_contexts)
    }

    #[allow(clippy::too_many_arguments)]
    fn decode_aggregate_huffman(
        &self,
        stream: &mut Bitstream<'_>,
        gr_contexts: &mut [ArithContext],
        new_symbols: &[Option<Image<'static>>],
        width: u32,
        height: u32,
        decoded: u32,
        instances: u32,
    ) -> Result<Image<'static>> {
        // Table 17 fixes the aggregate text region's tables: FS is B.6, DS
        // is B.8, DT is B.11, the refinement deltas all use B.15 and the
        // refinement size B.1.
        let tables = TextRegionTables {
            first_s: standard_table(6)?,
            delta_s: standard_table(8)?,
            delta_t: standard_table(11)?,
            refinement_dw: standard_table(15)?,
            refinement_dh: standard_table(15)?,
            refinement_dx: standard_table(15)?,
            refinement_dy: standard_table(15)?,
            refinement_size: standard_table(1)?,
        };
        let text = self.aggregate_text_decoder(
            new_symbols,
            width,
            height,
            decoded,
            instances,
            Some(tables),
        );
        text.decode_huffman(stream, gr_contexts)
    }

    /// The shared Table 17 parameterisation of the aggregate text region.
    fn aggregate_text_decoder<'s>(
        &'s self,
        new_symbols: &'s [Option<Image<'static>>],
        width: u32,
        height: u32,
        decoded: u32,
        instances: u32,
        tables: Option<TextRegionTables<'s>>,
    ) -> TextRegionDecoder<'s> {
        // "Set SBSYMS to an array of SDNUMINSYMS + NSYMSDECODED symbols,
        // formed by concatenating SDINSYMS and the first NSYMSDECODED
        // entries of SDNEWSYMS." (6.5.8.2.4)
        let mut symbols: Vec<Option<&Image<'static>>> =
            Vec::with_capacity(self.in_syms.len() + decoded as usize);
        symbols.extend(self.in_syms.iter().copied());
        symbols.extend(
            new_symbols[..decoded as usize]
                .iter()
                .map(|slot| slot.as_ref()),
        );

        let num_syms = symbols.len() as u32;
        let mut sym_code_len = symbol_code_length(num_syms);
        let mut sym_codes = Vec::new();
        if self.huffman {
            // "If SDHUFF is 1, SBSYMCODELEN is at least one and each
            // symbol code is its index." (6.5.8.2.3)
            sym_code_len = sym_code_len.max(1);
            sym_codes = (0..num_syms)
                .map(|i| HuffmanCode {
                    code_len: sym_code_len,
                    code: i,
                })
                .collect();
        }

        TextRegionDecoder {
            huffman: self.huffman,
            refine: true,
            refinement_template: self.refinement_template,
            transposed: false,
            def_pixel: false,
            ds_offset: 0,
            sym_code_len,
            width,
            height,
            num_instances: instances,
            strips: 1,
            symbols,
            sym_codes,
            comb_op: ComposeOp::Or,
            ref_corner: Corner::TopLeft,
            tables,
            refinement_at: self.refinement_at,
        }
    }

    /// "If REFAGGNINST is equal to one ... decode the symbol's bitmap
    /// using a generic refinement region decoding procedure." (6.5.8.2.2)
    #[allow(clippy::too_many_arguments)]
    fn decode_refined_arith(
        &self,
        decoder: &mut ArithDecoder<'_>,
        gr_contexts: &mut [ArithContext],
        ids: &mut IntDecoderState,
        new_symbols: &[Option<Image<'static>>],
        width: u32,
        height: u32,
        decoded: u32,
    ) -> Result<Image<'static>> {
        let available = self.in_syms.len() as u32 + decoded;
        let id = ids.iaid.decode(decoder)?;
        if id >= available {
            bail!(DecodeError::DecodeInconsistency);
        }
        let reference = self
            .lookup_symbol(new_symbols, id)?
            .ok_or(DecodeError::DecodeInconsistency)?;

        let rdx = ids
            .iardx
            .decode(decoder)?
            .ok_or(DecodeError::DecodeInconsistency)?;
        let rdy = ids
            .iardy
            .decode(decoder)?
            .ok_or(DecodeError::DecodeInconsistency)?;

        let mut refinement = RefinementRegionDecoder::new();
        refinement.template = self.refinement_template;
        refinement.tpgron = false;
        refinement.width = width;
        refinement.height = height;
        refinement.reference_dx = rdx;
        refinement.reference_dy = rdy;
        refinement.grat = self.refinement_at;
        refinement.decode(decoder, gr_contexts, reference)
    }

    /// The Huffman form of the single-symbol refinement: the symbol ID is
    /// read as raw bits, the deltas through table B.15, and the refinement
    /// data is length-prefixed via table B.1 and verified against the
    /// bytes consumed.
    fn decode_refined_huffman(
        &self,
        stream: &mut Bitstream<'_>,
        gr_contexts: &mut [ArithContext],
        new_symbols: &[Option<Image<'static>>],
        width: u32,
        height: u32,
        decoded: u32,
    ) -> Result<Image<'static>> {
        let available = self.in_syms.len() as u32 + decoded;
        let code_len = symbol_code_length(available).max(1);
        let id = stream
            .read_bits(code_len)
            .ok_or(DecodeError::TruncatedInput)?;
        if id >= available {
            bail!(DecodeError::DecodeInconsistency);
        }
        let reference = self
            .lookup_symbol(new_symbols, id)?
            .ok_or(DecodeError::DecodeInconsistency)?;

        let delta_table = standard_table(15)?;
        let size_table = standard_table(1)?;
        let rdx = delta_table
            .decode(stream)?
            .ok_or(DecodeError::DecodeInconsistency)?;
        let rdy = delta_table
            .decode(stream)?
            .ok_or(DecodeError::DecodeInconsistency)?;
        let size = size_table
            .decode(stream)?
            .ok_or(DecodeError::DecodeInconsistency)?;
        if size < 0 {
            bail!(DecodeError::DecodeInconsistency);
        }

        stream.align_to_byte();
        let start = stream.offset();

        let mut refinement = RefinementRegionDecoder::new();
        refinement.template = self.refinement_template;
        refinement.tpgron = false;
        refinement.width = width;
        refinement.height = height;
        refinement.reference_dx = i64_to_i32(rdx)?;
        refinement.reference_dy = i64_to_i32(rdy)?;
        refinement.grat = self.refinement_at;

        let mut decoder = ArithDecoder::new(stream);
        let symbol = refinement.decode(&mut decoder, gr_contexts, reference)?;

        stream.set_offset(decoder.offset());
        stream.align_to_byte();
        stream.add_offset(2);
        if size as usize != stream.offset() - start {
            bail!(DecodeError::DecodeInconsistency);
        }
        Ok(symbol)
    }

    /// Decode a height class's collective bitmap and slice it into the
    /// individual symbols (6.5.9).
    #[allow(clippy::too_many_arguments)]
    fn decode_collective_bitmap(
        &self,
        stream: &mut Bitstream<'_>,
        tables: &SymbolDictionaryTables<'a>,
        new_symbols: &mut [Option<Image<'static>>],
        widths: &[u32],
        first_symbol: u32,
        decoded: u32,
        total_width: u32,
        height: u32,
    ) -> Result<()> {
        // "Read the size in bytes using the SDHUFFBMSIZE Huffman table."
        let size = tables
            .bitmap_size
            .decode(stream)?
            .ok_or(DecodeError::DecodeInconsistency)?;
        if size < 0 {
            bail!(DecodeError::DecodeInconsistency);
        }

        // "Skip over any bits remaining in the last byte read." (6.5.9)
        stream.align_to_byte();

        if height == 0 || total_width == 0 {
            return Ok(());
        }

        let collective = if size == 0 {
            // "If BMSIZE is zero, then the bitmap is stored uncompressed"
            // with rows of ceil(TOTWIDTH / 8) bytes. (6.5.9)
            let row_bytes = (total_width as usize).div_ceil(8);
            if row_bytes * height as usize > stream.bytes_left() {
                bail!(DecodeError::TruncatedInput);
            }

            let mut bitmap =
                Image::new(total_width, height).ok_or(DecodeError::DimensionOverflow)?;
            let stride = bitmap.stride();
            for row in 0..height as usize {
                let src = &stream.tail()[..row_bytes];
                bitmap.bytes_mut()[row * stride..row * stride + row_bytes].copy_from_slice(src);
                stream.add_offset(row_bytes);
            }
            bitmap
        } else {
            // "Otherwise, decode the bitmap using a generic bitmap
            // decoding procedure" with MMR = 1 (6.5.9, Table 19).
            let mut generic = GenericRegionDecoder::new();
            generic.mmr = true;
            generic.width = total_width;
            generic.height = height;
            generic.start_decode_mmr(stream)?
        };

        // "B_HC contains the NSYMSDECODED - HCFIRSTSYM symbols
        // concatenated left-to-right, with no intervening gaps." (6.5.5)
        let mut offset: u32 = 0;
        for index in first_symbol..decoded {
            let width = widths[index as usize];
            if width == 0 {
                new_symbols[index as usize] = None;
                continue;
            }
            let symbol = collective
                .sub_image(offset as i32, 0, width, height)
                .ok_or(DecodeError::DimensionOverflow)?;
            new_symbols[index as usize] = Some(symbol);
            offset += width;
        }
        Ok(())
    }

    /// Decode the export run-length stream (6.5.10): alternating runs of
    /// not-exported / exported flags covering every input and new symbol.
    fn decode_export_flags(
        &self,
        total: u32,
        mut read_run: impl FnMut() -> Result<Option<i64>>,
    ) -> Result<Vec<bool>> {
        let mut flags = vec![false; total as usize];
        let mut current = false;
        let mut index: u32 = 0;
        let mut exported: u32 = 0;

        while index < total {
            let run = read_run()?.ok_or(DecodeError::DecodeInconsistency)?;
            if run < 0 {
                bail!(DecodeError::DecodeInconsistency);
            }
            let run = run as u64;
            if run > (total - index) as u64 {
                bail!(DecodeError::DecodeInconsistency);
            }
            let run = run as u32;

            if current {
                exported += run;
            }
            for flag in &mut flags[index as usize..(index + run) as usize] {
                *flag = current;
            }
            index += run;
            current = !current;
        }

        if exported > self.num_ex_syms {
            bail!(DecodeError::DecodeInconsistency);
        }
        Ok(flags)
    }

    /// "If I < SDNUMINSYMS then SDEXSYMS[J] = SDINSYMS[I], otherwise
    /// SDEXSYMS[J] = SDNEWSYMS[I - SDNUMINSYMS]." (6.5.10)
    fn build_exported(
        &self,
        mut new_symbols: Vec<Option<Image<'static>>>,
        flags: &[bool],
    ) -> Result<SymbolDictionary> {
        let num_in = self.in_syms.len();
        let mut dictionary = SymbolDictionary::default();
        let mut exported: u32 = 0;

        for (index, &flag) in flags.iter().enumerate() {
            if !flag || exported >= self.num_ex_syms {
                continue;
            }
            let symbol = if index < num_in {
                self.in_syms[index].map(Image::duplicate)
            } else {
                new_symbols[index - num_in].take()
            };
            dictionary.symbols.push(symbol);
            exported += 1;
        }
        Ok(dictionary)
    }

    fn lookup_symbol<'s>(
        &'s self,
        new_symbols: &'s [Option<Image<'static>>],
        id: u32,
    ) -> Result<Option<&'s Image<'static>>> {
        let num_in = self.in_syms.len() as u32;
        if id < num_in {
            Ok(self.in_syms[id as usize])
        } else {
            let index = (id - num_in) as usize;
            if index >= new_symbols.len() {
                bail!(DecodeError::DecodeInconsistency);
            }
            Ok(new_symbols[index].as_ref())
        }
    }
}

/// "SBSYMCODELEN = ceil(log2(SBNUMSYMS))" - the number of bits needed to
/// name any of `total` symbols.
pub(crate) fn symbol_code_length(total: u32) -> u32 {
    let mut length = 0;
    while (1_u64 << length) < total as u64 {
        length += 1;
    }
    length
}

/// Accumulate a height or width delta, keeping the running value inside
/// the 16-bit symbol dimension bound.
fn checked_symbol_dimension(base: u32, delta: i32) -> Result<u32> {
    let value = base as i64 + delta as i64;
    if !(0..=MAX_IMAGE_SIZE as i64).contains(&value) {
        bail!(DecodeError::DimensionOverflow);
    }
    Ok(value as u32)
}

fn i64_to_i32(value: i64) -> Result<i32> {
    i32::try_from(value).map_err(|_| DecodeError::DecodeInconsistency)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_code_lengths() {
        assert_eq!(symbol_code_length(0), 0);
        assert_eq!(symbol_code_length(1), 0);
        assert_eq!(symbol_code_length(2), 1);
        assert_eq!(symbol_code_length(3), 2);
        assert_eq!(symbol_code_length(4), 2);
        assert_eq!(symbol_code_length(5), 3);
        assert_eq!(symbol_code_length(65535), 16);
    }

    fn empty_decoder() -> SymbolDictionaryDecoder<'static> {
        SymbolDictionaryDecoder {
            huffman: false,
            refagg: false,
            template: 0,
            refinement_template: false,
            num_new_syms: 0,
            num_ex_syms: 1,
            in_syms: Vec::new(),
            tables: None,
            at: [0; 8],
            refinement_at: [0; 4],
        }
    }

    #[test]
    fn export_runs_must_cover_the_symbol_set() {
        let decoder = empty_decoder();
        // A run longer than the remaining symbols is inconsistent.
        let mut runs = vec![5_i64].into_iter();
        let result = decoder.decode_export_flags(3, || Ok(runs.next()));
        assert_eq!(result.unwrap_err(), DecodeError::DecodeInconsistency);
    }

    #[test]
    fn export_runs_alternate_flags() {
        let decoder = SymbolDictionaryDecoder {
            num_ex_syms: 2,
            ..empty_decoder()
        };
        let mut runs = vec![1_i64, 2, 1].into_iter();
        let flags = decoder.decode_export_flags(4, || Ok(runs.next())).unwrap();
        assert_eq!(flags, vec![false, true, true, false]);
    }

    #[test]
    fn exporting_more_than_declared_is_an_error() {
        let decoder = SymbolDictionaryDecoder {
            num_ex_syms: 1,
            ..empty_decoder()
        };
        let mut runs = vec![0_i64, 2].into_iter();
        let result = decoder.decode_export_flags(2, || Ok(runs.next()));
        assert_eq!(result.unwrap_err(), DecodeError::DecodeInconsistency);
    }

    #[test]
    fn deep_copies_do_not_alias() {
        let mut image = Image::new(1, 1).unwrap();
        image.set_pixel(0, 0, 1);
        let mut dictionary = SymbolDictionary::default();
        dictionary.symbols.push(Some(image));

        let copy = dictionary.deep_copy();
        dictionary.symbols[0].as_mut().unwrap().set_pixel(0, 0, 0);
        assert_eq!(copy.symbol(0).unwrap().pixel(0, 0), 1);
        assert_eq!(dictionary.symbol(0).unwrap().pixel(0, 0), 0);
    }
}
