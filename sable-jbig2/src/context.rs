//! Segment dispatch: header parsing, per-type decoding, page assembly
//! (T.88, clause 7).
//!
//! A `Context` walks one stream segment by segment, hands each payload to
//! the matching decoding procedure, and composes region results onto the
//! page. The globals stream (when present) is decoded by a nested context
//! first; referenced segments are looked up through both. Symbol
//! dictionaries decoded from a keyed globals stream pass through the
//! document-wide LRU cache so repeated globals are decoded once.

use std::cell::RefCell;
use std::rc::Rc;

use crate::bitstream::Bitstream;
use crate::decode::generic::GenericRegionDecoder;
use crate::decode::generic_refinement::RefinementRegionDecoder;
use crate::decode::halftone::HalftoneRegionDecoder;
use crate::decode::pattern::PatternDictionaryDecoder;
use crate::decode::symbol::{
    MAX_EXPORT_SYMBOLS, MAX_NEW_SYMBOLS, SymbolDictionary, SymbolDictionaryDecoder,
    SymbolDictionaryTables, symbol_code_length,
};
use crate::decode::text::{
    Corner, IntDecoderState, TextRegionDecoder, TextRegionTables, decode_symbol_id_codes,
};
use crate::decode::{generic_context_size, refinement_context_size};
use crate::error::{DecodeError, Result, bail};
use crate::file_header::strip_file_header;
use crate::huffman_table::{HuffmanTable, standard_table};
use crate::image::{ComposeOp, Image, Rect, is_valid_image_size};
use crate::page_info::PageInfo;
use crate::segment::{
    MAX_REFERRED_SEGMENTS, RegionInfo, SEGMENT_END_OF_FILE, SEGMENT_END_OF_PAGE,
    SEGMENT_END_OF_STRIPE, SEGMENT_IMMEDIATE_GENERIC_REGION,
    SEGMENT_IMMEDIATE_HALFTONE_REGION, SEGMENT_IMMEDIATE_LOSSLESS_GENERIC_REGION,
    SEGMENT_IMMEDIATE_LOSSLESS_HALFTONE_REGION, SEGMENT_IMMEDIATE_LOSSLESS_REFINEMENT_REGION,
    SEGMENT_IMMEDIATE_LOSSLESS_TEXT_REGION, SEGMENT_IMMEDIATE_REFINEMENT_REGION,
    SEGMENT_IMMEDIATE_TEXT_REGION, SEGMENT_INTERMEDIATE_GENERIC_REGION,
    SEGMENT_INTERMEDIATE_HALFTONE_REGION, SEGMENT_INTERMEDIATE_REFINEMENT_REGION,
    SEGMENT_INTERMEDIATE_TEXT_REGION, SEGMENT_PAGE_INFO, SEGMENT_PATTERN_DICT,
    SEGMENT_SYMBOL_DICT, SEGMENT_TABLES, Segment, SegmentFlags, SegmentResult, SegmentState,
};
use crate::{ArithContext, ArithDecoder, CodecStatus, PauseIndicator};

/// Reborrow an `Option<&mut dyn PauseIndicator>` for a shorter lifetime.
///
/// `Option::as_deref_mut` ties the reborrow to the outer reference's own
/// lifetime for trait objects, which prevents reusing the original
/// `Option` afterwards; this helper reborrows explicitly instead.
fn reborrow_pause<'a, 'b>(
    pause: &'a mut Option<&'b mut dyn PauseIndicator>,
) -> Option<&'a mut dyn PauseIndicator> {
    match pause {
        Some(p) => Some(&mut **p),
        None => None,
    }
}

/// The smallest possible segment header.
const MIN_SEGMENT_SIZE: usize = 11;

/// The symbol dictionary cache holds the two most recently used entries.
const SYMBOL_DICT_CACHE_SIZE: usize = 2;

/// Identity of a cached symbol dictionary: the stream it came from and the
/// byte offset of its segment data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CacheKey {
    stream_key: u64,
    data_offset: usize,
}

struct CacheEntry {
    key: CacheKey,
    dict: SymbolDictionary,
}

/// Per-document state shared by every context decoding the document: the
/// MRU-first symbol dictionary cache.
#[derive(Default)]
pub struct DocumentContext {
    cache: Rc<RefCell<Vec<CacheEntry>>>,
}

impl DocumentContext {
    /// Create an empty document context.
    pub fn new() -> Self {
        Self::default()
    }

    fn cache(&self) -> Rc<RefCell<Vec<CacheEntry>>> {
        Rc::clone(&self.cache)
    }
}

/// Outcome of parsing one segment's data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DispatchResult {
    Continue,
    /// An end-of-page or end-of-file segment terminates decoding.
    EndReached,
}

/// Suspended state of a progressive generic-region decode.
struct PendingGeneric<'a> {
    proc: GenericRegionDecoder,
    decoder: ArithDecoder<'a>,
    contexts: Vec<ArithContext>,
    region: RegionInfo,
}

/// The decoding context for one stream (main or globals).
pub(crate) struct Context<'a> {
    stream: Bitstream<'a>,
    globals: Option<Box<Context<'a>>>,
    segments: Vec<Segment>,
    page_infos: Vec<PageInfo>,
    page: Option<Image<'a>>,
    is_global: bool,
    in_page: bool,
    buf_specified: bool,
    processing: CodecStatus,
    pending: Option<PendingGeneric<'a>>,
    current: Option<Segment>,
    /// Byte offset of the current segment's data part.
    offset: usize,
    cache: Rc<RefCell<Vec<CacheEntry>>>,
}

impl<'a> Context<'a> {
    /// Build the main context and, when globals are supplied, its nested
    /// globals context. File headers are stripped from both streams.
    pub(crate) fn create(
        src: &'a [u8],
        src_key: u64,
        globals: Option<&'a [u8]>,
        globals_key: u64,
        document: &DocumentContext,
    ) -> Result<Context<'a>> {
        let (src, _) = strip_file_header(src)?;
        let mut ctx = Context::new(src, src_key, document.cache(), false);

        if let Some(globals) = globals {
            if !globals.is_empty() {
                let (globals, _) = strip_file_header(globals)?;
                ctx.globals = Some(Box::new(Context::new(
                    globals,
                    globals_key,
                    document.cache(),
                    true,
                )));
            }
        }
        Ok(ctx)
    }

    fn new(
        data: &'a [u8],
        key: u64,
        cache: Rc<RefCell<Vec<CacheEntry>>>,
        is_global: bool,
    ) -> Context<'a> {
        Context {
            stream: Bitstream::new(data, key),
            globals: None,
            segments: Vec::new(),
            page_infos: Vec::new(),
            page: None,
            is_global,
            in_page: false,
            buf_specified: false,
            processing: CodecStatus::Ready,
            pending: None,
            current: None,
            offset: 0,
            cache,
        }
    }

    pub(crate) fn status(&self) -> CodecStatus {
        self.processing
    }

    pub(crate) fn set_status(&mut self, status: CodecStatus) {
        self.processing = status;
    }

    pub(crate) fn page_image(&self) -> Option<&Image<'a>> {
        self.page.as_ref()
    }

    pub(crate) fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Decode the nested globals stream to completion.
    pub(crate) fn decode_globals(
        &mut self,
        pause: Option<&mut dyn PauseIndicator>,
    ) -> Result<()> {
        if let Some(globals) = self.globals.as_mut() {
            if let Err(error) = globals.decode_sequential(pause) {
                self.processing = CodecStatus::Error;
                return Err(error);
            }
        }
        Ok(())
    }

    /// Install a caller-owned page buffer and drive decoding.
    pub(crate) fn first_page(
        &mut self,
        buf: &'a mut [u8],
        width: u32,
        height: u32,
        stride: usize,
        mut pause: Option<&mut dyn PauseIndicator>,
    ) -> Result<()> {
        self.decode_globals(reborrow_pause(&mut pause))?;

        let page = match Image::from_buffer(width, height, stride, buf) {
            Ok(page) => page,
            Err(error) => {
                self.processing = CodecStatus::Error;
                return Err(error);
            }
        };
        self.page = Some(page);
        self.buf_specified = true;

        if let Some(p) = reborrow_pause(&mut pause) {
            if p.should_pause() {
                self.processing = CodecStatus::ToBeContinued;
                return Ok(());
            }
        }
        self.continue_decoding(pause)
    }

    /// Resume (or start) decoding of the main stream.
    pub(crate) fn continue_decoding(
        &mut self,
        pause: Option<&mut dyn PauseIndicator>,
    ) -> Result<()> {
        self.processing = CodecStatus::Ready;
        if let Err(error) = self.decode_sequential(pause) {
            self.processing = CodecStatus::Error;
            return Err(error);
        }
        if self.processing != CodecStatus::ToBeContinued {
            self.processing = CodecStatus::Finished;
        }
        Ok(())
    }

    /// The sequential decode loop (8.2): parse a header, decode its data,
    /// advance to the declared end of the segment.
    pub(crate) fn decode_sequential(
        &mut self,
        mut pause: Option<&mut dyn PauseIndicator>,
    ) -> Result<()> {
        while self.stream.bytes_left() >= MIN_SEGMENT_SIZE {
            if self.current.is_none() {
                let mut segment = Segment::default();
                self.parse_segment_header(&mut segment)?;
                self.offset = self.stream.offset();
                self.current = Some(segment);
            }

            let mut segment = self.current.take().ok_or(DecodeError::InvalidSegment)?;
            let result = match self.parse_segment_data(&mut segment, reborrow_pause(&mut pause)) {
                Ok(result) => result,
                Err(error) => {
                    segment.state = SegmentState::Error;
                    return Err(error);
                }
            };

            if result == DispatchResult::EndReached {
                return Ok(());
            }
            if self.processing == CodecStatus::ToBeContinued {
                segment.state = SegmentState::Paused;
                self.current = Some(segment);
                return Ok(());
            }

            if segment.data_length != 0xFFFF_FFFF {
                let end = self
                    .offset
                    .checked_add(segment.data_length as usize)
                    .ok_or(DecodeError::InvalidSegment)?;
                self.stream.set_offset(end);
            } else {
                // The unknown-length form carries a trailing 4-byte row
                // count after the in-band end sequence (7.2.7).
                self.stream.add_offset(4);
            }

            segment.state = SegmentState::ParseComplete;
            self.segments.push(segment);

            if self.stream.bytes_left() > 0 && self.page.is_some() {
                if let Some(p) = reborrow_pause(&mut pause) {
                    if p.should_pause() {
                        self.processing = CodecStatus::ToBeContinued;
                        return Ok(());
                    }
                }
            }
        }
        Ok(())
    }

    /// Parse one segment header (7.2.2 - 7.2.7).
    fn parse_segment_header(&mut self, segment: &mut Segment) -> Result<()> {
        let number = self.stream.read_u32().ok_or(DecodeError::TruncatedInput)?;
        segment.number = number;

        let flags = self.stream.read_byte().ok_or(DecodeError::TruncatedInput)?;
        segment.flags = SegmentFlags(flags);

        // "The three most significant bits of the first byte in this field
        // determine the length of the field." (7.2.4)
        let lead = self.stream.peek_byte();
        let count = if lead >> 5 <= 4 {
            self.stream.read_byte().ok_or(DecodeError::TruncatedInput)?;
            (lead >> 5) as u32
        } else {
            let count =
                self.stream.read_u32().ok_or(DecodeError::TruncatedInput)? & 0x1FFF_FFFF;
            if count > MAX_REFERRED_SEGMENTS {
                bail!(DecodeError::InvalidSegment);
            }
            count
        };

        // "When the current segment's number is 256 or less, then each
        // referred-to segment number is one byte long" (7.2.5); two bytes
        // up to 65536, four beyond.
        segment.referred_to = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let referred = if number <= 256 {
                self.stream.read_byte().ok_or(DecodeError::TruncatedInput)? as u32
            } else if number <= 65536 {
                self.stream.read_u16().ok_or(DecodeError::TruncatedInput)? as u32
            } else {
                self.stream.read_u32().ok_or(DecodeError::TruncatedInput)?
            };
            // Referred-to segments must already have been decoded.
            if referred >= number {
                bail!(DecodeError::InvalidSegment);
            }
            segment.referred_to.push(referred);
        }

        segment.page_association = if segment.flags.long_page_association() {
            self.stream.read_u32().ok_or(DecodeError::TruncatedInput)?
        } else {
            self.stream.read_byte().ok_or(DecodeError::TruncatedInput)? as u32
        };

        segment.data_length = self.stream.read_u32().ok_or(DecodeError::TruncatedInput)?;
        segment.key = self.stream.key();
        segment.data_offset = self.stream.offset();
        segment.state = SegmentState::DataUnparsed;
        Ok(())
    }

    /// Dispatch one segment's data part to its decoding procedure.
    fn parse_segment_data(
        &mut self,
        segment: &mut Segment,
        pause: Option<&mut dyn PauseIndicator>,
    ) -> Result<DispatchResult> {
        let segment_type = segment.flags.segment_type();

        if segment.data_length == 0xFFFF_FFFF
            && !matches!(
                segment_type,
                SEGMENT_IMMEDIATE_GENERIC_REGION | SEGMENT_IMMEDIATE_LOSSLESS_GENERIC_REGION
            )
        {
            // Only immediate generic regions may defer their length
            // (7.2.7).
            bail!(DecodeError::InvalidSegment);
        }

        match segment_type {
            SEGMENT_SYMBOL_DICT => self.parse_symbol_dict(segment)?,
            SEGMENT_PATTERN_DICT => self.parse_pattern_dict(segment)?,
            SEGMENT_INTERMEDIATE_TEXT_REGION
            | SEGMENT_IMMEDIATE_TEXT_REGION
            | SEGMENT_IMMEDIATE_LOSSLESS_TEXT_REGION => {
                self.require_page()?;
                self.parse_text_region(segment)?;
            }
            SEGMENT_INTERMEDIATE_HALFTONE_REGION
            | SEGMENT_IMMEDIATE_HALFTONE_REGION
            | SEGMENT_IMMEDIATE_LOSSLESS_HALFTONE_REGION => {
                self.require_page()?;
                self.parse_halftone_region(segment)?;
            }
            SEGMENT_INTERMEDIATE_GENERIC_REGION
            | SEGMENT_IMMEDIATE_GENERIC_REGION
            | SEGMENT_IMMEDIATE_LOSSLESS_GENERIC_REGION => {
                self.require_page()?;
                self.parse_generic_region(segment, pause)?;
            }
            SEGMENT_INTERMEDIATE_REFINEMENT_REGION
            | SEGMENT_IMMEDIATE_REFINEMENT_REGION
            | SEGMENT_IMMEDIATE_LOSSLESS_REFINEMENT_REGION => {
                self.require_page()?;
                self.parse_refinement_region(segment)?;
            }
            SEGMENT_PAGE_INFO => self.parse_page_info()?,
            SEGMENT_END_OF_PAGE => {
                self.in_page = false;
                return Ok(DispatchResult::EndReached);
            }
            SEGMENT_END_OF_STRIPE => {
                // The stripe's end row is informational here; the dispatch
                // loop advances past the payload.
            }
            SEGMENT_END_OF_FILE => return Ok(DispatchResult::EndReached),
            SEGMENT_TABLES => self.parse_tables(segment)?,
            other => {
                // Unknown segment types are skipped; the dispatch loop
                // advances by the declared length.
                log::warn!("skipping segment {} of unknown type {other}", segment.number);
            }
        }
        Ok(DispatchResult::Continue)
    }

    fn require_page(&self) -> Result<()> {
        if !self.in_page {
            bail!(DecodeError::InvalidSegment);
        }
        Ok(())
    }

    /// Page information (7.4.8): record the page's parameters and allocate
    /// its bitmap (unless the caller supplied one).
    fn parse_page_info(&mut self) -> Result<()> {
        let width = self.stream.read_u32().ok_or(DecodeError::TruncatedInput)?;
        let height = self.stream.read_u32().ok_or(DecodeError::TruncatedInput)?;
        let _res_x = self.stream.read_u32().ok_or(DecodeError::TruncatedInput)?;
        let _res_y = self.stream.read_u32().ok_or(DecodeError::TruncatedInput)?;
        let flags = self.stream.read_byte().ok_or(DecodeError::TruncatedInput)?;
        let striping = self.stream.read_u16().ok_or(DecodeError::TruncatedInput)?;

        let info = PageInfo {
            width,
            height,
            // "Bit 2: Page default pixel value." (7.4.8.5)
            default_pixel: flags & 0x04 != 0,
            // "Bit 15: Page is striped." (7.4.8.6)
            striped: striping & 0x8000 != 0,
            max_stripe_size: striping & 0x7FFF,
        };

        if !self.buf_specified {
            let page = Image::new(info.width, info.initial_height())
                .ok_or(DecodeError::DimensionOverflow)?;
            self.page = Some(page);
        }
        let default_pixel = info.default_pixel;
        self.page_infos.push(info);

        let page = self.page.as_mut().ok_or(DecodeError::DimensionOverflow)?;
        page.fill(default_pixel);
        self.in_page = true;
        Ok(())
    }

    /// Symbol dictionary segment (7.4.2).
    fn parse_symbol_dict(&mut self, segment: &mut Segment) -> Result<()> {
        let flags = self.stream.read_u16().ok_or(DecodeError::TruncatedInput)?;
        let huffman = flags & 0x0001 != 0;
        let refagg = flags & 0x0002 != 0;
        let template = ((flags >> 10) & 0x0003) as u8;
        let refinement_template = (flags >> 12) & 0x0003 != 0;

        let mut at = [0_i32; 8];
        if !huffman {
            let pairs = if template == 0 { 4 } else { 1 };
            for value in at.iter_mut().take(pairs * 2) {
                *value =
                    self.stream.read_byte().ok_or(DecodeError::TruncatedInput)? as i8 as i32;
            }
        }
        let mut refinement_at = [0_i32; 4];
        if refagg && !refinement_template {
            for value in refinement_at.iter_mut() {
                *value =
                    self.stream.read_byte().ok_or(DecodeError::TruncatedInput)? as i8 as i32;
            }
        }

        let num_ex_syms = self.stream.read_u32().ok_or(DecodeError::TruncatedInput)?;
        let num_new_syms = self.stream.read_u32().ok_or(DecodeError::TruncatedInput)?;
        if num_ex_syms > MAX_EXPORT_SYMBOLS || num_new_syms > MAX_NEW_SYMBOLS {
            bail!(DecodeError::InvalidSegment);
        }

        // "Concatenate all the input symbol dictionaries to form SDINSYMS."
        // (6.5.5, step 1)
        let mut in_syms: Vec<Option<&Image<'static>>> = Vec::new();
        let mut last_dict: Option<&SymbolDictionary> = None;
        for &referred in &segment.referred_to {
            let Some(found) = find_segment(&self.segments, self.globals.as_deref(), referred)
            else {
                bail!(DecodeError::MissingReference);
            };
            if let Some(dict) = found.result.symbol_dict() {
                last_dict = Some(dict);
                in_syms.extend(dict.symbol_slots().iter().map(|slot| slot.as_ref()));
            }
        }

        let tables = if huffman {
            Some(select_symbol_dict_tables(
                flags,
                refagg,
                segment,
                &self.segments,
                self.globals.as_deref(),
            )?)
        } else {
            None
        };

        segment.state = SegmentState::ParseComplete;

        // The cache is keyed by stream identity; only keyed globals are
        // worth caching.
        let cache_key = CacheKey {
            stream_key: segment.key,
            data_offset: segment.data_offset,
        };
        if self.is_global && cache_key.stream_key != 0 {
            if let Some(dict) = cache_lookup(&self.cache, cache_key) {
                segment.result = SegmentResult::SymbolDict(dict);
                return Ok(());
            }
        }

        let use_gb = !huffman;
        let use_gr = refagg;
        let mut gb_contexts = Vec::new();
        let mut gr_contexts = Vec::new();

        // "Bit 8: bitmap coding context used" - seed the context arrays
        // from the most recent referred dictionary. (7.4.2.1.1)
        if flags & 0x0100 != 0 {
            let last = last_dict.ok_or(DecodeError::MissingReference)?;
            if use_gb {
                gb_contexts = last.gb_contexts().to_vec();
                if gb_contexts.len() != generic_context_size(template) {
                    bail!(DecodeError::DecodeInconsistency);
                }
            }
            if use_gr {
                gr_contexts = last.gr_contexts().to_vec();
                if gr_contexts.len() != refinement_context_size(refinement_template) {
                    bail!(DecodeError::DecodeInconsistency);
                }
            }
        } else {
            if use_gb {
                gb_contexts = vec![ArithContext::default(); generic_context_size(template)];
            }
            if use_gr {
                gr_contexts =
                    vec![ArithContext::default(); refinement_context_size(refinement_template)];
            }
        }

        let decoder = SymbolDictionaryDecoder {
            huffman,
            refagg,
            template,
            refinement_template,
            num_new_syms,
            num_ex_syms,
            in_syms,
            tables,
            at,
            refinement_at,
        };

        let mut dict = if huffman {
            let dict = decoder.decode_huffman(&mut self.stream, &mut gr_contexts)?;
            self.stream.align_to_byte();
            dict
        } else {
            let mut arith = ArithDecoder::new(&self.stream);
            let dict = decoder.decode_arith(&mut arith, &mut gb_contexts, &mut gr_contexts)?;
            self.stream.set_offset(arith.offset());
            self.stream.align_to_byte();
            self.stream.add_offset(2);
            dict
        };

        // "Bit 9: bitmap coding context retained" (7.4.2.1.1).
        if flags & 0x0200 != 0 {
            if use_gb {
                dict.set_gb_contexts(&gb_contexts);
            }
            if use_gr {
                dict.set_gr_contexts(&gr_contexts);
            }
        }

        if self.is_global && cache_key.stream_key != 0 {
            cache_store(&self.cache, cache_key, dict.deep_copy());
        }
        segment.result = SegmentResult::SymbolDict(dict);
        Ok(())
    }

    /// Pattern dictionary segment (7.4.4).
    fn parse_pattern_dict(&mut self, segment: &mut Segment) -> Result<()> {
        let flags = self.stream.read_byte().ok_or(DecodeError::TruncatedInput)?;
        let pattern_width = self.stream.read_byte().ok_or(DecodeError::TruncatedInput)?;
        let pattern_height = self.stream.read_byte().ok_or(DecodeError::TruncatedInput)?;
        let gray_max = self.stream.read_u32().ok_or(DecodeError::TruncatedInput)?;
        if gray_max > 65535 {
            bail!(DecodeError::InvalidSegment);
        }

        let decoder = PatternDictionaryDecoder {
            mmr: flags & 0x01 != 0,
            template: (flags >> 1) & 0x03,
            pattern_width,
            pattern_height,
            gray_max,
        };

        let dict = if decoder.mmr {
            let dict = decoder.decode_mmr(&mut self.stream)?;
            self.stream.align_to_byte();
            dict
        } else {
            let mut contexts =
                vec![ArithContext::default(); generic_context_size(decoder.template)];
            let mut arith = ArithDecoder::new(&self.stream);
            let dict = decoder.decode_arith(&mut arith, &mut contexts)?;
            self.stream.set_offset(arith.offset());
            self.stream.align_to_byte();
            self.stream.add_offset(2);
            dict
        };

        segment.result = SegmentResult::PatternDict(dict);
        Ok(())
    }

    /// Generic region segment (7.4.6), driven progressively: the pending
    /// state survives pauses and this parser is re-entered to resume.
    fn parse_generic_region(
        &mut self,
        segment: &mut Segment,
        pause: Option<&mut dyn PauseIndicator>,
    ) -> Result<()> {
        let segment_type = segment.flags.segment_type();
        let intermediate = segment_type == SEGMENT_INTERMEDIATE_GENERIC_REGION;

        if self.pending.is_none() {
            let region = self.parse_region_info()?;
            if !is_valid_image_size(region.width, region.height) {
                bail!(DecodeError::DimensionOverflow);
            }

            let flags = self.stream.read_byte().ok_or(DecodeError::TruncatedInput)?;
            let mut proc = GenericRegionDecoder::new();
            proc.mmr = flags & 0x01 != 0;
            proc.template = (flags >> 1) & 0x03;
            proc.tpgdon = flags & 0x08 != 0;
            proc.use_skip = flags & 0x10 != 0;
            proc.width = region.width;
            proc.height = region.height;

            if !proc.mmr {
                let pairs = if proc.template == 0 { 4 } else { 1 };
                for value in proc.at.iter_mut().take(pairs * 2) {
                    *value =
                        self.stream.read_byte().ok_or(DecodeError::TruncatedInput)? as i8 as i32;
                }
            }

            if proc.use_skip {
                proc.skip = Some(self.read_skip_image()?);
            }

            if proc.mmr {
                let image = proc.start_decode_mmr(&mut self.stream)?;
                self.stream.align_to_byte();
                let rect = proc.replace_rect();
                if intermediate {
                    segment.result = SegmentResult::Image(image);
                } else {
                    self.compose_region(region, &image, Some(rect))?;
                }
                return Ok(());
            }

            let contexts =
                vec![ArithContext::default(); generic_context_size(proc.template)];
            let decoder = ArithDecoder::new(&self.stream);
            self.pending = Some(PendingGeneric {
                proc,
                decoder,
                contexts,
                region,
            });
        }

        // Pull the partial image off the segment while the row loop runs.
        let mut image = match std::mem::take(&mut segment.result) {
            SegmentResult::Image(image) => Some(image),
            _ => None,
        };

        let (status, region, rect, decoder_offset) = {
            let pending = self.pending.as_mut().ok_or(DecodeError::DecodeInconsistency)?;
            let status = if image.is_none() {
                pending.proc.start_decode_arith(
                    &mut image,
                    &mut pending.decoder,
                    &mut pending.contexts,
                    pause,
                )?
            } else {
                pending.proc.continue_decode(
                    &mut image,
                    &mut pending.decoder,
                    &mut pending.contexts,
                    pause,
                )?
            };
            (
                status,
                pending.region,
                pending.proc.replace_rect(),
                pending.decoder.offset(),
            )
        };

        let image = image.ok_or(DecodeError::DecodeInconsistency)?;

        match status {
            CodecStatus::ToBeContinued => {
                self.processing = CodecStatus::ToBeContinued;
                if !intermediate {
                    self.compose_region(region, &image, Some(rect))?;
                }
                segment.result = SegmentResult::Image(image);
                Ok(())
            }
            _ => {
                self.stream.set_offset(decoder_offset);
                self.stream.align_to_byte();
                self.stream.add_offset(2);
                if intermediate {
                    segment.result = SegmentResult::Image(image);
                } else {
                    self.compose_region(region, &image, Some(rect))?;
                }
                self.pending = None;
                Ok(())
            }
        }
    }

    /// "GBUSESKIP" data: a packed bitmap of its own declared size read
    /// straight from the stream.
    fn read_skip_image(&mut self) -> Result<Image<'static>> {
        let width = self.stream.read_u32().ok_or(DecodeError::TruncatedInput)?;
        let height = self.stream.read_u32().ok_or(DecodeError::TruncatedInput)?;
        if !is_valid_image_size(width, height) {
            bail!(DecodeError::DimensionOverflow);
        }

        let mut skip = Image::new(width, height).ok_or(DecodeError::DimensionOverflow)?;
        let row_bytes = (width as usize).div_ceil(8);
        if row_bytes * height as usize > self.stream.bytes_left() {
            bail!(DecodeError::TruncatedInput);
        }
        let stride = skip.stride();
        for row in 0..height as usize {
            let src = &self.stream.tail()[..row_bytes];
            skip.bytes_mut()[row * stride..row * stride + row_bytes].copy_from_slice(src);
            self.stream.add_offset(row_bytes);
        }
        Ok(skip)
    }

    /// Generic refinement region segment (7.4.7).
    fn parse_refinement_region(&mut self, segment: &mut Segment) -> Result<()> {
        let segment_type = segment.flags.segment_type();
        let region = self.parse_region_info()?;
        if !is_valid_image_size(region.width, region.height) {
            bail!(DecodeError::DimensionOverflow);
        }

        let flags = self.stream.read_u16().ok_or(DecodeError::TruncatedInput)?;
        let mut proc = RefinementRegionDecoder::new();
        proc.template = flags & 0x0001 != 0;
        proc.tpgron = flags & 0x0002 != 0;
        proc.width = region.width;
        proc.height = region.height;

        if !proc.template {
            for value in proc.grat.iter_mut() {
                *value =
                    self.stream.read_byte().ok_or(DecodeError::TruncatedInput)? as i8 as i32;
            }
        }

        // "Determine the buffer associated with the region segment that
        // this segment refers to ... If there are no referred-to segments,
        // then use the page bitmap as the reference buffer." (7.4.7.5)
        let reference: &Image<'_> = if segment.referred_to.is_empty() {
            self.page.as_ref().ok_or(DecodeError::MissingReference)?
        } else {
            let mut found = None;
            for &referred in &segment.referred_to {
                let Some(candidate) =
                    find_segment(&self.segments, self.globals.as_deref(), referred)
                else {
                    bail!(DecodeError::MissingReference);
                };
                if matches!(
                    candidate.flags.segment_type(),
                    SEGMENT_INTERMEDIATE_TEXT_REGION
                        | SEGMENT_INTERMEDIATE_HALFTONE_REGION
                        | SEGMENT_INTERMEDIATE_GENERIC_REGION
                        | SEGMENT_INTERMEDIATE_REFINEMENT_REGION
                ) {
                    found = Some(candidate);
                    break;
                }
            }
            let found = found.ok_or(DecodeError::MissingReference)?;
            found.result.image().ok_or(DecodeError::MissingReference)?
        };

        let mut contexts =
            vec![ArithContext::default(); refinement_context_size(proc.template)];
        let mut arith = ArithDecoder::new(&self.stream);
        let image = proc.decode(&mut arith, &mut contexts, reference)?;

        self.stream.set_offset(arith.offset());
        self.stream.align_to_byte();
        self.stream.add_offset(2);

        if segment_type == SEGMENT_INTERMEDIATE_REFINEMENT_REGION {
            segment.result = SegmentResult::Image(image);
        } else {
            self.compose_region(region, &image, None)?;
        }
        Ok(())
    }

    /// Halftone region segment (7.4.5).
    fn parse_halftone_region(&mut self, segment: &mut Segment) -> Result<()> {
        let segment_type = segment.flags.segment_type();
        let region = self.parse_region_info()?;
        if !is_valid_image_size(region.width, region.height) {
            bail!(DecodeError::DimensionOverflow);
        }

        let flags = self.stream.read_u16().ok_or(DecodeError::TruncatedInput)?;
        let comb_op_bits = ((flags >> 4) & 0x0007) as u8;
        if comb_op_bits > 4 {
            bail!(DecodeError::InvalidSegment);
        }

        let grid_width = self.stream.read_u32().ok_or(DecodeError::TruncatedInput)?;
        let grid_height = self.stream.read_u32().ok_or(DecodeError::TruncatedInput)?;
        if !is_valid_image_size(grid_width, grid_height) {
            bail!(DecodeError::DimensionOverflow);
        }
        let grid_x = self.stream.read_u32().ok_or(DecodeError::TruncatedInput)? as i32;
        let grid_y = self.stream.read_u32().ok_or(DecodeError::TruncatedInput)? as i32;
        let grid_rx = self.stream.read_u16().ok_or(DecodeError::TruncatedInput)?;
        let grid_ry = self.stream.read_u16().ok_or(DecodeError::TruncatedInput)?;

        // "A halftone region segment refers to exactly one pattern
        // dictionary segment." (7.4.5)
        if segment.referred_to.len() != 1 {
            bail!(DecodeError::MissingReference);
        }
        let Some(pattern_segment) =
            find_segment(&self.segments, self.globals.as_deref(), segment.referred_to[0])
        else {
            bail!(DecodeError::MissingReference);
        };
        let patterns = pattern_segment
            .result
            .pattern_dict()
            .ok_or(DecodeError::MissingReference)?;
        let first = patterns.pattern(0).ok_or(DecodeError::MissingReference)?;
        if first.width() > 255 || first.height() > 255 {
            bail!(DecodeError::DimensionOverflow);
        }

        let decoder = HalftoneRegionDecoder {
            width: region.width,
            height: region.height,
            mmr: flags & 0x0001 != 0,
            template: ((flags >> 1) & 0x0003) as u8,
            enable_skip: flags & 0x0008 != 0,
            comb_op: ComposeOp::from_bits(comb_op_bits),
            def_pixel: flags & 0x0080 != 0,
            grid_width,
            grid_height,
            grid_x,
            grid_y,
            grid_rx,
            grid_ry,
            pattern_width: first.width() as u8,
            pattern_height: first.height() as u8,
        };

        let image = if decoder.mmr {
            let image = decoder.decode_mmr(&mut self.stream, patterns)?;
            self.stream.align_to_byte();
            image
        } else {
            let mut contexts =
                vec![ArithContext::default(); generic_context_size(decoder.template)];
            let mut arith = ArithDecoder::new(&self.stream);
            let image = decoder.decode_arith(&mut arith, &mut contexts, patterns)?;
            self.stream.set_offset(arith.offset());
            self.stream.align_to_byte();
            self.stream.add_offset(2);
            image
        };

        if segment_type == SEGMENT_INTERMEDIATE_HALFTONE_REGION {
            segment.result = SegmentResult::Image(image);
        } else {
            self.compose_region(region, &image, None)?;
        }
        Ok(())
    }

    /// Text region segment (7.4.3).
    fn parse_text_region(&mut self, segment: &mut Segment) -> Result<()> {
        let segment_type = segment.flags.segment_type();
        let region = self.parse_region_info()?;
        if !is_valid_image_size(region.width, region.height) {
            bail!(DecodeError::DimensionOverflow);
        }

        let flags = self.stream.read_u16().ok_or(DecodeError::TruncatedInput)?;
        let huffman = flags & 0x0001 != 0;
        let refine = flags & 0x0002 != 0;
        let strips = 1_u32 << ((flags >> 2) & 0x0003);
        let ref_corner = Corner::from_bits(((flags >> 4) & 0x0003) as u8);
        let transposed = flags & 0x0040 != 0;
        let comb_op = ComposeOp::from_bits(((flags >> 7) & 0x0003) as u8);
        let def_pixel = flags & 0x0200 != 0;
        let mut ds_offset = ((flags >> 10) & 0x001F) as i8;
        if ds_offset >= 16 {
            ds_offset -= 32;
        }
        let refinement_template = flags & 0x8000 != 0;

        let huffman_flags = if huffman {
            self.stream.read_u16().ok_or(DecodeError::TruncatedInput)?
        } else {
            0
        };

        let mut refinement_at = [0_i32; 4];
        if refine && !refinement_template {
            for value in refinement_at.iter_mut() {
                *value =
                    self.stream.read_byte().ok_or(DecodeError::TruncatedInput)? as i8 as i32;
            }
        }

        let num_instances = self.stream.read_u32().ok_or(DecodeError::TruncatedInput)?;
        if num_instances as usize > self.stream.data().len().saturating_mul(32) {
            bail!(DecodeError::DecodeInconsistency);
        }

        // "SBSYMS: the symbols from all referred symbol dictionaries, in
        // order." (6.4.5)
        let mut symbols: Vec<Option<&Image<'static>>> = Vec::new();
        for &referred in &segment.referred_to {
            let Some(found) = find_segment(&self.segments, self.globals.as_deref(), referred)
            else {
                bail!(DecodeError::MissingReference);
            };
            if let Some(dict) = found.result.symbol_dict() {
                symbols.extend(dict.symbol_slots().iter().map(|slot| slot.as_ref()));
            }
        }
        let num_syms = symbols.len() as u32;
        let sym_code_len = symbol_code_length(num_syms);

        let (sym_codes, tables) = if huffman {
            let codes = decode_symbol_id_codes(&mut self.stream, num_syms)?;
            self.stream.align_to_byte();
            let tables = select_text_region_tables(
                huffman_flags,
                segment,
                &self.segments,
                self.globals.as_deref(),
            )?;
            (codes, Some(tables))
        } else {
            (Vec::new(), None)
        };

        let decoder = TextRegionDecoder {
            huffman,
            refine,
            refinement_template,
            transposed,
            def_pixel,
            ds_offset,
            sym_code_len,
            width: region.width,
            height: region.height,
            num_instances,
            strips,
            symbols,
            sym_codes,
            comb_op,
            ref_corner,
            tables,
            refinement_at,
        };

        let mut gr_contexts = if refine {
            vec![ArithContext::default(); refinement_context_size(refinement_template)]
        } else {
            Vec::new()
        };

        let image = if huffman {
            let image = decoder.decode_huffman(&mut self.stream, &mut gr_contexts)?;
            self.stream.align_to_byte();
            image
        } else {
            let mut ids = IntDecoderState::new(sym_code_len);
            let mut arith = ArithDecoder::new(&self.stream);
            let image = decoder.decode_arith(&mut arith, &mut ids, &mut gr_contexts)?;
            self.stream.set_offset(arith.offset());
            self.stream.align_to_byte();
            self.stream.add_offset(2);
            image
        };

        if segment_type == SEGMENT_INTERMEDIATE_TEXT_REGION {
            segment.result = SegmentResult::Image(image);
        } else {
            self.compose_region(region, &image, None)?;
        }
        Ok(())
    }

    /// Tables segment (7.4.13): parse a custom Huffman table.
    fn parse_tables(&mut self, segment: &mut Segment) -> Result<()> {
        let table = HuffmanTable::from_stream(&mut self.stream)?;
        self.stream.align_to_byte();
        segment.result = SegmentResult::HuffmanTable(table);
        Ok(())
    }

    /// Region segment information field (7.4.1).
    fn parse_region_info(&mut self) -> Result<RegionInfo> {
        let width = self.stream.read_u32().ok_or(DecodeError::TruncatedInput)?;
        let height = self.stream.read_u32().ok_or(DecodeError::TruncatedInput)?;
        let x = self.stream.read_u32().ok_or(DecodeError::TruncatedInput)?;
        let y = self.stream.read_u32().ok_or(DecodeError::TruncatedInput)?;
        let flags = self.stream.read_byte().ok_or(DecodeError::TruncatedInput)?;
        Ok(RegionInfo {
            width,
            height,
            x,
            y,
            flags,
        })
    }

    /// Compose a decoded region (or the given band of it) onto the page at
    /// its declared location, growing a striped page when the band reaches
    /// past the current bottom edge.
    fn compose_region(
        &mut self,
        region: RegionInfo,
        image: &Image<'_>,
        rect: Option<Rect>,
    ) -> Result<()> {
        let full = Rect {
            left: 0,
            top: 0,
            right: image.width() as i32,
            bottom: image.height() as i32,
        };
        let rect = match rect {
            Some(rect) if rect.width() > 0 && rect.height() > 0 => rect,
            _ => full,
        };
        if rect.width() <= 0 || rect.height() <= 0 {
            return Ok(());
        }

        let bottom = region.y as i32 as i64 + rect.bottom as i64;
        self.ensure_page_height(bottom);

        let page = self.page.as_mut().ok_or(DecodeError::MissingReference)?;
        let x = region.x as i32 as i64 + rect.left as i64;
        let y = region.y as i32 as i64 + rect.top as i64;
        let op = ComposeOp::from_bits(region.flags & 0x03);
        if !image.compose_to_with_rect(page, x, y, rect, op) {
            bail!(DecodeError::DecodeInconsistency);
        }
        Ok(())
    }

    /// Grow the page to hold `target` rows when it is striped and owned.
    fn ensure_page_height(&mut self, target: i64) {
        let Some(page) = self.page.as_mut() else {
            return;
        };
        if target <= page.height() as i64 || target > u32::MAX as i64 {
            return;
        }
        if self.buf_specified {
            return;
        }
        let Some(info) = self.page_infos.last() else {
            return;
        };
        if !info.grows_by_stripes() {
            return;
        }
        page.expand(target as u32, info.default_pixel);
    }
}

/// Look up a previously decoded segment, searching the globals context
/// first, then this stream's segments.
fn find_segment<'s>(
    segments: &'s [Segment],
    globals: Option<&'s Context<'_>>,
    number: u32,
) -> Option<&'s Segment> {
    if let Some(globals) = globals {
        if let Some(found) = find_segment(&globals.segments, None, number) {
            return Some(found);
        }
    }
    segments.iter().find(|segment| segment.number == number)
}

/// The `index`-th custom Huffman table among a segment's referred `Tables`
/// segments.
fn find_referred_table<'s>(
    segment: &Segment,
    index: usize,
    segments: &'s [Segment],
    globals: Option<&'s Context<'_>>,
) -> Result<&'s HuffmanTable> {
    let mut seen = 0;
    for &referred in &segment.referred_to {
        if let Some(found) = find_segment(segments, globals, referred) {
            if found.flags.segment_type() == SEGMENT_TABLES {
                if seen == index {
                    return found
                        .result
                        .huffman_table()
                        .ok_or(DecodeError::MissingReference);
                }
                seen += 1;
            }
        }
    }
    Err(DecodeError::MissingReference)
}

/// Select the symbol dictionary's Huffman tables (7.4.2.1.6).
fn select_symbol_dict_tables<'s>(
    flags: u16,
    refagg: bool,
    segment: &Segment,
    segments: &'s [Segment],
    globals: Option<&'s Context<'_>>,
) -> Result<SymbolDictionaryTables<'s>> {
    let mut custom_index = 0;
    let next_custom = |used: &mut usize| {
        let table = find_referred_table(segment, *used, segments, globals);
        *used += 1;
        table
    };

    let delta_height = match (flags >> 2) & 0x0003 {
        0 => standard_table(4)?,
        1 => standard_table(5)?,
        3 => next_custom(&mut custom_index)?,
        _ => bail!(DecodeError::Unsupported),
    };
    let delta_width = match (flags >> 4) & 0x0003 {
        0 => standard_table(2)?,
        1 => standard_table(3)?,
        3 => next_custom(&mut custom_index)?,
        _ => bail!(DecodeError::Unsupported),
    };
    let bitmap_size = if (flags >> 6) & 0x0001 == 0 {
        standard_table(1)?
    } else {
        next_custom(&mut custom_index)?
    };
    let aggregate_instances = if !refagg || (flags >> 7) & 0x0001 == 0 {
        standard_table(1)?
    } else {
        next_custom(&mut custom_index)?
    };

    Ok(SymbolDictionaryTables {
        delta_height,
        delta_width,
        bitmap_size,
        aggregate_instances,
    })
}

/// Select the text region's Huffman tables (7.4.3.1.6).
fn select_text_region_tables<'s>(
    flags: u16,
    segment: &Segment,
    segments: &'s [Segment],
    globals: Option<&'s Context<'_>>,
) -> Result<TextRegionTables<'s>> {
    let mut custom_index = 0;
    let next_custom = |used: &mut usize| {
        let table = find_referred_table(segment, *used, segments, globals);
        *used += 1;
        table
    };

    let first_s = match flags & 0x0003 {
        0 => standard_table(6)?,
        1 => standard_table(7)?,
        3 => next_custom(&mut custom_index)?,
        _ => bail!(DecodeError::Unsupported),
    };
    let delta_s = match (flags >> 2) & 0x0003 {
        0 => standard_table(8)?,
        1 => standard_table(9)?,
        2 => standard_table(10)?,
        3 => next_custom(&mut custom_index)?,
        _ => unreachable!(),
    };
    let delta_t = match (flags >> 4) & 0x0003 {
        0 => standard_table(11)?,
        1 => standard_table(12)?,
        2 => standard_table(13)?,
        3 => next_custom(&mut custom_index)?,
        _ => unreachable!(),
    };
    let refinement_dw = match (flags >> 6) & 0x0003 {
        0 => standard_table(14)?,
        1 => standard_table(15)?,
        3 => next_custom(&mut custom_index)?,
        _ => bail!(DecodeError::Unsupported),
    };
    let refinement_dh = match (flags >> 8) & 0x0003 {
        0 => standard_table(14)?,
        1 => standard_table(15)?,
        3 => next_custom(&mut custom_index)?,
        _ => bail!(DecodeError::Unsupported),
    };
    let refinement_dx = match (flags >> 10) & 0x0003 {
        0 => standard_table(14)?,
        1 => standard_table(15)?,
        3 => next_custom(&mut custom_index)?,
        _ => bail!(DecodeError::Unsupported),
    };
    let refinement_dy = match (flags >> 12) & 0x0003 {
        0 => standard_table(14)?,
        1 => standard_table(15)?,
        3 => next_custom(&mut custom_index)?,
        _ => bail!(DecodeError::Unsupported),
    };
    let refinement_size = if (flags >> 14) & 0x0001 == 0 {
        standard_table(1)?
    } else {
        next_custom(&mut custom_index)?
    };

    Ok(TextRegionTables {
        first_s,
        delta_s,
        delta_t,
        refinement_dw,
        refinement_dh,
        refinement_dx,
        refinement_dy,
        refinement_size,
    })
}

/// Cache lookup: on a hit the entry moves to the front and the caller gets
/// its own deep copy, so the cache can never be mutated through aliases.
fn cache_lookup(
    cache: &Rc<RefCell<Vec<CacheEntry>>>,
    key: CacheKey,
) -> Option<SymbolDictionary> {
    let mut entries = cache.borrow_mut();
    let index = entries.iter().position(|entry| entry.key == key)?;
    if index > 0 {
        let entry = entries.remove(index);
        entries.insert(0, entry);
    }
    Some(entries[0].dict.deep_copy())
}

/// Cache store: most recently used first, evicting beyond the capacity.
fn cache_store(cache: &Rc<RefCell<Vec<CacheEntry>>>, key: CacheKey, dict: SymbolDictionary) {
    let mut entries = cache.borrow_mut();
    entries.retain(|entry| entry.key != key);
    entries.insert(0, CacheEntry { key, dict });
    entries.truncate(SYMBOL_DICT_CACHE_SIZE);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_pixel_dict() -> SymbolDictionary {
        let mut image = Image::new(1, 1).unwrap();
        image.set_pixel(0, 0, 1);
        SymbolDictionary::from_symbols(vec![Some(image)])
    }

    #[test]
    fn compose_expands_a_striped_page() {
        let document = DocumentContext::new();
        let mut ctx = Context::new(&[], 0, document.cache(), false);
        ctx.page = Some(Image::new(4, 4).unwrap());
        ctx.page_infos.push(PageInfo {
            width: 4,
            height: 4,
            default_pixel: false,
            striped: true,
            max_stripe_size: 0,
        });
        ctx.in_page = true;

        let mut source = Image::new(2, 2).unwrap();
        source.set_pixel(0, 0, 1);

        let region = RegionInfo {
            width: 2,
            height: 2,
            x: 0,
            y: 3,
            flags: 0,
        };
        ctx.compose_region(region, &source, None).unwrap();

        let page = ctx.page.as_ref().unwrap();
        assert_eq!(page.height(), 5);
        assert_eq!(page.pixel(0, 3), 1);
        // The freshly grown row keeps the page default pixel.
        assert_eq!(page.pixel(1, 4), 0);
    }

    #[test]
    fn bounded_pages_do_not_grow() {
        let document = DocumentContext::new();
        let mut ctx = Context::new(&[], 0, document.cache(), false);
        ctx.page = Some(Image::new(4, 4).unwrap());
        ctx.page_infos.push(PageInfo {
            width: 4,
            height: 4,
            default_pixel: false,
            striped: false,
            max_stripe_size: 0,
        });

        ctx.ensure_page_height(6);
        assert_eq!(ctx.page.as_ref().unwrap().height(), 4);
    }

    #[test]
    fn cached_symbol_dictionaries_are_reused_and_isolated() {
        let document = DocumentContext::new();
        let key = CacheKey {
            stream_key: 42,
            data_offset: 0,
        };
        cache_store(&document.cache, key, one_pixel_dict());

        // SDHUFF, no exported and no new symbols: only the parameter
        // fields exist, the decode itself is skipped on the cache hit.
        let data = [
            0x00, 0x01, // flags: SDHUFF
            0x00, 0x00, 0x00, 0x00, // SDNUMEXSYMS
            0x00, 0x00, 0x00, 0x00, // SDNUMNEWSYMS
        ];
        let mut ctx = Context::new(&data, 42, document.cache(), true);

        let mut segment = Segment {
            key: 42,
            ..Segment::default()
        };
        ctx.parse_symbol_dict(&mut segment).unwrap();

        let dict = segment.result.symbol_dict().expect("cache hit attaches a dictionary");
        assert_eq!(dict.num_symbols(), 1);
        assert_eq!(dict.symbol(0).unwrap().pixel(0, 0), 1);

        // The parameter bytes were consumed even though the decode was
        // skipped.
        assert_eq!(ctx.stream.offset(), data.len());

        // Mutating the attached copy must not reach the cache.
        if let SegmentResult::SymbolDict(dict) = &mut segment.result {
            dict.symbol_mut(0).unwrap().set_pixel(0, 0, 0);
        }
        let entries = document.cache.borrow();
        assert_eq!(entries[0].dict.symbol(0).unwrap().pixel(0, 0), 1);
    }

    #[test]
    fn cache_keeps_the_two_most_recent_entries() {
        let document = DocumentContext::new();
        for offset in 0..3 {
            let key = CacheKey {
                stream_key: 1,
                data_offset: offset,
            };
            cache_store(&document.cache, key, one_pixel_dict());
        }

        let entries = document.cache.borrow();
        assert_eq!(entries.len(), SYMBOL_DICT_CACHE_SIZE);
        assert_eq!(entries[0].key.data_offset, 2);
        assert_eq!(entries[1].key.data_offset, 1);
        drop(entries);

        // A hit on the older entry moves it to the front.
        let key = CacheKey {
            stream_key: 1,
            data_offset: 1,
        };
        assert!(cache_lookup(&document.cache, key).is_some());
        assert_eq!(document.cache.borrow()[0].key.data_offset, 1);
    }

    #[test]
    fn segment_header_example_short_form() {
        // The 7.2.8 worked example: segment 32, type 6, three referred
        // segments, page 4 (a data length field is appended).
        let data = [
            0x00, 0x00, 0x00, 0x20, // segment number 32
            0x86, // flags: type 6, deferred non-retain
            0x6B, // three referred segments plus retention bits
            0x02, 0x1E, 0x05, // referred numbers 2, 30, 5
            0x04, // page association 4
            0x00, 0x00, 0x00, 0x10, // data length 16
        ];
        let document = DocumentContext::new();
        let mut ctx = Context::new(&data, 0, document.cache(), false);
        let mut segment = Segment::default();
        ctx.parse_segment_header(&mut segment).unwrap();

        assert_eq!(segment.number, 32);
        assert_eq!(segment.flags.segment_type(), 6);
        assert!(segment.flags.deferred_non_retain());
        assert!(!segment.flags.long_page_association());
        assert_eq!(segment.referred_to, vec![2, 30, 5]);
        assert_eq!(segment.page_association, 4);
        assert_eq!(segment.data_length, 16);
        assert_eq!(segment.data_offset, data.len());
    }

    #[test]
    fn referred_segments_must_be_older() {
        let data = [
            0x00, 0x00, 0x00, 0x02, // segment number 2
            0x06, // type 6
            0x20, // one referred segment
            0x05, // referred number 5 >= 2
            0x01, 0x00, 0x00, 0x00, 0x00,
        ];
        let document = DocumentContext::new();
        let mut ctx = Context::new(&data, 0, document.cache(), false);
        let mut segment = Segment::default();
        assert_eq!(
            ctx.parse_segment_header(&mut segment).unwrap_err(),
            DecodeError::InvalidSegment
        );
    }

    #[test]
    fn long_form_referred_counts_are_bounded() {
        let data = [
            0x00, 0x00, 0x00, 0x02, // segment number
            0x06, // type
            0xE0, 0x00, 0x10, 0x00, // long form: 4096 referred segments
            0x01, 0x00, 0x00, 0x00, 0x00,
        ];
        let document = DocumentContext::new();
        let mut ctx = Context::new(&data, 0, document.cache(), false);
        let mut segment = Segment::default();
        assert_eq!(
            ctx.parse_segment_header(&mut segment).unwrap_err(),
            DecodeError::InvalidSegment
        );
    }
}
