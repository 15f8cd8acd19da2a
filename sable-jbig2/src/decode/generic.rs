//! Generic region decoding (T.88, 6.2).
//!
//! "This decoding procedure is used to decode a rectangular array of 0 or 1
//! values, which are coded one pixel at a time (i.e., it is used to decode
//! a bitmap using simple, generic, coding)." (6.2.1)
//!
//! The arithmetic path decodes row by row and may suspend between rows
//! when a pause indicator asks for it; `(loop_index, ltp)` plus the caller
//! owned context array and arithmetic decoder are all the state needed to
//! resume. Rows whose adaptive pixels sit at the standard positions are
//! decoded a byte at a time with sliding context registers; everything
//! else takes the per-pixel path.

use crate::bitstream::Bitstream;
use crate::decode::generic_context_size;
use crate::error::{DecodeError, Result, bail};
use crate::image::{Image, Rect};
use crate::{ArithContext, ArithDecoder, CodecStatus, PauseIndicator};

/// TPGDON context indices per template (Figures 8-11).
const SLTP_CONTEXT: [u32; 4] = [0x9B25, 0x0795, 0x00E5, 0x0195];

// Register constants for the per-pixel path, indexed by template 0..=2:
// where the row-above/two-above registers sit inside the context word and
// how wide they are.
const PIXEL_LINE1_SHIFT: [u32; 3] = [12, 9, 7];
const PIXEL_LINE1_MASK: [u32; 3] = [0x0007, 0x000F, 0x0007];
const PIXEL_LINE2_MASK: [u32; 3] = [0x001F, 0x001F, 0x000F];
const PIXEL_RESULT_MASK: [u32; 3] = [0x000F, 0x0007, 0x0003];

// Register constants for the byte-at-a-time path, indexed by template
// 0..=2. The context word is rebuilt incrementally: the reusable middle is
// kept, one fresh bit enters from each of the two rows above, and the just
// decoded bit enters at the bottom.
const BYTE_LINE1_PRELOAD: [u32; 3] = [6, 4, 1];
const BYTE_LINE1_MASK: [u32; 3] = [0xF800, 0x1E00, 0x0380];
const BYTE_LINE2_SHIFT: [u32; 3] = [0, 1, 3];
const BYTE_LINE2_MASK: [u32; 3] = [0x07F0, 0x01F8, 0x007C];
const BYTE_REUSE_MASK: [u32; 3] = [0x7BF7, 0x0EFB, 0x01BD];
const BYTE_LINE1_BIT: [u32; 3] = [0x0800, 0x0200, 0x0080];
const BYTE_LINE2_BIT: [u32; 3] = [0x0010, 0x0008, 0x0004];

/// Parameters and resumable row state of one generic region decode.
#[derive(Debug, Default)]
pub(crate) struct GenericRegionDecoder {
    /// "MMR" - whether the region is MMR-coded (6.2.6).
    pub(crate) mmr: bool,
    /// "TPGDON" - typical prediction for generic direct coding (6.2.5.7).
    pub(crate) tpgdon: bool,
    /// "USESKIP" - whether `skip` suppresses pixels (6.2.5.7).
    pub(crate) use_skip: bool,
    /// "GBTEMPLATE" (6.2.5.3).
    pub(crate) template: u8,
    /// "GBW" / "GBH".
    pub(crate) width: u32,
    pub(crate) height: u32,
    /// "SKIP" - pixels set here decode as 0 without touching the coder.
    pub(crate) skip: Option<Image<'static>>,
    /// "GBAT" - adaptive template pixel offsets, x/y interleaved.
    pub(crate) at: [i32; 8],

    replace_rect: Rect,
    loop_index: u32,
    ltp: u32,
}

impl GenericRegionDecoder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// The band of rows produced by the most recent decode step.
    pub(crate) fn replace_rect(&self) -> Rect {
        self.replace_rect
    }

    /// Decode the whole region in one call (used by the dictionary and
    /// halftone procedures, which never suspend).
    pub(crate) fn decode_arith(
        &mut self,
        decoder: &mut ArithDecoder<'_>,
        contexts: &mut [ArithContext],
    ) -> Result<Image<'static>> {
        let mut image = None;
        let status = self.start_decode_arith(&mut image, decoder, contexts, None)?;
        debug_assert_eq!(status, CodecStatus::Finished);
        image.ok_or(DecodeError::DimensionOverflow)
    }

    /// Begin a progressive arithmetic decode, allocating the destination.
    pub(crate) fn start_decode_arith(
        &mut self,
        image: &mut Option<Image<'static>>,
        decoder: &mut ArithDecoder<'_>,
        contexts: &mut [ArithContext],
        pause: Option<&mut dyn PauseIndicator>,
    ) -> Result<CodecStatus> {
        if image.is_none() {
            let fresh =
                Image::new(self.width, self.height).ok_or(DecodeError::DimensionOverflow)?;
            *image = Some(fresh);
        }

        self.loop_index = 0;
        self.ltp = 0;
        self.continue_decode(image, decoder, contexts, pause)
    }

    /// Resume a paused decode exactly where it left off.
    pub(crate) fn continue_decode(
        &mut self,
        image: &mut Option<Image<'static>>,
        decoder: &mut ArithDecoder<'_>,
        contexts: &mut [ArithContext],
        mut pause: Option<&mut dyn PauseIndicator>,
    ) -> Result<CodecStatus> {
        let image = image.as_mut().ok_or(DecodeError::DecodeInconsistency)?;
        if contexts.len() != generic_context_size(self.template) {
            bail!(DecodeError::DecodeInconsistency);
        }

        let start_line = self.loop_index;
        while self.loop_index < self.height {
            let row = self.loop_index;
            match self.template {
                0..=2 => {
                    if self.use_optimized_path() {
                        self.decode_byte_row(image, decoder, contexts, row)?;
                    } else {
                        self.decode_pixel_row(image, decoder, contexts, row)?;
                    }
                }
                _ => {
                    if self.use_optimized_path_template3() {
                        self.decode_byte_row_template3(image, decoder, contexts, row)?;
                    } else {
                        self.decode_pixel_row_template3(image, decoder, contexts, row)?;
                    }
                }
            }
            self.loop_index += 1;

            if let Some(p) = pause.as_deref_mut() {
                if self.loop_index < self.height && p.should_pause() {
                    self.replace_rect = Rect {
                        left: 0,
                        top: start_line as i32,
                        right: image.width() as i32,
                        bottom: self.loop_index as i32,
                    };
                    return Ok(CodecStatus::ToBeContinued);
                }
            }
        }

        self.replace_rect = Rect {
            left: 0,
            top: 0,
            right: image.width() as i32,
            bottom: image.height() as i32,
        };
        Ok(CodecStatus::Finished)
    }

    /// Decode an MMR-coded region (6.2.6) from the current bit position.
    ///
    /// "Pixels decoded by the MMR decoder having the value 'black' shall be
    /// treated as having the value 1" (6.2.6) - T.6 uses the opposite
    /// polarity, so the plane is inverted here at the component boundary.
    pub(crate) fn start_decode_mmr(&mut self, stream: &mut Bitstream<'_>) -> Result<Image<'static>> {
        let mut image =
            Image::new(self.width, self.height).ok_or(DecodeError::DimensionOverflow)?;

        let stride = image.stride();
        if stride * 8 < self.width as usize {
            bail!(DecodeError::MmrFailed);
        }

        let end_bit = sable_ccitt::decode_g4(
            stream.data(),
            stream.bit_position(),
            self.width,
            self.height,
            stride,
            image.bytes_mut(),
        );
        stream.set_bit_position(end_bit);

        for byte in image.bytes_mut() {
            *byte = !*byte;
        }

        self.replace_rect = Rect {
            left: 0,
            top: 0,
            right: image.width() as i32,
            bottom: image.height() as i32,
        };
        Ok(image)
    }

    /// The standard adaptive pixel placements admit the byte-at-a-time
    /// register paths; a skip image does not.
    fn use_optimized_path(&self) -> bool {
        if self.use_skip {
            return false;
        }
        match self.template {
            0 => self.at == [3, -1, -3, -1, 2, -2, -2, -2],
            1 => self.at[0] == 3 && self.at[1] == -1,
            2 => self.at[0] == 2 && self.at[1] == -1,
            _ => false,
        }
    }

    fn use_optimized_path_template3(&self) -> bool {
        self.at[0] == 2 && self.at[1] == -1 && !self.use_skip
    }

    /// Decode the TPGDON bit for this row and fold it into LTP.
    ///
    /// "Decode a bit using the arithmetic entropy coder ... Set:
    /// LTP = LTP XOR SLTP." (6.2.5.7)
    fn decode_typical_prediction(
        &mut self,
        decoder: &mut ArithDecoder<'_>,
        contexts: &mut [ArithContext],
    ) -> Result<()> {
        let index = SLTP_CONTEXT[self.template.min(3) as usize] as usize;
        let sltp = decoder.decode(&mut contexts[index])?;
        self.ltp ^= sltp;
        Ok(())
    }

    /// Per-pixel row decode for templates 0-2 (6.2.5.7).
    fn decode_pixel_row(
        &mut self,
        image: &mut Image<'static>,
        decoder: &mut ArithDecoder<'_>,
        contexts: &mut [ArithContext],
        row: u32,
    ) -> Result<()> {
        if self.tpgdon {
            self.decode_typical_prediction(decoder, contexts)?;
        }

        let h = row as i32;
        if self.ltp != 0 {
            // "If LTP = 1 then set every pixel of the current row of GBREG
            // equal to the corresponding pixel of the row immediately
            // above." (6.2.5.7)
            if h > 0 {
                image.copy_line(h, h - 1);
            }
            return Ok(());
        }

        let unopt = self.template as usize;
        let mod2 = (unopt % 2) as i32;
        let div2 = (unopt / 2) as i32;
        let shift = 4 - unopt as u32;

        // Seed the sliding registers from the two rows above. Out-of-range
        // rows read as zero (6.2.5.2).
        let mut line1 = image.pixel(1 + mod2, h - 2);
        line1 |= image.pixel(mod2, h - 2) << 1;
        if unopt == 1 {
            line1 |= image.pixel(0, h - 2) << 2;
        }
        let mut line2 = image.pixel(2 - div2, h - 1);
        line2 |= image.pixel(1 - div2, h - 1) << 1;
        if unopt < 2 {
            line2 |= image.pixel(0, h - 1) << 2;
        }
        let mut line3 = 0_u32;

        for w in 0..self.width as i32 {
            let mut bit = 0;
            if !self.skipped(w, h) {
                let mut context = line3;
                context |= image.pixel(w + self.at[0], h + self.at[1]) << shift;
                context |= line2 << (shift + 1);
                context |= line1 << PIXEL_LINE1_SHIFT[unopt];
                if unopt == 0 {
                    context |= image.pixel(w + self.at[2], h + self.at[3]) << 10;
                    context |= image.pixel(w + self.at[4], h + self.at[5]) << 11;
                    context |= image.pixel(w + self.at[6], h + self.at[7]) << 15;
                }
                bit = decoder.decode(&mut contexts[context as usize])?;
            }
            if bit != 0 {
                image.set_pixel(w, h, bit);
            }
            line1 = ((line1 << 1) | image.pixel(w + 2 + mod2, h - 2)) & PIXEL_LINE1_MASK[unopt];
            line2 = ((line2 << 1) | image.pixel(w + 3 - div2, h - 1)) & PIXEL_LINE2_MASK[unopt];
            line3 = ((line3 << 1) | bit) & PIXEL_RESULT_MASK[unopt];
        }
        Ok(())
    }

    /// Per-pixel row decode for template 3 (10-bit context).
    fn decode_pixel_row_template3(
        &mut self,
        image: &mut Image<'static>,
        decoder: &mut ArithDecoder<'_>,
        contexts: &mut [ArithContext],
        row: u32,
    ) -> Result<()> {
        if self.tpgdon {
            self.decode_typical_prediction(decoder, contexts)?;
        }

        let h = row as i32;
        if self.ltp != 0 {
            if h > 0 {
                image.copy_line(h, h - 1);
            }
            return Ok(());
        }

        let mut line1 = image.pixel(1, h - 1);
        line1 |= image.pixel(0, h - 1) << 1;
        let mut line2 = 0_u32;

        for w in 0..self.width as i32 {
            let mut bit = 0;
            if !self.skipped(w, h) {
                let mut context = line2;
                context |= image.pixel(w + self.at[0], h + self.at[1]) << 4;
                context |= line1 << 5;
                bit = decoder.decode(&mut contexts[context as usize])?;
            }
            if bit != 0 {
                image.set_pixel(w, h, bit);
            }
            line1 = ((line1 << 1) | image.pixel(w + 2, h - 1)) & 0x1F;
            line2 = ((line2 << 1) | bit) & 0x0F;
        }
        Ok(())
    }

    /// Byte-at-a-time row decode for templates 0-2 with standard adaptive
    /// pixels. The first two rows have no complete pair of rows above and
    /// take the per-pixel path.
    fn decode_byte_row(
        &mut self,
        image: &mut Image<'static>,
        decoder: &mut ArithDecoder<'_>,
        contexts: &mut [ArithContext],
        row: u32,
    ) -> Result<()> {
        if row <= 1 {
            return self.decode_pixel_row(image, decoder, contexts, row);
        }

        if self.tpgdon {
            self.decode_typical_prediction(decoder, contexts)?;
        }

        let h = row as usize;
        let stride = image.stride();
        let line_bytes = ((self.width as usize) + 7) >> 3;
        let bits_left = self.width as usize - (line_bytes - 1) * 8;
        let opt = self.template as usize;

        if self.ltp != 0 {
            image.copy_line(h as i32, h as i32 - 1);
            return Ok(());
        }

        let offset = h * stride;
        let (before, after) = image.bytes_mut().split_at_mut(offset);
        let line1 = &before[offset - 2 * stride..offset - stride];
        let line2 = &before[offset - stride..];
        let current = &mut after[..stride];

        let mut l1 = (line1[0] as u32) << BYTE_LINE1_PRELOAD[opt];
        let mut l2 = line2[0] as u32;
        let mut context =
            (l1 & BYTE_LINE1_MASK[opt]) | ((l2 >> BYTE_LINE2_SHIFT[opt]) & BYTE_LINE2_MASK[opt]);

        let last_byte = line_bytes - 1;
        for cc in 0..last_byte {
            l1 = (l1 << 8) | ((line1[cc + 1] as u32) << BYTE_LINE1_PRELOAD[opt]);
            l2 = (l2 << 8) | line2[cc + 1] as u32;
            let mut value = 0_u8;
            for k in (0..8).rev() {
                let bit = decoder.decode(&mut contexts[context as usize])?;
                value |= (bit as u8) << k;
                context = ((context & BYTE_REUSE_MASK[opt]) << 1)
                    | bit
                    | ((l1 >> k) & BYTE_LINE1_BIT[opt])
                    | ((l2 >> (k as u32 + BYTE_LINE2_SHIFT[opt])) & BYTE_LINE2_BIT[opt]);
            }
            current[cc] = value;
        }

        l1 <<= 8;
        l2 <<= 8;
        let mut value = 0_u8;
        for k in 0..bits_left {
            let bit = decoder.decode(&mut contexts[context as usize])?;
            value |= (bit as u8) << (7 - k);
            context = ((context & BYTE_REUSE_MASK[opt]) << 1)
                | bit
                | ((l1 >> (7 - k)) & BYTE_LINE1_BIT[opt])
                | ((l2 >> (7 + BYTE_LINE2_SHIFT[opt] as usize - k)) & BYTE_LINE2_BIT[opt]);
        }
        current[last_byte] = value;
        Ok(())
    }

    /// Byte-at-a-time row decode for template 3 with the standard adaptive
    /// pixel.
    fn decode_byte_row_template3(
        &mut self,
        image: &mut Image<'static>,
        decoder: &mut ArithDecoder<'_>,
        contexts: &mut [ArithContext],
        row: u32,
    ) -> Result<()> {
        if self.tpgdon {
            self.decode_typical_prediction(decoder, contexts)?;
        }

        let h = row as usize;
        let stride = image.stride();
        let line_bytes = ((self.width as usize) + 7) >> 3;
        let bits_left = self.width as usize - (line_bytes - 1) * 8;
        let last_byte = line_bytes - 1;

        if self.ltp != 0 {
            if h > 0 {
                image.copy_line(h as i32, h as i32 - 1);
            }
            return Ok(());
        }

        let offset = h * stride;
        let (before, after) = image.bytes_mut().split_at_mut(offset);
        let current = &mut after[..stride];

        if h > 0 {
            let prev = &before[offset - stride..];
            let mut line1 = prev[0] as u32;
            let mut context = (line1 >> 1) & 0x03F0;

            for cc in 0..last_byte {
                line1 = (line1 << 8) | prev[cc + 1] as u32;
                let mut value = 0_u8;
                for k in (0..8).rev() {
                    let bit = decoder.decode(&mut contexts[context as usize])?;
                    value |= (bit as u8) << k;
                    context =
                        ((context & 0x01F7) << 1) | bit | ((line1 >> (k + 1)) & 0x0010);
                }
                current[cc] = value;
            }

            line1 <<= 8;
            let mut value = 0_u8;
            for k in 0..bits_left {
                let bit = decoder.decode(&mut contexts[context as usize])?;
                value |= (bit as u8) << (7 - k);
                context = ((context & 0x01F7) << 1) | bit | ((line1 >> (8 - k)) & 0x0010);
            }
            current[last_byte] = value;
            return Ok(());
        }

        // First row: nothing above, the context builds purely from decoded
        // bits.
        let mut context = 0_u32;
        for cc in 0..last_byte {
            let mut value = 0_u8;
            for k in (0..8).rev() {
                let bit = decoder.decode(&mut contexts[context as usize])?;
                value |= (bit as u8) << k;
                context = ((context & 0x01F7) << 1) | bit;
            }
            current[cc] = value;
        }
        let mut value = 0_u8;
        for k in 0..bits_left {
            let bit = decoder.decode(&mut contexts[context as usize])?;
            value |= (bit as u8) << (7 - k);
            context = ((context & 0x01F7) << 1) | bit;
        }
        current[last_byte] = value;
        Ok(())
    }

    #[inline(always)]
    fn skipped(&self, x: i32, y: i32) -> bool {
        self.use_skip
            && self
                .skip
                .as_ref()
                .is_some_and(|skip| skip.pixel(x, y) != 0)
    }
}
