//! Generic refinement region decoding (T.88, 6.3).
//!
//! "This procedure decodes a refinement of a bitmap. It uses a reference
//! bitmap as one of its inputs." (6.3.1)
//!
//! The context for each pixel mixes already-decoded pixels of the current
//! bitmap with a 3x3 neighbourhood of the reference, offset by
//! `(reference_dx, reference_dy)`, plus two adaptive pixels in each bitmap
//! for template 0.

use crate::decode::refinement_context_size;
use crate::error::{DecodeError, Result, bail};
use crate::image::Image;
use crate::{ArithContext, ArithDecoder};

/// Parameters of one refinement region decode.
#[derive(Debug, Default)]
pub(crate) struct RefinementRegionDecoder {
    /// "GRTEMPLATE" - false selects the 13-pixel template 0, true the
    /// 10-pixel template 1 (6.3.5.3).
    pub(crate) template: bool,
    /// "TPGRON" - typical prediction for refinement (6.3.5.6).
    pub(crate) tpgron: bool,
    /// "GRW" / "GRH".
    pub(crate) width: u32,
    pub(crate) height: u32,
    /// "GRREFERENCEDX" / "GRREFERENCEDY".
    pub(crate) reference_dx: i32,
    pub(crate) reference_dy: i32,
    /// "GRAT" - adaptive pixel offsets, x/y interleaved; `grat[0..2]` reads
    /// the bitmap being decoded, `grat[2..4]` the reference.
    pub(crate) grat: [i32; 4],
}

impl RefinementRegionDecoder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Decode the refined bitmap against `reference`.
    pub(crate) fn decode(
        &self,
        decoder: &mut ArithDecoder<'_>,
        contexts: &mut [ArithContext],
        reference: &Image<'_>,
    ) -> Result<Image<'static>> {
        if contexts.len() != refinement_context_size(self.template) {
            bail!(DecodeError::DecodeInconsistency);
        }

        let mut image =
            Image::new(self.width, self.height).ok_or(DecodeError::DimensionOverflow)?;

        if !self.template {
            self.decode_template0(decoder, contexts, &mut image, reference)?;
        } else {
            self.decode_template1(decoder, contexts, &mut image, reference)?;
        }
        Ok(image)
    }

    /// The 13-pixel template 0 (Figure 12).
    fn decode_template0(
        &self,
        decoder: &mut ArithDecoder<'_>,
        contexts: &mut [ArithContext],
        image: &mut Image<'static>,
        reference: &Image<'_>,
    ) -> Result<()> {
        let dx = self.reference_dx;
        let dy = self.reference_dy;

        for y in 0..self.height as i32 {
            if self.tpgron {
                // The per-row typical bit is decoded at its fixed context
                // index and consumed (6.3.5.6).
                decoder.decode(&mut contexts[0x0010])?;
            }

            // Sliding registers: two pixels of the current row above, the
            // decoded bit, and three reference rows.
            let mut cur_above = image.pixel(1, y - 1);
            cur_above |= image.pixel(0, y - 1) << 1;
            let mut decoded = 0_u32;
            let mut ref_above = reference.pixel(1 - dx, y - dy - 1);
            ref_above |= reference.pixel(-dx, y - dy - 1) << 1;
            let mut ref_row = reference.pixel(1 - dx, y - dy);
            ref_row |= reference.pixel(-dx, y - dy) << 1;
            ref_row |= reference.pixel(-dx - 1, y - dy) << 2;
            let mut ref_below = reference.pixel(1 - dx, y - dy + 1);
            ref_below |= reference.pixel(-dx, y - dy + 1) << 1;
            ref_below |= reference.pixel(-dx - 1, y - dy + 1) << 2;

            for x in 0..self.width as i32 {
                let mut context = ref_below;
                context |= ref_row << 3;
                context |= ref_above << 6;
                context |=
                    reference.pixel(x + self.grat[2] - dx, y + self.grat[3] - dy) << 8;
                context |= decoded << 9;
                context |= cur_above << 10;
                context |= image.pixel(x + self.grat[0], y + self.grat[1]) << 12;

                let bit = decoder.decode(&mut contexts[context as usize])?;
                image.set_pixel(x, y, bit);

                cur_above = ((cur_above << 1) | image.pixel(x + 2, y - 1)) & 0x03;
                decoded = ((decoded << 1) | bit) & 0x01;
                ref_above =
                    ((ref_above << 1) | reference.pixel(x - dx + 2, y - dy - 1)) & 0x03;
                ref_row = ((ref_row << 1) | reference.pixel(x - dx + 2, y - dy)) & 0x07;
                ref_below =
                    ((ref_below << 1) | reference.pixel(x - dx + 2, y - dy + 1)) & 0x07;
            }
        }
        Ok(())
    }

    /// The 10-pixel template 1 (Figure 13).
    fn decode_template1(
        &self,
        decoder: &mut ArithDecoder<'_>,
        contexts: &mut [ArithContext],
        image: &mut Image<'static>,
        reference: &Image<'_>,
    ) -> Result<()> {
        let dx = self.reference_dx;
        let dy = self.reference_dy;

        for y in 0..self.height as i32 {
            if self.tpgron {
                decoder.decode(&mut contexts[0x0004])?;
            }

            let mut cur_above = image.pixel(1, y - 1);
            cur_above |= image.pixel(0, y - 1) << 1;
            let mut ref_row = reference.pixel(1 - dx, y - dy);
            ref_row |= reference.pixel(-dx, y - dy) << 1;

            for x in 0..self.width as i32 {
                let mut context = ref_row;
                context |= cur_above << 2;
                context |=
                    reference.pixel(x + self.grat[2] - dx, y + self.grat[3] - dy) << 4;
                context |= image.pixel(x + self.grat[0], y + self.grat[1]) << 5;

                let bit = decoder.decode(&mut contexts[context as usize])?;
                image.set_pixel(x, y, bit);

                cur_above = ((cur_above << 1) | image.pixel(x + 2, y - 1)) & 0x07;
                ref_row = ((ref_row << 1) | reference.pixel(x - dx + 2, y - dy)) & 0x03;
            }
        }
        Ok(())
    }
}
