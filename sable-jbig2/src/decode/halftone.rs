//! Halftone region decoding (T.88, 6.6).
//!
//! "This decoding procedure is used to decode a halftone region. A halftone
//! region consists of an array of cells, each of which is drawn with one of
//! the patterns from a pattern dictionary." (6.6.1)
//!
//! Gray values arrive as `gsbpp` Gray-coded bit-planes decoded MSB first;
//! each plane after the first is XOR-combined with the plane above it, and
//! the resulting per-cell indices select patterns placed along the rotated
//! halftone grid.

use crate::bitstream::Bitstream;
use crate::decode::generic::GenericRegionDecoder;
use crate::decode::pattern::PatternDictionary;
use crate::error::{DecodeError, Result, bail};
use crate::image::{ComposeOp, Image};
use crate::{ArithContext, ArithDecoder};

/// Parameters of one halftone region decode.
#[derive(Debug)]
pub(crate) struct HalftoneRegionDecoder {
    /// "HBW" / "HBH" - region size.
    pub(crate) width: u32,
    pub(crate) height: u32,
    /// "HMMR" - whether the bit-planes are MMR-coded.
    pub(crate) mmr: bool,
    /// "HTEMPLATE" - template for the plane decodes.
    pub(crate) template: u8,
    /// "HENABLESKIP" - whether off-region cells are skipped (6.6.5.1).
    pub(crate) enable_skip: bool,
    /// "HCOMBOP" - how patterns combine into the region.
    pub(crate) comb_op: ComposeOp,
    /// "HDEFPIXEL" - initial value of every region pixel.
    pub(crate) def_pixel: bool,
    /// "HGW" / "HGH" - grid size in cells.
    pub(crate) grid_width: u32,
    pub(crate) grid_height: u32,
    /// "HGX" / "HGY" - grid origin, in 1/256 pixel units after shifting.
    pub(crate) grid_x: i32,
    pub(crate) grid_y: i32,
    /// "HRX" / "HRY" - 256 times the halftone grid vector.
    pub(crate) grid_rx: u16,
    pub(crate) grid_ry: u16,
    /// "HPW" / "HPH" - pattern size.
    pub(crate) pattern_width: u8,
    pub(crate) pattern_height: u8,
}

impl HalftoneRegionDecoder {
    /// Decode the region with arithmetic-coded planes (6.6.5).
    pub(crate) fn decode_arith(
        &self,
        decoder: &mut ArithDecoder<'_>,
        contexts: &mut [ArithContext],
        patterns: &PatternDictionary,
    ) -> Result<Image<'static>> {
        let num_patterns = patterns.num_patterns();
        let planes_needed = gray_bits_per_pixel(num_patterns)?;

        let skip = if self.enable_skip {
            Some(self.compute_skip_bitmap()?)
        } else {
            None
        };

        // Table 23: the plane decodes share one generic decoder with
        // TPGDON = 0 and the standard halftone adaptive pixels.
        let mut generic = GenericRegionDecoder::new();
        generic.template = self.template;
        generic.tpgdon = false;
        generic.use_skip = self.enable_skip;
        generic.skip = skip;
        generic.width = self.grid_width;
        generic.height = self.grid_height;
        generic.at[0] = if self.template <= 1 { 3 } else { 2 };
        generic.at[1] = -1;
        if generic.template == 0 {
            generic.at[2] = -3;
            generic.at[3] = -1;
            generic.at[4] = 2;
            generic.at[5] = -2;
            generic.at[6] = -2;
            generic.at[7] = -2;
        }

        // "Decode GSPLANES[GSBPP - 1] ... GSPLANES[J] = GSPLANES[J + 1]
        // XOR GSPLANES[J]" (C.5)
        let mut planes: Vec<Option<Image<'static>>> = (0..planes_needed).map(|_| None).collect();
        for index in (0..planes_needed).rev() {
            let plane = generic.decode_arith(decoder, contexts)?;
            planes[index] = Some(plane);
            if index + 1 < planes_needed {
                let (current, above) = planes.split_at_mut(index + 1);
                let current = current[index].as_mut().ok_or(DecodeError::DecodeInconsistency)?;
                let above = above[0].as_ref().ok_or(DecodeError::DecodeInconsistency)?;
                if !above.compose_to(current, 0, 0, ComposeOp::Xor) {
                    bail!(DecodeError::DecodeInconsistency);
                }
            }
        }

        self.render(&planes, patterns)
    }

    /// Decode the region with MMR-coded planes.
    ///
    /// Each plane is byte-aligned and followed by a 3-byte gap before the
    /// next plane starts.
    pub(crate) fn decode_mmr(
        &self,
        stream: &mut Bitstream<'_>,
        patterns: &PatternDictionary,
    ) -> Result<Image<'static>> {
        let num_patterns = patterns.num_patterns();
        let planes_needed = gray_bits_per_pixel(num_patterns)?;

        let mut generic = GenericRegionDecoder::new();
        generic.mmr = true;
        generic.width = self.grid_width;
        generic.height = self.grid_height;

        let mut planes: Vec<Option<Image<'static>>> = (0..planes_needed).map(|_| None).collect();
        for index in (0..planes_needed).rev() {
            let plane = generic.start_decode_mmr(stream)?;
            stream.align_to_byte();
            stream.add_offset(3);

            planes[index] = Some(plane);
            if index + 1 < planes_needed {
                let (current, above) = planes.split_at_mut(index + 1);
                let current = current[index].as_mut().ok_or(DecodeError::DecodeInconsistency)?;
                let above = above[0].as_ref().ok_or(DecodeError::DecodeInconsistency)?;
                if !above.compose_to(current, 0, 0, ComposeOp::Xor) {
                    bail!(DecodeError::DecodeInconsistency);
                }
            }
        }

        self.render(&planes, patterns)
    }

    /// "If ((x + HPW <= 0) OR (x >= HBW) OR (y + HPH <= 0) OR (y >= HBH))
    /// then set HSKIP[n_g, m_g] = 1." (6.6.5.1)
    fn compute_skip_bitmap(&self) -> Result<Image<'static>> {
        let mut skip = Image::new(self.grid_width, self.grid_height)
            .ok_or(DecodeError::DimensionOverflow)?;

        for mg in 0..self.grid_height {
            for ng in 0..self.grid_width {
                let (x, y) = self.grid_cell_origin(mg, ng);
                let outside = x + (self.pattern_width as i64) <= 0
                    || x >= self.width as i64
                    || y + (self.pattern_height as i64) <= 0
                    || y >= self.height as i64;
                if outside {
                    skip.set_pixel(ng as i32, mg as i32, 1);
                }
            }
        }
        Ok(skip)
    }

    /// Tile the selected patterns onto the region (6.6.5.2).
    fn render(
        &self,
        planes: &[Option<Image<'static>>],
        patterns: &PatternDictionary,
    ) -> Result<Image<'static>> {
        let num_patterns = patterns.num_patterns();
        if num_patterns == 0 {
            bail!(DecodeError::MissingReference);
        }

        let mut region =
            Image::new(self.width, self.height).ok_or(DecodeError::DimensionOverflow)?;
        region.fill(self.def_pixel);

        for mg in 0..self.grid_height {
            for ng in 0..self.grid_width {
                let mut index = 0_u32;
                for (bit, plane) in planes.iter().enumerate() {
                    let plane = plane.as_ref().ok_or(DecodeError::DecodeInconsistency)?;
                    index |= plane.pixel(ng as i32, mg as i32) << bit;
                }
                // Gray values beyond the dictionary clamp to the last
                // pattern.
                if index >= num_patterns {
                    index = num_patterns - 1;
                }
                let pattern = patterns
                    .pattern(index)
                    .ok_or(DecodeError::DecodeInconsistency)?;

                let (x, y) = self.grid_cell_origin(mg, ng);
                pattern.compose_to(&mut region, x, y, self.comb_op);
            }
        }

        Ok(region)
    }

    /// "x = HGX + m_g x HRY + n_g x HRX; y = HGY + m_g x HRX - n_g x HRY"
    /// with an arithmetic shift by eight (6.6.5.2).
    fn grid_cell_origin(&self, mg: u32, ng: u32) -> (i64, i64) {
        let mg = mg as i64;
        let ng = ng as i64;
        let rx = self.grid_rx as i64;
        let ry = self.grid_ry as i64;
        let x = (self.grid_x as i64 + mg * ry + ng * rx) >> 8;
        let y = (self.grid_y as i64 + mg * rx - ng * ry) >> 8;
        (x, y)
    }
}

/// "Set HBPP to ceil(log2(HNUMPATS))." (6.6.5, step 3)
fn gray_bits_per_pixel(num_patterns: u32) -> Result<usize> {
    if num_patterns == 0 {
        bail!(DecodeError::MissingReference);
    }
    let mut bits = 1_u32;
    while (1_u32 << bits) < num_patterns {
        bits += 1;
    }
    Ok(bits as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::pattern::PatternDictionaryDecoder;

    fn two_pixel_patterns() -> PatternDictionary {
        // Pattern 0 has its top-left pixel set, pattern 1 its bottom-right
        // pixel. Built by slicing a hand-made collective bitmap.
        let mut collective = Image::new(4, 2).unwrap();
        collective.set_pixel(0, 0, 1);
        collective.set_pixel(3, 1, 1);

        let splitter = PatternDictionaryDecoder {
            pattern_width: 2,
            pattern_height: 2,
            gray_max: 1,
            ..Default::default()
        };
        splitter.split_collective_bitmap(&collective).unwrap()
    }

    fn plane_from_bits(width: u32, height: u32, bits: &[u32]) -> Image<'static> {
        let mut plane = Image::new(width, height).unwrap();
        for y in 0..height {
            for x in 0..width {
                plane.set_pixel(x as i32, y as i32, bits[(y * width + x) as usize]);
            }
        }
        plane
    }

    #[test]
    fn gray_plane_count_is_ceil_log2() {
        assert_eq!(gray_bits_per_pixel(2).unwrap(), 1);
        assert_eq!(gray_bits_per_pixel(3).unwrap(), 2);
        assert_eq!(gray_bits_per_pixel(4).unwrap(), 2);
        assert_eq!(gray_bits_per_pixel(5).unwrap(), 3);
        assert!(gray_bits_per_pixel(0).is_err());
    }

    #[test]
    fn render_places_patterns_on_an_axis_aligned_grid() {
        let patterns = two_pixel_patterns();
        let decoder = HalftoneRegionDecoder {
            width: 4,
            height: 4,
            mmr: false,
            template: 0,
            enable_skip: false,
            comb_op: ComposeOp::Or,
            def_pixel: false,
            grid_width: 2,
            grid_height: 2,
            grid_x: 0,
            grid_y: 0,
            grid_rx: 512, // one cell right per grid column
            grid_ry: 0,
            pattern_width: 2,
            pattern_height: 2,
        };

        // Index plane: cell (0,0) = 0, the rest = 1. With HRX = 512 and
        // HRY = 0 the cell origins are x = 2 * ng, y = 2 * m_g.
        let plane = plane_from_bits(2, 2, &[0, 1, 1, 1]);
        let region = decoder.render(&[Some(plane)], &patterns).unwrap();

        // Cell (0,0) uses pattern 0: pixel (0,0).
        assert_eq!(region.pixel(0, 0), 1);
        // Cell ng=1, mg=0 uses pattern 1: pixel at (2+1, 0+1).
        assert_eq!(region.pixel(3, 1), 1);
        // Cell ng=0, mg=1 uses pattern 1: pixel at (0+1, 2+1).
        assert_eq!(region.pixel(1, 3), 1);
        // Cell ng=1, mg=1 uses pattern 1: pixel at (2+1, 2+1).
        assert_eq!(region.pixel(3, 3), 1);
        // Pattern 0's pixel is the only one in its cell.
        assert_eq!(region.pixel(1, 1), 0);
    }

    #[test]
    fn gray_indices_clamp_to_the_pattern_count() {
        // Three patterns need two planes; plane bits 11 select index 3,
        // which clamps to 2.
        let mut collective = Image::new(6, 2).unwrap();
        collective.set_pixel(4, 0, 1); // pattern 2, pixel (0, 0)
        let splitter = PatternDictionaryDecoder {
            pattern_width: 2,
            pattern_height: 2,
            gray_max: 2,
            ..Default::default()
        };
        let patterns = splitter.split_collective_bitmap(&collective).unwrap();

        let decoder = HalftoneRegionDecoder {
            width: 2,
            height: 2,
            mmr: false,
            template: 0,
            enable_skip: false,
            comb_op: ComposeOp::Or,
            def_pixel: false,
            grid_width: 1,
            grid_height: 1,
            grid_x: 0,
            grid_y: 0,
            grid_rx: 256,
            grid_ry: 0,
            pattern_width: 2,
            pattern_height: 2,
        };

        let plane0 = plane_from_bits(1, 1, &[1]);
        let plane1 = plane_from_bits(1, 1, &[1]);
        let region = decoder
            .render(&[Some(plane0), Some(plane1)], &patterns)
            .unwrap();

        // Pattern 2's marker pixel lands at the cell origin.
        assert_eq!(region.pixel(0, 0), 1);
    }

    #[test]
    fn skip_bitmap_marks_cells_fully_outside_the_region() {
        let decoder = HalftoneRegionDecoder {
            width: 4,
            height: 4,
            mmr: false,
            template: 0,
            enable_skip: true,
            comb_op: ComposeOp::Or,
            def_pixel: false,
            grid_width: 3,
            grid_height: 1,
            grid_x: 0,
            grid_y: 0,
            grid_rx: 1024, // four pixels per cell: cells at x = 0, 4, 8
            grid_ry: 0,
            pattern_width: 2,
            pattern_height: 2,
        };

        let skip = decoder.compute_skip_bitmap().unwrap();
        assert_eq!(skip.pixel(0, 0), 0);
        // x = 4 is at the region edge: 4 >= width.
        assert_eq!(skip.pixel(1, 0), 1);
        assert_eq!(skip.pixel(2, 0), 1);
    }

    #[test]
    fn default_pixel_fills_uncovered_area() {
        let patterns = two_pixel_patterns();
        let decoder = HalftoneRegionDecoder {
            width: 3,
            height: 3,
            mmr: false,
            template: 0,
            enable_skip: false,
            comb_op: ComposeOp::Or,
            def_pixel: true,
            grid_width: 1,
            grid_height: 1,
            grid_x: 0,
            grid_y: 0,
            grid_rx: 256,
            grid_ry: 0,
            pattern_width: 2,
            pattern_height: 2,
        };

        let plane = plane_from_bits(1, 1, &[0]);
        let region = decoder.render(&[Some(plane)], &patterns).unwrap();
        // The uncovered bottom-right corner keeps the default value.
        assert_eq!(region.pixel(2, 2), 1);
        // OR with pattern 0 keeps the default inside the cell too.
        assert_eq!(region.pixel(1, 1), 1);
    }
}
