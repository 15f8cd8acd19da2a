//! Pattern dictionary decoding (T.88, 6.7).
//!
//! "This decoding procedure is used to decode a pattern dictionary. The
//! pattern dictionary consists of a set of fixed-size patterns, which may
//! be used by a halftone region." (6.7.1)

use crate::bitstream::Bitstream;
use crate::decode::generic::GenericRegionDecoder;
use crate::error::{DecodeError, Result, bail};
use crate::image::{Image, MAX_IMAGE_SIZE};
use crate::{ArithContext, ArithDecoder};

/// A decoded pattern dictionary: `gray_max + 1` patterns of `hd_pw` by
/// `hd_ph` pixels each, indexed by gray value.
#[derive(Debug)]
pub struct PatternDictionary {
    patterns: Vec<Image<'static>>,
}

impl PatternDictionary {
    /// The number of patterns.
    pub fn num_patterns(&self) -> u32 {
        self.patterns.len() as u32
    }

    /// The pattern for the given gray value.
    pub fn pattern(&self, index: u32) -> Option<&Image<'static>> {
        self.patterns.get(index as usize)
    }
}

/// Parameters of one pattern dictionary decode.
#[derive(Debug, Default)]
pub(crate) struct PatternDictionaryDecoder {
    /// "HDMMR" - whether the collective bitmap is MMR-coded.
    pub(crate) mmr: bool,
    /// "HDPW" / "HDPH" - pattern width and height.
    pub(crate) pattern_width: u8,
    pub(crate) pattern_height: u8,
    /// "GRAYMAX" - the largest gray value; the dictionary holds
    /// `GRAYMAX + 1` patterns.
    pub(crate) gray_max: u32,
    /// "HDTEMPLATE" - template for the generic decoding procedure.
    pub(crate) template: u8,
}

impl PatternDictionaryDecoder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Decode the dictionary with arithmetic coding (6.7.5).
    pub(crate) fn decode_arith(
        &self,
        decoder: &mut ArithDecoder<'_>,
        contexts: &mut [ArithContext],
    ) -> Result<PatternDictionary> {
        let mut generic = self.collective_decoder()?;

        // "Decode the collective bitmap using a generic region decoding
        // procedure ... GBAT1 = -HDPW, GBAT2 = 0" (6.7.5, Table 27)
        generic.template = self.template;
        generic.tpgdon = false;
        generic.use_skip = false;
        generic.at[0] = -(self.pattern_width as i32);
        generic.at[1] = 0;
        if generic.template == 0 {
            generic.at[2] = -3;
            generic.at[3] = -1;
            generic.at[4] = 2;
            generic.at[5] = -2;
            generic.at[6] = -2;
            generic.at[7] = -2;
        }

        let collective = generic.decode_arith(decoder, contexts)?;
        self.split_collective_bitmap(&collective)
    }

    /// Decode the dictionary with MMR coding.
    pub(crate) fn decode_mmr(&self, stream: &mut Bitstream<'_>) -> Result<PatternDictionary> {
        let mut generic = self.collective_decoder()?;
        generic.mmr = true;
        let collective = generic.start_decode_mmr(stream)?;
        self.split_collective_bitmap(&collective)
    }

    /// Size and validate the collective bitmap: `(GRAYMAX + 1) x HDPW`
    /// pixels wide, `HDPH` pixels high (6.7.5, step 1).
    fn collective_decoder(&self) -> Result<GenericRegionDecoder> {
        if self.pattern_width == 0 || self.pattern_height == 0 {
            bail!(DecodeError::DimensionOverflow);
        }
        let count = self.gray_max as u64 + 1;
        let width = count * self.pattern_width as u64;
        if width > MAX_IMAGE_SIZE as u64 {
            bail!(DecodeError::DimensionOverflow);
        }

        let mut generic = GenericRegionDecoder::new();
        generic.width = width as u32;
        generic.height = self.pattern_height as u32;
        Ok(generic)
    }

    /// "Let the subimage of B_HDC consisting of HPH rows and columns
    /// HDPW x GRAY through HDPW x (GRAY + 1) - 1 be denoted B_P." (6.7.5)
    pub(crate) fn split_collective_bitmap(
        &self,
        collective: &Image<'static>,
    ) -> Result<PatternDictionary> {
        let count = self.gray_max + 1;
        let mut patterns = Vec::with_capacity(count as usize);
        for gray in 0..count {
            let x = (gray * self.pattern_width as u32) as i32;
            let pattern = collective
                .sub_image(x, 0, self.pattern_width as u32, self.pattern_height as u32)
                .ok_or(DecodeError::DimensionOverflow)?;
            patterns.push(pattern);
        }
        Ok(PatternDictionary { patterns })
    }
}
