//! Arithmetic integer decoding procedures (T.88, Annex A).
//!
//! "An invocation of an arithmetic integer decoding procedure involves
//! decoding a sequence of bits, where each bit is decoded using a context
//! formed by the bits decoded previously in this invocation." (A.1)

use crate::arithmetic_decoder::{ArithContext, ArithDecoder};
use crate::error::Result;

/// Prefix depths of Figure A.1: how many magnitude bits follow each unary
/// prefix, and the base value they start from.
const MAGNITUDE_CLASSES: [(u32, i64); 6] =
    [(2, 0), (4, 4), (6, 20), (8, 84), (12, 340), (32, 4436)];

/// An IAx integer decoder (A.2) with its own adaptive context bank.
///
/// "Each arithmetic integer decoding procedure requires 512 bytes of
/// storage for its context memory." (A.2)
pub(crate) struct IntegerDecoder {
    contexts: Vec<ArithContext>,
}

impl IntegerDecoder {
    pub(crate) fn new() -> Self {
        Self {
            contexts: vec![ArithContext::default(); 512],
        }
    }

    /// Decode one signed integer.
    ///
    /// Returns `Ok(None)` for the out-of-band value: either the encoded
    /// OOB condition ("OOB if S = 1 and V = 0", A.2) or a magnitude that
    /// does not fit a 32-bit signed integer.
    pub(crate) fn decode(&mut self, decoder: &mut ArithDecoder<'_>) -> Result<Option<i32>> {
        // "1) Set: PREV = 1" (A.2)
        let mut prev: u32 = 1;

        // Decode S, then walk the unary prefix of Figure A.1.
        let sign = self.decode_bit(decoder, &mut prev)?;

        let mut class = 0;
        while class < MAGNITUDE_CLASSES.len() - 1 {
            if self.decode_bit(decoder, &mut prev)? == 0 {
                break;
            }
            class += 1;
        }

        let (need_bits, base) = MAGNITUDE_CLASSES[class];
        let mut magnitude: u64 = 0;
        for _ in 0..need_bits {
            let bit = self.decode_bit(decoder, &mut prev)?;
            magnitude = (magnitude << 1) | bit as u64;
        }

        let value = base + magnitude as i64;
        if value > i32::MAX as i64 {
            return Ok(None);
        }

        // "The result ... is equal to: V if S = 0; -V if S = 1 and V > 0;
        // OOB if S = 1 and V = 0" (A.2)
        if sign == 0 {
            Ok(Some(value as i32))
        } else if value > 0 {
            Ok(Some(-(value as i32)))
        } else {
            Ok(None)
        }
    }

    /// Decode one bit and fold it into PREV.
    ///
    /// "If PREV < 256 set: PREV = (PREV << 1) OR D. Otherwise set:
    /// PREV = (((PREV << 1) OR D) AND 511) OR 256" (A.2)
    #[inline(always)]
    fn decode_bit(&mut self, decoder: &mut ArithDecoder<'_>, prev: &mut u32) -> Result<u32> {
        let bit = decoder.decode(&mut self.contexts[(*prev & 0x1FF) as usize])?;
        *prev = if *prev < 256 {
            (*prev << 1) | bit
        } else {
            (((*prev << 1) | bit) & 511) | 256
        };
        Ok(bit)
    }
}

/// The IAID symbol-ID decoder (A.3).
///
/// Reads a fixed number of bits through a tree of `2^len` contexts and
/// returns the node index with the leading 1 removed.
pub(crate) struct IaidDecoder {
    contexts: Vec<ArithContext>,
    code_len: u32,
}

impl IaidDecoder {
    pub(crate) fn new(code_len: u32) -> Self {
        Self {
            contexts: vec![ArithContext::default(); 1 << code_len],
            code_len,
        }
    }

    pub(crate) fn code_len(&self) -> u32 {
        self.code_len
    }

    pub(crate) fn decode(&mut self, decoder: &mut ArithDecoder<'_>) -> Result<u32> {
        // "PREV = 1; repeat SBSYMCODELEN times: decode a bit with
        // CX = IAID + PREV; PREV = (PREV << 1) OR bit" (A.3)
        let mut prev: u32 = 1;
        for _ in 0..self.code_len {
            let bit = decoder.decode(&mut self.contexts[prev as usize])?;
            prev = (prev << 1) | bit;
        }
        Ok(prev - (1 << self.code_len))
    }
}
