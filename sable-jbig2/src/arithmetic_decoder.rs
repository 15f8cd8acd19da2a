//! The arithmetic decoder (T.88, Annex E).
//!
//! "The arithmetic decoding procedure receives an arithmetically coded bit
//! sequence and an associated sequence of context labels, and reconstructs
//! the original string of binary symbols." (E.1.1)
//!
//! The decoder snapshots the stream data and byte offset at construction
//! and advances its own pointer from there; once a segment's arithmetic
//! body is finished, the dispatcher re-synchronises the shared bitstream
//! from [`ArithDecoder::offset`]. Beyond the registers of Table E.1 it
//! tracks how often the decoder has run past the logical end of the data,
//! so that corrupt streams asking for ever more bits fail with
//! [`DecodeError::ArithmeticExhausted`] instead of looping.

use crate::bitstream::Bitstream;
use crate::error::{DecodeError, Result};

/// "A-register" initial value (E.3.5).
const DEFAULT_A_VALUE: u32 = 0x8000;

/// Progress of the underlying byte stream through its end markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    DataAvailable,
    DecodingFinished,
    Looping,
}

/// Arithmetic decoder context (E.2.4).
///
/// "Each context has associated with it an index, I(CX), which identifies a
/// particular probability estimate and its associated MPS value." (E.2.4)
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ArithContext {
    /// "I(CX) - Index for context CX"
    pub(crate) state: u8,
    /// "MPS(CX) - The sense of MPS for context CX"
    pub(crate) mps: bool,
}

impl ArithContext {
    #[inline(always)]
    fn mps_value(&self) -> u32 {
        self.mps as u32
    }

    #[inline(always)]
    fn take_lps(&mut self, qe: &QeData) -> u32 {
        let decision = (!self.mps) as u32;
        // "SWITCH(I(CX)) = 1?" -> "MPS(CX) = 1 - MPS(CX)" (Figure E.17)
        if qe.switch {
            self.mps = !self.mps;
        }
        self.state = qe.nlps;
        decision
    }

    #[inline(always)]
    fn take_mps(&mut self, qe: &QeData) -> u32 {
        self.state = qe.nmps;
        self.mps_value()
    }
}

/// The arithmetic decoder state (E.3).
///
/// The decoder advances its own cursor over the stream's data; callers
/// re-synchronise the shared bitstream from [`ArithDecoder::offset`] once
/// the segment's arithmetic body is done.
#[derive(Debug, Clone)]
pub(crate) struct ArithDecoder<'a> {
    /// "BP - A pointer to the compressed data"
    stream: Bitstream<'a>,
    /// "B - The byte pointed to by BP"
    b: u8,
    /// "Chigh and Clow can be thought of as one 32-bit C-register" (E.3.1)
    c: u32,
    /// "A-register" (E.3.1)
    a: u32,
    /// "CT - The bit counter"
    ct: u32,
    state: StreamState,
    complete: bool,
}

impl<'a> ArithDecoder<'a> {
    /// Start a decoder at the bitstream's current byte offset (INITDEC,
    /// E.3.5).
    pub(crate) fn new(stream: &Bitstream<'a>) -> Self {
        let mut decoder = ArithDecoder {
            stream: stream.clone(),
            b: 0,
            c: 0,
            a: 0,
            ct: 0,
            state: StreamState::DataAvailable,
            complete: false,
        };

        // "BP = BPST; C = (B XOR 0xFF) << 16; BYTEIN;
        //  C = C << 7; CT = CT - 7; A = 0x8000" (Figure G.1)
        decoder.b = decoder.stream.peek_byte_arith();
        decoder.c = ((decoder.b ^ 0xFF) as u32) << 16;
        decoder.byte_in();
        decoder.c <<= 7;
        decoder.ct = decoder.ct.saturating_sub(7);
        decoder.a = DEFAULT_A_VALUE;
        decoder
    }

    /// The byte offset one past the data consumed so far, relative to the
    /// start of the underlying stream.
    pub(crate) fn offset(&self) -> usize {
        self.stream.offset()
    }

    /// Whether the decoder has drained the logical stream.
    #[inline(always)]
    pub(crate) fn is_complete(&self) -> bool {
        self.complete
    }

    /// The DECODE procedure (E.3.2, Figure G.2): one binary decision using
    /// the supplied context.
    #[inline(always)]
    pub(crate) fn decode(&mut self, cx: &mut ArithContext) -> Result<u32> {
        if self.complete {
            return Err(DecodeError::ArithmeticExhausted);
        }

        let qe = &QE_TABLE[cx.state as usize];

        // "A = A - Qe(I(CX))"
        self.a -= qe.qe as u32;

        // "Chigh < A?"
        if (self.c >> 16) < self.a {
            // "A AND 0x8000 = 0?"
            if self.a & DEFAULT_A_VALUE != 0 {
                return Ok(cx.mps_value());
            }

            // MPS_EXCHANGE (Figure E.16) followed by RENORMD.
            let decision = if self.a < qe.qe as u32 {
                cx.take_lps(qe)
            } else {
                cx.take_mps(qe)
            };
            self.renormalize();
            return Ok(decision);
        }

        // "Chigh = Chigh - A" followed by LPS_EXCHANGE (Figure E.17).
        self.c -= self.a << 16;
        let decision = if self.a < qe.qe as u32 {
            cx.take_mps(qe)
        } else {
            cx.take_lps(qe)
        };
        self.a = qe.qe as u32;
        self.renormalize();
        Ok(decision)
    }

    /// The RENORMD procedure (E.3.3, Figure E.18).
    #[inline(always)]
    fn renormalize(&mut self) {
        loop {
            if self.ct == 0 {
                self.byte_in();
            }
            self.a <<= 1;
            self.c <<= 1;
            self.ct -= 1;
            if self.a & DEFAULT_A_VALUE != 0 {
                return;
            }
        }
    }

    /// The BYTEIN procedure (E.3.4, Figure G.3).
    ///
    /// "This procedure reads in one byte of data, compensating for any
    /// stuff bits following the 0xFF byte in the process." (E.3.4)
    #[inline(always)]
    fn byte_in(&mut self) {
        if self.b == 0xFF {
            // "B1 > 0x8F?" - "If B1 exceeds 0x8F, then B1 must be one of
            // the marker codes."
            if self.stream.next_byte_arith() > 0x8F {
                self.ct = 8;
                // The marker is never consumed; each pass over it moves the
                // stream one step closer to exhaustion.
                self.state = match self.state {
                    StreamState::DataAvailable => StreamState::DecodingFinished,
                    StreamState::DecodingFinished => StreamState::Looping,
                    StreamState::Looping => {
                        self.complete = true;
                        StreamState::Looping
                    }
                };
            } else {
                self.stream.add_offset(1);
                self.b = self.stream.peek_byte_arith();
                self.c = self
                    .c
                    .wrapping_add(0xFE00)
                    .wrapping_sub((self.b as u32) << 9);
                self.ct = 7;
            }
        } else {
            self.stream.add_offset(1);
            self.b = self.stream.peek_byte_arith();
            self.c = self
                .c
                .wrapping_add(0xFF00)
                .wrapping_sub((self.b as u32) << 8);
            self.ct = 8;
        }

        if !self.stream.in_bounds() {
            self.complete = true;
        }
    }
}

/// Qe value table entry (Table E.1).
#[derive(Debug, Clone, Copy)]
struct QeData {
    /// "Qe_Value" - the probability estimate.
    qe: u16,
    /// "NMPS" - next index if MPS is coded.
    nmps: u8,
    /// "NLPS" - next index if LPS is coded.
    nlps: u8,
    /// "SWITCH" - MPS/LPS symbol switch.
    switch: bool,
}

macro_rules! qe {
    ($($qe:expr, $nmps:expr, $nlps:expr, $switch:expr),+ $(,)?) => {
        [
            $(
                QeData {
                    qe: $qe,
                    nmps: $nmps,
                    nlps: $nlps,
                    switch: $switch,
                }
            ),+
        ]
    };
}

/// "Table E.1 - Qe values and probability estimation process"
#[rustfmt::skip]
static QE_TABLE: [QeData; 47] = qe!(
    // Index  Qe_Value  NMPS  NLPS  SWITCH
    /*  0 */ 0x5601,    1,    1,    true,
    /*  1 */ 0x3401,    2,    6,    false,
    /*  2 */ 0x1801,    3,    9,    false,
    /*  3 */ 0x0AC1,    4,    12,   false,
    /*  4 */ 0x0521,    5,    29,   false,
    /*  5 */ 0x0221,    38,   33,   false,
    /*  6 */ 0x5601,    7,    6,    true,
    /*  7 */ 0x5401,    8,    14,   false,
    /*  8 */ 0x4801,    9,    14,   false,
    /*  9 */ 0x3801,    10,   14,   false,
    /* 10 */ 0x3001,    11,   17,   false,
    /* 11 */ 0x2401,    12,   18,   false,
    /* 12 */ 0x1C01,    13,   20,   false,
    /* 13 */ 0x1601,    29,   21,   false,
    /* 14 */ 0x5601,    15,   14,   true,
    /* 15 */ 0x5401,    16,   14,   false,
    /* 16 */ 0x5101,    17,   15,   false,
    /* 17 */ 0x4801,    18,   16,   false,
    /* 18 */ 0x3801,    19,   17,   false,
    /* 19 */ 0x3401,    20,   18,   false,
    /* 20 */ 0x3001,    21,   19,   false,
    /* 21 */ 0x2801,    22,   19,   false,
    /* 22 */ 0x2401,    23,   20,   false,
    /* 23 */ 0x2201,    24,   21,   false,
    /* 24 */ 0x1C01,    25,   22,   false,
    /* 25 */ 0x1801,    26,   23,   false,
    /* 26 */ 0x1601,    27,   24,   false,
    /* 27 */ 0x1401,    28,   25,   false,
    /* 28 */ 0x1201,    29,   26,   false,
    /* 29 */ 0x1101,    30,   27,   false,
    /* 30 */ 0x0AC1,    31,   28,   false,
    /* 31 */ 0x09C1,    32,   29,   false,
    /* 32 */ 0x08A1,    33,   30,   false,
    /* 33 */ 0x0521,    34,   31,   false,
    /* 34 */ 0x0441,    35,   32,   false,
    /* 35 */ 0x02A1,    36,   33,   false,
    /* 36 */ 0x0221,    37,   34,   false,
    /* 37 */ 0x0141,    38,   35,   false,
    /* 38 */ 0x0111,    39,   36,   false,
    /* 39 */ 0x0085,    40,   37,   false,
    /* 40 */ 0x0049,    41,   38,   false,
    /* 41 */ 0x0025,    42,   39,   false,
    /* 42 */ 0x0015,    43,   40,   false,
    /* 43 */ 0x0009,    44,   41,   false,
    /* 44 */ 0x0005,    45,   42,   false,
    /* 45 */ 0x0001,    45,   43,   false,
    /* 46 */ 0x5601,    46,   46,   false,
);
