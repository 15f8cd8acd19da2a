/*!
A memory-safe, pure-Rust JBIG2 decoder.

`sable-jbig2` decodes JBIG2 bi-level images as specified in ITU-T T.88
(also known as ISO/IEC 14492). JBIG2 is commonly used in PDF documents for
compressing scanned text; PDF embeds raw segment streams, optionally
accompanied by a shared "globals" stream, and both forms are accepted here
alongside standalone files carrying the JBIG2 file header.

Decoding is segment driven: every segment of the globals stream and then
the source stream is parsed, dispatched to its decoding procedure, and its
result - a region bitmap, a symbol or pattern dictionary, or a custom
Huffman table - attached to the segment. Region segments compose onto the
page image, which is available from [`Decoder::page_image`] once a page
information segment has been seen.

# Example
```rust,no_run
use sable_jbig2::{Decoder, DecoderOptions};

let data = std::fs::read("image.jb2").unwrap();
let mut decoder = Decoder::new(DecoderOptions {
    src: &data,
    ..Default::default()
})
.unwrap();
decoder.decode_all().unwrap();

let page = decoder.page_image().unwrap();
println!("{}x{} image", page.width(), page.height());
```

# Progressive decoding
[`Decoder::first_page`] renders into a caller-owned buffer and consults an
optional [`PauseIndicator`] between decoded rows of generic regions; a
paused decode reports [`CodecStatus::ToBeContinued`] and resumes exactly
where it stopped via [`Decoder::continue_decoding`].

# Safety
This crate forbids unsafe code via a crate-level attribute.
*/

#![forbid(unsafe_code)]

mod arithmetic_decoder;
mod bitstream;
mod context;
mod decode;
mod decoder;
mod error;
mod file_header;
mod huffman_table;
mod image;
mod integer_decoder;
mod page_info;
mod segment;

pub(crate) use arithmetic_decoder::{ArithContext, ArithDecoder};

pub use context::DocumentContext;
pub use decode::pattern::PatternDictionary;
pub use decode::symbol::SymbolDictionary;
pub use decoder::{Decoder, DecoderOptions};
pub use error::{DecodeError, Result};
pub use huffman_table::HuffmanTable;
pub use image::{ComposeOp, Image};
pub use segment::{Segment, SegmentFlags, SegmentResult, SegmentState};

/// Processing status of a decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecStatus {
    /// Ready to decode.
    Ready,
    /// Decoding is suspended and can be resumed.
    ToBeContinued,
    /// Decoding has completed.
    Finished,
    /// Decoding failed; the decoder refuses further work.
    Error,
}

/// Consulted between decoded rows of a progressive generic-region decode;
/// returning `true` suspends the decoder.
pub trait PauseIndicator {
    /// Whether decoding should pause at the next opportunity.
    fn should_pause(&mut self) -> bool;
}
