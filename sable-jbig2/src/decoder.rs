//! The top-level decoder facade.

use crate::context::{Context, DocumentContext};
use crate::error::{DecodeError, Result};
use crate::image::Image;
use crate::segment::Segment;
use crate::{CodecStatus, PauseIndicator};

/// Input streams for a [`Decoder`].
///
/// The source holds the main segment stream; the optional globals stream
/// carries shared segments (typically symbol dictionaries) decoded before
/// the source. Keys identify the streams for the document-wide symbol
/// dictionary cache; a key of zero disables caching for that stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecoderOptions<'a> {
    /// The main JBIG2 segment stream.
    pub src: &'a [u8],
    /// Identifies the source stream.
    pub src_key: u64,
    /// The shared globals stream, if any.
    pub globals: Option<&'a [u8]>,
    /// Identifies the globals stream.
    pub globals_key: u64,
}

/// A JBIG2 decoder over in-memory streams.
///
/// ```no_run
/// use sable_jbig2::{Decoder, DecoderOptions};
///
/// let data = std::fs::read("image.jb2").unwrap();
/// let mut decoder = Decoder::new(DecoderOptions {
///     src: &data,
///     ..Default::default()
/// }).unwrap();
/// decoder.decode_all().unwrap();
/// if let Some(page) = decoder.page_image() {
///     println!("{}x{} page", page.width(), page.height());
/// }
/// ```
pub struct Decoder<'a> {
    ctx: Context<'a>,
    error: Option<DecodeError>,
}

impl<'a> Decoder<'a> {
    /// Create a decoder with its own private document context.
    pub fn new(options: DecoderOptions<'a>) -> Result<Decoder<'a>> {
        Self::new_with_document(options, &DocumentContext::new())
    }

    /// Create a decoder sharing `document`'s symbol dictionary cache.
    ///
    /// Decoders created against the same document context and the same
    /// keyed globals stream reuse each other's decoded dictionaries.
    pub fn new_with_document(
        options: DecoderOptions<'a>,
        document: &DocumentContext,
    ) -> Result<Decoder<'a>> {
        let ctx = Context::create(
            options.src,
            options.src_key,
            options.globals,
            options.globals_key,
            document,
        )?;
        Ok(Decoder { ctx, error: None })
    }

    /// Decode the globals stream and then every segment of the source
    /// stream.
    pub fn decode_all(&mut self) -> Result<()> {
        self.check_not_failed()?;
        self.run(|ctx| {
            ctx.decode_globals(None)?;
            ctx.continue_decoding(None)
        })
    }

    /// Install `buf` as the page's backing store and drive decoding.
    ///
    /// The buffer must hold `stride * height` bytes with a stride that is
    /// a multiple of four and wide enough for `width` pixels; the page
    /// information segment's own dimensions are ignored in favour of the
    /// caller's. Decoding may suspend when `pause` asks for it; resume
    /// with [`Decoder::continue_decoding`].
    pub fn first_page(
        &mut self,
        buf: &'a mut [u8],
        width: u32,
        height: u32,
        stride: usize,
        pause: Option<&mut dyn PauseIndicator>,
    ) -> Result<()> {
        self.check_not_failed()?;
        self.run(|ctx| ctx.first_page(buf, width, height, stride, pause))
    }

    /// Resume decoding after a pause.
    pub fn continue_decoding(
        &mut self,
        pause: Option<&mut dyn PauseIndicator>,
    ) -> Result<()> {
        self.check_not_failed()?;
        self.run(|ctx| ctx.continue_decoding(pause))
    }

    /// The assembled page, or `None` before any page information segment
    /// has been processed.
    pub fn page_image(&self) -> Option<&Image<'a>> {
        self.ctx.page_image()
    }

    /// The segments decoded so far, in stream order.
    pub fn segments(&self) -> &[Segment] {
        self.ctx.segments()
    }

    /// The decoder's processing status.
    pub fn status(&self) -> CodecStatus {
        self.ctx.status()
    }

    /// Once a decode fails, the decoder is terminal: every further driving
    /// call reports the original failure.
    fn check_not_failed(&self) -> Result<()> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn run(&mut self, body: impl FnOnce(&mut Context<'a>) -> Result<()>) -> Result<()> {
        match body(&mut self.ctx) {
            Ok(()) => Ok(()),
            Err(error) => {
                self.error = Some(error);
                self.ctx.set_status(CodecStatus::Error);
                Err(error)
            }
        }
    }
}
