//! Page information (T.88, 7.4.8).

/// "A page's bitmap height may be declared in its page information segment
/// to be unknown (by specifying a height of 0xFFFFFFFF)." (7.4.8.2)
pub(crate) const UNBOUNDED_PAGE_HEIGHT: u32 = 0xFFFF_FFFF;

/// Parsed page information segment fields.
#[derive(Debug, Clone)]
pub(crate) struct PageInfo {
    /// "The width in pixels of the page's bitmap." (7.4.8.1)
    pub(crate) width: u32,
    /// "The height in pixels of the page's bitmap." (7.4.8.2)
    pub(crate) height: u32,
    /// "Page default pixel value ... the initial value for every pixel in
    /// the page." (7.4.8.5, bit 2)
    pub(crate) default_pixel: bool,
    /// "Page is striped" (7.4.8.6, bit 15).
    pub(crate) striped: bool,
    /// "Maximum stripe size" (7.4.8.6, bits 0-14).
    pub(crate) max_stripe_size: u16,
}

impl PageInfo {
    /// The height to allocate up front. An unbounded striped page starts
    /// at its maximum stripe size and grows on demand.
    pub(crate) fn initial_height(&self) -> u32 {
        if self.height == UNBOUNDED_PAGE_HEIGHT {
            self.max_stripe_size as u32
        } else {
            self.height
        }
    }

    /// Whether the page image may grow as further stripes arrive.
    pub(crate) fn grows_by_stripes(&self) -> bool {
        self.striped || self.height == UNBOUNDED_PAGE_HEIGHT
    }
}
