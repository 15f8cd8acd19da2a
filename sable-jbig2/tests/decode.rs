//! End-to-end decoding tests over hand-assembled JBIG2 streams.

use sable_jbig2::{CodecStatus, DecodeError, Decoder, DecoderOptions, DocumentContext,
    PauseIndicator};

/// The JBIG2 file signature plus a sequential-organisation flag byte and a
/// page count of one.
const FILE_HEADER: [u8; 13] = [
    0x97, 0x4A, 0x42, 0x32, 0x0D, 0x0A, 0x1A, 0x0A, 0x01, 0x00, 0x00, 0x00, 0x01,
];

/// Assemble a segment header: number, type, one-byte referred numbers,
/// short page association, and the data length.
fn segment_header(number: u32, segment_type: u8, referred: &[u32], page: u32, data_len: u32) -> Vec<u8> {
    assert!(referred.len() <= 4);
    let mut out = Vec::new();
    out.extend_from_slice(&number.to_be_bytes());
    out.push(segment_type);
    out.push((referred.len() as u8) << 5);
    for &r in referred {
        assert!(r <= 0xFF);
        out.push(r as u8);
    }
    out.push(page as u8);
    out.extend_from_slice(&data_len.to_be_bytes());
    out
}

/// A page information payload with the given size and flags.
fn page_info(width: u32, height: u32, flags: u8, striping: u16) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&width.to_be_bytes());
    out.extend_from_slice(&height.to_be_bytes());
    out.extend_from_slice(&0_u32.to_be_bytes()); // X resolution unknown
    out.extend_from_slice(&0_u32.to_be_bytes()); // Y resolution unknown
    out.push(flags);
    out.extend_from_slice(&striping.to_be_bytes());
    out
}

/// A region segment information field.
fn region_info(width: u32, height: u32, x: u32, y: u32, flags: u8) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&width.to_be_bytes());
    out.extend_from_slice(&height.to_be_bytes());
    out.extend_from_slice(&x.to_be_bytes());
    out.extend_from_slice(&y.to_be_bytes());
    out.push(flags);
    out
}

fn append_segment(stream: &mut Vec<u8>, number: u32, segment_type: u8, referred: &[u32], page: u32, data: &[u8]) {
    stream.extend_from_slice(&segment_header(
        number,
        segment_type,
        referred,
        page,
        data.len() as u32,
    ));
    stream.extend_from_slice(data);
}

/// An MMR-coded all-black bitmap of the given width: a horizontal-mode
/// first row (white run 0, black run `width`), then V(0)/V(0) rows that
/// copy the all-black reference line.
fn mmr_all_black(width_code: &[u8], rows: u32) -> Vec<u8> {
    let mut bits: Vec<u8> = Vec::new();
    // Horizontal mode, white run 0 (00110101), then the black run code.
    bits.extend_from_slice(&[0, 0, 1]);
    bits.extend_from_slice(&[0, 0, 1, 1, 0, 1, 0, 1]);
    bits.extend_from_slice(width_code);
    for _ in 1..rows {
        bits.extend_from_slice(&[1, 1]);
    }
    pack_bits(&bits)
}

fn pack_bits(bits: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    for chunk in bits.chunks(8) {
        let mut byte = 0_u8;
        for (i, &bit) in chunk.iter().enumerate() {
            byte |= bit << (7 - i);
        }
        out.push(byte);
    }
    out
}

struct AlwaysPause;

impl PauseIndicator for AlwaysPause {
    fn should_pause(&mut self) -> bool {
        true
    }
}

#[test]
fn minimal_blank_page() {
    let mut stream = FILE_HEADER.to_vec();
    append_segment(&mut stream, 1, 48, &[], 1, &page_info(100, 100, 0, 0));
    append_segment(&mut stream, 2, 49, &[], 1, &[]);
    append_segment(&mut stream, 3, 51, &[], 0, &[]);

    let mut decoder = Decoder::new(DecoderOptions {
        src: &stream,
        ..Default::default()
    })
    .unwrap();
    decoder.decode_all().unwrap();

    assert_eq!(decoder.status(), CodecStatus::Finished);
    let page = decoder.page_image().unwrap();
    assert_eq!((page.width(), page.height()), (100, 100));
    assert!(page.bytes().iter().all(|&byte| byte == 0));
    assert_eq!(decoder.segments().len(), 1);
    assert_eq!(decoder.segments()[0].segment_type(), 48);
}

#[test]
fn empty_stream_finishes_with_nothing() {
    let mut decoder = Decoder::new(DecoderOptions::default()).unwrap();
    decoder.decode_all().unwrap();
    assert_eq!(decoder.status(), CodecStatus::Finished);
    assert!(decoder.page_image().is_none());
    assert!(decoder.segments().is_empty());
}

#[test]
fn file_header_and_raw_streams_decode_identically() {
    let mut raw = Vec::new();
    append_segment(&mut raw, 1, 48, &[], 1, &page_info(32, 16, 0, 0));
    append_segment(&mut raw, 2, 49, &[], 1, &[]);

    let mut with_header = FILE_HEADER.to_vec();
    with_header.extend_from_slice(&raw);

    let mut plain = Decoder::new(DecoderOptions {
        src: &raw,
        ..Default::default()
    })
    .unwrap();
    plain.decode_all().unwrap();

    let mut prefixed = Decoder::new(DecoderOptions {
        src: &with_header,
        ..Default::default()
    })
    .unwrap();
    prefixed.decode_all().unwrap();

    assert_eq!(plain.segments().len(), prefixed.segments().len());
    for (a, b) in plain.segments().iter().zip(prefixed.segments()) {
        assert_eq!(a.number(), b.number());
        assert_eq!(a.segment_type(), b.segment_type());
        assert_eq!(a.data_length(), b.data_length());
    }
    assert_eq!(
        plain.page_image().unwrap().bytes(),
        prefixed.page_image().unwrap().bytes()
    );
}

/// An immediate MMR generic region of 16x16 black pixels at (8, 8) on a
/// blank 64x64 page.
fn generic_region_stream() -> Vec<u8> {
    // Black run 16: 0000010111.
    let mmr = mmr_all_black(&[0, 0, 0, 0, 0, 1, 0, 1, 1, 1], 16);

    let mut region = region_info(16, 16, 8, 8, 0);
    region.push(0x01); // flags: MMR
    region.extend_from_slice(&mmr);

    let mut stream = Vec::new();
    append_segment(&mut stream, 1, 48, &[], 1, &page_info(64, 64, 0, 0));
    append_segment(&mut stream, 2, 38, &[], 1, &region);
    append_segment(&mut stream, 3, 49, &[], 1, &[]);
    append_segment(&mut stream, 4, 51, &[], 0, &[]);
    stream
}

#[test]
fn immediate_generic_region_composes_onto_the_page() {
    let stream = generic_region_stream();
    let mut decoder = Decoder::new(DecoderOptions {
        src: &stream,
        ..Default::default()
    })
    .unwrap();
    decoder.decode_all().unwrap();

    assert_eq!(decoder.status(), CodecStatus::Finished);
    let page = decoder.page_image().unwrap();
    for y in 0..64 {
        for x in 0..64 {
            let inside = (8..24).contains(&x) && (8..24).contains(&y);
            assert_eq!(page.pixel(x, y), inside as u32, "pixel ({x}, {y})");
        }
    }

    // The immediate region composed and released its image.
    let region_segment = &decoder.segments()[1];
    assert_eq!(region_segment.segment_type(), 38);
    assert!(region_segment.result().image().is_none());
}

#[test]
fn decoding_the_same_stream_twice_matches() {
    let stream = generic_region_stream();

    let mut first = Decoder::new(DecoderOptions {
        src: &stream,
        ..Default::default()
    })
    .unwrap();
    first.decode_all().unwrap();

    let mut second = Decoder::new(DecoderOptions {
        src: &stream,
        ..Default::default()
    })
    .unwrap();
    second.decode_all().unwrap();

    assert_eq!(
        first.page_image().unwrap().bytes(),
        second.page_image().unwrap().bytes()
    );
}

#[test]
fn intermediate_generic_region_keeps_its_image() {
    let mmr = mmr_all_black(&[0, 0, 0, 0, 0, 1, 0, 1, 1, 1], 16);
    let mut region = region_info(16, 16, 8, 8, 0);
    region.push(0x01);
    region.extend_from_slice(&mmr);

    let mut stream = Vec::new();
    append_segment(&mut stream, 1, 48, &[], 1, &page_info(64, 64, 0, 0));
    append_segment(&mut stream, 2, 36, &[], 1, &region);
    append_segment(&mut stream, 3, 49, &[], 1, &[]);

    let mut decoder = Decoder::new(DecoderOptions {
        src: &stream,
        ..Default::default()
    })
    .unwrap();
    decoder.decode_all().unwrap();

    // The intermediate variant retains the image and leaves the page
    // untouched.
    let page = decoder.page_image().unwrap();
    assert!(page.bytes().iter().all(|&byte| byte == 0));
    let image = decoder.segments()[1].result().image().unwrap();
    assert_eq!((image.width(), image.height()), (16, 16));
    assert_eq!(image.pixel(0, 0), 1);
    assert_eq!(image.pixel(15, 15), 1);
}

#[test]
fn striped_page_grows_on_compose() {
    // Unbounded height, striped, maximum stripe size 4: the page starts
    // four rows tall.
    let mut stream = Vec::new();
    append_segment(
        &mut stream,
        1,
        48,
        &[],
        1,
        &page_info(8, 0xFFFF_FFFF, 0, 0x8004),
    );

    // An all-black 8x2 region at (0, 3). Black run 8: 000101.
    let mmr = mmr_all_black(&[0, 0, 0, 1, 0, 1], 2);
    let mut region = region_info(8, 2, 0, 3, 0);
    region.push(0x01);
    region.extend_from_slice(&mmr);
    append_segment(&mut stream, 2, 38, &[], 1, &region);
    append_segment(&mut stream, 3, 49, &[], 1, &[]);

    let mut decoder = Decoder::new(DecoderOptions {
        src: &stream,
        ..Default::default()
    })
    .unwrap();
    decoder.decode_all().unwrap();

    let page = decoder.page_image().unwrap();
    assert!(page.height() >= 5);
    assert_eq!(page.pixel(0, 2), 0);
    assert_eq!(page.pixel(0, 3), 1);
    assert_eq!(page.pixel(7, 4), 1);
}

#[test]
fn truncated_huffman_table_segment_fails_terminally() {
    // A tables segment whose payload stops right after its low bound; the
    // high bound read runs off the end of the stream.
    let mut stream = Vec::new();
    append_segment(&mut stream, 1, 53, &[], 0, &[0x42, 0x00, 0x00, 0x00, 0x00, 0x00]);

    let mut decoder = Decoder::new(DecoderOptions {
        src: &stream,
        ..Default::default()
    })
    .unwrap();
    assert_eq!(
        decoder.decode_all().unwrap_err(),
        DecodeError::TruncatedInput
    );
    assert_eq!(decoder.status(), CodecStatus::Error);
    // The decoder is terminal: further calls report the same failure.
    assert_eq!(
        decoder.decode_all().unwrap_err(),
        DecodeError::TruncatedInput
    );
}

#[test]
fn unknown_segment_types_are_skipped() {
    let mut stream = Vec::new();
    append_segment(&mut stream, 1, 48, &[], 1, &page_info(8, 8, 0, 0));
    // Type 62 (extension) is unknown to the decoder and skipped by length.
    append_segment(&mut stream, 2, 62, &[], 1, &[0xDE, 0xAD, 0xBE, 0xEF]);
    append_segment(&mut stream, 3, 49, &[], 1, &[]);

    let mut decoder = Decoder::new(DecoderOptions {
        src: &stream,
        ..Default::default()
    })
    .unwrap();
    decoder.decode_all().unwrap();
    assert_eq!(decoder.status(), CodecStatus::Finished);
    assert_eq!(decoder.segments().len(), 2);
}

/// A Huffman-coded symbol dictionary exporting two 1x1 black symbols: one
/// height class of height 1, widths 1 and 1, an uncompressed collective
/// bitmap, and export runs (0, 2).
fn symbol_dict_payload() -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(&0x0001_u16.to_be_bytes()); // SDHUFF
    data.extend_from_slice(&2_u32.to_be_bytes()); // SDNUMEXSYMS
    data.extend_from_slice(&2_u32.to_be_bytes()); // SDNUMNEWSYMS

    // DH = 1 (B.4 "0"), DW = 1 (B.2 "10"), DW = 0 (B.2 "0"),
    // OOB (B.2 "111111"), BMSIZE = 0 (B.1 "0" + "0000"), then align.
    let mut bits: Vec<u8> = Vec::new();
    bits.push(0);
    bits.extend_from_slice(&[1, 0]);
    bits.push(0);
    bits.extend_from_slice(&[1, 1, 1, 1, 1, 1]);
    bits.extend_from_slice(&[0, 0, 0, 0, 0]);
    data.extend_from_slice(&pack_bits(&bits));

    // The collective bitmap: two set pixels in one row.
    data.push(0xC0);

    // Export runs via B.1: 0 then 2.
    let mut bits: Vec<u8> = Vec::new();
    bits.extend_from_slice(&[0, 0, 0, 0, 0]);
    bits.extend_from_slice(&[0, 0, 0, 1, 0]);
    data.extend_from_slice(&pack_bits(&bits));

    data
}

/// A Huffman-coded text region placing the two dictionary symbols at
/// (0, 0) and (2, 0) of a 4x2 region.
fn text_region_payload() -> Vec<u8> {
    let mut data = region_info(4, 2, 0, 0, 0);
    // SBHUFF, one-row strips, top-left corner.
    data.extend_from_slice(&0x0011_u16.to_be_bytes());
    // All standard Huffman tables.
    data.extend_from_slice(&0x0000_u16.to_be_bytes());
    data.extend_from_slice(&2_u32.to_be_bytes()); // SBNUMINSTANCES

    // Symbol ID code table: run code 1 gets a one-bit code, everything
    // else is unused; both symbols then get one-bit codes.
    let mut bits: Vec<u8> = Vec::new();
    for index in 0..35 {
        let length = if index == 1 { 1_u8 } else { 0 };
        for k in (0..4).rev() {
            bits.push((length >> k) & 1);
        }
    }
    bits.extend_from_slice(&[0, 0]); // two symbols of code length 1
    data.extend_from_slice(&pack_bits(&bits));

    // STRIPT = 1 (B.11 "0"), DT = 1 (B.11 "0"), FS = 0 (B.6 "00" +
    // seven extension bits), ID 0, DS = 2 (B.8 "11010"), ID 1, OOB
    // (B.8 "01").
    let mut bits: Vec<u8> = Vec::new();
    bits.push(0);
    bits.push(0);
    bits.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 0, 0]);
    bits.push(0);
    bits.extend_from_slice(&[1, 1, 0, 1, 0]);
    bits.push(1);
    bits.extend_from_slice(&[0, 1]);
    data.extend_from_slice(&pack_bits(&bits));

    data
}

#[test]
fn huffman_symbol_dictionary_drives_a_text_region() {
    let mut globals = Vec::new();
    append_segment(&mut globals, 1, 0, &[], 0, &symbol_dict_payload());

    let mut src = Vec::new();
    append_segment(&mut src, 2, 48, &[], 1, &page_info(4, 2, 0, 0));
    append_segment(&mut src, 3, 6, &[1], 1, &text_region_payload());
    append_segment(&mut src, 4, 49, &[], 1, &[]);

    let mut decoder = Decoder::new(DecoderOptions {
        src: &src,
        src_key: 1,
        globals: Some(&globals),
        globals_key: 2,
    })
    .unwrap();
    decoder.decode_all().unwrap();

    assert_eq!(decoder.status(), CodecStatus::Finished);
    let page = decoder.page_image().unwrap();
    assert_eq!(page.pixel(0, 0), 1);
    assert_eq!(page.pixel(1, 0), 0);
    assert_eq!(page.pixel(2, 0), 1);
    assert_eq!(page.pixel(3, 0), 0);
    assert_eq!(page.pixel(0, 1), 0);
    assert_eq!(page.pixel(2, 1), 0);
}

#[test]
fn shared_document_context_reuses_globals_across_decoders() {
    let mut globals = Vec::new();
    append_segment(&mut globals, 1, 0, &[], 0, &symbol_dict_payload());

    let mut src = Vec::new();
    append_segment(&mut src, 2, 48, &[], 1, &page_info(4, 2, 0, 0));
    append_segment(&mut src, 3, 6, &[1], 1, &text_region_payload());
    append_segment(&mut src, 4, 49, &[], 1, &[]);

    let document = DocumentContext::new();
    let options = DecoderOptions {
        src: &src,
        src_key: 1,
        globals: Some(&globals),
        globals_key: 2,
    };

    // The first decoder decodes and caches the dictionary; the second
    // decodes the same globals through the cache. Both must render the
    // same page.
    let mut first = Decoder::new_with_document(options, &document).unwrap();
    first.decode_all().unwrap();
    let mut second = Decoder::new_with_document(options, &document).unwrap();
    second.decode_all().unwrap();

    assert_eq!(
        first.page_image().unwrap().bytes(),
        second.page_image().unwrap().bytes()
    );
    assert_eq!(second.page_image().unwrap().pixel(2, 0), 1);
}

#[test]
fn first_page_renders_into_a_caller_buffer_with_pauses() {
    let stream = generic_region_stream();
    let mut buf = vec![0_u8; 8 * 64];

    let mut decoder = Decoder::new(DecoderOptions {
        src: &stream,
        ..Default::default()
    })
    .unwrap();

    let mut pause = AlwaysPause;
    decoder
        .first_page(&mut buf, 64, 64, 8, Some(&mut pause))
        .unwrap();

    let mut rounds = 0;
    while decoder.status() == CodecStatus::ToBeContinued {
        decoder.continue_decoding(Some(&mut pause)).unwrap();
        rounds += 1;
        assert!(rounds < 100, "decoder failed to make progress");
    }

    assert_eq!(decoder.status(), CodecStatus::Finished);
    assert!(rounds > 0);
    let page = decoder.page_image().unwrap();
    assert_eq!(page.pixel(8, 8), 1);
    assert_eq!(page.pixel(7, 8), 0);
    assert_eq!(page.pixel(23, 23), 1);
    assert_eq!(page.pixel(24, 23), 0);
}
