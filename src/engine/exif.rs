// src/engine/exif.rs
//
// EXIF orientation extraction by walking the JPEG marker stream by hand.
// EXIF is advisory, not load-bearing: every structural anomaly in the walk
// resolves to the default orientation instead of an error. All offset
// arithmetic lives in this file; nothing here panics on any input.

/// Orientation tag (TIFF tag 0x0112) inside IFD0.
const TAG_ORIENTATION: u16 = 0x0112;

/// Cap on IFD entry scans, in case a hostile file declares a huge count.
const MAX_IFD_ENTRIES: usize = 512;

/// Extract the EXIF orientation code (1-8) from raw JPEG bytes.
///
/// Returns 1 whenever the tag is absent, the value is out of range, or the
/// metadata structure is malformed in any way.
pub fn orientation_from_jpeg(bytes: &[u8]) -> u16 {
    parse_orientation(bytes).unwrap_or(1)
}

fn parse_orientation(bytes: &[u8]) -> Option<u16> {
    // SOI marker at offset 0
    if read_u16_be(bytes, 0)? != 0xFFD8 {
        return None;
    }

    // Walk marker segments looking for APP1
    let mut offset = 2usize;
    loop {
        if *bytes.get(offset)? != 0xFF {
            return None;
        }
        let marker = *bytes.get(offset + 1)?;
        match marker {
            // Fill byte before a marker
            0xFF => {
                offset += 1;
                continue;
            }
            // SOS or EOI: entropy-coded data follows, no EXIF past this point
            0xDA | 0xD9 => return None,
            _ => {}
        }

        let length = read_u16_be(bytes, offset + 2)? as usize;
        if length < 2 {
            return None;
        }
        if marker == 0xE1 {
            let payload = bytes.get(offset + 4..offset + 2 + length)?;
            return orientation_from_app1(payload);
        }
        offset = offset.checked_add(2 + length)?;
    }
}

/// Parse an APP1 payload: `Exif\0\0` identifier, then a TIFF structure.
fn orientation_from_app1(payload: &[u8]) -> Option<u16> {
    if payload.get(0..4)? != b"Exif" {
        return None;
    }
    let tiff = payload.get(6..)?;

    let little_endian = match tiff.get(0..2)? {
        b"II" => true,
        b"MM" => false,
        _ => return None,
    };
    // TIFF magic
    if read_u16(tiff, 2, little_endian)? != 42 {
        return None;
    }

    let ifd0 = read_u32(tiff, 4, little_endian)? as usize;
    let entry_count = read_u16(tiff, ifd0, little_endian)? as usize;

    for i in 0..entry_count.min(MAX_IFD_ENTRIES) {
        let entry = ifd0.checked_add(2 + i * 12)?;
        if read_u16(tiff, entry, little_endian)? == TAG_ORIENTATION {
            // SHORT value stored inline at entry offset +8
            let value = read_u16(tiff, entry + 8, little_endian)?;
            return if (1..=8).contains(&value) {
                Some(value)
            } else {
                None
            };
        }
    }
    None
}

fn read_u16_be(bytes: &[u8], offset: usize) -> Option<u16> {
    let b = bytes.get(offset..offset.checked_add(2)?)?;
    Some(u16::from_be_bytes([b[0], b[1]]))
}

fn read_u16(bytes: &[u8], offset: usize, little_endian: bool) -> Option<u16> {
    let b = bytes.get(offset..offset.checked_add(2)?)?;
    Some(if little_endian {
        u16::from_le_bytes([b[0], b[1]])
    } else {
        u16::from_be_bytes([b[0], b[1]])
    })
}

fn read_u32(bytes: &[u8], offset: usize, little_endian: bool) -> Option<u32> {
    let b = bytes.get(offset..offset.checked_add(4)?)?;
    Some(if little_endian {
        u32::from_le_bytes([b[0], b[1], b[2], b[3]])
    } else {
        u32::from_be_bytes([b[0], b[1], b[2], b[3]])
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a minimal JPEG: SOI + APP1(Exif TIFF with orientation) + EOI.
    pub(crate) fn jpeg_with_orientation(orientation: u16, little_endian: bool) -> Vec<u8> {
        let mut tiff = Vec::new();
        let put16 = |v: u16, le: bool| {
            if le {
                v.to_le_bytes()
            } else {
                v.to_be_bytes()
            }
        };
        let put32 = |v: u32, le: bool| {
            if le {
                v.to_le_bytes()
            } else {
                v.to_be_bytes()
            }
        };

        tiff.extend_from_slice(if little_endian { b"II" } else { b"MM" });
        tiff.extend_from_slice(&put16(42, little_endian));
        tiff.extend_from_slice(&put32(8, little_endian)); // IFD0 offset
        tiff.extend_from_slice(&put16(1, little_endian)); // one entry
        tiff.extend_from_slice(&put16(TAG_ORIENTATION, little_endian));
        tiff.extend_from_slice(&put16(3, little_endian)); // type SHORT
        tiff.extend_from_slice(&put32(1, little_endian)); // count
        tiff.extend_from_slice(&put16(orientation, little_endian));
        tiff.extend_from_slice(&put16(0, little_endian)); // value padding
        tiff.extend_from_slice(&put32(0, little_endian)); // next IFD

        let mut app1 = Vec::new();
        app1.extend_from_slice(b"Exif\0\0");
        app1.extend_from_slice(&tiff);

        let mut jpeg = vec![0xFF, 0xD8];
        jpeg.extend_from_slice(&[0xFF, 0xE1]);
        jpeg.extend_from_slice(&((app1.len() + 2) as u16).to_be_bytes());
        jpeg.extend_from_slice(&app1);
        jpeg.extend_from_slice(&[0xFF, 0xD9]);
        jpeg
    }

    /// Build a real decodable JPEG with an EXIF orientation segment spliced
    /// in right after SOI.
    pub(crate) fn jpeg_with_orientation_and_size(
        orientation: u16,
        width: u32,
        height: u32,
        little_endian: bool,
    ) -> Vec<u8> {
        let img = image::RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 160])
        });
        let mut encoded = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(
                &mut std::io::Cursor::new(&mut encoded),
                image::ImageFormat::Jpeg,
            )
            .unwrap();

        let exif_only = jpeg_with_orientation(orientation, little_endian);
        let app1 = &exif_only[2..exif_only.len() - 2];
        let mut jpeg = vec![0xFF, 0xD8];
        jpeg.extend_from_slice(app1);
        jpeg.extend_from_slice(&encoded[2..]);
        jpeg
    }

    #[test]
    fn test_reads_all_valid_codes_both_endians() {
        for code in 1..=8u16 {
            assert_eq!(
                orientation_from_jpeg(&jpeg_with_orientation(code, true)),
                code,
                "II orientation {code}"
            );
            assert_eq!(
                orientation_from_jpeg(&jpeg_with_orientation(code, false)),
                code,
                "MM orientation {code}"
            );
        }
    }

    #[test]
    fn test_agrees_with_reference_parser() {
        for code in [1u16, 3, 6, 8] {
            let jpeg = jpeg_with_orientation(code, true);
            let parsed = exif::Reader::new()
                .read_raw(jpeg[12..jpeg.len() - 2].to_vec())
                .unwrap();
            let field = parsed
                .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
                .unwrap();
            assert_eq!(field.value.get_uint(0), Some(code as u32));
            assert_eq!(orientation_from_jpeg(&jpeg), code);
        }
    }

    #[test]
    fn test_missing_soi_defaults() {
        assert_eq!(orientation_from_jpeg(b""), 1);
        assert_eq!(orientation_from_jpeg(&[0x00, 0x01, 0x02]), 1);
        assert_eq!(orientation_from_jpeg(&[0x89, 0x50, 0x4E, 0x47]), 1);
    }

    #[test]
    fn test_jpeg_without_app1_defaults() {
        // SOI + APP0 + EOI
        let mut jpeg = vec![0xFF, 0xD8];
        jpeg.extend_from_slice(&[0xFF, 0xE0, 0x00, 0x04, 0x00, 0x00]);
        jpeg.extend_from_slice(&[0xFF, 0xD9]);
        assert_eq!(orientation_from_jpeg(&jpeg), 1);
    }

    #[test]
    fn test_app1_without_exif_identifier_defaults() {
        let mut jpeg = vec![0xFF, 0xD8];
        let payload = b"XMP \0\0whatever";
        jpeg.extend_from_slice(&[0xFF, 0xE1]);
        jpeg.extend_from_slice(&((payload.len() + 2) as u16).to_be_bytes());
        jpeg.extend_from_slice(payload);
        jpeg.extend_from_slice(&[0xFF, 0xD9]);
        assert_eq!(orientation_from_jpeg(&jpeg), 1);
    }

    #[test]
    fn test_out_of_range_orientation_defaults() {
        assert_eq!(orientation_from_jpeg(&jpeg_with_orientation(0, true)), 1);
        assert_eq!(orientation_from_jpeg(&jpeg_with_orientation(9, true)), 1);
        assert_eq!(orientation_from_jpeg(&jpeg_with_orientation(999, false)), 1);
    }

    #[test]
    fn test_truncation_at_every_length_defaults() {
        let jpeg = jpeg_with_orientation(6, true);
        for len in 0..jpeg.len() {
            // Must neither panic nor return garbage outside 1..=8
            let code = orientation_from_jpeg(&jpeg[..len]);
            assert!((1..=8).contains(&code));
        }
    }

    #[test]
    fn test_hostile_ifd_offset_defaults() {
        let mut jpeg = jpeg_with_orientation(6, true);
        // Corrupt the IFD0 offset to point far outside the buffer
        // (offset lives 4 bytes into the TIFF header, which starts at byte 12)
        jpeg[16..20].copy_from_slice(&u32::MAX.to_le_bytes());
        assert_eq!(orientation_from_jpeg(&jpeg), 1);
    }

    #[test]
    fn test_full_jpeg_stream_with_orientation() {
        let jpeg = jpeg_with_orientation_and_size(6, 8, 8, true);
        assert_eq!(orientation_from_jpeg(&jpeg), 6);
        // The spliced stream must still decode
        assert!(image::load_from_memory(&jpeg).is_ok());
    }

    #[test]
    fn test_orientation_after_other_app_segments() {
        // SOI + APP0(JFIF) + APP1(Exif) - the walk must skip APP0
        let exif_jpeg = jpeg_with_orientation(3, false);
        let mut jpeg = vec![0xFF, 0xD8];
        jpeg.extend_from_slice(&[
            0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00, 0x01, 0x01, 0x00, 0x00, 0x01,
            0x00, 0x01, 0x00, 0x00,
        ]);
        jpeg.extend_from_slice(&exif_jpeg[2..]);
        assert_eq!(orientation_from_jpeg(&jpeg), 3);
    }
}
