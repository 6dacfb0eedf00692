//! Pixel decode/encode for DDS payloads using image_dds
//!
//! Decoding asks image_dds which surface format the recorded header names and
//! expands the first mip to RGBA. Encoding compresses an RGBA buffer to the
//! format named by the metadata and writes the container through ddsfile.

use image_dds::ddsfile::{AlphaMode, D3DFormat, Dds, NewD3dParams};
use image_dds::error::SurfaceError;
use image_dds::{ImageFormat, Mipmaps, Quality, Surface, SurfaceRgba8};
use std::path::Path;
use tracing::debug;

use super::dds::{self, RawLayout};
use super::error::{CodecError, CodecResult};
use super::metadata::{ContainerMetadata, FormatId};
use super::pixels::PixelBuffer;

/// Payload layouts the decoder can expand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceFormat {
    /// Anything image_dds decodes directly
    Surface(ImageFormat),
    /// Uncompressed layouts image_dds has no format for
    Swizzled(RawLayout),
}

/// Work out how the recorded payload is stored
fn resolve_source_format(
    recorded: &Dds,
    metadata: &ContainerMetadata,
    path: &Path,
) -> CodecResult<SourceFormat> {
    let info = match image_dds::dds_image_format(recorded) {
        Ok(format) => return Ok(SourceFormat::Surface(format)),
        Err(info) => info,
    };

    let (header, _) = dds::recorded_headers(metadata);
    match header.and_then(|h| h.pixel_format.raw_layout()) {
        Some(layout) if metadata.extended_header.is_none() => Ok(SourceFormat::Swizzled(layout)),
        _ => Err(CodecError::unsupported_scheme(
            path,
            format!("unsupported pixel format {:?}", info),
        )),
    }
}

/// Expand BGR(X) pixels to RGBA with opaque alpha
fn swizzle_to_rgba(payload: &[u8], layout: RawLayout) -> Vec<u8> {
    let bpp = layout.bytes_per_pixel();
    let mut rgba = Vec::with_capacity(payload.len() / bpp * 4);
    for px in payload.chunks_exact(bpp) {
        rgba.extend_from_slice(&[px[2], px[1], px[0], u8::MAX]);
    }
    rgba
}

/// The first mip of an uncompressed payload, checked the way image_dds checks
fn swizzled_payload(
    payload: &[u8],
    width: u32,
    height: u32,
    layout: RawLayout,
) -> Result<&[u8], SurfaceError> {
    let expected = (width as usize)
        .checked_mul(height as usize)
        .and_then(|n| n.checked_mul(layout.bytes_per_pixel()))
        .ok_or(SurfaceError::PixelCountWouldOverflow {
            width,
            height,
            depth: 1,
        })?;
    payload.get(..expected).ok_or(SurfaceError::NotEnoughData {
        expected,
        actual: payload.len(),
    })
}

/// Map an image_dds validation failure onto the codec's error
fn surface_error(
    path: &Path,
    (width, height): (u32, u32),
    source: SourceFormat,
    actual: usize,
    err: SurfaceError,
) -> CodecError {
    match err {
        SurfaceError::NotEnoughData { expected, actual } => CodecError::Decode {
            path: path.to_path_buf(),
            message: format!("payload too short for {}x{} {:?}", width, height, source),
            expected: Some(expected),
            actual: Some(actual),
        },
        SurfaceError::PixelCountWouldOverflow { .. } => CodecError::Decode {
            path: path.to_path_buf(),
            message: format!("{}x{} {:?} surface is too large to address", width, height, source),
            expected: None,
            actual: Some(actual),
        },
        other => CodecError::unsupported_scheme(
            path,
            format!("failed to decode {:?}: {}", source, other),
        ),
    }
}

/// Decode the first mip of a DDS payload to RGBA.
///
/// `bytes` is the whole file; `metadata` must come from [`dds::parse_header`]
/// on the same bytes.
pub fn decode_pixels(
    bytes: &[u8],
    metadata: &ContainerMetadata,
    path: &Path,
) -> CodecResult<PixelBuffer> {
    let (width, height) = metadata.dimensions().ok_or_else(|| {
        CodecError::unsupported_scheme(path, "metadata carries no dimensions to decode against")
    })?;
    let recorded = dds::recorded_dds(metadata).ok_or_else(|| {
        CodecError::unsupported_scheme(path, "recorded header does not describe a DDS surface")
    })?;

    let source = resolve_source_format(&recorded, metadata, path)?;
    let payload = bytes.get(dds::payload_offset(metadata)..).unwrap_or(&[]);

    let rgba = match source {
        SourceFormat::Surface(image_format) => {
            let surface = Surface {
                width,
                height,
                depth: 1,
                layers: 1,
                mipmaps: 1,
                image_format,
                data: payload,
            };
            surface
                .decode_rgba8()
                .map_err(|e| surface_error(path, (width, height), source, payload.len(), e))?
                .data
        }
        SourceFormat::Swizzled(layout) => {
            let data = swizzled_payload(payload, width, height, layout)
                .map_err(|e| surface_error(path, (width, height), source, payload.len(), e))?;
            swizzle_to_rgba(data, layout)
        }
    };

    debug!("Decoded {}x{} {:?} from {}", width, height, source, path.display());

    let actual = rgba.len();
    PixelBuffer::rgba(width, height, rgba).ok_or_else(|| CodecError::Decode {
        path: path.to_path_buf(),
        message: "decoder returned a buffer of the wrong size".into(),
        expected: (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(4)),
        actual: Some(actual),
    })
}

/// Formats written back under a DX10 header; anything else becomes BC7
fn is_encodable_extended(format: ImageFormat) -> bool {
    matches!(
        format,
        ImageFormat::BC1RgbaUnorm
            | ImageFormat::BC1RgbaUnormSrgb
            | ImageFormat::BC2RgbaUnorm
            | ImageFormat::BC2RgbaUnormSrgb
            | ImageFormat::BC3RgbaUnorm
            | ImageFormat::BC3RgbaUnormSrgb
            | ImageFormat::BC4RUnorm
            | ImageFormat::BC5RgUnorm
            | ImageFormat::BC7RgbaUnorm
            | ImageFormat::BC7RgbaUnormSrgb
            | ImageFormat::Rgba8Unorm
            | ImageFormat::Rgba8UnormSrgb
            | ImageFormat::Bgra8Unorm
            | ImageFormat::Bgra8UnormSrgb
    )
}

/// Surface format image_dds encodes for an uncompressed layout
fn raw_image_format(layout: RawLayout) -> ImageFormat {
    match layout {
        RawLayout::Rgba8 => ImageFormat::Rgba8Unorm,
        // The unused byte is written as opaque alpha
        RawLayout::Bgra8 | RawLayout::Bgrx8 => ImageFormat::Bgra8Unorm,
        RawLayout::Bgr8 => ImageFormat::Bgr8Unorm,
    }
}

/// Which header the encoded payload is written under
#[derive(Debug, Clone, Copy)]
enum Container {
    /// Legacy FourCC or bit-mask header
    Legacy(D3DFormat),
    /// DX10 header, keeping the recorded alpha mode when there is one
    Extended(Option<AlphaMode>),
}

/// Target compression and header for an encode
struct EncodePlan {
    image_format: ImageFormat,
    container: Container,
}

impl EncodePlan {
    fn resolve(metadata: &ContainerMetadata) -> Self {
        match metadata.format_id {
            FormatId::BlockCompressed1 => Self::legacy(ImageFormat::BC1RgbaUnorm, D3DFormat::DXT1),
            FormatId::BlockCompressed3 => Self::legacy(ImageFormat::BC2RgbaUnorm, D3DFormat::DXT3),
            FormatId::BlockCompressed5 => Self::legacy(ImageFormat::BC3RgbaUnorm, D3DFormat::DXT5),
            FormatId::Raw => {
                let layout = dds::recorded_headers(metadata)
                    .0
                    .and_then(|h| h.pixel_format.raw_layout())
                    .unwrap_or(RawLayout::Rgba8);
                Self::legacy(raw_image_format(layout), layout.d3d_format())
            }
            FormatId::ExtendedFormat => {
                let recorded = dds::recorded_dds(metadata);
                let image_format = recorded
                    .as_ref()
                    .and_then(|dds| image_dds::dds_image_format(dds).ok())
                    .filter(|&format| is_encodable_extended(format))
                    .unwrap_or(ImageFormat::BC7RgbaUnorm);
                let alpha_mode = recorded
                    .filter(|_| metadata.extended_header.is_some())
                    .and_then(|dds| dds.header10)
                    .map(|header10| header10.alpha_mode);

                Self {
                    image_format,
                    container: Container::Extended(alpha_mode),
                }
            }
        }
    }

    fn legacy(image_format: ImageFormat, format: D3DFormat) -> Self {
        Self {
            image_format,
            container: Container::Legacy(format),
        }
    }
}

/// Encode pixels into a complete DDS file in the format named by `metadata`.
///
/// RGB input gets an opaque alpha channel. Output is deterministic for a
/// given input. `path` is only used for error context.
pub fn encode_pixels(
    pixels: &PixelBuffer,
    metadata: &ContainerMetadata,
    path: &Path,
) -> CodecResult<Vec<u8>> {
    let encode_error = |message: String| CodecError::Encode {
        path: path.to_path_buf(),
        message,
    };

    let rgba = pixels.to_rgba();
    let (width, height) = (rgba.width(), rgba.height());
    let plan = EncodePlan::resolve(metadata);

    let mipmaps = if metadata.mip_count.unwrap_or(1) > 1 {
        Mipmaps::GeneratedAutomatic
    } else {
        Mipmaps::Disabled
    };

    let surface = SurfaceRgba8 {
        width,
        height,
        depth: 1,
        layers: 1,
        mipmaps: 1,
        data: rgba.data(),
    };
    let encoded = surface
        .encode(plan.image_format, Quality::Normal, mipmaps)
        .map_err(|e| encode_error(format!("{:?}: {}", plan.image_format, e)))?;

    debug!(
        "Encoded {}x{} as {:?} ({} mips, {} bytes) for {}",
        width,
        height,
        plan.image_format,
        encoded.mipmaps,
        encoded.data.len(),
        path.display()
    );

    let container = match plan.container {
        Container::Legacy(format) => {
            let mut container = Dds::new_d3d(NewD3dParams {
                height,
                width,
                depth: None,
                format,
                mipmap_levels: (encoded.mipmaps > 1).then_some(encoded.mipmaps),
                caps2: None,
            })
            .map_err(|e| encode_error(format!("building {:?} header: {}", format, e)))?;
            container.data = encoded.data;
            container
        }
        Container::Extended(alpha_mode) => {
            let mut container = encoded
                .to_dds()
                .map_err(|e| encode_error(format!("building DX10 header: {}", e)))?;
            if let (Some(header10), Some(mode)) = (container.header10.as_mut(), alpha_mode) {
                header10.alpha_mode = mode;
            }
            container
        }
    };

    let mut out = Vec::new();
    container
        .write(&mut out)
        .map_err(|e| encode_error(format!("writing DDS: {}", e)))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::textures::dds::tests::{dxgi_header, fourcc_header, raw_header};
    use crate::textures::dds::{parse_header, DDS_HEADER_SIZE, DX10_HEADER_SIZE};
    use image_dds::ddsfile::DxgiFormat;

    fn gradient(width: u32, height: u32) -> PixelBuffer {
        let mut data = Vec::with_capacity((width * height * 4) as usize);
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&[(x * 4) as u8, (y * 4) as u8, 128, 255]);
            }
        }
        PixelBuffer::rgba(width, height, data).unwrap()
    }

    fn read_u32(bytes: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
    }

    #[test]
    fn test_decode_dxt1_64x64() {
        let path = Path::new("scenario_a.dds");
        let mut bytes = fourcc_header(64, 64, b"DXT1");
        bytes.extend(std::iter::repeat(0u8).take(16 * 16 * 8));

        let meta = parse_header(&bytes, path).unwrap();
        assert_eq!(meta.format_id, FormatId::BlockCompressed1);
        assert_eq!(meta.dimensions(), Some((64, 64)));

        let pixels = decode_pixels(&bytes, &meta, path).unwrap();
        assert_eq!((pixels.width(), pixels.height(), pixels.channels()), (64, 64, 4));
        assert_eq!(pixels.data().len(), 64 * 64 * 4);
        // All-zero BC1 blocks are opaque black
        assert!(pixels.data().chunks_exact(4).all(|px| px == [0, 0, 0, 255]));
    }

    #[test]
    fn test_short_payload_reports_sizes() {
        let path = Path::new("short.dds");
        let mut bytes = fourcc_header(64, 64, b"DXT1");
        bytes.extend_from_slice(&[0u8; 100]);

        let meta = parse_header(&bytes, path).unwrap();
        let err = decode_pixels(&bytes, &meta, path).unwrap_err();
        match err {
            CodecError::Decode {
                expected, actual, ..
            } => {
                assert_eq!(expected, Some(2048));
                assert_eq!(actual, Some(100));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_huge_dimensions_are_rejected() {
        let path = Path::new("huge.dds");
        let mut compressed = fourcc_header(u32::MAX, u32::MAX, b"DXT5");
        compressed.extend_from_slice(&[0u8; 64]);

        let mut bgrx = raw_header(4, 4, D3DFormat::X8R8G8B8);
        bgrx[12..16].copy_from_slice(&u32::MAX.to_le_bytes());
        bgrx[16..20].copy_from_slice(&u32::MAX.to_le_bytes());
        bgrx.extend_from_slice(&[0u8; 64]);

        for bytes in [compressed, bgrx] {
            let meta = parse_header(&bytes, path).unwrap();
            let err = decode_pixels(&bytes, &meta, path).unwrap_err();
            assert!(
                matches!(
                    err,
                    CodecError::Decode {
                        expected: None,
                        actual: Some(64),
                        ..
                    }
                ),
                "unexpected error: {err}"
            );
        }
    }

    #[test]
    fn test_unknown_code_cannot_decode() {
        let path = Path::new("odd.dds");
        let mut bytes = fourcc_header(4, 4, b"ZZZZ");
        bytes.extend_from_slice(&[0u8; 16]);

        let meta = parse_header(&bytes, path).unwrap();
        assert_eq!(meta.format_id, FormatId::BlockCompressed5);
        let err = decode_pixels(&bytes, &meta, path).unwrap_err();
        assert!(matches!(err, CodecError::Decode { expected: None, .. }));
    }

    #[test]
    fn test_encode_dxt5_layout() {
        let path = Path::new("scenario_b.dds");
        let meta = ContainerMetadata {
            format_id: FormatId::BlockCompressed5,
            ..ContainerMetadata::fallback()
        };

        let bytes = encode_pixels(&gradient(64, 64), &meta, path).unwrap();
        assert_eq!(&bytes[0..4], b"DDS ");
        assert_eq!(read_u32(&bytes, 16), 64);
        assert_eq!(read_u32(&bytes, 12), 64);
        assert_eq!(read_u32(&bytes, 20), 16 * 16 * 16);
        assert_eq!(&bytes[84..88], b"DXT5");
        assert_eq!(bytes.len() - DDS_HEADER_SIZE, 16 * 16 * 16);
    }

    #[test]
    fn test_encode_raw_payload_is_rgba() {
        let path = Path::new("raw.dds");
        let meta = ContainerMetadata {
            format_id: FormatId::Raw,
            ..ContainerMetadata::fallback()
        };
        let pixels = gradient(64, 64);

        let bytes = encode_pixels(&pixels, &meta, path).unwrap();
        assert_eq!(bytes.len() - DDS_HEADER_SIZE, 64 * 64 * 4);
        assert_eq!(&bytes[DDS_HEADER_SIZE..], pixels.data());

        let reparsed = parse_header(&bytes, path).unwrap();
        assert_eq!(reparsed.format_id, FormatId::Raw);
        assert_eq!(decode_pixels(&bytes, &reparsed, path).unwrap(), pixels);
    }

    #[test]
    fn test_rgb_input_gets_opaque_alpha() {
        let path = Path::new("rgb.dds");
        let pixels = PixelBuffer::rgb(8, 4, vec![200; 8 * 4 * 3]).unwrap();
        let meta = ContainerMetadata {
            format_id: FormatId::Raw,
            ..ContainerMetadata::fallback()
        };

        let bytes = encode_pixels(&pixels, &meta, path).unwrap();
        let payload = &bytes[DDS_HEADER_SIZE..];
        assert_eq!(payload.len(), 8 * 4 * 4);
        assert!(payload.chunks_exact(4).all(|px| px == [200, 200, 200, 255]));
    }

    #[test]
    fn test_roundtrip_keeps_geometry_and_code() {
        let path = Path::new("rt.dds");
        for format_id in [
            FormatId::BlockCompressed1,
            FormatId::BlockCompressed3,
            FormatId::BlockCompressed5,
        ] {
            let meta = ContainerMetadata {
                format_id,
                ..ContainerMetadata::fallback()
            };
            let original = encode_pixels(&gradient(32, 16), &meta, path).unwrap();

            let parsed = parse_header(&original, path).unwrap();
            let pixels = decode_pixels(&original, &parsed, path).unwrap();
            let reencoded = encode_pixels(&pixels, &parsed, path).unwrap();
            let reparsed = parse_header(&reencoded, path).unwrap();

            assert_eq!(reparsed.format_id, format_id);
            assert_eq!(reparsed.fourcc, parsed.fourcc);
            assert_eq!(reparsed.dimensions(), Some((32, 16)));
            assert_eq!(&reencoded[12..20], &original[12..20]);
        }
    }

    #[test]
    fn test_encode_is_deterministic() {
        let path = Path::new("det.dds");
        let meta = ContainerMetadata {
            format_id: FormatId::BlockCompressed1,
            mip_count: Some(4),
            ..ContainerMetadata::fallback()
        };
        let pixels = gradient(16, 16);
        let a = encode_pixels(&pixels, &meta, path).unwrap();
        let b = encode_pixels(&pixels, &meta, path).unwrap();
        assert_eq!(a, b);
        assert!(read_u32(&a, 28) > 1);
    }

    #[test]
    fn test_extended_format_keeps_dxgi_and_alpha_mode() {
        let path = Path::new("dx10.dds");
        let mut source = dxgi_header(8, 8, DxgiFormat::BC1_UNorm_sRGB, AlphaMode::Opaque);
        source.extend_from_slice(&[0u8; 4 * 8]);
        let meta = parse_header(&source, path).unwrap();

        let bytes = encode_pixels(&gradient(8, 8), &meta, path).unwrap();
        assert_eq!(&bytes[84..88], b"DX10");
        assert_eq!(read_u32(&bytes, DDS_HEADER_SIZE), DxgiFormat::BC1_UNorm_sRGB as u32);
        assert_eq!(read_u32(&bytes, DDS_HEADER_SIZE + 16), AlphaMode::Opaque as u32);
        assert_eq!(bytes.len(), DDS_HEADER_SIZE + DX10_HEADER_SIZE + 4 * 8);

        let parsed = parse_header(&bytes, path).unwrap();
        assert_eq!(parsed.format_id, FormatId::ExtendedFormat);
        let pixels = decode_pixels(&bytes, &parsed, path).unwrap();
        assert_eq!(pixels.width(), 8);
    }

    #[test]
    fn test_extended_format_from_bare_dxgi_code() {
        let path = Path::new("dx10.dds");
        let meta = ContainerMetadata {
            format_id: FormatId::ExtendedFormat,
            dxgi_format: Some(DxgiFormat::BC3_UNorm as u32),
            ..ContainerMetadata::fallback()
        };
        let bytes = encode_pixels(&gradient(8, 8), &meta, path).unwrap();
        assert_eq!(read_u32(&bytes, DDS_HEADER_SIZE), DxgiFormat::BC3_UNorm as u32);
        assert_eq!(bytes.len(), DDS_HEADER_SIZE + DX10_HEADER_SIZE + 4 * 16);
    }

    #[test]
    fn test_extended_format_without_dxgi_uses_bc7() {
        let path = Path::new("dx10.dds");
        let meta = ContainerMetadata {
            format_id: FormatId::ExtendedFormat,
            ..ContainerMetadata::fallback()
        };
        let bytes = encode_pixels(&gradient(4, 4), &meta, path).unwrap();
        assert_eq!(read_u32(&bytes, DDS_HEADER_SIZE), DxgiFormat::BC7_UNorm as u32);
        assert_eq!(bytes.len(), DDS_HEADER_SIZE + DX10_HEADER_SIZE + 16);
    }

    #[test]
    fn test_bgr24_roundtrip_keeps_layout() {
        let path = Path::new("bgr.dds");
        let mut bytes = raw_header(2, 1, D3DFormat::R8G8B8);
        bytes.extend_from_slice(&[1, 2, 3, 4, 5, 6]);

        let meta = parse_header(&bytes, path).unwrap();
        assert_eq!(meta.format_id, FormatId::Raw);
        let pixels = decode_pixels(&bytes, &meta, path).unwrap();
        assert_eq!(pixels.data(), &[3, 2, 1, 255, 6, 5, 4, 255]);

        let reencoded = encode_pixels(&pixels, &meta, path).unwrap();
        let (header, _) = dds::read_headers(&reencoded, path).unwrap();
        assert_eq!(header.pixel_format.raw_layout(), Some(RawLayout::Bgr8));
        assert_eq!(&reencoded[DDS_HEADER_SIZE..], &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_bgra_layouts_survive_reencode() {
        let path = Path::new("bgra.dds");
        let payload = [10, 20, 30, 255, 40, 50, 60, 255];
        for (format, layout) in [
            (D3DFormat::A8R8G8B8, RawLayout::Bgra8),
            (D3DFormat::X8R8G8B8, RawLayout::Bgrx8),
        ] {
            let mut bytes = raw_header(2, 1, format);
            bytes.extend_from_slice(&payload);

            let meta = parse_header(&bytes, path).unwrap();
            let pixels = decode_pixels(&bytes, &meta, path).unwrap();
            assert_eq!(pixels.data(), &[30, 20, 10, 255, 60, 50, 40, 255]);

            let reencoded = encode_pixels(&pixels, &meta, path).unwrap();
            assert_eq!(&reencoded[..DDS_HEADER_SIZE], &bytes[..DDS_HEADER_SIZE]);
            let (header, _) = dds::read_headers(&reencoded, path).unwrap();
            assert_eq!(header.pixel_format.raw_layout(), Some(layout));
            assert_eq!(&reencoded[DDS_HEADER_SIZE..], &payload);
        }
    }
}
