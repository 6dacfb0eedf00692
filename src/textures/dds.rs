//! DDS header parsing and recovery of recorded headers
//!
//! Layout (all little-endian):
//! - 4 byte magic `DDS `
//! - 124 byte header, pixel format block at offset 76
//! - optional 20 byte DX10 block when the FourCC is `DX10`
//! - pixel payload

use binrw::prelude::*;
use image_dds::ddsfile::{
    AlphaMode, D3D10ResourceDimension, D3DFormat, Dds, DxgiFormat, NewDxgiParams,
};
use std::io::Cursor;
use std::path::Path;
use tracing::{debug, warn};

use super::error::{CodecError, CodecResult};
use super::metadata::{AuxiliaryFields, ContainerKind, ContainerMetadata, FormatId};

pub const DDS_MAGIC: [u8; 4] = *b"DDS ";
pub const DDS_HEADER_SIZE: usize = 128;
pub const DX10_HEADER_SIZE: usize = 20;

/// Value of the header size field (excludes the magic)
const HEADER_SIZE_FIELD: u32 = 124;
const PIXEL_FORMAT_SIZE: u32 = 32;
const FOURCC_OFFSET: usize = 84;

pub const FOURCC_DX10: [u8; 4] = *b"DX10";

// Header flags
pub const DDSD_CAPS: u32 = 0x1;
pub const DDSD_HEIGHT: u32 = 0x2;
pub const DDSD_WIDTH: u32 = 0x4;
pub const DDSD_PIXELFORMAT: u32 = 0x1000;

// Pixel format flags
pub const DDPF_ALPHAPIXELS: u32 = 0x1;
pub const DDPF_FOURCC: u32 = 0x4;
pub const DDPF_RGB: u32 = 0x40;
/// Set by NVIDIA tools on tangent-space normal maps
pub const DDPF_NORMAL: u32 = 0x8000_0000;

pub const DDSCAPS_TEXTURE: u32 = 0x1000;

// Two-channel formats that only ever hold normal maps
pub const DXGI_FORMAT_BC5_UNORM: u32 = 83;
pub const DXGI_FORMAT_BC5_SNORM: u32 = 84;

// R8G8B8A8: R=byte0 .. A=byte3
pub const RGBA8_MASKS: [u32; 4] = [0x0000_00FF, 0x0000_FF00, 0x00FF_0000, 0xFF00_0000];
// B8G8R8A8: B=byte0, G=byte1, R=byte2, A=byte3
pub const BGRA8_MASKS: [u32; 4] = [0x00FF_0000, 0x0000_FF00, 0x0000_00FF, 0xFF00_0000];

/// DDS_PIXELFORMAT, 32 bytes at offset 76
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DdsPixelFormat {
    pub size: u32,
    pub flags: u32,
    pub fourcc: [u8; 4],
    pub rgb_bit_count: u32,
    pub r_mask: u32,
    pub g_mask: u32,
    pub b_mask: u32,
    pub a_mask: u32,
}

/// Uncompressed layouts recognised from the bit masks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawLayout {
    Rgba8,
    Bgra8,
    /// 32-bit BGR with an unused fourth byte
    Bgrx8,
    Bgr8,
}

impl RawLayout {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            RawLayout::Bgr8 => 3,
            _ => 4,
        }
    }

    /// Legacy format carrying the same masks, used when writing the layout back
    pub fn d3d_format(self) -> D3DFormat {
        match self {
            RawLayout::Rgba8 => D3DFormat::A8B8G8R8,
            RawLayout::Bgra8 => D3DFormat::A8R8G8B8,
            RawLayout::Bgrx8 => D3DFormat::X8R8G8B8,
            RawLayout::Bgr8 => D3DFormat::R8G8B8,
        }
    }
}

impl DdsPixelFormat {
    /// FourCC as text, `None` when the code is all zeroes
    pub fn fourcc_str(&self) -> Option<String> {
        if self.fourcc == [0; 4] {
            return None;
        }
        Some(self.fourcc.iter().map(|&b| b as char).collect())
    }

    pub fn masks(&self) -> [u32; 4] {
        [self.r_mask, self.g_mask, self.b_mask, self.a_mask]
    }

    /// Detect an uncompressed layout from bit count and masks
    pub fn raw_layout(&self) -> Option<RawLayout> {
        if self.flags & DDPF_RGB == 0 {
            return None;
        }
        let [r, g, b, a] = self.masks();
        match self.rgb_bit_count {
            32 if self.masks() == RGBA8_MASKS => Some(RawLayout::Rgba8),
            32 if [r, g, b] == [BGRA8_MASKS[0], BGRA8_MASKS[1], BGRA8_MASKS[2]] => {
                if a == BGRA8_MASKS[3] && self.flags & DDPF_ALPHAPIXELS != 0 {
                    Some(RawLayout::Bgra8)
                } else {
                    Some(RawLayout::Bgrx8)
                }
            }
            24 if [r, g, b] == [0x00FF_0000, 0x0000_FF00, 0x0000_00FF] => Some(RawLayout::Bgr8),
            _ => None,
        }
    }
}

/// The fixed 128-byte header, magic included
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DdsHeader {
    pub magic: [u8; 4],
    pub size: u32,
    pub flags: u32,
    pub height: u32,
    pub width: u32,
    pub pitch_or_linear_size: u32,
    pub depth: u32,
    pub mip_map_count: u32,
    pub reserved1: [u32; 11],
    pub pixel_format: DdsPixelFormat,
    pub caps: u32,
    pub caps2: u32,
    pub reserved2: [u32; 3],
}

/// DDS_HEADER_DXT10
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dx10Header {
    pub dxgi_format: u32,
    pub resource_dimension: u32,
    pub misc_flag: u32,
    pub array_size: u32,
    pub misc_flags2: u32,
}

/// Read the main header and, when signalled, the DX10 block.
pub fn read_headers(bytes: &[u8], path: &Path) -> CodecResult<(DdsHeader, Option<Dx10Header>)> {
    if bytes.len() < DDS_MAGIC.len() || bytes[..4] != DDS_MAGIC {
        let found = bytes.get(..4).unwrap_or(bytes);
        return Err(CodecError::format(
            path,
            0,
            format!("expected magic 'DDS ', found {:02x?}", found),
        ));
    }
    if bytes.len() < DDS_HEADER_SIZE {
        return Err(CodecError::format(
            path,
            bytes.len(),
            format!(
                "header truncated: need {} bytes, file has {}",
                DDS_HEADER_SIZE,
                bytes.len()
            ),
        ));
    }

    let mut cursor = Cursor::new(bytes);
    let header: DdsHeader = cursor
        .read_le()
        .map_err(|e| CodecError::format(path, 0, e.to_string()))?;

    if header.size != HEADER_SIZE_FIELD {
        debug!(
            "{}: unusual header size field {} (expected {})",
            path.display(),
            header.size,
            HEADER_SIZE_FIELD
        );
    }

    // Sniff the code at its fixed offset; some writers forget DDPF_FOURCC
    if bytes[FOURCC_OFFSET..FOURCC_OFFSET + 4] != FOURCC_DX10 {
        return Ok((header, None));
    }

    if bytes.len() < DDS_HEADER_SIZE + DX10_HEADER_SIZE {
        return Err(CodecError::format(
            path,
            DDS_HEADER_SIZE,
            format!(
                "DX10 block truncated: need {} bytes, file has {}",
                DDS_HEADER_SIZE + DX10_HEADER_SIZE,
                bytes.len()
            ),
        ));
    }
    let dx10: Dx10Header = cursor
        .read_le()
        .map_err(|e| CodecError::format(path, DDS_HEADER_SIZE, e.to_string()))?;

    Ok((header, Some(dx10)))
}

/// Parse a DDS file's headers into a metadata record.
///
/// Only structural problems fail; an unknown compression code maps to DXT5.
pub fn parse_header(bytes: &[u8], path: &Path) -> CodecResult<ContainerMetadata> {
    let (header, dx10) = read_headers(bytes, path)?;
    let pf = header.pixel_format;
    let fourcc = pf.fourcc_str();

    let format_id = if dx10.is_some() {
        FormatId::ExtendedFormat
    } else if let Some(code) = fourcc.as_deref() {
        FormatId::try_from_code(code).unwrap_or_else(|| {
            warn!(
                "{}: unknown compression code '{}', defaulting to {}",
                path.display(),
                code.escape_default(),
                FormatId::default()
            );
            FormatId::default()
        })
    } else if pf.raw_layout().is_some() {
        FormatId::Raw
    } else {
        warn!(
            "{}: unrecognised uncompressed layout ({} bpp, masks {:08x?}), defaulting to {}",
            path.display(),
            pf.rgb_bit_count,
            pf.masks(),
            FormatId::default()
        );
        FormatId::default()
    };

    let is_normal_map = pf.flags & DDPF_NORMAL != 0
        || matches!(fourcc.as_deref(), Some("ATI2" | "BC5U" | "BC5S"))
        || matches!(
            dx10.map(|d| d.dxgi_format),
            Some(DXGI_FORMAT_BC5_UNORM | DXGI_FORMAT_BC5_SNORM)
        );

    let extended_header =
        dx10.map(|_| bytes[DDS_HEADER_SIZE..DDS_HEADER_SIZE + DX10_HEADER_SIZE].to_vec());

    debug!(
        "{}: DDS {}x{} code={:?} format={} mips={}",
        path.display(),
        header.width,
        header.height,
        fourcc,
        format_id,
        header.mip_map_count
    );

    Ok(ContainerMetadata {
        container: Some(ContainerKind::Dds),
        format_id,
        width: Some(header.width),
        height: Some(header.height),
        fourcc,
        mip_count: Some(header.mip_map_count.max(1)),
        flags: Some(header.flags),
        raw_header: Some(bytes[..DDS_HEADER_SIZE].to_vec()),
        extended_header,
        dxgi_format: dx10.map(|d| d.dxgi_format),
        aux: Some(AuxiliaryFields {
            is_normal_map,
            has_bumpmap: false,
        }),
        vtf: None,
    })
}

/// Byte offset of the pixel payload described by `metadata`
pub fn payload_offset(metadata: &ContainerMetadata) -> usize {
    if metadata.extended_header.is_some() {
        DDS_HEADER_SIZE + DX10_HEADER_SIZE
    } else {
        DDS_HEADER_SIZE
    }
}

/// Recover the typed headers recorded in metadata, if any
pub fn recorded_headers(metadata: &ContainerMetadata) -> (Option<DdsHeader>, Option<Dx10Header>) {
    let header = metadata
        .raw_header
        .as_deref()
        .filter(|b| b.len() >= DDS_HEADER_SIZE)
        .and_then(|b| Cursor::new(b).read_le::<DdsHeader>().ok());
    let dx10 = metadata
        .extended_header
        .as_deref()
        .filter(|b| b.len() >= DX10_HEADER_SIZE)
        .and_then(|b| Cursor::new(b).read_le::<Dx10Header>().ok());
    (header, dx10)
}

/// Rebuild the recorded headers as a `ddsfile` surface with no payload.
///
/// `read_headers` tolerates odd size fields and a DX10 code without
/// `DDPF_FOURCC`; ddsfile does not, so those fields are normalised first.
/// A `dxgi_format` in the metadata replaces the one in the DX10 block, and
/// on its own is enough to describe a surface.
pub fn recorded_dds(metadata: &ContainerMetadata) -> Option<Dds> {
    let mut bytes = match metadata.raw_header.as_deref() {
        Some(raw) => {
            let mut bytes = raw.get(..DDS_HEADER_SIZE)?.to_vec();
            bytes[4..8].copy_from_slice(&HEADER_SIZE_FIELD.to_le_bytes());
            bytes[76..80].copy_from_slice(&PIXEL_FORMAT_SIZE.to_le_bytes());

            if let Some(extended) = metadata.extended_header.as_deref() {
                let pf_flags = u32::from_le_bytes(bytes[80..84].try_into().ok()?) | DDPF_FOURCC;
                bytes[80..84].copy_from_slice(&pf_flags.to_le_bytes());
                bytes[FOURCC_OFFSET..FOURCC_OFFSET + 4].copy_from_slice(&FOURCC_DX10);
                bytes.extend_from_slice(extended.get(..DX10_HEADER_SIZE)?);
            }
            bytes
        }
        None if metadata.dxgi_format.is_some() => blank_dx10_header()?,
        None => return None,
    };

    if bytes.len() == DDS_HEADER_SIZE + DX10_HEADER_SIZE {
        if let Some(dxgi) = metadata.dxgi_format {
            bytes[DDS_HEADER_SIZE..DDS_HEADER_SIZE + 4].copy_from_slice(&dxgi.to_le_bytes());
        }
        // Alpha modes past "custom" are not representable
        let alpha = DDS_HEADER_SIZE + 16;
        if u32::from_le_bytes(bytes[alpha..alpha + 4].try_into().ok()?) > 4 {
            bytes[alpha..alpha + 4].fill(0);
        }
    }

    Dds::read(Cursor::new(bytes)).ok()
}

/// A 2D DX10 header whose format is patched in by the caller
fn blank_dx10_header() -> Option<Vec<u8>> {
    let mut dds = Dds::new_dxgi(NewDxgiParams {
        height: 4,
        width: 4,
        depth: None,
        format: DxgiFormat::BC7_UNorm,
        mipmap_levels: None,
        array_layers: None,
        caps2: None,
        is_cubemap: false,
        resource_dimension: D3D10ResourceDimension::Texture2D,
        alpha_mode: AlphaMode::Unknown,
    })
    .ok()?;
    dds.data.clear();

    let mut bytes = Vec::with_capacity(DDS_HEADER_SIZE + DX10_HEADER_SIZE);
    dds.write(&mut bytes).ok()?;
    Some(bytes)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image_dds::ddsfile::NewD3dParams;

    /// Hand-built header for a FourCC-compressed surface
    pub(crate) fn fourcc_header(width: u32, height: u32, fourcc: &[u8; 4]) -> Vec<u8> {
        let flags = DDSD_CAPS | DDSD_HEIGHT | DDSD_WIDTH | DDSD_PIXELFORMAT;
        let mut bytes = vec![0u8; DDS_HEADER_SIZE];
        bytes[0..4].copy_from_slice(b"DDS ");
        bytes[4..8].copy_from_slice(&124u32.to_le_bytes());
        bytes[8..12].copy_from_slice(&flags.to_le_bytes());
        bytes[12..16].copy_from_slice(&height.to_le_bytes());
        bytes[16..20].copy_from_slice(&width.to_le_bytes());
        bytes[28..32].copy_from_slice(&1u32.to_le_bytes());
        bytes[76..80].copy_from_slice(&32u32.to_le_bytes());
        bytes[80..84].copy_from_slice(&DDPF_FOURCC.to_le_bytes());
        bytes[84..88].copy_from_slice(fourcc);
        bytes[108..112].copy_from_slice(&DDSCAPS_TEXTURE.to_le_bytes());
        bytes
    }

    /// Header and DX10 block written by ddsfile, without payload
    pub(crate) fn dxgi_header(
        width: u32,
        height: u32,
        format: DxgiFormat,
        alpha_mode: AlphaMode,
    ) -> Vec<u8> {
        let mut dds = Dds::new_dxgi(NewDxgiParams {
            height,
            width,
            depth: None,
            format,
            mipmap_levels: None,
            array_layers: None,
            caps2: None,
            is_cubemap: false,
            resource_dimension: D3D10ResourceDimension::Texture2D,
            alpha_mode,
        })
        .unwrap();
        dds.data.clear();
        let mut bytes = Vec::new();
        dds.write(&mut bytes).unwrap();
        bytes
    }

    /// Uncompressed header written by ddsfile, without payload
    pub(crate) fn raw_header(width: u32, height: u32, format: D3DFormat) -> Vec<u8> {
        let mut dds = Dds::new_d3d(NewD3dParams {
            height,
            width,
            depth: None,
            format,
            mipmap_levels: None,
            caps2: None,
        })
        .unwrap();
        dds.data.clear();
        let mut bytes = Vec::new();
        dds.write(&mut bytes).unwrap();
        bytes
    }

    #[test]
    fn test_parse_dxt1_header() {
        let bytes = fourcc_header(64, 32, b"DXT1");
        let meta = parse_header(&bytes, Path::new("a.dds")).unwrap();

        assert_eq!(meta.container, Some(ContainerKind::Dds));
        assert_eq!(meta.format_id, FormatId::BlockCompressed1);
        assert_eq!(meta.width, Some(64));
        assert_eq!(meta.height, Some(32));
        assert_eq!(meta.fourcc.as_deref(), Some("DXT1"));
        assert_eq!(meta.raw_header.as_deref(), Some(&bytes[..]));
        assert!(meta.extended_header.is_none());
        assert!(!meta.is_normal_map());
    }

    #[test]
    fn test_unknown_code_defaults_to_dxt5() {
        let bytes = fourcc_header(16, 16, b"ZZZZ");
        let meta = parse_header(&bytes, Path::new("odd.dds")).unwrap();
        assert_eq!(meta.format_id, FormatId::BlockCompressed5);
        assert_eq!(meta.fourcc.as_deref(), Some("ZZZZ"));
    }

    #[test]
    fn test_bad_magic_is_format_error() {
        let mut bytes = fourcc_header(16, 16, b"DXT1");
        bytes[0..4].copy_from_slice(b"PNG ");
        let err = parse_header(&bytes, Path::new("bad.dds")).unwrap_err();
        assert!(matches!(err, CodecError::Format { offset: 0, .. }));

        let err = parse_header(b"DD", Path::new("tiny.dds")).unwrap_err();
        assert!(matches!(err, CodecError::Format { .. }));
    }

    #[test]
    fn test_truncated_header_is_format_error() {
        let bytes = fourcc_header(16, 16, b"DXT1");
        let err = parse_header(&bytes[..100], Path::new("short.dds")).unwrap_err();
        assert!(matches!(err, CodecError::Format { offset: 100, .. }));
    }

    #[test]
    fn test_dx10_block_is_read() {
        let bytes = dxgi_header(8, 8, DxgiFormat::BC7_UNorm, AlphaMode::Unknown);
        assert_eq!(bytes.len(), DDS_HEADER_SIZE + DX10_HEADER_SIZE);

        let meta = parse_header(&bytes, Path::new("bc7.dds")).unwrap();
        assert_eq!(meta.format_id, FormatId::ExtendedFormat);
        assert_eq!(meta.dxgi_format, Some(DxgiFormat::BC7_UNorm as u32));
        assert_eq!(meta.extended_header.as_deref(), Some(&bytes[DDS_HEADER_SIZE..]));
        assert_eq!(payload_offset(&meta), DDS_HEADER_SIZE + DX10_HEADER_SIZE);

        let err = parse_header(&bytes[..140], Path::new("cut.dds")).unwrap_err();
        assert!(matches!(err, CodecError::Format { offset: 128, .. }));
    }

    #[test]
    fn test_normal_map_codes_are_flagged() {
        let bytes = fourcc_header(8, 8, b"ATI2");
        let meta = parse_header(&bytes, Path::new("n.dds")).unwrap();
        assert!(meta.is_normal_map());
        assert_eq!(meta.format_id, FormatId::BlockCompressed5);

        let bytes = dxgi_header(8, 8, DxgiFormat::BC5_UNorm, AlphaMode::Unknown);
        let meta = parse_header(&bytes, Path::new("n10.dds")).unwrap();
        assert!(meta.is_normal_map());
    }

    #[test]
    fn test_raw_layouts_are_detected() {
        for (format, layout) in [
            (D3DFormat::A8B8G8R8, RawLayout::Rgba8),
            (D3DFormat::A8R8G8B8, RawLayout::Bgra8),
            (D3DFormat::X8R8G8B8, RawLayout::Bgrx8),
            (D3DFormat::R8G8B8, RawLayout::Bgr8),
        ] {
            let bytes = raw_header(4, 4, format);
            let (header, dx10) = read_headers(&bytes, Path::new("raw.dds")).unwrap();
            assert!(dx10.is_none());
            assert_eq!(header.pixel_format.raw_layout(), Some(layout));
            assert_eq!(layout.d3d_format(), format);

            let meta = parse_header(&bytes, Path::new("raw.dds")).unwrap();
            assert_eq!(meta.format_id, FormatId::Raw);
            assert_eq!(meta.fourcc, None);
        }
    }

    #[test]
    fn test_recorded_headers_roundtrip() {
        let bytes = fourcc_header(32, 16, b"DXT3");
        let meta = parse_header(&bytes, Path::new("t.dds")).unwrap();
        let (header, dx10) = recorded_headers(&meta);
        let header = header.unwrap();
        assert_eq!((header.width, header.height), (32, 16));
        assert_eq!(header.pixel_format.fourcc, *b"DXT3");
        assert!(dx10.is_none());
    }

    #[test]
    fn test_recorded_dds_tolerates_lenient_writers() {
        let mut bytes = dxgi_header(8, 8, DxgiFormat::BC7_UNorm, AlphaMode::Straight);
        // Wrong size field and a DX10 code without DDPF_FOURCC
        bytes[4..8].copy_from_slice(&0u32.to_le_bytes());
        bytes[80..84].copy_from_slice(&0u32.to_le_bytes());

        let meta = parse_header(&bytes, Path::new("lenient.dds")).unwrap();
        assert_eq!(meta.format_id, FormatId::ExtendedFormat);

        let dds = recorded_dds(&meta).unwrap();
        assert!(dds.data.is_empty());
        let header10 = dds.header10.unwrap();
        assert_eq!(header10.dxgi_format, DxgiFormat::BC7_UNorm);
        assert_eq!(header10.alpha_mode, AlphaMode::Straight);
    }

    #[test]
    fn test_recorded_dds_prefers_metadata_dxgi() {
        let bytes = dxgi_header(8, 8, DxgiFormat::BC7_UNorm, AlphaMode::Unknown);
        let mut meta = parse_header(&bytes, Path::new("edited.dds")).unwrap();
        meta.dxgi_format = Some(DxgiFormat::BC1_UNorm_sRGB as u32);

        let dds = recorded_dds(&meta).unwrap();
        assert_eq!(dds.header10.unwrap().dxgi_format, DxgiFormat::BC1_UNorm_sRGB);

        assert!(recorded_dds(&ContainerMetadata::fallback()).is_none());

        // A bare DXGI code still describes a 2D DX10 surface
        let meta = ContainerMetadata {
            dxgi_format: Some(DxgiFormat::BC5_UNorm as u32),
            ..ContainerMetadata::fallback()
        };
        let dds = recorded_dds(&meta).unwrap();
        assert_eq!(dds.header10.unwrap().dxgi_format, DxgiFormat::BC5_UNorm);
    }
}
