//! Container metadata record
//!
//! Everything the header parsers pull out of a texture, detached from the
//! original bytes so a later encode can rebuild the container. Serialized as
//! a JSON side-car next to the editable image.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use super::error::{CodecError, CodecResult};

/// Container families the codec understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerKind {
    Dds,
    Vtf,
}

impl ContainerKind {
    /// Resolve a container from a file extension (case-insensitive)
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "dds" => Some(ContainerKind::Dds),
            "vtf" => Some(ContainerKind::Vtf),
            _ => None,
        }
    }

    /// Parse a user-supplied container name ("dds", ".VTF", ...)
    pub fn from_name(name: &str) -> Option<Self> {
        Self::from_extension(name.trim_start_matches('.'))
    }

    pub fn extension(self) -> &'static str {
        match self {
            ContainerKind::Dds => "dds",
            ContainerKind::Vtf => "vtf",
        }
    }
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Compression the encoder will target
///
/// Closed set; anything unrecognized collapses to [`FormatId::BlockCompressed5`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FormatId {
    /// DXT1
    BlockCompressed1,
    /// DXT3 (explicit 4-bit alpha)
    BlockCompressed3,
    /// DXT5 (interpolated alpha)
    #[default]
    BlockCompressed5,
    /// DX10 extended header, DXGI format stored separately
    ExtendedFormat,
    /// Uncompressed 32-bit RGBA
    Raw,
}

impl FormatId {
    /// Map a raw compression code to a format, falling back to DXT5.
    pub fn from_code(code: &str) -> Self {
        Self::try_from_code(code).unwrap_or_default()
    }

    /// Strict variant of [`FormatId::from_code`]
    pub fn try_from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "DXT1" | "BC1" => Some(FormatId::BlockCompressed1),
            "DXT2" | "DXT3" | "BC2" => Some(FormatId::BlockCompressed3),
            "DXT4" | "DXT5" | "BC3" => Some(FormatId::BlockCompressed5),
            "DX10" => Some(FormatId::ExtendedFormat),
            "RAW" | "RGBA" => Some(FormatId::Raw),
            _ => None,
        }
    }

    /// Canonical code written to headers and side-cars
    pub fn code(self) -> &'static str {
        match self {
            FormatId::BlockCompressed1 => "DXT1",
            FormatId::BlockCompressed3 => "DXT3",
            FormatId::BlockCompressed5 => "DXT5",
            FormatId::ExtendedFormat => "DX10",
            FormatId::Raw => "RAW",
        }
    }
}

impl From<String> for FormatId {
    fn from(code: String) -> Self {
        FormatId::from_code(&code)
    }
}

impl From<FormatId> for String {
    fn from(format: FormatId) -> Self {
        format.code().to_string()
    }
}

impl fmt::Display for FormatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Hints that only some containers record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AuxiliaryFields {
    #[serde(default)]
    pub is_normal_map: bool,
    #[serde(default)]
    pub has_bumpmap: bool,
}

/// VTF-only fields lifted from the converter's info dump
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VtfInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frames: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub faces: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reflectivity: Option<[f32; 3]>,
}

/// Metadata handle passed from decode to encode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<ContainerKind>,

    #[serde(default)]
    pub format_id: FormatId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,

    /// Compression code exactly as stored in the source header
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fourcc: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mip_count: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<u32>,

    /// Source header bytes, for fields not modeled above
    #[serde(default, skip_serializing_if = "Option::is_none", with = "base64_bytes")]
    pub raw_header: Option<Vec<u8>>,

    /// Present iff an extended (DX10) block was read
    #[serde(default, skip_serializing_if = "Option::is_none", with = "base64_bytes")]
    pub extended_header: Option<Vec<u8>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dxgi_format: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aux: Option<AuxiliaryFields>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vtf: Option<VtfInfo>,
}

impl Default for ContainerMetadata {
    fn default() -> Self {
        Self::fallback()
    }
}

impl ContainerMetadata {
    /// Metadata used when extraction failed: DXT5 and nothing else.
    pub fn fallback() -> Self {
        Self {
            container: None,
            format_id: FormatId::default(),
            width: None,
            height: None,
            fourcc: None,
            mip_count: None,
            flags: None,
            raw_header: None,
            extended_header: None,
            dxgi_format: None,
            aux: None,
            vtf: None,
        }
    }

    /// Width and height, if both were extracted
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        Some((self.width?, self.height?))
    }

    pub fn is_normal_map(&self) -> bool {
        self.aux.is_some_and(|aux| aux.is_normal_map)
    }

    pub fn has_bumpmap(&self) -> bool {
        self.aux.is_some_and(|aux| aux.has_bumpmap)
    }

    /// Write the record as a pretty-printed JSON side-car
    pub fn save(&self, path: &Path) -> CodecResult<()> {
        let content = serde_json::to_string_pretty(self).map_err(|source| CodecError::Metadata {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, content).map_err(|e| CodecError::io(path, e))
    }

    /// Read a JSON side-car written by [`ContainerMetadata::save`]
    pub fn load(path: &Path) -> CodecResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| CodecError::io(path, e))?;
        serde_json::from_str(&content).map_err(|source| CodecError::Metadata {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Like [`ContainerMetadata::load`], but any failure yields fallback metadata.
    pub fn load_or_fallback(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::fallback();
        };
        match Self::load(path) {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::warn!("Could not read metadata side-car: {}. Using DXT5 defaults.", e);
                Self::fallback()
            }
        }
    }
}

/// Byte fields travel as base64 strings in the side-car
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        // A corrupt blob is dropped rather than failing the whole record
        Ok(encoded.and_then(|s| STANDARD.decode(s.as_bytes()).ok()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_id_from_code() {
        assert_eq!(FormatId::from_code("DXT1"), FormatId::BlockCompressed1);
        assert_eq!(FormatId::from_code("dxt3"), FormatId::BlockCompressed3);
        assert_eq!(FormatId::from_code("DXT5"), FormatId::BlockCompressed5);
        assert_eq!(FormatId::from_code("DX10"), FormatId::ExtendedFormat);
        assert_eq!(FormatId::from_code("ATI2"), FormatId::BlockCompressed5);
        assert_eq!(FormatId::from_code(""), FormatId::BlockCompressed5);
        assert_eq!(FormatId::try_from_code("YUY2"), None);
    }

    #[test]
    fn test_container_kind_from_extension() {
        assert_eq!(ContainerKind::from_extension("DDS"), Some(ContainerKind::Dds));
        assert_eq!(ContainerKind::from_extension("vtf"), Some(ContainerKind::Vtf));
        assert_eq!(ContainerKind::from_name(".Vtf"), Some(ContainerKind::Vtf));
        assert_eq!(ContainerKind::from_extension("bmp"), None);
    }

    #[test]
    fn test_fallback_is_dxt5_and_empty() {
        let meta = ContainerMetadata::fallback();
        assert_eq!(meta.format_id, FormatId::BlockCompressed5);
        assert!(meta.dimensions().is_none());
        assert!(meta.raw_header.is_none());
        assert!(!meta.is_normal_map());
    }

    #[test]
    fn test_unknown_format_in_sidecar_defaults() {
        let meta: ContainerMetadata =
            serde_json::from_str(r#"{"format_id": "PVRTC", "width": 32}"#).unwrap();
        assert_eq!(meta.format_id, FormatId::BlockCompressed5);
        assert_eq!(meta.width, Some(32));

        let meta: ContainerMetadata = serde_json::from_str("{}").unwrap();
        assert_eq!(meta, ContainerMetadata::fallback());
    }

    #[test]
    fn test_sidecar_roundtrip_keeps_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tex.json");

        let meta = ContainerMetadata {
            container: Some(ContainerKind::Dds),
            format_id: FormatId::ExtendedFormat,
            width: Some(64),
            height: Some(32),
            fourcc: Some("DX10".into()),
            raw_header: Some(vec![0x44, 0x44, 0x53, 0x20, 0xff]),
            extended_header: Some(vec![98, 0, 0, 0]),
            dxgi_format: Some(98),
            aux: Some(AuxiliaryFields {
                is_normal_map: true,
                has_bumpmap: false,
            }),
            ..ContainerMetadata::fallback()
        };
        meta.save(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"format_id\": \"DX10\""));
        assert!(text.contains("RERTIP8="));

        let loaded = ContainerMetadata::load(&path).unwrap();
        assert_eq!(loaded, meta);
    }

    #[test]
    fn test_load_or_fallback_on_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let meta = ContainerMetadata::load_or_fallback(Some(&dir.path().join("missing.json")));
        assert_eq!(meta.format_id, FormatId::BlockCompressed5);
        assert_eq!(ContainerMetadata::load_or_fallback(None), ContainerMetadata::fallback());
    }
}
