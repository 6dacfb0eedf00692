//! Valve Texture Format support via VTFCmd
//!
//! Nothing here reads VTF bytes directly. Decoding exports a PNG with the
//! external tool, metadata comes from its `-info` text dump, and encoding
//! hands the edited PNG back to the tool.

use regex::Regex;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info};

use super::dispatch::HeaderParser;
use super::error::{CodecError, CodecResult};
use super::metadata::{AuxiliaryFields, ContainerKind, ContainerMetadata, FormatId, VtfInfo};
use super::pixels::PixelBuffer;
use super::tool::ExternalTool;

/// Executable names searched for on PATH
pub const VTFCMD_BINARIES: [&str; 2] = ["VTFCmd", "VTFCmd.exe"];

/// TEXTUREFLAGS_NORMAL
const VTF_FLAG_NORMAL: u32 = 0x0000_0080;
/// TEXTUREFLAGS_SSBUMP
const VTF_FLAG_SSBUMP: u32 = 0x0800_0000;

/// Find VTFCmd: explicit path, then PATH, then next to our own executable
pub fn locate_vtfcmd(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }

    let on_path = VTFCMD_BINARIES.iter().find_map(|name| which::which(name).ok());
    let beside_exe = || {
        let dir = std::env::current_exe().ok()?.parent()?.to_path_buf();
        VTFCMD_BINARIES
            .iter()
            .map(|name| dir.join(name))
            .find(|candidate| candidate.exists())
    };

    let found = on_path.or_else(beside_exe);
    if let Some(path) = &found {
        info!("Found VTFCmd at: {}", path.display());
    }
    found
}

/// Target format argument for `-format`
pub fn vtf_format_code(format_id: FormatId) -> &'static str {
    match format_id {
        FormatId::BlockCompressed1 => "dxt1",
        FormatId::BlockCompressed3 => "dxt3",
        FormatId::Raw => "rgba8888",
        // VTF has no DX10 container; DXT5 is the closest general-purpose target
        FormatId::BlockCompressed5 | FormatId::ExtendedFormat => "dxt5",
    }
}

/// Map a VTF image format name to the encoder's closed set
fn format_id_for_name(name: &str) -> FormatId {
    let name = name.to_ascii_uppercase();
    if name.contains("DXT1") {
        FormatId::BlockCompressed1
    } else if name.contains("DXT3") {
        FormatId::BlockCompressed3
    } else if name.contains("DXT5") {
        FormatId::BlockCompressed5
    } else if ["RGBA8888", "BGRA8888", "ABGR8888", "ARGB8888", "RGB888", "BGR888", "BGRX8888"]
        .iter()
        .any(|raw| name.contains(raw))
    {
        FormatId::Raw
    } else {
        FormatId::default()
    }
}

fn labeled(label: &'static str, value: &'static str) -> Regex {
    // Anchored so "Width:" doesn't pick up "Thumbnail Width:"
    Regex::new(&format!(r"(?mi)^\s*{}\s*:\s*{}", label, value)).unwrap()
}

struct InfoPatterns {
    version: Regex,
    width: Regex,
    height: Regex,
    depth: Regex,
    frames: Regex,
    faces: Regex,
    mipmaps: Regex,
    flags: Regex,
    format: Regex,
    reflectivity: Regex,
}

fn patterns() -> &'static InfoPatterns {
    static PATTERNS: OnceLock<InfoPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| InfoPatterns {
        version: labeled("Version", r"(\d+(?:\.\d+)*)"),
        width: labeled("Width", r"(\d+)"),
        height: labeled("Height", r"(\d+)"),
        depth: labeled("Depth", r"(\d+)"),
        frames: labeled("Frames", r"(\d+)"),
        faces: labeled("Faces", r"(\d+)"),
        mipmaps: labeled("Mipmaps", r"(\d+)"),
        flags: labeled("Flags", r"(0x[0-9A-Fa-f]+|\d+)"),
        format: labeled("Format", r"([A-Za-z0-9_]+)"),
        reflectivity: labeled(
            "Reflectivity",
            r"(-?[\d.]+)\s*,?\s*(-?[\d.]+)\s*,?\s*(-?[\d.]+)",
        ),
    })
}

fn capture<'t>(re: &Regex, text: &'t str) -> Option<&'t str> {
    re.captures(text).and_then(|c| c.get(1)).map(|m| m.as_str())
}

fn capture_u32(re: &Regex, text: &str) -> Option<u32> {
    capture(re, text)?.parse().ok()
}

fn parse_flags(value: &str) -> Option<u32> {
    match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

/// Extract metadata from VTFCmd's `-info` dump.
///
/// Lines that are missing or unparsable are simply left out.
pub fn parse_info(text: &str) -> ContainerMetadata {
    let p = patterns();

    let format_name = capture(&p.format, text).map(str::to_string);
    let format_id = match format_name.as_deref() {
        Some(name) => format_id_for_name(name),
        // Older dumps only mention the code somewhere in free text
        None => ["DXT1", "DXT3", "DXT5"]
            .iter()
            .find(|code| text.contains(*code))
            .map(|code| FormatId::from_code(code))
            .unwrap_or_default(),
    };

    let flags = capture(&p.flags, text).and_then(parse_flags);
    let upper = text.to_ascii_uppercase();
    let is_normal_map =
        flags.is_some_and(|f| f & VTF_FLAG_NORMAL != 0) || upper.contains("NORMAL");
    let has_bumpmap = flags.is_some_and(|f| f & VTF_FLAG_SSBUMP != 0)
        || upper.contains("BUMPMAP")
        || upper.contains("SSBUMP");

    let reflectivity = p.reflectivity.captures(text).and_then(|c| {
        let component = |i: usize| c.get(i)?.as_str().parse::<f32>().ok();
        Some([component(1)?, component(2)?, component(3)?])
    });

    ContainerMetadata {
        container: Some(ContainerKind::Vtf),
        format_id,
        width: capture_u32(&p.width, text),
        height: capture_u32(&p.height, text),
        mip_count: capture_u32(&p.mipmaps, text),
        flags,
        aux: Some(AuxiliaryFields {
            is_normal_map,
            has_bumpmap,
        }),
        vtf: Some(VtfInfo {
            version: capture(&p.version, text).map(str::to_string),
            depth: capture_u32(&p.depth, text),
            frames: capture_u32(&p.frames, text),
            faces: capture_u32(&p.faces, text),
            format_name,
            reflectivity,
        }),
        ..ContainerMetadata::fallback()
    }
}

/// VTFCmd wrapper
#[derive(Debug, Clone)]
pub struct VtfConverter {
    tool: ExternalTool,
}

impl VtfConverter {
    pub fn new(tool: ExternalTool) -> Self {
        Self { tool }
    }

    pub fn tool(&self) -> &ExternalTool {
        &self.tool
    }

    /// Raw `-info` dump for a VTF file
    pub fn info(&self, input: &Path) -> CodecResult<String> {
        let out = self
            .tool
            .run([OsStr::new("-file"), input.as_os_str(), OsStr::new("-info")], input)?;
        Ok(out.stdout)
    }

    /// Export a VTF file to PNG
    pub fn export_png(&self, input: &Path, output: &Path) -> CodecResult<()> {
        self.tool.run(
            [
                OsStr::new("-file"),
                input.as_os_str(),
                OsStr::new("-output"),
                output.as_os_str(),
                OsStr::new("-exportformat"),
                OsStr::new("png"),
            ],
            input,
        )?;
        Ok(())
    }

    /// Command-line arguments used to build a VTF from a PNG
    pub fn import_args(png: &Path, output: &Path, metadata: &ContainerMetadata) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-file".into(),
            png.display().to_string(),
            "-output".into(),
            output.display().to_string(),
            "-format".into(),
            vtf_format_code(metadata.format_id).into(),
            "-mipmaps".into(),
            "1".into(),
            // Never derive normals from the pixels; a normal map keeps its NORMAL flag below
            "-normal".into(),
            "0".into(),
        ];

        if metadata.container == Some(ContainerKind::Vtf) {
            if let Some(flags) = metadata.flags {
                args.extend(["-flags".into(), flags.to_string()]);
            }
        }
        if metadata.has_bumpmap() {
            args.extend(["-bumpmap".into(), "1".into()]);
        }
        args
    }

    /// Build a VTF file from a PNG
    pub fn import_png(
        &self,
        png: &Path,
        output: &Path,
        metadata: &ContainerMetadata,
    ) -> CodecResult<()> {
        self.tool.run(Self::import_args(png, output, metadata), output)?;
        Ok(())
    }

    /// Decode a VTF file: export to PNG in a scratch directory, then load it.
    pub fn decode(&self, path: &Path) -> CodecResult<(PixelBuffer, ContainerMetadata)> {
        let metadata = self.parse(path)?;

        let scratch = scratch_dir(path)?;
        let png = scratch.path().join(format!("{}.png", file_stem(path)));
        self.export_png(path, &png)?;

        let png =
            produced_file(scratch.path(), &png, "png").ok_or_else(|| CodecError::ToolInvocation {
                tool: "VTFCmd".into(),
                path: path.to_path_buf(),
                reason: "tool reported success but wrote no PNG".into(),
            })?;
        let pixels = PixelBuffer::load(&png)?;

        debug!(
            "Decoded VTF {} -> {}x{} ({} channels)",
            path.display(),
            pixels.width(),
            pixels.height(),
            pixels.channels()
        );
        Ok((pixels, metadata))
    }

    /// Encode pixels to a VTF file at `output`
    pub fn encode(
        &self,
        pixels: &PixelBuffer,
        metadata: &ContainerMetadata,
        output: &Path,
    ) -> CodecResult<()> {
        let scratch = scratch_dir(output)?;
        let png = scratch.path().join(format!("{}.png", file_stem(output)));
        pixels.save(&png)?;

        self.import_png(&png, output, metadata)?;

        if !output.exists() {
            return Err(CodecError::ToolInvocation {
                tool: "VTFCmd".into(),
                path: output.to_path_buf(),
                reason: "tool reported success but wrote no VTF".into(),
            });
        }
        Ok(())
    }
}

impl HeaderParser for VtfConverter {
    fn parse(&self, path: &Path) -> CodecResult<ContainerMetadata> {
        let dump = self.info(path)?;
        let metadata = parse_info(&dump);
        debug!(
            "{}: VTF {:?}x{:?} format={}",
            path.display(),
            metadata.width,
            metadata.height,
            metadata.format_id
        );
        Ok(metadata)
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "texture".to_string())
}

fn scratch_dir(subject: &Path) -> CodecResult<tempfile::TempDir> {
    tempfile::Builder::new()
        .prefix("retex_vtf_")
        .tempdir()
        .map_err(|e| CodecError::io(subject, e))
}

/// The expected output, or the first file with `ext` the tool dropped in `dir`
fn produced_file(dir: &Path, expected: &Path, ext: &str) -> Option<PathBuf> {
    if expected.is_file() {
        return Some(expected.to_path_buf());
    }
    walkdir::WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .map(|entry| entry.into_path())
        .find(|p| {
            p.is_file()
                && p.extension()
                    .is_some_and(|e| e.to_string_lossy().eq_ignore_ascii_case(ext))
        })
}
