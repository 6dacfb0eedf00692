//! Format dispatch and the editable-file contract
//!
//! Routes a path to the DDS or VTF implementation by extension and exposes
//! the decode/encode pair external callers work with.

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::dds;
use super::error::{CodecError, CodecResult};
use super::metadata::{ContainerKind, ContainerMetadata};
use super::pixels::PixelBuffer;
use super::processor::{decode_pixels, encode_pixels};
use super::tool::ExternalTool;
use super::vtf::{locate_vtfcmd, VtfConverter};
use crate::config::ConverterConfig;
use crate::paths;

/// Anything that can turn a container file into a metadata record
pub trait HeaderParser {
    fn parse(&self, path: &Path) -> CodecResult<ContainerMetadata>;
}

/// In-process parser for the fixed DDS header
#[derive(Debug, Clone, Copy, Default)]
pub struct DdsHeaderParser;

impl HeaderParser for DdsHeaderParser {
    fn parse(&self, path: &Path) -> CodecResult<ContainerMetadata> {
        let bytes = std::fs::read(path).map_err(|e| CodecError::io(path, e))?;
        dds::parse_header(&bytes, path)
    }
}

/// Where a single conversion request currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionStage {
    Idle,
    Parsing,
    Decoding,
    /// Pixels handed to the caller for editing
    Editing,
    Encoding,
    Done,
    Failed,
}

fn enter(stage: ConversionStage, path: &Path) {
    debug!("{}: {:?}", path.display(), stage);
}

/// Log the failure transition on the way out
fn track<T>(result: CodecResult<T>, path: &Path) -> CodecResult<T> {
    if let Err(e) = &result {
        debug!("{}: {:?} ({})", path.display(), ConversionStage::Failed, e);
    }
    result
}

/// Files produced by [`TextureCodec::convert_to_editable`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditableAsset {
    pub image_path: PathBuf,
    pub metadata_path: PathBuf,
}

/// One-line summary of a texture for `info` output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureInfo {
    pub container: Option<ContainerKind>,
    pub code: &'static str,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub mip_count: Option<u32>,
    pub is_normal_map: bool,
}

impl From<&ContainerMetadata> for TextureInfo {
    fn from(meta: &ContainerMetadata) -> Self {
        Self {
            container: meta.container,
            code: meta.format_id.code(),
            width: meta.width,
            height: meta.height,
            mip_count: meta.mip_count,
            is_normal_map: meta.is_normal_map(),
        }
    }
}

impl std::fmt::Display for TextureInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let dim = |v: Option<u32>| v.map(|v| v.to_string()).unwrap_or_else(|| "?".into());
        let container = self.container.map(|c| c.to_string()).unwrap_or_else(|| "?".into());
        write!(
            f,
            "{} {}x{} {} mips={}",
            container,
            dim(self.width),
            dim(self.height),
            self.code,
            dim(self.mip_count)
        )?;
        if self.is_normal_map {
            write!(f, " normal")?;
        }
        Ok(())
    }
}

/// Resolve the container for a path from its extension
pub fn container_for(path: &Path) -> CodecResult<ContainerKind> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_default();
    ContainerKind::from_extension(&ext).ok_or_else(|| CodecError::UnsupportedFormat {
        path: path.to_path_buf(),
        extension: ext,
    })
}

/// Stateless texture codec
///
/// Holds only immutable configuration, so one instance can be shared across
/// threads for independent conversions.
#[derive(Debug, Clone)]
pub struct TextureCodec {
    work_dir: PathBuf,
    vtf: Option<VtfConverter>,
}

impl TextureCodec {
    /// DDS-only codec writing editable files into `work_dir`
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            vtf: None,
        }
    }

    /// Enable the VTF path
    pub fn with_vtf(mut self, converter: VtfConverter) -> Self {
        self.vtf = Some(converter);
        self
    }

    /// Build from configuration, locating VTFCmd if possible
    pub fn from_config(config: &ConverterConfig) -> Self {
        let codec = Self::new(&config.work_dir);
        match locate_vtfcmd(config.vtf_tool.as_deref()) {
            Some(program) => {
                codec.with_vtf(VtfConverter::new(ExternalTool::new(program, config.tool_timeout())))
            }
            None => {
                debug!("VTFCmd not found; VTF conversion disabled");
                codec
            }
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    fn vtf(&self, path: &Path) -> CodecResult<&VtfConverter> {
        self.vtf.as_ref().ok_or_else(|| CodecError::ToolInvocation {
            tool: "VTFCmd".into(),
            path: path.to_path_buf(),
            reason: "VTFCmd was not found; set --vtf-tool or VTFCMD_PATH".into(),
        })
    }

    /// Header parser responsible for a path
    pub fn parser_for(&self, path: &Path) -> CodecResult<&dyn HeaderParser> {
        match container_for(path)? {
            ContainerKind::Dds => Ok(&DdsHeaderParser),
            ContainerKind::Vtf => Ok(self.vtf(path)?),
        }
    }

    /// Parse metadata only, without decoding pixels
    pub fn inspect(&self, path: &Path) -> CodecResult<ContainerMetadata> {
        let parser = self.parser_for(path)?;
        enter(ConversionStage::Parsing, path);
        track(parser.parse(path), path)
    }

    /// Summary of [`Self::inspect`]
    pub fn info(&self, path: &Path) -> CodecResult<TextureInfo> {
        self.inspect(path).map(|meta| TextureInfo::from(&meta))
    }

    /// Decode a container into pixels plus the metadata needed to rebuild it.
    ///
    /// Unknown extensions fail before anything is read.
    pub fn decode(&self, path: &Path) -> CodecResult<(PixelBuffer, ContainerMetadata)> {
        let kind = container_for(path)?;
        enter(ConversionStage::Idle, path);

        let result = match kind {
            ContainerKind::Dds => self.decode_dds(path),
            ContainerKind::Vtf => self.vtf(path).and_then(|vtf| {
                enter(ConversionStage::Parsing, path);
                vtf.decode(path)
            }),
        };
        let decoded = track(result, path)?;

        enter(ConversionStage::Editing, path);
        Ok(decoded)
    }

    fn decode_dds(&self, path: &Path) -> CodecResult<(PixelBuffer, ContainerMetadata)> {
        let bytes = std::fs::read(path).map_err(|e| CodecError::io(path, e))?;

        enter(ConversionStage::Parsing, path);
        let metadata = dds::parse_header(&bytes, path)?;

        enter(ConversionStage::Decoding, path);
        let pixels = decode_pixels(&bytes, &metadata, path)?;
        Ok((pixels, metadata))
    }

    /// Encode pixels into `target` at `path`.
    ///
    /// `target` may differ from the container the metadata came from; width
    /// and height always come from the pixels.
    pub fn encode(
        &self,
        pixels: &PixelBuffer,
        metadata: &ContainerMetadata,
        target: ContainerKind,
        path: &Path,
    ) -> CodecResult<PathBuf> {
        enter(ConversionStage::Encoding, path);

        if let Some((w, h)) = metadata.dimensions() {
            if (w, h) != (pixels.width(), pixels.height()) {
                debug!(
                    "{}: dimensions changed {}x{} -> {}x{}",
                    path.display(),
                    w,
                    h,
                    pixels.width(),
                    pixels.height()
                );
            }
        }
        if metadata.container.is_some_and(|c| c != target) {
            info!(
                "{}: converting {} metadata to {}; format-specific fields are best-effort",
                path.display(),
                metadata.container.map(|c| c.to_string()).unwrap_or_default(),
                target
            );
        }

        paths::ensure_parent_dirs(path).map_err(|e| CodecError::io(path, e))?;

        let result = match target {
            ContainerKind::Dds => encode_pixels(pixels, metadata, path)
                .and_then(|bytes| std::fs::write(path, bytes).map_err(|e| CodecError::io(path, e))),
            ContainerKind::Vtf => self.vtf(path).and_then(|vtf| vtf.encode(pixels, metadata, path)),
        };
        track(result, path)?;

        enter(ConversionStage::Done, path);
        Ok(path.to_path_buf())
    }

    /// Decode a container into `<stem>.png` + `<stem>.json` in the work directory
    pub fn convert_to_editable(&self, path: &Path) -> CodecResult<EditableAsset> {
        self.write_editable(path, paths::editable_paths(path, None, &self.work_dir))
    }

    /// Like [`Self::convert_to_editable`], but mirrors the folders between
    /// `root` and `path` into the work directory.
    pub fn convert_to_editable_under(
        &self,
        path: &Path,
        root: &Path,
    ) -> CodecResult<EditableAsset> {
        self.write_editable(path, paths::editable_paths(path, Some(root), &self.work_dir))
    }

    fn write_editable(&self, path: &Path, asset: EditableAsset) -> CodecResult<EditableAsset> {
        let (pixels, metadata) = self.decode(path)?;

        paths::ensure_parent_dirs(&asset.image_path)
            .map_err(|e| CodecError::io(&asset.image_path, e))?;
        pixels.save(&asset.image_path)?;
        metadata.save(&asset.metadata_path)?;

        info!(
            "{} -> {} (+ {})",
            path.display(),
            asset.image_path.display(),
            asset.metadata_path.display()
        );
        Ok(asset)
    }

    /// Rebuild a container from an edited image and its metadata side-car.
    ///
    /// A missing or unreadable side-car falls back to DXT5 defaults. Without
    /// `output`, the result lands next to the image with the target extension.
    pub fn convert_from_editable(
        &self,
        image_path: &Path,
        metadata_path: Option<&Path>,
        target: ContainerKind,
        output: Option<&Path>,
    ) -> CodecResult<PathBuf> {
        let pixels = PixelBuffer::load(image_path)?;
        let metadata = ContainerMetadata::load_or_fallback(metadata_path);
        if metadata_path.is_none() {
            warn!(
                "{}: no metadata side-car given, encoding as {}",
                image_path.display(),
                metadata.format_id
            );
        }

        let output = output
            .map(Path::to_path_buf)
            .unwrap_or_else(|| image_path.with_extension(target.extension()));
        self.encode(&pixels, &metadata, target, &output)
    }
}
