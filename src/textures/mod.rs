//! Texture container codec
//!
//! DDS is parsed and written in-process with binrw and image_dds. VTF goes
//! through the external VTFCmd tool. Both meet at the same pair: a
//! [`PixelBuffer`] for editing and a [`ContainerMetadata`] for rebuilding.

pub mod cache;
pub mod dds;
mod dispatch;
mod error;
mod metadata;
mod pixels;
pub mod processor;
pub mod tool;
pub mod vtf;

pub use cache::{CacheStats, DecodeCache};
pub use dispatch::{
    container_for, ConversionStage, DdsHeaderParser, EditableAsset, HeaderParser, TextureCodec,
    TextureInfo,
};
pub use error::{CodecError, CodecResult};
pub use metadata::{AuxiliaryFields, ContainerKind, ContainerMetadata, FormatId, VtfInfo};
pub use pixels::PixelBuffer;
pub use processor::{decode_pixels, encode_pixels};
pub use tool::{ExternalTool, ToolOutput};
pub use vtf::{locate_vtfcmd, VtfConverter};
