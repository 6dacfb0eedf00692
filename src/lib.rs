//! retex - texture container codec
//!
//! Decodes DDS and VTF textures into plain pixels plus a metadata record,
//! and encodes edited pixels back into a container using that record.

pub mod config;
pub mod paths;
pub mod pipeline;
pub mod textures;
