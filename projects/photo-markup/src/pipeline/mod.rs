// Annotation rendering and export pipeline

pub mod archive;
pub mod canonical;
pub mod export;
pub mod fonts;
pub mod geometry;
pub mod layout;
pub mod manifest;
pub mod migrate;
pub mod naming;
pub mod orchestrator;
pub mod render;
pub mod svg;
pub mod text;
pub mod types;
