//! Continuous-scroll document viewing: page layout, render caching, glyph
//! hit-testing, selection, background search and link dispatch, driven by a
//! single [`Viewer`] on the host's UI thread.

pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod geometry;
pub mod labels;
pub mod layout;
pub mod links;
pub mod scheduler;
pub mod search;
pub mod selection;
pub mod text_index;
pub mod viewer;

#[cfg(test)]
mod test_support;

pub use backend::{
    DocumentBackend, DocumentInfo, DocumentProvider, LinkDefinition, RawGlyph, RenderImage,
    RenderRequest, TextRun,
};
pub use config::ViewerConfig;
pub use error::{ViewerError, ViewerResult};
pub use geometry::{PageTransform, Point, Rect};
pub use links::{DestinationPoint, LinkAction, LinkTarget};
pub use search::{SearchMatch, SearchStatus};
pub use viewer::{
    CursorStyle, Frame, Highlight, HighlightKind, OpenOptions, PagePlacement, Viewer,
    ViewerEvent, ViewerInput, ViewerStatus,
};
