//! Documents — stored files, format ranking and stem grouping.

pub mod grouping;
pub mod library;
pub mod model;

pub use grouping::DocumentGroup;
pub use library::{DocumentLibrary, LibraryEvent, Upload};
pub use model::{Document, DocumentFormat};
