//! Postfully Project Model
//!
//! Defines the core data contracts for an export run:
//! - **Export:** The immutable per-run `ExportConfig` and its enums
//! - **Overlay:** Pan/zoom placement of the captured mockup card
//! - **Frame:** RGBA8 pixel buffers and per-frame requests
//! - **Artifact:** The final deliverable and its suggested file name
//!
//! All times are in seconds on the export timeline; frame `n` sits at
//! `n / frame_rate`.

pub mod artifact;
pub mod export;
pub mod frame;
pub mod overlay;

pub use artifact::*;
pub use export::*;
pub use frame::*;
pub use overlay::*;
