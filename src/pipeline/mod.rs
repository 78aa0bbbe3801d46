//! Pipeline stages for document export.
//!
//! Each submodule implements one transformation step, so each can be tested
//! on its own and a backend can be swapped without touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! tree ──▶ normalize ──▶ compose ──▶ docx | html ──▶ pdf
//!  (walk)   (assets, svg)  (xhtml)    (package)     (process)
//! ```
//!
//! 1. [`tree`]      group the flat node list, walk it in reading order
//! 2. [`normalize`] repair description HTML and localise its images through
//!    [`assets`]; the only stage with network I/O
//! 3. [`svg`]       rasterise diagram payloads; runs in `spawn_blocking`
//! 4. [`compose`]   turn fragments into XHTML chunks via [`xhtml`] and hand
//!    them to a [`compose::DocumentBackend`]
//! 5. [`docx`] / [`html`] serialise the finished document; [`size`] bounds
//!    every embedded picture
//! 6. [`pdf`]       drive the external HTML → PDF renderer

pub mod assets;
pub mod compose;
pub mod docx;
pub mod html;
pub mod normalize;
pub mod pdf;
pub mod size;
pub mod svg;
pub mod tree;
pub mod xhtml;
