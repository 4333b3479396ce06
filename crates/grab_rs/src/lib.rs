#![deny(missing_docs)]
//! ## Crate Items Overview
//!
//! This section provides quick links to the main items in grab-rs.
//!
//! ### Modules
//! - [`grab_core`](crate::grab_core) - Sequence records, deformation models and the vertex extraction pipeline.
//! - [`grab_viewer`](crate::grab_viewer) - Contact colored scenes played into a viewer session.
//! - [`grab_utils`](crate::grab_utils) - Numerical kernels, array gathering and npz access.
//!
//! ## Binaries
//! - `grab_vertices` converts a whole dataset into per sequence vertex products.
//! - `visualize_grab` plays a random sample of sequences into a PLY viewer session.
pub use grab_core;
pub use grab_utils;
pub use grab_viewer;
