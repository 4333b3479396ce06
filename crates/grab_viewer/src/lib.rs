// #![warn(
//     clippy::all,
//     clippy::pedantic,
// )]
// //some lints are really just too pedantic
// #![allow(clippy::must_use_candidate)]
// #![allow(clippy::module_inception)]

pub mod driver;
pub mod mesh;
pub mod ply_viewer;
pub mod viewer;
