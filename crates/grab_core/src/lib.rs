// #![warn(
//     clippy::all,
//     clippy::pedantic,
// )]
// //some lints are really just too pedantic
// #![allow(clippy::must_use_candidate)]
// #![allow(clippy::module_inception)]

pub mod codec;
pub mod common;
pub mod models;
pub mod pipeline;
