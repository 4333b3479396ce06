pub mod artifact;
pub mod sequence;
