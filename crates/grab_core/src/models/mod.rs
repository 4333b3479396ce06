pub mod adapter;
pub mod assets;
pub mod context;
pub mod lbs;
pub mod mano;
pub mod object;
pub mod smpl_x;
