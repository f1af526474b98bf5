pub mod buildings;
pub mod troops;

pub use buildings::*;
pub use troops::*;
