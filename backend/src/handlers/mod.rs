pub mod analysis;
pub mod cluster;
pub mod system;
