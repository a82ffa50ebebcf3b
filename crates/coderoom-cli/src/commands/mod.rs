pub mod config;
pub mod sandbox;
pub mod serve;
pub mod tree;
