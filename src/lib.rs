pub mod associate;
pub mod config;
pub mod descriptor;
pub mod detector;
pub mod feature;
pub mod frame;
pub mod image;
pub mod my_types;
pub mod optical_flow;
pub mod point_tracker;
pub mod prune;
pub mod pyramid;
pub mod simulation;
pub mod track_pool;
pub mod tracker;
