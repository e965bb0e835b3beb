pub mod initialize;
pub mod ping;
pub mod profile;
pub mod tool;
