// HTTP handlers

pub mod patterns;
pub mod runs;
