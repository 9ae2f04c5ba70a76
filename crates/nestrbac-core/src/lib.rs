pub mod engine;
pub mod nested;
pub mod node;
pub mod path;
