pub mod detector;
pub mod filesystem;
pub mod hints;
pub mod identity;
pub mod introspect;
pub mod literal;
pub mod parser;
pub mod pipeline;
pub mod pyproject;
pub mod signature;
pub mod types;

pub use pipeline::analyze_path;
