// Presentation layer - Output formats
pub mod summary;
