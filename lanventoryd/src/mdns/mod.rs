pub mod browser;
pub mod resolver;
