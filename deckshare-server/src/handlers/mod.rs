pub mod files;
pub mod preview;
pub mod upload;
