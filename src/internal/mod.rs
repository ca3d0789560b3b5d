pub mod errors;
pub mod version;
