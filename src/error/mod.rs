mod extract_error;

pub use extract_error::ExtractError;

pub type Result<T, E = ExtractError> = std::result::Result<T, E>;
