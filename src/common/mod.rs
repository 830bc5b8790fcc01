pub mod cleanup;
pub mod error;
pub mod response;
pub mod upload;
