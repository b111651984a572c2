use core_api::ApiError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("Request failed: {0}")]
    Api(#[from] ApiError),

    #[error("Binding is unmounted")]
    Unmounted,
}

pub type Result<T> = std::result::Result<T, ResourceError>;
