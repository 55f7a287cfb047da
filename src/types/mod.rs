//! Public option and status types

pub mod options;
pub mod status;

pub use options::{
    AuthorizeOptions, DEFAULT_CALLBACK_PATH, DEFAULT_CALLBACK_PORT, DEFAULT_FLOW_TTL,
    DEFAULT_HTTP_TIMEOUT, DEFAULT_REFRESH_SKEW, ExchangeOptions, ManagerOptions, TOKEN_FILE_ENV,
    default_storage_path,
};
pub use status::AuthStatus;
