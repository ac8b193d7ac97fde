pub mod cancel;
pub mod error;
pub mod text;

pub use cancel::CancelToken;
pub use error::{ApiError, ApiResult};
pub use text::{first_line, norm_ws, truncate_chars};
