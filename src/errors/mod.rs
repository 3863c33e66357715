pub mod types;

pub use types::{AppError, ErrorClass, StoreError, ToolError};
