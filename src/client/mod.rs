pub mod http;
pub mod response;
pub mod retry;

pub use http::{ArchiveClient, ClientConfig, Payload, ServerStatus};
pub use response::{ApiResponse, ResponseBody};
pub use retry::RetryPolicy;
