// Admin API client - authenticated REST client with transparent token refresh

pub mod auth;
pub mod config;
pub mod error;
pub mod http_client;
pub mod request;

pub use error::{ClientError, RefreshFailure, Result};
pub use http_client::{ApiClient, ClientOptions};
pub use request::{ApiResponse, Payload, RequestDescriptor, ResponseData, ResponseType};
