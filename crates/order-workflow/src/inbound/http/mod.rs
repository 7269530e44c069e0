mod identity;
mod response;
mod server;

pub use identity::{Identity, IDEMPOTENCY_KEY_HEADER, USER_ID_HEADER, USER_ROLE_HEADER};
pub use response::{ApiResponse, OrderList};
pub use server::{HttpServer, HttpServerConfig};
