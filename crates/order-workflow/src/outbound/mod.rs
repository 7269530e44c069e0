pub mod product_http;
pub mod product_memory;

pub use product_http::{HttpProductDirectory, RetryPolicy};
pub use product_memory::InMemoryProductDirectory;
