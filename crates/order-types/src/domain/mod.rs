pub mod caller;
pub mod order;
pub mod product;
