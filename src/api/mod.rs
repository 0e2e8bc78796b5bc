mod handlers;
pub mod range;
pub mod response;
mod routes;

pub use routes::create_router;
