pub mod bridge;
pub mod handlers;
pub mod messages;
pub mod middleware;
pub mod routes;

pub use routes::create_router;
