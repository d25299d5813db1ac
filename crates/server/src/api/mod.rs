pub mod events;
pub mod handlers;
pub mod items;
pub mod middleware;
pub mod poller;
pub mod routes;

pub use routes::create_router;
