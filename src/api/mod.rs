pub mod docs;
pub mod error;
pub mod handlers;
pub mod routes;
