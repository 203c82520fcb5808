pub mod auth;
pub mod documents;
pub mod extract;
pub mod generation;
pub mod knowledge_bases;
pub mod middleware;
pub mod organizations;
pub mod projects;
pub mod questions;
pub mod response;
pub mod rest;
pub mod state;

// Re-export the router and middleware to make them easily accessible
// to the binary that builds the web server.
pub use middleware::require_auth;
pub use rest::{router, ApiDoc};
