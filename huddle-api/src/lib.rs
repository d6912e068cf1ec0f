// Huddle API Library
//
// WebSocket signaling and HTTP endpoints for Huddle

pub mod http;
pub mod impls;
pub mod proto;

// Re-export commonly used types
pub use http::{create_router, AppState};
