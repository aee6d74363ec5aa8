pub mod routes;

pub use routes::{router, start_server, AppState};
