pub mod errors;
pub mod models;
pub mod responses;
pub mod schema;
pub mod state;
pub mod utils;
