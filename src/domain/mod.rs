pub mod library;
pub mod models;
