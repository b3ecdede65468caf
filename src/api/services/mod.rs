pub mod library;
pub mod session;
