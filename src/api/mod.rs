mod models;
mod routes;
mod services;

pub use routes::StorefrontApi;
