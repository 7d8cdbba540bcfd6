/*
 * Responsibility
 * - Public entry point of the HTTP surface (routes())
 */
pub mod handlers;
mod routes;

pub use routes::routes;
