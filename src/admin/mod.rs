//! Admin HTTP surface
//! Mission: Authenticated endpoints to manage `ServerDescriptor`s, ping
//! targets, group dimensions, and site settings; reset the admin
//! password and rotate the JWT secret; mint a session token from a
//! password; verify a session.

pub mod handlers;
pub mod models;

pub use handlers::*;
