//! Administrative HTTP surface: sync status and manual transfers.

pub mod guards;
pub mod router;
pub mod routes;

pub use router::{AdminState, admin_router};
