pub mod acknowledgements;
pub mod ai_scales;
pub mod auth;
pub mod community;
pub mod dashboard;
pub mod extract;
pub mod models;
pub mod responses;
pub mod router;
pub mod state;
pub mod subjects;
pub mod templates;
pub mod users;

#[cfg(test)]
pub(crate) mod test_support;

pub use state::AppState;
