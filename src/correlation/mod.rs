//! Correlation module - matching responses to the requests that caused them.
//!
//! Provides:
//! - [`Correlations`] - the id -> pending promise table
//! - [`Promise`] / [`Reply`] - single-assignment value cell

mod promise;
mod registry;

pub use promise::{promise_pair, Promise, Reply};
pub use registry::{Correlations, DEFAULT_FIRST_ID};
