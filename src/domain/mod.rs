//! Core record shapes of the governance engine

pub mod account;
pub mod action;
pub mod decision;
pub mod performance;
pub mod shadow;
pub mod vote;
pub mod weight;
pub mod window;

pub use account::*;
pub use action::*;
pub use decision::*;
pub use performance::*;
pub use shadow::*;
pub use vote::*;
pub use weight::*;
pub use window::*;
