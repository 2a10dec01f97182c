//! Request handlers, grouped by endpoint family.

pub mod flows;
pub mod health;
