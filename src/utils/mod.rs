pub mod error;
pub mod general;
pub mod logger;
pub mod validation;
