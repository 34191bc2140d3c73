pub mod admin;
pub mod auth;
pub mod fees;
pub mod payments;
pub mod root;
