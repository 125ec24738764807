//! Use-case services.

pub mod user_service;
