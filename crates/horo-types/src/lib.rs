pub mod config;
pub mod error;
pub mod identity;
pub mod notification;
pub mod resource;
pub mod theme;
