pub mod access;
pub mod auth;
pub mod config;
pub mod errorhandler;
pub mod jwt;
pub mod logger;
pub mod mailer;
pub mod pagination;
pub mod token;
pub mod validation;
