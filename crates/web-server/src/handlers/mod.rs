pub mod auth;
pub mod bots;
pub mod connections;
pub mod jobs;
pub mod orders;
pub mod risk;
pub mod ws;
