pub mod auth;
pub mod health;
pub mod jobs;
pub mod twiml;
pub mod voice;
pub mod webhooks;
