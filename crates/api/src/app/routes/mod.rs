pub mod sweep;
pub mod system;
pub mod webhooks;
