pub mod health;
pub mod inspector;
pub mod react;
pub mod webhooks;
