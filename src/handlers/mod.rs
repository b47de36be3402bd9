pub mod api;
pub mod calls;
pub mod conferences;
pub mod webhooks;
pub mod ws;
