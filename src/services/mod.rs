// Services module - network clients

pub mod http;
pub mod stash;
pub mod translate;
