pub mod client;
pub mod markdown;
pub mod models;
pub mod sync;

pub use client::{GmailClient, GmailConfig};
pub use sync::GmailProvider;
