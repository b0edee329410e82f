pub mod client;
pub mod models;
pub mod signer;

pub use client::{S3pApi, S3pClient};
pub use signer::Credentials;
