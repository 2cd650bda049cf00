pub mod client;
pub mod stream;

pub use client::ProviderClient;
pub use stream::ProviderStreamClient;
