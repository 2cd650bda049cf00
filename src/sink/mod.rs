pub mod checkpoint;
pub mod http;

pub use checkpoint::FileCheckpointStore;
pub use http::HttpSink;
