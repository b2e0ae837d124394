pub mod generative;
pub mod kv;
pub mod structured;

pub use generative::GenerativeBackendAdapter;
pub use kv::SqliteKvAdapter;
pub use structured::StructuredBackendAdapter;
