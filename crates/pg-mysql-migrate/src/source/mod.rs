//! Source-side access: connection pool, catalog reader, and chunk streamer.

pub mod postgres;
pub mod stream;

pub use postgres::PgSourcePool;
pub use stream::{Chunk, ChunkStreamer, Pagination, SelectPlan};
