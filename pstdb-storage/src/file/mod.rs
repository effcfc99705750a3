pub mod header;
pub mod storage;

pub use header::{AMapState, Header, Root, HEADER_SIZE};
pub use storage::{FileStorage, MemStorage, Storage};
