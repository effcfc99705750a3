pub mod amap;
pub mod bbt;
pub mod bitmap;
pub mod block;
pub mod btree;
pub mod bth;
pub mod conf;
pub mod crc;
pub mod crypt;
pub mod data_tree;
pub mod error;
pub mod file;
pub mod heap;
pub mod ids;
pub mod nbt;
pub mod ndb;
pub mod node;
pub mod serde;
pub mod subnode;

pub mod prelude {
    pub use crate::block::{BlockAccess, MemBlocks};
    pub use crate::bth::*;
    pub use crate::conf::*;
    pub use crate::crypt::CryptMethod;
    pub use crate::data_tree::*;
    pub use crate::error::*;
    pub use crate::file::{FileStorage, MemStorage, Storage};
    pub use crate::heap::*;
    pub use crate::ids::*;
    pub use crate::ndb::*;
    pub use crate::node::*;
    pub use crate::subnode::{SubnodeEntry, SubnodeLimits, SubnodeTree};
}
