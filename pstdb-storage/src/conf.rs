use crate::crypt::CryptMethod;
use crate::error::Result;
use byte_unit::Byte;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_FILE_SIZE: Byte = Byte::from_u64(50 * 1024 * 1024 * 1024); // 50GB, the legacy format limit.
pub const DEFAULT_PAGE_CACHE_SIZE: usize = 512;
pub const DEFAULT_BTH_LEAF_CACHE_SIZE: usize = 16;
pub const DEFAULT_VERIFY_CHECKSUM: bool = true;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NdbConfig {
    // Content transform of external blocks, only applied when
    // creating a new container. Existing containers keep the method
    // recorded in their header.
    pub crypt_method: CryptMethod,
    // Upper bound of the file. Allocation map stops growing once
    // next region would exceed it.
    pub max_file_size: Byte,
    // Number of decoded tree pages kept per session.
    pub page_cache_size: usize,
    // Number of leaf pages cached by each BTH instance.
    pub bth_leaf_cache_size: usize,
    // Whether to verify crc of every page and block read.
    // Signatures and block ids are always checked.
    pub verify_checksum: bool,
}

impl Default for NdbConfig {
    #[inline]
    fn default() -> Self {
        NdbConfig {
            crypt_method: CryptMethod::default(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            page_cache_size: DEFAULT_PAGE_CACHE_SIZE,
            bth_leaf_cache_size: DEFAULT_BTH_LEAF_CACHE_SIZE,
            verify_checksum: DEFAULT_VERIFY_CHECKSUM,
        }
    }
}

impl NdbConfig {
    #[inline]
    pub fn crypt_method(mut self, crypt_method: CryptMethod) -> Self {
        self.crypt_method = crypt_method;
        self
    }

    /// Maximum size the container file can grow to.
    #[inline]
    pub fn max_file_size<T>(mut self, max_file_size: T) -> Self
    where
        Byte: From<T>,
    {
        self.max_file_size = Byte::from(max_file_size);
        self
    }

    #[inline]
    pub fn page_cache_size(mut self, page_cache_size: usize) -> Self {
        self.page_cache_size = page_cache_size;
        self
    }

    #[inline]
    pub fn bth_leaf_cache_size(mut self, bth_leaf_cache_size: usize) -> Self {
        self.bth_leaf_cache_size = bth_leaf_cache_size;
        self
    }

    #[inline]
    pub fn verify_checksum(mut self, verify_checksum: bool) -> Self {
        self.verify_checksum = verify_checksum;
        self
    }

    #[inline]
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config = toml::from_str(s)?;
        Ok(config)
    }

    #[inline]
    pub fn to_toml_string(&self) -> Result<String> {
        let s = toml::to_string(self)?;
        Ok(s)
    }
}
