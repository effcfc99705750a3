use std::array::TryFromSliceError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    // format errors, raised while reading and never retried.
    #[error("Invalid format")]
    InvalidFormat,
    #[error("Checksum mismatch")]
    ChecksumMismatch,
    #[error("Signature mismatch")]
    SignatureMismatch,
    #[error("unexpected page type {0:#04x}")]
    UnexpectedPageType(u8),
    #[error("block id mismatch: expected {expected:#x}, found {found:#x}")]
    BlockIdMismatch { expected: u64, found: u64 },
    // contract violations, caused by misuse of the engine.
    #[error("invalid argument")]
    InvalidArgument,
    #[error("invalid key length {0}")]
    InvalidKeyLength(usize),
    #[error("allocation of {0} bytes exceeds maximum")]
    AllocationTooLarge(usize),
    #[error("tree is empty")]
    EmptyTree,
    #[error("duplicate key")]
    DuplicateKey,
    #[error("free of unallocated space")]
    InvalidFree,
    #[error("data tree is full")]
    DataTreeFull,
    #[error("heap item of {0} bytes is too large")]
    HeapItemTooLarge(usize),
    #[error("invalid heap id {0:#x}")]
    InvalidHeapId(u32),
    // environment errors.
    #[error("file reaches maximum size")]
    FileFull,
    #[error("node ids of type {0:#x} exhausted")]
    NidExhausted(u8),
    #[error("IO Error: {0:?}")]
    IOError(std::io::ErrorKind),
    #[error("{0} not supported")]
    NotSupported(&'static str),
}

impl Error {
    /// Returns whether the error means the file is corrupt or
    /// uses an unsupported layout.
    #[inline]
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidFormat
                | Error::ChecksumMismatch
                | Error::SignatureMismatch
                | Error::UnexpectedPageType(_)
                | Error::BlockIdMismatch { .. }
                | Error::NotSupported(_)
        )
    }

    /// Returns whether the error is a programming error of the caller.
    #[inline]
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Error::InvalidArgument
                | Error::InvalidKeyLength(_)
                | Error::AllocationTooLarge(_)
                | Error::EmptyTree
                | Error::DuplicateKey
                | Error::InvalidFree
                | Error::DataTreeFull
                | Error::HeapItemTooLarge(_)
                | Error::InvalidHeapId(_)
        )
    }
}

impl From<TryFromSliceError> for Error {
    #[inline]
    fn from(_src: TryFromSliceError) -> Error {
        Error::InvalidFormat
    }
}

impl From<std::io::Error> for Error {
    #[inline]
    fn from(src: std::io::Error) -> Self {
        Error::IOError(src.kind())
    }
}

impl From<toml::de::Error> for Error {
    #[inline]
    fn from(_src: toml::de::Error) -> Self {
        Error::InvalidArgument
    }
}

impl From<toml::ser::Error> for Error {
    #[inline]
    fn from(_src: toml::ser::Error) -> Self {
        Error::InvalidArgument
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        let format = [
            Error::InvalidFormat,
            Error::ChecksumMismatch,
            Error::SignatureMismatch,
            Error::UnexpectedPageType(0x80),
            Error::BlockIdMismatch {
                expected: 4,
                found: 8,
            },
            Error::NotSupported("crypt method"),
        ];
        let contract = [
            Error::InvalidArgument,
            Error::InvalidKeyLength(3),
            Error::AllocationTooLarge(9000),
            Error::EmptyTree,
            Error::DuplicateKey,
            Error::InvalidFree,
            Error::DataTreeFull,
            Error::HeapItemTooLarge(4000),
            Error::InvalidHeapId(0x20),
        ];
        let environment = [
            Error::FileFull,
            Error::NidExhausted(0x04),
            Error::IOError(std::io::ErrorKind::UnexpectedEof),
        ];
        for err in &format {
            assert!(err.is_format_error(), "{:?}", err);
            assert!(!err.is_contract_violation(), "{:?}", err);
        }
        for err in &contract {
            assert!(!err.is_format_error(), "{:?}", err);
            assert!(err.is_contract_violation(), "{:?}", err);
        }
        for err in &environment {
            assert!(!err.is_format_error(), "{:?}", err);
            assert!(!err.is_contract_violation(), "{:?}", err);
        }
        let io = std::io::Error::from(std::io::ErrorKind::NotFound);
        assert_eq!(Error::from(io), Error::IOError(std::io::ErrorKind::NotFound));
    }
}
