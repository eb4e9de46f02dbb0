//! External store collaborators.
//!
//! Two seams: the remote drive provider ([`drive`]) holding all file
//! content and metadata, and the shared counter/set store ([`kv`]) backing
//! rate limits, token revocation, and the folder-path cache.

pub mod drive;
pub mod kv;

pub use drive::{
    ChunkOutcome, DriveClient, DriveError, FileMetadata, MediaResponse, RemoteStore, UploadInit,
    FOLDER_MIME_TYPE,
};
pub use kv::{Counter, KvError, KvStore, MemoryKv};
