pub mod error;
pub mod crypto;
pub mod checksum;
pub mod endian;
pub mod storage;
pub mod record;
pub mod io_stream;
pub mod splice;
pub mod superblock;
pub mod archive;
pub mod standalone;

pub use error::{Error, Result};
pub use crypto::{BlockCipher, Key};
pub use record::{decode_header, encode_header, RecordHeader};
pub use io_stream::{decode_payload, encode_payload};
pub use splice::shift_range;
pub use archive::{Archive, ArchiveOptions, ListEntry, RecordEntry};
pub use standalone::{decrypt_file, encrypt_file};
