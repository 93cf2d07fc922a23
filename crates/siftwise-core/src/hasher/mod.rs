pub mod checksum;
pub mod xxhash;
