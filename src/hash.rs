//! Checksum Calculation Module
//!
//! Streaming content checksums used to compare tape members against the
//! catalog. The catalog records md5 sums, the other algorithms are available
//! for catalogs that carry them.

use serde::{Deserialize, Serialize};
use std::io::{self, Read};
use std::path::Path;

const READ_CHUNK: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Blake3,
    Xxh3,
}

enum Hasher {
    Md5(md5::Context),
    Sha1(sha1::Sha1),
    Sha256(sha2::Sha256),
    Blake3(Box<blake3::Hasher>),
    Xxh3(Box<xxhash_rust::xxh3::Xxh3>),
}

/// Blockwise calculator, fed as data streams off the tape
pub struct BlockwiseChecksum {
    hasher: Hasher,
    bytes_processed: u64,
}

impl BlockwiseChecksum {
    pub fn new(algorithm: ChecksumAlgorithm) -> Self {
        use sha2::Digest;

        let hasher = match algorithm {
            ChecksumAlgorithm::Md5 => Hasher::Md5(md5::Context::new()),
            ChecksumAlgorithm::Sha1 => Hasher::Sha1(sha1::Sha1::new()),
            ChecksumAlgorithm::Sha256 => Hasher::Sha256(sha2::Sha256::new()),
            ChecksumAlgorithm::Blake3 => Hasher::Blake3(Box::new(blake3::Hasher::new())),
            ChecksumAlgorithm::Xxh3 => Hasher::Xxh3(Box::new(xxhash_rust::xxh3::Xxh3::new())),
        };

        Self {
            hasher,
            bytes_processed: 0,
        }
    }

    pub fn propagate(&mut self, data: &[u8]) {
        use sha2::Digest;

        match &mut self.hasher {
            Hasher::Md5(ctx) => ctx.consume(data),
            Hasher::Sha1(h) => h.update(data),
            Hasher::Sha256(h) => h.update(data),
            Hasher::Blake3(h) => {
                h.update(data);
            }
            Hasher::Xxh3(h) => h.update(data),
        }

        self.bytes_processed += data.len() as u64;
    }

    pub fn bytes_processed(&self) -> u64 {
        self.bytes_processed
    }

    /// Lowercase hex digest, the same text `md5sum` prints
    pub fn finalize_hex(self) -> String {
        use sha2::Digest;

        match self.hasher {
            Hasher::Md5(ctx) => format!("{:x}", ctx.compute()),
            Hasher::Sha1(h) => hex::encode(h.finalize()),
            Hasher::Sha256(h) => hex::encode(h.finalize()),
            Hasher::Blake3(h) => h.finalize().to_hex().to_string(),
            Hasher::Xxh3(h) => format!("{:016x}", h.digest()),
        }
    }
}

/// Checksum everything `reader` yields without holding more than one chunk
pub fn checksum_reader<R: Read>(algorithm: ChecksumAlgorithm, mut reader: R) -> io::Result<String> {
    let mut calculator = BlockwiseChecksum::new(algorithm);
    let mut buffer = vec![0u8; READ_CHUNK];

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        calculator.propagate(&buffer[..n]);
    }

    Ok(calculator.finalize_hex())
}

pub fn checksum_file(algorithm: ChecksumAlgorithm, path: &Path) -> io::Result<String> {
    checksum_reader(algorithm, std::fs::File::open(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_md5_matches_md5sum_text() {
        let digest = checksum_reader(ChecksumAlgorithm::Md5, &b"hello\n"[..]).unwrap();
        assert_eq!(digest, "b1946ac92492d2347c6235b4d2611184");
    }

    #[test]
    fn test_sha256_empty() {
        let digest = checksum_reader(ChecksumAlgorithm::Sha256, io::empty()).unwrap();
        assert_eq!(
            digest,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_chunked_equals_whole() {
        let data = vec![7u8; READ_CHUNK * 2 + 13];
        let mut calculator = BlockwiseChecksum::new(ChecksumAlgorithm::Blake3);
        for chunk in data.chunks(4096) {
            calculator.propagate(chunk);
        }
        assert_eq!(calculator.bytes_processed(), data.len() as u64);
        let chunked = calculator.finalize_hex();
        let whole = checksum_reader(ChecksumAlgorithm::Blake3, &data[..]).unwrap();
        assert_eq!(chunked, whole);
    }
}
