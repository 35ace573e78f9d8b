//! Content digest and canonical naming of finished bundles.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Chunk size used when streaming an archive into the digest.
pub const DIGEST_CHUNK_SIZE: usize = 10 * 1024;

/// Suffix of every canonical bundle name.
pub const BUNDLE_SUFFIX: &str = ".tar.bz2";

/// MD5 of the compressed archive bytes, lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BundleDigest(String);

impl BundleDigest {
    /// Stream `reader` into the digest in fixed-size chunks.
    pub fn from_reader<R: Read>(mut reader: R) -> io::Result<Self> {
        let mut ctx = md5::Context::new();
        let mut buf = vec![0u8; DIGEST_CHUNK_SIZE];
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            ctx.consume(&buf[..n]);
        }
        Ok(Self(format!("{:x}", ctx.finalize())))
    }

    pub fn from_path(path: &Path) -> io::Result<Self> {
        Self::from_reader(File::open(path)?)
    }

    pub fn from_bytes(data: &[u8]) -> Self {
        let mut ctx = md5::Context::new();
        ctx.consume(data);
        Self(format!("{:x}", ctx.finalize()))
    }

    pub fn as_hex(&self) -> &str {
        &self.0
    }

    /// `<hex>.tar.bz2`
    pub fn canonical_name(&self) -> String {
        format!("{}{}", self.0, BUNDLE_SUFFIX)
    }
}

impl fmt::Display for BundleDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_known_md5() {
        let digest = BundleDigest::from_bytes(b"hello");
        assert_eq!(digest.as_hex(), "5d41402abc4b2a76b9719d911017c592");
        assert_eq!(
            digest.canonical_name(),
            "5d41402abc4b2a76b9719d911017c592.tar.bz2"
        );
    }

    #[test]
    fn test_streaming_matches_one_shot() {
        // Spans several chunks with a ragged tail
        let data: Vec<u8> = (0..(DIGEST_CHUNK_SIZE * 3 + 17))
            .map(|i| (i % 251) as u8)
            .collect();
        let streamed = BundleDigest::from_reader(Cursor::new(&data)).unwrap();
        assert_eq!(streamed, BundleDigest::from_bytes(&data));
    }

    #[test]
    fn test_empty_input() {
        let digest = BundleDigest::from_reader(Cursor::new(Vec::new())).unwrap();
        assert_eq!(digest.as_hex(), "d41d8cd98f00b204e9800998ecf8427e");
    }
}
