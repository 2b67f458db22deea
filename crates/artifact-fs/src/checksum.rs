//! Checksum algorithms, streaming digests and side-file helpers
//!
//! Digests are carried around as lowercase hex. Side files hold hex by
//! default; a layout may ask for base64 per algorithm (NuGet's
//! `.nupkg.sha512`). Reading accepts either form.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

use base64::{Engine as _, engine::general_purpose};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};

/// Buffer size for streaming file digests
const BUFFER_SIZE: usize = 64 * 1024;

/// Digest algorithm used for side files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

/// Finalized digests keyed by algorithm.
pub type Checksums = BTreeMap<ChecksumAlgorithm, String>;

/// How a digest is written inside a side file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DigestEncoding {
    #[default]
    Hex,
    Base64,
}

impl DigestEncoding {
    /// Render a hex digest in this encoding.
    pub fn render(&self, hex_digest: &str) -> String {
        match self {
            Self::Hex => hex_digest.to_string(),
            Self::Base64 => match hex::decode(hex_digest) {
                Ok(bytes) => general_purpose::STANDARD.encode(bytes),
                Err(_) => hex_digest.to_string(),
            },
        }
    }
}

/// Side-file encodings per algorithm; unlisted algorithms use hex.
pub type SideFileEncodings = BTreeMap<ChecksumAlgorithm, DigestEncoding>;

impl ChecksumAlgorithm {
    pub const ALL: [ChecksumAlgorithm; 4] = [Self::Md5, Self::Sha1, Self::Sha256, Self::Sha512];

    /// File extension of the side file, without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }

    /// Suffix appended to the artifact file name.
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Md5 => ".md5",
            Self::Sha1 => ".sha1",
            Self::Sha256 => ".sha256",
            Self::Sha512 => ".sha512",
        }
    }

    /// Length of the hex digest.
    pub fn hex_len(&self) -> usize {
        match self {
            Self::Md5 => 32,
            Self::Sha1 => 40,
            Self::Sha256 => 64,
            Self::Sha512 => 128,
        }
    }

    pub fn from_extension(extension: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|a| a.extension().eq_ignore_ascii_case(extension))
    }

    /// Split a side-file path into its algorithm and primary path.
    ///
    /// `lib-1.0.jar.sha1` yields `(Sha1, "lib-1.0.jar")`. A bare suffix with
    /// nothing in front of it is not a side file.
    pub fn split_side_file(path: &str) -> Option<(Self, &str)> {
        Self::ALL.into_iter().find_map(|algorithm| {
            let primary = path.strip_suffix(algorithm.suffix())?;
            let file_name = primary.rsplit('/').next().unwrap_or(primary);
            if file_name.is_empty() {
                None
            } else {
                Some((algorithm, primary))
            }
        })
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.extension())
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim_start_matches('.').replace('-', "");
        Self::from_extension(&trimmed).ok_or_else(|| format!("unknown checksum algorithm: {}", s))
    }
}

/// Computes several digests over one pass of the data.
pub struct MultiDigest {
    md5: Option<md5::Context>,
    sha1: Option<Sha1>,
    sha256: Option<Sha256>,
    sha512: Option<Sha512>,
}

impl MultiDigest {
    pub fn new(algorithms: &[ChecksumAlgorithm]) -> Self {
        let wants = |a| algorithms.contains(&a);
        Self {
            md5: wants(ChecksumAlgorithm::Md5).then(md5::Context::new),
            sha1: wants(ChecksumAlgorithm::Sha1).then(Sha1::new),
            sha256: wants(ChecksumAlgorithm::Sha256).then(Sha256::new),
            sha512: wants(ChecksumAlgorithm::Sha512).then(Sha512::new),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        if let Some(ctx) = self.md5.as_mut() {
            ctx.consume(data);
        }
        if let Some(hasher) = self.sha1.as_mut() {
            hasher.update(data);
        }
        if let Some(hasher) = self.sha256.as_mut() {
            hasher.update(data);
        }
        if let Some(hasher) = self.sha512.as_mut() {
            hasher.update(data);
        }
    }

    pub fn finalize(self) -> Checksums {
        let mut out = Checksums::new();
        if let Some(ctx) = self.md5 {
            out.insert(ChecksumAlgorithm::Md5, format!("{:x}", ctx.compute()));
        }
        if let Some(hasher) = self.sha1 {
            out.insert(ChecksumAlgorithm::Sha1, hex::encode(hasher.finalize()));
        }
        if let Some(hasher) = self.sha256 {
            out.insert(ChecksumAlgorithm::Sha256, hex::encode(hasher.finalize()));
        }
        if let Some(hasher) = self.sha512 {
            out.insert(ChecksumAlgorithm::Sha512, hex::encode(hasher.finalize()));
        }
        out
    }
}

impl fmt::Debug for MultiDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiDigest")
            .field("md5", &self.md5.is_some())
            .field("sha1", &self.sha1.is_some())
            .field("sha256", &self.sha256.is_some())
            .field("sha512", &self.sha512.is_some())
            .finish()
    }
}

/// Digest in-memory content.
pub fn compute_content_checksums(content: &[u8], algorithms: &[ChecksumAlgorithm]) -> Checksums {
    let mut digest = MultiDigest::new(algorithms);
    digest.update(content);
    digest.finalize()
}

/// Digest a reader to its end.
pub fn compute_reader_checksums<R: Read>(
    mut reader: R,
    algorithms: &[ChecksumAlgorithm],
) -> io::Result<Checksums> {
    let mut digest = MultiDigest::new(algorithms);
    let mut buffer = vec![0u8; BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        digest.update(&buffer[..n]);
    }
    Ok(digest.finalize())
}

/// Digest a file's contents without loading it into memory.
pub fn compute_file_checksums(path: &Path, algorithms: &[ChecksumAlgorithm]) -> io::Result<Checksums> {
    compute_reader_checksums(File::open(path)?, algorithms)
}

/// Normalize a declared digest to lowercase hex.
///
/// Accepts hex in any case or standard base64; anything that is not a digest
/// of the algorithm's length is rejected.
pub fn normalize_digest(algorithm: ChecksumAlgorithm, value: &str) -> Option<String> {
    let token = value.trim();
    if token.len() == algorithm.hex_len() && token.chars().all(|c| c.is_ascii_hexdigit()) {
        return Some(token.to_ascii_lowercase());
    }
    general_purpose::STANDARD
        .decode(token)
        .ok()
        .filter(|bytes| bytes.len() * 2 == algorithm.hex_len())
        .map(hex::encode)
}

/// Parse the digest stored in a side file.
///
/// Side files written by other tools may carry the file name after the
/// digest (`<hex>  lib-1.0.jar`), so only the first token is used.
pub fn parse_side_file(algorithm: ChecksumAlgorithm, content: &str) -> Option<String> {
    normalize_digest(algorithm, content.split_whitespace().next()?)
}

/// Read the digest stored in a side file, `None` if it does not exist.
pub fn read_side_file(algorithm: ChecksumAlgorithm, path: &Path) -> io::Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(parse_side_file(algorithm, &content)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_digests_of_hello_world() {
        let sums = compute_content_checksums(b"hello world", &ChecksumAlgorithm::ALL);
        assert_eq!(sums[&ChecksumAlgorithm::Md5], "5eb63bbbe01eeed093cb22bb8f5acdc3");
        assert_eq!(
            sums[&ChecksumAlgorithm::Sha1],
            "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed"
        );
        assert_eq!(
            sums[&ChecksumAlgorithm::Sha256],
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_eq!(sums[&ChecksumAlgorithm::Sha512].len(), 128);
    }

    #[test]
    fn only_requested_algorithms_are_computed() {
        let sums = compute_content_checksums(b"x", &[ChecksumAlgorithm::Sha1]);
        assert_eq!(sums.len(), 1);
        assert!(sums.contains_key(&ChecksumAlgorithm::Sha1));
    }

    #[test]
    fn streaming_matches_in_memory() {
        let content = vec![7u8; BUFFER_SIZE * 3 + 17];
        let streamed =
            compute_reader_checksums(content.as_slice(), &ChecksumAlgorithm::ALL).unwrap();
        assert_eq!(
            streamed,
            compute_content_checksums(&content, &ChecksumAlgorithm::ALL)
        );
    }

    #[test]
    fn side_file_split() {
        assert_eq!(
            ChecksumAlgorithm::split_side_file("a/b/lib.jar.sha1"),
            Some((ChecksumAlgorithm::Sha1, "a/b/lib.jar"))
        );
        assert_eq!(
            ChecksumAlgorithm::split_side_file("pkg.1.0.nupkg.sha512"),
            Some((ChecksumAlgorithm::Sha512, "pkg.1.0.nupkg"))
        );
        assert_eq!(ChecksumAlgorithm::split_side_file("a/.sha1"), None);
        assert_eq!(ChecksumAlgorithm::split_side_file("a/lib.jar"), None);
    }

    #[test]
    fn parse_side_file_accepts_trailing_file_name() {
        assert_eq!(
            parse_side_file(
                ChecksumAlgorithm::Sha1,
                "2AAE6C35C94FCFB415DBE95F408B9CE91EE846ED  lib-1.0.jar\n"
            ),
            Some("2aae6c35c94fcfb415dbe95f408b9ce91ee846ed".to_string())
        );
        assert_eq!(parse_side_file(ChecksumAlgorithm::Sha1, "not-hex"), None);
        assert_eq!(parse_side_file(ChecksumAlgorithm::Sha1, "abcdef"), None);
        assert_eq!(parse_side_file(ChecksumAlgorithm::Sha1, ""), None);
    }

    #[test]
    fn base64_side_files_normalize_to_hex() {
        let sums = compute_content_checksums(b"hello world", &[ChecksumAlgorithm::Sha512]);
        let hex_digest = &sums[&ChecksumAlgorithm::Sha512];
        let encoded = DigestEncoding::Base64.render(hex_digest);
        assert_eq!(encoded.len(), 88);
        assert!(encoded.ends_with("=="));
        assert_eq!(
            parse_side_file(ChecksumAlgorithm::Sha512, &encoded).as_ref(),
            Some(hex_digest)
        );
        assert_eq!(DigestEncoding::Hex.render(hex_digest), *hex_digest);
        // a base64 digest of another algorithm's length is not accepted
        assert_eq!(parse_side_file(ChecksumAlgorithm::Sha256, &encoded), None);
    }

    #[test]
    fn algorithm_from_str_is_lenient() {
        assert_eq!("SHA-256".parse::<ChecksumAlgorithm>(), Ok(ChecksumAlgorithm::Sha256));
        assert_eq!(".md5".parse::<ChecksumAlgorithm>(), Ok(ChecksumAlgorithm::Md5));
        assert!("crc32".parse::<ChecksumAlgorithm>().is_err());
    }
}
