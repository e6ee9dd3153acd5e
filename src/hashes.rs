//! Streaming whole-file hash pipeline.
//!
//! Reads the file through its i/o descriptor in fixed-size blocks and
//! feeds every configured digest in one pass: md5, sha1, sha256, crc32
//! and Shannon entropy. Files larger than the configured limit are
//! refused outright, without reading a byte.

use log::warn;
use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::error::{BinError, Result};
use crate::buffer::IoDesc;
use crate::types::FileHashRecord;

/// Bytes fed to the digests per descriptor read.
const HASH_BLOCK_SIZE: u64 = 64000;

/// All standard digests updated in lockstep over one pass of the file.
struct MultiDigest {
    md5: Md5,
    sha1: Sha1,
    sha256: Sha256,
    crc32: crc32fast::Hasher,
    /// Byte-value histogram for the entropy estimate.
    counts: [u64; 256],
    total: u64,
}

impl MultiDigest {
    fn new() -> Self {
        Self {
            md5: Md5::new(),
            sha1: Sha1::new(),
            sha256: Sha256::new(),
            crc32: crc32fast::Hasher::new(),
            counts: [0u64; 256],
            total: 0,
        }
    }

    fn update(&mut self, block: &[u8]) {
        self.md5.update(block);
        self.sha1.update(block);
        self.sha256.update(block);
        self.crc32.update(block);
        for &b in block {
            self.counts[b as usize] += 1;
        }
        self.total += block.len() as u64;
    }

    fn entropy(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let total = self.total as f64;
        let mut h = 0.0f64;
        for &count in &self.counts {
            if count == 0 {
                continue;
            }
            let p = count as f64 / total;
            h -= p * p.log2();
        }
        h
    }

    fn finalize(self) -> Vec<FileHashRecord> {
        let entropy = self.entropy();
        vec![
            FileHashRecord {
                algo: "md5".to_string(),
                hex: hex::encode(self.md5.finalize()),
            },
            FileHashRecord {
                algo: "sha1".to_string(),
                hex: hex::encode(self.sha1.finalize()),
            },
            FileHashRecord {
                algo: "sha256".to_string(),
                hex: hex::encode(self.sha256.finalize()),
            },
            FileHashRecord {
                algo: "crc32".to_string(),
                hex: hex::encode(self.crc32.finalize().to_be_bytes()),
            },
            FileHashRecord {
                algo: "entropy".to_string(),
                hex: format!("{entropy:.6}"),
            },
        ]
    }
}

/// Hash everything `desc` can read. `Ok(None)` when the file exceeds
/// `limit` and was refused; a `limit` of 0 disables the ceiling.
pub(crate) fn compute_hashes(
    desc: &mut dyn IoDesc,
    limit: u64,
) -> Result<Option<Vec<FileHashRecord>>> {
    let size = desc.size();
    if limit > 0 && size > limit {
        warn!("file size ({size:#x}) exceeds the hash limit ({limit:#x}), refusing to hash");
        return Ok(None);
    }
    desc.seek(0)?;

    let mut digest = MultiDigest::new();
    let mut block = vec![0u8; HASH_BLOCK_SIZE as usize];
    let mut read_total = 0u64;
    while read_total + HASH_BLOCK_SIZE < size {
        read_exact(desc, &mut block)?;
        digest.update(&block);
        read_total += HASH_BLOCK_SIZE;
    }
    let remainder = (size - read_total) as usize;
    if remainder > 0 {
        read_exact(desc, &mut block[..remainder])?;
        digest.update(&block[..remainder]);
    }

    Ok(Some(digest.finalize()))
}

fn read_exact(desc: &mut dyn IoDesc, mut out: &mut [u8]) -> Result<()> {
    while !out.is_empty() {
        let n = desc.read(out)?;
        if n == 0 {
            return Err(BinError::Digest(
                "descriptor ran short of its reported size".to_string(),
            ));
        }
        out = &mut out[n..];
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::MemDesc;

    fn hash_of(records: &[FileHashRecord], algo: &str) -> String {
        records
            .iter()
            .find(|r| r.algo == algo)
            .map(|r| r.hex.clone())
            .unwrap_or_else(|| panic!("missing {algo} record"))
    }

    #[test]
    fn test_known_digests() {
        let mut desc = MemDesc::new(b"abc".to_vec());
        let records = compute_hashes(&mut desc, 0).unwrap().unwrap();
        assert_eq!(hash_of(&records, "md5"), "900150983cd24fb0d6963f7d28e17f72");
        assert_eq!(
            hash_of(&records, "sha1"),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
        assert_eq!(
            hash_of(&records, "sha256"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(hash_of(&records, "crc32"), "352441c2");
    }

    #[test]
    fn test_entropy_of_uniform_bytes() {
        // one of each byte value: exactly 8 bits of entropy
        let data: Vec<u8> = (0u8..=255).collect();
        let mut desc = MemDesc::new(data);
        let records = compute_hashes(&mut desc, 0).unwrap().unwrap();
        assert_eq!(hash_of(&records, "entropy"), "8.000000");
    }

    #[test]
    fn test_entropy_of_constant_bytes() {
        let mut desc = MemDesc::new(vec![0x41u8; 1024]);
        let records = compute_hashes(&mut desc, 0).unwrap().unwrap();
        assert_eq!(hash_of(&records, "entropy"), "0.000000");
    }

    #[test]
    fn test_empty_input() {
        let mut desc = MemDesc::new(Vec::new());
        let records = compute_hashes(&mut desc, 0).unwrap().unwrap();
        assert_eq!(hash_of(&records, "md5"), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(hash_of(&records, "entropy"), "0.000000");
    }

    #[test]
    fn test_refusal_over_limit_reads_nothing() {
        #[derive(Debug)]
        struct CountingDesc {
            inner: MemDesc,
            reads: usize,
        }
        impl IoDesc for CountingDesc {
            fn size(&self) -> u64 {
                self.inner.size()
            }
            fn seek(&mut self, offset: u64) -> std::io::Result<u64> {
                self.inner.seek(offset)
            }
            fn read(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
                self.reads += 1;
                self.inner.read(out)
            }
        }

        let mut desc = CountingDesc {
            inner: MemDesc::new(vec![0u8; 4096]),
            reads: 0,
        };
        let out = compute_hashes(&mut desc, 1024).unwrap();
        assert!(out.is_none());
        assert_eq!(desc.reads, 0);
    }

    #[test]
    fn test_multi_block_matches_single_block() {
        // spans two 64000-byte blocks plus a remainder
        let data: Vec<u8> = (0..150_000u32).map(|i| (i % 251) as u8).collect();

        let mut streamed = MemDesc::new(data.clone());
        let streamed = compute_hashes(&mut streamed, 0).unwrap().unwrap();

        let mut one_shot = MultiDigest::new();
        one_shot.update(&data);
        let one_shot = one_shot.finalize();

        assert_eq!(streamed, one_shot);
    }
}
