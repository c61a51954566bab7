//! Key hash functions.
//!
//! Every built-in algorithm truncates its result to 32 bits so that the bucket computed by
//! `hash % table_size` agrees with other memcached clients using the same algorithm.
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

const FNV_32_INIT: u64 = 0x811c_9dc5;
const FNV_32_PRIME: u64 = 16_777_619;
const FNV_64_INIT: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_64_PRIME: u64 = 0x0000_0100_0000_01b3;

/// A deterministic hash from keys to non-negative integers.
pub trait KeyHasher: Send + Sync {
    /// Hashes the given key.
    fn hash(&self, key: &str) -> u64;
}

/// Built-in hash algorithms, selectable by name in configuration.
///
/// `Native` and the FNV variants walk the key's UTF-16 code units.
#[allow(non_camel_case_types)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    /// Java `String.hashCode` over UTF-16 code units.
    #[default]
    Native,
    /// Upper 15 bits of the CRC32 checksum, as used by the classic memcached clients.
    Crc32,
    /// 32-bit FNV-1.
    #[serde(rename = "fnv1_32")]
    Fnv1_32,
    /// 32-bit FNV-1a.
    #[serde(rename = "fnv1a_32")]
    Fnv1a_32,
    /// 64-bit FNV-1, truncated to 32 bits.
    #[serde(rename = "fnv1_64")]
    Fnv1_64,
    /// 64-bit FNV-1a, truncated to 32 bits.
    #[serde(rename = "fnv1a_64")]
    Fnv1a_64,
    /// Bob Jenkins' one-at-a-time hash.
    OneAtATime,
    /// XXH3, truncated to 32 bits.
    Xxh3,
}

impl KeyHasher for HashAlgorithm {
    fn hash(&self, key: &str) -> u64 {
        let rv = match self {
            Self::Native => {
                let h = key
                    .encode_utf16()
                    .fold(0i32, |h, c| h.wrapping_mul(31).wrapping_add(c as i32));
                h as u32 as u64
            }
            Self::Crc32 => ((crc32fast::hash(key.as_bytes()) >> 16) & 0x7fff) as u64,
            Self::Fnv1_32 => key.encode_utf16().fold(FNV_32_INIT, |h, c| {
                (h.wrapping_mul(FNV_32_PRIME) ^ c as u64) & 0xffff_ffff
            }),
            Self::Fnv1a_32 => key.encode_utf16().fold(FNV_32_INIT, |h, c| {
                ((h ^ c as u64).wrapping_mul(FNV_32_PRIME)) & 0xffff_ffff
            }),
            Self::Fnv1_64 => key
                .encode_utf16()
                .fold(FNV_64_INIT, |h, c| h.wrapping_mul(FNV_64_PRIME) ^ c as u64),
            Self::Fnv1a_64 => key
                .encode_utf16()
                .fold(FNV_64_INIT, |h, c| (h ^ c as u64).wrapping_mul(FNV_64_PRIME)),
            Self::OneAtATime => {
                let mut h: u32 = 0;
                for b in key.bytes() {
                    h = h.wrapping_add(b as u32);
                    h = h.wrapping_add(h << 10);
                    h ^= h >> 6;
                }
                h = h.wrapping_add(h << 3);
                h ^= h >> 11;
                h = h.wrapping_add(h << 15);
                h as u64
            }
            Self::Xxh3 => xxhash_rust::xxh3::xxh3_64(key.as_bytes()),
        };

        rv & 0xffff_ffff
    }
}

impl FromStr for HashAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "native" => Ok(Self::Native),
            "crc32" => Ok(Self::Crc32),
            "fnv1_32" => Ok(Self::Fnv1_32),
            "fnv1a_32" => Ok(Self::Fnv1a_32),
            "fnv1_64" => Ok(Self::Fnv1_64),
            "fnv1a_64" => Ok(Self::Fnv1a_64),
            "one_at_a_time" => Ok(Self::OneAtATime),
            "xxh3" => Ok(Self::Xxh3),
            other => Err(Error::Config(format!("unknown hash algorithm `{other}`"))),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::Native => "native",
            Self::Crc32 => "crc32",
            Self::Fnv1_32 => "fnv1_32",
            Self::Fnv1a_32 => "fnv1a_32",
            Self::Fnv1_64 => "fnv1_64",
            Self::Fnv1a_64 => "fnv1a_64",
            Self::OneAtATime => "one_at_a_time",
            Self::Xxh3 => "xxh3",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [HashAlgorithm; 8] = [
        HashAlgorithm::Native,
        HashAlgorithm::Crc32,
        HashAlgorithm::Fnv1_32,
        HashAlgorithm::Fnv1a_32,
        HashAlgorithm::Fnv1_64,
        HashAlgorithm::Fnv1a_64,
        HashAlgorithm::OneAtATime,
        HashAlgorithm::Xxh3,
    ];

    #[test]
    fn test_native_matches_java_hash_code() {
        // "hello".hashCode() == 99162322
        assert_eq!(HashAlgorithm::Native.hash("hello"), 99_162_322);
        assert_eq!(HashAlgorithm::Native.hash(""), 0);
        // "polygenelubricants".hashCode() == Integer.MIN_VALUE
        assert_eq!(HashAlgorithm::Native.hash("polygenelubricants"), 0x8000_0000);
    }

    #[test]
    fn test_fnv_reference_values() {
        assert_eq!(HashAlgorithm::Fnv1_32.hash(""), 0x811c_9dc5);
        assert_eq!(HashAlgorithm::Fnv1a_32.hash("a"), 0xe40c_292c);
        assert_eq!(HashAlgorithm::Fnv1_32.hash("a"), 0x050c_5d7e);
    }

    #[test]
    fn test_fnv_hashes_utf16_units() {
        // U+1F600 is the surrogate pair 0xD83D 0xDE00.
        assert_eq!(HashAlgorithm::Fnv1a_32.hash("\u{1F600}"), 0xcb31_c4b8);
        assert_eq!(
            HashAlgorithm::Fnv1a_64.hash("\u{1F600}"),
            [0xd83du64, 0xde00].iter().fold(FNV_64_INIT, |h, c| {
                (h ^ c).wrapping_mul(FNV_64_PRIME)
            }) & 0xffff_ffff
        );
    }

    #[test]
    fn test_crc32_fits_in_15_bits() {
        for key in ["foo", "bar", "a-much-longer-key-for-the-checksum"] {
            assert!(HashAlgorithm::Crc32.hash(key) <= 0x7fff);
        }
    }

    #[test]
    fn test_all_algorithms_are_deterministic_and_32_bit() {
        for algo in ALL {
            for key in ["", "foo", "key:1", "ключ"] {
                let h = algo.hash(key);
                assert_eq!(h, algo.hash(key), "{algo} not deterministic");
                assert!(h <= u32::MAX as u64, "{algo} exceeds 32 bits");
            }
        }
    }

    #[test]
    fn test_names_round_trip() {
        for algo in ALL {
            assert_eq!(algo.to_string().parse::<HashAlgorithm>().unwrap(), algo);
        }
        assert!("md5".parse::<HashAlgorithm>().is_err());
    }
}
