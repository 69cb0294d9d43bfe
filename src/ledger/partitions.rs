//! Key layout and encoding utilities for Fjall partitions
//!
//! Partition structure:
//! - `index_versions`: idx:{path}@{version} -> IndexVersion (JSON)
//! - `module_versions`: mvs:{module}@{version} -> ModuleVersionState (JSON)
//! - `package_versions`: pkg:{module}@{version}:{package} -> PackageVersionState (JSON)
//! - `metadata`: meta:{key} -> value (string)
//!
//! Secondary partitions, rewritten with every module row:
//! - `timeline`: ordered key over index timestamp -> () for every module version
//! - `fetch_queue`: ordered key over index timestamp -> QueueEntry, unsettled versions only
//! - `failures`: ordered key over last processed time -> () for failed versions
//! - `status_counts`: status (u16 BE) -> row count (u64 BE)
//!
//! An ordered key is `[0][!secs BE][!nanos BE]{path}\0{version}` for a known
//! instant and `[1]{path}\0{version}` for an unknown one, so a forward scan
//! yields newest first, unknown last, then path, then version.
//!
//! Module paths and versions never contain `:`, `@` or NUL, so
//! `pkg:{module}@{version}:` is an unambiguous prefix for one attempt's rows.

use chrono::{DateTime, Utc};

use super::error::{Result, StoreError};

pub const INDEX_VERSIONS: &str = "index_versions";
pub const MODULE_VERSIONS: &str = "module_versions";
pub const PACKAGE_VERSIONS: &str = "package_versions";
pub const METADATA: &str = "metadata";
pub const TIMELINE: &str = "timeline";
pub const FETCH_QUEUE: &str = "fetch_queue";
pub const FAILURES: &str = "failures";
pub const STATUS_COUNTS: &str = "status_counts";

const KNOWN_INSTANT: u8 = 0;
const UNKNOWN_INSTANT: u8 = 1;
const INSTANT_LEN: usize = 1 + 8 + 4;

/// Reject paths and versions that would make keys ambiguous
pub fn validate_module_key(module_path: &str, version: &str) -> Result<()> {
    if module_path.is_empty() {
        return Err(StoreError::InvalidArgument("module path is empty".into()));
    }
    if version.is_empty() {
        return Err(StoreError::InvalidArgument(format!(
            "version is empty for {}",
            module_path
        )));
    }
    if module_path.contains(['@', ':', '\0']) {
        return Err(StoreError::InvalidArgument(format!(
            "module path {:?} contains a reserved character",
            module_path
        )));
    }
    if version.contains(['@', ':', '\0']) {
        return Err(StoreError::InvalidArgument(format!(
            "version {:?} contains a reserved character",
            version
        )));
    }
    Ok(())
}

/// Encode an index key: idx:{path}@{version}
pub fn encode_index_key(path: &str, version: &str) -> Vec<u8> {
    format!("idx:{}@{}", path, version).into_bytes()
}

/// Encode a module version key: mvs:{module}@{version}
pub fn encode_module_key(module_path: &str, version: &str) -> Vec<u8> {
    format!("mvs:{}@{}", module_path, version).into_bytes()
}

/// Encode a package version key: pkg:{module}@{version}:{package}
pub fn encode_package_key(module_path: &str, version: &str, package_path: &str) -> Vec<u8> {
    format!("pkg:{}@{}:{}", module_path, version, package_path).into_bytes()
}

/// Encode a package prefix for range scan: pkg:{module}@{version}:
pub fn encode_package_prefix(module_path: &str, version: &str) -> Vec<u8> {
    format!("pkg:{}@{}:", module_path, version).into_bytes()
}

/// Encode a metadata key: meta:{key}
pub fn encode_meta_key(key: &str) -> Vec<u8> {
    format!("meta:{}", key).into_bytes()
}

/// Encode an ordered key: newest instant first, unknown last, then path, then version
pub fn encode_ordered_key(at: Option<DateTime<Utc>>, module_path: &str, version: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(INSTANT_LEN + module_path.len() + 1 + version.len());
    match at {
        Some(at) => {
            let secs = (at.timestamp() as u64) ^ (1 << 63);
            key.push(KNOWN_INSTANT);
            key.extend_from_slice(&(!secs).to_be_bytes());
            key.extend_from_slice(&(!at.timestamp_subsec_nanos()).to_be_bytes());
        }
        None => key.push(UNKNOWN_INSTANT),
    }
    key.extend_from_slice(module_path.as_bytes());
    key.push(0);
    key.extend_from_slice(version.as_bytes());
    key
}

/// Instant carried by an ordered key
pub fn decode_ordered_instant(key: &[u8]) -> Result<Option<DateTime<Utc>>> {
    match key.first() {
        Some(&UNKNOWN_INSTANT) => Ok(None),
        Some(&KNOWN_INSTANT) if key.len() >= INSTANT_LEN => {
            let mut secs = [0u8; 8];
            secs.copy_from_slice(&key[1..9]);
            let mut nanos = [0u8; 4];
            nanos.copy_from_slice(&key[9..INSTANT_LEN]);

            let secs = (!u64::from_be_bytes(secs) ^ (1 << 63)) as i64;
            let nanos = !u32::from_be_bytes(nanos);
            DateTime::from_timestamp(secs, nanos)
                .map(Some)
                .ok_or_else(|| StoreError::Internal(format!("ordered key out of range: {}s", secs)))
        }
        _ => Err(StoreError::Internal(format!(
            "malformed ordered key {:?}",
            String::from_utf8_lossy(key)
        ))),
    }
}

/// Encode a status count key: status as u16 BE
pub fn encode_status_key(status: u16) -> [u8; 2] {
    status.to_be_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_module_key_encoding() {
        let key = encode_module_key("foo.com/bar", "v1.0.0");
        assert_eq!(key, b"mvs:foo.com/bar@v1.0.0");
    }

    #[test]
    fn test_package_key_encoding() {
        let key = encode_package_key("foo.com/bar", "v1.0.0", "foo.com/bar/baz");
        assert_eq!(key, b"pkg:foo.com/bar@v1.0.0:foo.com/bar/baz");
        assert!(key.starts_with(&encode_package_prefix("foo.com/bar", "v1.0.0")));
    }

    #[test]
    fn test_package_prefix_does_not_match_longer_version() {
        let prefix = encode_package_prefix("foo.com/bar", "v1.0.0");
        let other = encode_package_key("foo.com/bar", "v1.0.0-rc1", "foo.com/bar");
        assert!(!other.starts_with(&prefix));
    }

    #[test]
    fn test_index_and_meta_keys() {
        assert_eq!(encode_index_key("foo.com/bar", "v1.0.0"), b"idx:foo.com/bar@v1.0.0");
        assert_eq!(encode_meta_key("format_version"), b"meta:format_version");
    }

    #[test]
    fn test_ordered_keys_sort_newest_first() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let later = ts + Duration::nanoseconds(1);
        let before_epoch = Utc.with_ymd_and_hms(1960, 1, 1, 0, 0, 0).unwrap();

        let mut keys = vec![
            encode_ordered_key(None, "a.com/mod", "v1.0.0"),
            encode_ordered_key(Some(ts), "a.com/mod2", "v1.0.0"),
            encode_ordered_key(Some(before_epoch), "a.com/mod", "v1.0.0"),
            encode_ordered_key(Some(ts), "a.com/mod", "v1.0.0"),
            encode_ordered_key(Some(later), "z.com/mod", "v1.0.0"),
            encode_ordered_key(Some(ts), "a.com/mod", "v0.9.0"),
        ];
        keys.sort();

        assert_eq!(
            keys,
            vec![
                encode_ordered_key(Some(later), "z.com/mod", "v1.0.0"),
                encode_ordered_key(Some(ts), "a.com/mod", "v0.9.0"),
                encode_ordered_key(Some(ts), "a.com/mod", "v1.0.0"),
                encode_ordered_key(Some(ts), "a.com/mod2", "v1.0.0"),
                encode_ordered_key(Some(before_epoch), "a.com/mod", "v1.0.0"),
                encode_ordered_key(None, "a.com/mod", "v1.0.0"),
            ]
        );
    }

    #[test]
    fn test_ordered_key_instant() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
            + Duration::milliseconds(250);
        let key = encode_ordered_key(Some(ts), "foo.com/bar", "v1.0.0");
        assert_eq!(decode_ordered_instant(&key).unwrap(), Some(ts));

        let key = encode_ordered_key(None, "foo.com/bar", "v1.0.0");
        assert_eq!(decode_ordered_instant(&key).unwrap(), None);

        assert!(decode_ordered_instant(&[0, 1, 2]).is_err());
    }

    #[test]
    fn test_validate_module_key() {
        assert!(validate_module_key("foo.com/bar", "v1.0.0+incompatible").is_ok());
        assert!(validate_module_key("", "v1.0.0").is_err());
        assert!(validate_module_key("foo.com/bar", "").is_err());
        assert!(validate_module_key("foo.com/bar@v1", "v1.0.0").is_err());
        assert!(validate_module_key("foo.com/bar", "v1:0").is_err());
        assert!(validate_module_key("foo.com/bar\0", "v1.0.0").is_err());
    }
}
