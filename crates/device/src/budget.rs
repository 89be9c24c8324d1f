// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Device memory budget.
//!
//! The accelerator addresses a fixed amount of memory. A [`MemoryBudget`]
//! caps the total size of all arenas granted at once and parses the
//! human-readable sizes used in configuration files.

use crate::DeviceError;
use std::fmt;
use std::str::FromStr;

const KB: u64 = 1024;
const MB: u64 = 1024 * KB;
const GB: u64 = 1024 * MB;

/// Upper bound on device memory granted at once.
///
/// # Examples
/// ```
/// use device::MemoryBudget;
///
/// assert_eq!(MemoryBudget::parse("64M").unwrap().as_bytes(), 64 * 1024 * 1024);
/// assert_eq!(MemoryBudget::parse("512kb").unwrap(), MemoryBudget::from_kb(512));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct MemoryBudget {
    bytes: u64,
}

impl MemoryBudget {
    pub fn from_bytes(bytes: u64) -> Self {
        Self { bytes }
    }

    pub fn from_kb(kb: u64) -> Self {
        Self { bytes: kb * KB }
    }

    pub fn from_mb(mb: u64) -> Self {
        Self { bytes: mb * MB }
    }

    pub fn as_bytes(&self) -> u64 {
        self.bytes
    }

    /// Parses `"64M"`, `"64MB"`, `"512K"`, `"1G"`, `"4096B"` or a bare byte
    /// count. Suffixes are case-insensitive and binary (K = 1024).
    pub fn parse(s: &str) -> Result<Self, DeviceError> {
        let trimmed = s.trim();
        let upper = trimmed.to_ascii_uppercase();
        let split = upper
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(upper.len());
        let (digits, suffix) = upper.split_at(split);

        let unit = match suffix.trim() {
            "" | "B" => 1,
            "K" | "KB" => KB,
            "M" | "MB" => MB,
            "G" | "GB" => GB,
            other => {
                return Err(DeviceError::InvalidBudget(format!(
                    "'{trimmed}': unknown suffix '{other}' (expected K, M or G)"
                )))
            }
        };
        let value: u64 = digits
            .parse()
            .map_err(|_| DeviceError::InvalidBudget(format!("'{trimmed}': expected a number")))?;
        let bytes = value
            .checked_mul(unit)
            .ok_or_else(|| DeviceError::InvalidBudget(format!("'{trimmed}' overflows")))?;
        if bytes == 0 {
            return Err(DeviceError::InvalidBudget("budget must be non-zero".into()));
        }
        Ok(Self { bytes })
    }
}

impl FromStr for MemoryBudget {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for MemoryBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (unit, label) in [(GB, "GB"), (MB, "MB"), (KB, "KB")] {
            if self.bytes >= unit && self.bytes % unit == 0 {
                return write!(f, "{} {}", self.bytes / unit, label);
            }
        }
        write!(f, "{} B", self.bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_suffixes() {
        assert_eq!(MemoryBudget::parse("64M").unwrap().as_bytes(), 64 * MB);
        assert_eq!(MemoryBudget::parse("64mb").unwrap().as_bytes(), 64 * MB);
        assert_eq!(MemoryBudget::parse("512K").unwrap().as_bytes(), 512 * KB);
        assert_eq!(MemoryBudget::parse("1G").unwrap().as_bytes(), GB);
        assert_eq!(MemoryBudget::parse("4096B").unwrap().as_bytes(), 4096);
        assert_eq!(MemoryBudget::parse(" 8192 ").unwrap().as_bytes(), 8192);
    }

    #[test]
    fn test_parse_invalid() {
        assert!(MemoryBudget::parse("").is_err());
        assert!(MemoryBudget::parse("lots").is_err());
        assert!(MemoryBudget::parse("0M").is_err());
        assert!(MemoryBudget::parse("12T").is_err());
        assert!(MemoryBudget::parse("99999999999999G").is_err());
    }

    #[test]
    fn test_from_str() {
        let b: MemoryBudget = "2M".parse().unwrap();
        assert_eq!(b, MemoryBudget::from_mb(2));
    }

    #[test]
    fn test_display() {
        assert_eq!(MemoryBudget::from_mb(64).to_string(), "64 MB");
        assert_eq!(MemoryBudget::from_kb(1536).to_string(), "1536 KB");
        assert_eq!(MemoryBudget::from_bytes(100).to_string(), "100 B");
    }

    #[test]
    fn test_serde_roundtrip() {
        let b = MemoryBudget::from_mb(16);
        let json = serde_json::to_string(&b).unwrap();
        let back: MemoryBudget = serde_json::from_str(&json).unwrap();
        assert_eq!(b, back);
    }
}
