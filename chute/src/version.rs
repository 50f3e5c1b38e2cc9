// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Ordering of chute versions

use std::cmp::Ordering;

/// Compare two versions: as semver when both parse, as integers when both are integers,
/// lexicographically otherwise.
#[must_use]
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let (a, b) = (a.trim(), b.trim());
    if let (Ok(va), Ok(vb)) = (semver::Version::parse(a), semver::Version::parse(b)) {
        return va.cmp(&vb);
    }
    if let (Ok(ia), Ok(ib)) = (a.parse::<u64>(), b.parse::<u64>()) {
        return ia.cmp(&ib);
    }
    a.cmp(b)
}

#[cfg(test)]
mod tests {
    use super::compare_versions;
    use std::cmp::Ordering;

    #[test]
    fn ordering() {
        assert_eq!(compare_versions("1.10.0", "1.9.3"), Ordering::Greater);
        assert_eq!(compare_versions("1.0.0-rc1", "1.0.0"), Ordering::Less);
        assert_eq!(compare_versions("10", "9"), Ordering::Greater);
        assert_eq!(compare_versions("7", "7"), Ordering::Equal);
        assert_eq!(compare_versions("b", "a"), Ordering::Greater);
        // mixed forms fall back to text
        assert_eq!(compare_versions("2", "1.0.0"), Ordering::Greater);
    }
}
