//! The filesystem types the node plugin can format and grow.

use strum_macros::EnumString;

/// A type to enumerate the supported filesystems.
#[derive(EnumString, Clone, Copy, Debug, Eq, PartialEq)]
#[strum(serialize_all = "lowercase")]
pub enum FileSystem {
    Ext4,
    Xfs,
}

impl Default for FileSystem {
    fn default() -> Self {
        FileSystem::Ext4
    }
}

impl AsRef<str> for FileSystem {
    fn as_ref(&self) -> &str {
        match self {
            FileSystem::Ext4 => "ext4",
            FileSystem::Xfs => "xfs",
        }
    }
}

impl std::fmt::Display for FileSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::FileSystem;
    use std::str::FromStr;

    #[test]
    fn parses_supported_filesystems() {
        assert_eq!(FileSystem::from_str("ext4").unwrap(), FileSystem::Ext4);
        assert_eq!(FileSystem::from_str("xfs").unwrap(), FileSystem::Xfs);
        assert!(FileSystem::from_str("vfat").is_err());
    }
}
