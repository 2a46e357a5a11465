//! Guest-side filesystem grow scripts.
//!
//! After the instance boots from the larger volume, the partition table and
//! filesystem still describe the old size. The scripts here grow the root
//! partition (when the root filesystem sits on one) and then the filesystem
//! itself. Every script runs under `set -eu` and escalates with `sudo` only
//! when the login user is not root.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Root filesystem type to grow.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum GuestFilesystem {
    /// Detect the type with `findmnt` on the guest.
    #[default]
    Auto,
    /// ext2/3/4, grown with `resize2fs`.
    Ext4,
    /// XFS, grown with `xfs_growfs`.
    Xfs,
    /// Btrfs, grown with `btrfs filesystem resize max`.
    Btrfs,
}

/// Raised when a filesystem name is not recognised.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("unsupported guest filesystem '{0}': expected auto, ext4, xfs, or btrfs")]
pub struct UnknownFilesystem(pub String);

impl FromStr for GuestFilesystem {
    type Err = UnknownFilesystem;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "ext4" => Ok(Self::Ext4),
            "xfs" => Ok(Self::Xfs),
            "btrfs" => Ok(Self::Btrfs),
            _ => Err(UnknownFilesystem(value.to_owned())),
        }
    }
}

impl fmt::Display for GuestFilesystem {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Auto => "auto",
            Self::Ext4 => "ext4",
            Self::Xfs => "xfs",
            Self::Btrfs => "btrfs",
        };
        formatter.write_str(label)
    }
}

const PREAMBLE: &str = r#"set -eu
SUDO=""
if [ "$(id -u)" -ne 0 ]; then SUDO="sudo"; fi
root_source=$(findmnt -n -o SOURCE /)
root_source=${root_source%%\[*}
"#;

const DETECT_FS: &str = "fs_type=$(findmnt -n -o FSTYPE /)\n";

// growpart exits 1 when the partition already fills the disk.
const GROW_PARTITION: &str = r#"parent=$(lsblk -n -o PKNAME "$root_source" 2>/dev/null || true)
if [ -n "$parent" ]; then
  part_num=$(cat "/sys/class/block/$(basename "$root_source")/partition")
  $SUDO growpart "/dev/$parent" "$part_num" || [ $? -eq 1 ]
fi
"#;

const GROW_FS: &str = r#"case "$fs_type" in
  ext2|ext3|ext4) $SUDO resize2fs "$root_source" ;;
  xfs) $SUDO xfs_growfs / ;;
  btrfs) $SUDO btrfs filesystem resize max / ;;
  *) echo "unsupported root filesystem: $fs_type" >&2; exit 2 ;;
esac
"#;

impl GuestFilesystem {
    /// Renders the POSIX shell script that grows the root partition and
    /// filesystem.
    #[must_use]
    pub fn grow_script(self) -> String {
        let fs_line = match self {
            Self::Auto => String::from(DETECT_FS),
            fixed => format!("fs_type={fixed}\n"),
        };
        let mut script = String::with_capacity(
            PREAMBLE.len() + fs_line.len() + GROW_PARTITION.len() + GROW_FS.len(),
        );
        script.push_str(PREAMBLE);
        script.push_str(&fs_line);
        script.push_str(GROW_PARTITION);
        script.push_str(GROW_FS);
        script
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("auto", GuestFilesystem::Auto)]
    #[case("EXT4", GuestFilesystem::Ext4)]
    #[case(" xfs ", GuestFilesystem::Xfs)]
    #[case("btrfs", GuestFilesystem::Btrfs)]
    fn parses_known_filesystems(#[case] input: &str, #[case] expected: GuestFilesystem) {
        assert_eq!(input.parse::<GuestFilesystem>(), Ok(expected));
    }

    #[test]
    fn rejects_unknown_filesystem() {
        let err = "zfs".parse::<GuestFilesystem>().expect_err("zfs is unsupported");
        assert!(err.to_string().contains("zfs"));
    }

    #[test]
    fn auto_script_detects_filesystem_type() {
        let script = GuestFilesystem::Auto.grow_script();
        assert!(script.starts_with("set -eu\n"));
        assert!(script.contains("fs_type=$(findmnt -n -o FSTYPE /)"));
        assert!(script.contains("growpart"));
        assert!(script.contains("resize2fs"));
        assert!(script.contains("xfs_growfs /"));
        assert!(script.contains("btrfs filesystem resize max /"));
    }

    #[rstest]
    #[case(GuestFilesystem::Ext4, "fs_type=ext4\n")]
    #[case(GuestFilesystem::Xfs, "fs_type=xfs\n")]
    #[case(GuestFilesystem::Btrfs, "fs_type=btrfs\n")]
    fn fixed_script_skips_detection(#[case] filesystem: GuestFilesystem, #[case] line: &str) {
        let script = filesystem.grow_script();
        assert!(script.contains(line), "{script}");
        assert!(!script.contains("FSTYPE"), "{script}");
    }
}
