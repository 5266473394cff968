//! Parsing of the kernel mount table (`/proc/self/mounts` format).

use camino::{Utf8Path, Utf8PathBuf};

use super::MountError;

/// One line of the mount table.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MountEntry {
    /// Mounted device or pseudo filesystem name.
    pub source: String,
    /// Mount point.
    pub target: Utf8PathBuf,
    /// Filesystem type.
    pub fs_type: String,
    /// Comma-separated mount options.
    pub options: String,
}

/// Snapshot of the mount table.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MountTable {
    entries: Vec<MountEntry>,
}

impl MountTable {
    /// Reads and parses the mount table at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`MountError::Io`] when the file cannot be read.
    pub fn read(path: &Utf8Path) -> Result<Self, MountError> {
        let contents = std::fs::read_to_string(path).map_err(|err| MountError::Io {
            action: "read mount table",
            path: path.to_owned(),
            message: err.to_string(),
        })?;
        Ok(Self::parse(&contents))
    }

    /// Parses mount table text, skipping malformed lines.
    #[must_use]
    pub fn parse(contents: &str) -> Self {
        let entries = contents
            .lines()
            .filter_map(|line| {
                let mut fields = line.split_whitespace();
                let source = unescape(fields.next()?);
                let target = Utf8PathBuf::from(unescape(fields.next()?));
                let fs_type = fields.next()?.to_owned();
                let options = fields.next().unwrap_or_default().to_owned();
                Some(MountEntry {
                    source,
                    target,
                    fs_type,
                    options,
                })
            })
            .collect();
        Self { entries }
    }

    /// All entries in table order.
    #[must_use]
    pub fn entries(&self) -> &[MountEntry] {
        &self.entries
    }

    /// Returns `true` when something is mounted at `target`.
    #[must_use]
    pub fn is_mount_point(&self, target: &Utf8Path) -> bool {
        self.entries.iter().any(|entry| entry.target == target)
    }
}

/// Decodes the octal escapes (`\040` and friends) the kernel uses for
/// whitespace and backslashes.
fn unescape(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        let digits: String = std::iter::from_fn(|| chars.next_if(|c| c.is_digit(8)))
            .take(3)
            .collect();
        match u8::from_str_radix(&digits, 8) {
            Ok(byte) if digits.len() == 3 => out.push(char::from(byte)),
            _ => {
                out.push('\\');
                out.push_str(&digits);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const SAMPLE: &str = "\
sysfs /sys sysfs rw,nosuid,nodev,noexec,relatime 0 0
/dev/sdb /var/lib/kubelet/staging/pv-1 ext4 rw,relatime 0 0
/dev/sdb /var/lib/kubelet/pods/a/volumes/pv\\0401 ext4 rw,relatime 0 0
garbage
";

    #[test]
    fn parses_entries_and_skips_malformed_lines() {
        let table = MountTable::parse(SAMPLE);
        assert_eq!(table.entries().len(), 3);
        let sdb = table
            .entries()
            .iter()
            .filter(|entry| entry.source == "/dev/sdb")
            .count();
        assert_eq!(sdb, 2);
        assert!(table.is_mount_point(Utf8Path::new("/var/lib/kubelet/staging/pv-1")));
    }

    #[test]
    fn decodes_escaped_spaces() {
        let table = MountTable::parse(SAMPLE);
        assert!(table.is_mount_point(Utf8Path::new("/var/lib/kubelet/pods/a/volumes/pv 1")));
    }

    #[rstest]
    #[case("plain", "plain")]
    #[case("a\\134b", "a\\b")]
    #[case("tab\\011x", "tab\tx")]
    #[case("short\\04", "short\\04")]
    fn unescape_cases(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(unescape(input), expected);
    }
}
