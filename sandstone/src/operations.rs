//! Sandbox operation name tables.
//!
//! Every profile record holds one node index per operation slot, so the
//! compiler and the dissector must agree on the table. The slot order differs
//! between OS releases; the built-in table matches macOS 13.0 (22A5295i) and
//! other releases can be supplied as a text file (one name per line).

use std::path::Path;

use thiserror::Error;
use tracing::{Level, instrument};

/// Errors raised while loading an operation table.
#[derive(Debug, Error)]
pub enum TableError {
    #[error("failed to read operation table {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("operation table line {line}: duplicate operation '{name}'")]
    Duplicate { line: usize, name: String },
    #[error("operation table must start with 'default' (found '{0}')")]
    MissingDefault(String),
    #[error("operation table is empty")]
    Empty,
    #[error("operation table has {0} entries; at most 255 fit in a profile header")]
    TooLarge(usize),
}

/// Operation names for macOS 13.0 (22A5295i), in slot order.
pub const MACOS_13_OPERATIONS: &[&str] = &[
    "default",
    "appleevent-send",
    "authorization-right-obtain",
    "boot-arg-set",
    "device*",
    "device-camera",
    "device-microphone",
    "darwin-notification-post",
    "distributed-notification-post",
    "dynamic-code-generation",
    "file*",
    "file-chroot",
    "file-clone",
    "file-ioctl",
    "file-issue-extension",
    "file-link",
    "file-map-executable",
    "file-mknod",
    "file-mount",
    "file-mount-update",
    "file-read*",
    "file-read-data",
    "file-read-metadata",
    "file-read-xattr",
    "file-revoke",
    "file-search",
    "file-test-existence",
    "file-unmount",
    "file-write*",
    "file-write-acl",
    "file-write-create",
    "file-write-data",
    "file-write-finderinfo",
    "file-write-flags",
    "file-write-mode",
    "file-write-owner",
    "file-write-setugid",
    "file-write-times",
    "file-write-unlink",
    "file-write-xattr",
    "fs-quota*",
    "fs-quota-get",
    "fs-quota-on",
    "fs-quota-off",
    "fs-quota-set*",
    "fs-quota-set-limits",
    "fs-quota-set-usage",
    "fs-quota-stat",
    "fs-quota-sync",
    "fs-rename",
    "fs-snapshot*",
    "fs-snapshot-create",
    "fs-snapshot-delete",
    "fs-snapshot-mount",
    "fs-snapshot-revert",
    "generic-issue-extension",
    "qtn-user",
    "hid-control",
    "iokit*",
    "iokit-get-properties",
    "iokit-issue-extension",
    "iokit-open*",
    "iokit-open-user-client",
    "iokit-open-service",
    "iokit-set-properties",
    "ipc*",
    "ipc-posix*",
    "ipc-posix-issue-extension",
    "ipc-posix-sem*",
    "ipc-posix-sem-create",
    "ipc-posix-sem-open",
    "ipc-posix-sem-post",
    "ipc-posix-sem-unlink",
    "ipc-posix-sem-wait",
    "ipc-posix-shm*",
    "ipc-posix-shm-read-data",
    "ipc-posix-shm-write*",
    "ipc-posix-shm-write-create",
    "ipc-posix-shm-write-data",
    "ipc-posix-shm-write-unlink",
    "ipc-sysv*",
    "ipc-sysv-msg",
    "ipc-sysv-sem",
    "ipc-sysv-shm",
    "job-creation",
    "lsopen",
    "mach*",
    "mach-bootstrap",
    "mach-cross-domain-lookup",
    "mach-derive-port",
    "mach-host*",
    "mach-host-exception-port-set",
    "mach-host-special-port-set",
    "mach-issue-extension",
    "mach-kernel-endpoint",
    "mach-lookup",
    "mach-priv*",
    "mach-priv-host-port",
    "mach-priv-task-port",
    "mach-register",
    "mach-task*",
    "mach-task-inspect",
    "mach-task-name",
    "mach-task-read",
    "mach-task-special-port*",
    "mach-task-special-port-get",
    "mach-task-special-port-set",
    "necp-client-open",
    "network*",
    "network-inbound",
    "network-bind",
    "network-outbound",
    "nvram*",
    "nvram-delete",
    "nvram-get",
    "nvram-set",
    "opendirectory-user-modify",
    "process*",
    "process-codesigning*",
    "process-codesigning-blob-get",
    "process-codesigning-cdhash-get",
    "process-codesigning-entitlements-blob-get",
    "process-codesigning-entitlements-der-blob-get",
    "process-codesigning-identity-get",
    "process-codesigning-status*",
    "process-codesigning-status-set",
    "process-codesigning-status-get",
    "process-codesigning-teamid-get",
    "process-codesigning-text-offset-get",
    "process-exec*",
    "process-exec-interpreter",
    "process-fork",
    "process-info*",
    "process-info-codesignature",
    "process-info-dirtycontrol",
    "process-info-ledger",
    "process-info-listpids",
    "process-info-rusage",
    "process-info-pidinfo",
    "process-info-pidfdinfo",
    "process-info-pidfileportinfo",
    "process-info-setcontrol",
    "pseudo-tty",
    "signal",
    "socket-ioctl",
    "socket-option*",
    "socket-option-get",
    "socket-option-set",
    "syscall*",
    "syscall-unix",
    "syscall-mach",
    "syscall-mig",
    "sysctl*",
    "sysctl-read",
    "sysctl-write",
    "system*",
    "system-acct",
    "system-audit",
    "system-automount",
    "system-debug",
    "system-fcntl",
    "system-fsctl",
    "system-info",
    "system-kext*",
    "system-kext-load",
    "system-kext-unload",
    "system-kext-query",
    "system-mac*",
    "system-mac-label",
    "system-mac-syscall",
    "system-memorystatus-control",
    "system-necp-client-action",
    "system-nfssvc",
    "system-package-check",
    "system-privilege",
    "system-reboot",
    "system-sched",
    "system-set-time",
    "system-socket",
    "system-suspend-resume",
    "system-swap",
    "user-preference*",
    "user-preference-read",
    "managed-preference-read",
    "user-preference-write",
    "storage-class-map",
];

/// An ordered list of operation names; the position is the operation number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationTable {
    names: Vec<String>,
}

impl Default for OperationTable {
    fn default() -> Self {
        Self {
            names: MACOS_13_OPERATIONS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl OperationTable {
    /// Build a table from names, validating the same invariants as [`parse`](Self::parse).
    pub fn from_names<I, S>(names: I) -> Result<Self, TableError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out: Vec<String> = Vec::new();
        for (i, name) in names.into_iter().enumerate() {
            let name = name.into();
            if out.contains(&name) {
                return Err(TableError::Duplicate { line: i + 1, name });
            }
            out.push(name);
        }
        match out.first() {
            None => return Err(TableError::Empty),
            Some(first) if first != "default" => {
                return Err(TableError::MissingDefault(first.clone()));
            }
            Some(_) => {}
        }
        if out.len() > u8::MAX as usize {
            return Err(TableError::TooLarge(out.len()));
        }
        Ok(Self { names: out })
    }

    /// Parse a table file: one operation per line, blank lines and `;`
    /// comments ignored, surrounding quotes and trailing commas tolerated.
    pub fn parse(text: &str) -> Result<Self, TableError> {
        let names = text
            .lines()
            .map(|line| line.split(';').next().unwrap_or_default().trim())
            .map(|line| line.trim_end_matches(',').trim_matches('"'))
            .filter(|line| !line.is_empty())
            .map(str::to_string);
        Self::from_names(names)
    }

    #[instrument(level = Level::TRACE)]
    pub fn load(path: &Path) -> Result<Self, TableError> {
        let text = std::fs::read_to_string(path).map_err(|source| TableError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    /// Exact lookup of an operation number.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Lookup accepting the shorthand `process-exec` for `process-exec*`,
    /// the spelling most profiles use for wildcard-only operations.
    pub fn resolve(&self, name: &str) -> Option<usize> {
        self.index_of(name)
            .or_else(|| self.index_of(&format!("{name}*")))
    }

    /// Whether a rule written for `rule_op` applies to the slot `op`.
    ///
    /// `default` covers everything; `prefix*` covers itself and every
    /// operation named `prefix-...`.
    pub fn covers(&self, rule_op: usize, op: usize) -> bool {
        if rule_op == op || rule_op == 0 {
            return true;
        }
        let (Some(rule_name), Some(name)) = (self.name(rule_op), self.name(op)) else {
            return false;
        };
        match rule_name.strip_suffix('*') {
            Some(prefix) => name
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('-')),
            None => false,
        }
    }

    /// Operation names for error suggestions.
    pub fn candidates(&self) -> Vec<&str> {
        self.names.iter().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_matches_known_release() {
        let table = OperationTable::default();
        assert_eq!(table.len(), 186);
        assert_eq!(table.name(0), Some("default"));
        assert_eq!(table.index_of("file-read-data"), Some(21));
        assert_eq!(table.name(185), Some("storage-class-map"));
    }

    #[test]
    fn resolve_accepts_wildcard_shorthand() {
        let table = OperationTable::default();
        assert_eq!(table.resolve("process-exec"), table.index_of("process-exec*"));
        assert_eq!(table.resolve("file-read-data"), Some(21));
        assert_eq!(table.resolve("file-reed-data"), None);
    }

    #[test]
    fn wildcard_coverage() {
        let table = OperationTable::default();
        let idx = |n: &str| table.index_of(n).unwrap();

        assert!(table.covers(idx("default"), idx("mach-lookup")));
        assert!(table.covers(idx("file*"), idx("file-read-data")));
        assert!(table.covers(idx("file-read*"), idx("file-read-xattr")));
        assert!(table.covers(idx("file-read*"), idx("file-read*")));
        assert!(!table.covers(idx("file-read*"), idx("file-write-data")));
        assert!(!table.covers(idx("file-read-data"), idx("file-read*")));
        // `syscall*` must not leak into `sysctl-read`.
        assert!(!table.covers(idx("syscall*"), idx("sysctl-read")));
        assert!(table.covers(idx("ipc-posix-shm*"), idx("ipc-posix-shm-write-data")));
    }

    #[test]
    fn parse_table_file() {
        let table = OperationTable::parse(
            "; custom release\n\"default\",\nfile*\n\nfile-read-data ; reads\n",
        )
        .unwrap();
        assert_eq!(table.names(), &["default", "file*", "file-read-data"]);
    }

    #[test]
    fn parse_rejects_bad_tables() {
        assert!(matches!(OperationTable::parse(""), Err(TableError::Empty)));
        assert!(matches!(
            OperationTable::parse("file*\ndefault"),
            Err(TableError::MissingDefault(_))
        ));
        assert!(matches!(
            OperationTable::parse("default\nfile*\nfile*"),
            Err(TableError::Duplicate { line: 3, .. })
        ));
    }

    #[test]
    fn load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ops.txt");
        std::fs::write(&path, "default\nsignal\n").unwrap();
        let table = OperationTable::load(&path).unwrap();
        assert_eq!(table.len(), 2);

        let missing = OperationTable::load(&dir.path().join("nope.txt")).unwrap_err();
        assert!(missing.to_string().contains("nope.txt"));
    }
}
