//! Filter catalogue: every predicate the compiler accepts, its numeric id in
//! node entries, and the kind of argument it takes.

use serde::Serialize;

/// How a filter's argument is written and matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArgumentKind {
    /// A string path; `literal`, `subpath` and `prefix` differ only in matching.
    Path,
    /// A `#"..."` literal or a string holding a regular expression.
    Regex,
    /// A free-form name (service, sysctl, preference domain, class).
    Name,
    /// One of a fixed set of symbols.
    Keyword(&'static [&'static str]),
    /// `(remote ip "host:port")` / `(local ip "host:port")`.
    Address,
    /// An entitlement key string.
    Entitlement,
}

/// A filter known to the compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FilterDef {
    pub name: &'static str,
    /// Value of the `filter` byte in node entries. Never 0.
    pub id: u8,
    pub kind: ArgumentKind,
}

const VNODE_TYPES: &[&str] = &[
    "REGULAR-FILE",
    "DIRECTORY",
    "SYMLINK",
    "CHARACTER-DEVICE",
    "BLOCK-DEVICE",
    "SOCKET",
    "FIFO",
];

const SIGNAL_TARGETS: &[&str] = &["self", "same-sandbox", "children", "pgrp", "others"];

const SOCKET_DOMAINS: &[&str] = &["AF_UNIX", "AF_INET", "AF_INET6", "AF_SYSTEM", "AF_ROUTE"];

pub const FILTERS: &[FilterDef] = &[
    FilterDef {
        name: "literal",
        id: 0x01,
        kind: ArgumentKind::Path,
    },
    FilterDef {
        name: "subpath",
        id: 0x02,
        kind: ArgumentKind::Path,
    },
    FilterDef {
        name: "prefix",
        id: 0x03,
        kind: ArgumentKind::Path,
    },
    FilterDef {
        name: "regex",
        id: 0x04,
        kind: ArgumentKind::Regex,
    },
    FilterDef {
        name: "vnode-type",
        id: 0x05,
        kind: ArgumentKind::Keyword(VNODE_TYPES),
    },
    FilterDef {
        name: "global-name",
        id: 0x06,
        kind: ArgumentKind::Name,
    },
    FilterDef {
        name: "local-name",
        id: 0x07,
        kind: ArgumentKind::Name,
    },
    FilterDef {
        name: "xpc-service-name",
        id: 0x08,
        kind: ArgumentKind::Name,
    },
    FilterDef {
        name: "ipc-posix-name",
        id: 0x09,
        kind: ArgumentKind::Name,
    },
    FilterDef {
        name: "sysctl-name",
        id: 0x0a,
        kind: ArgumentKind::Name,
    },
    FilterDef {
        name: "iokit-user-client-class",
        id: 0x0b,
        kind: ArgumentKind::Name,
    },
    FilterDef {
        name: "preference-domain",
        id: 0x0c,
        kind: ArgumentKind::Name,
    },
    FilterDef {
        name: "appleevent-destination",
        id: 0x0d,
        kind: ArgumentKind::Name,
    },
    FilterDef {
        name: "right-name",
        id: 0x0e,
        kind: ArgumentKind::Name,
    },
    FilterDef {
        name: "target",
        id: 0x0f,
        kind: ArgumentKind::Keyword(SIGNAL_TARGETS),
    },
    FilterDef {
        name: "socket-domain",
        id: 0x10,
        kind: ArgumentKind::Keyword(SOCKET_DOMAINS),
    },
    FilterDef {
        name: "remote",
        id: 0x11,
        kind: ArgumentKind::Address,
    },
    FilterDef {
        name: "local",
        id: 0x12,
        kind: ArgumentKind::Address,
    },
    FilterDef {
        name: "entitlement-is-present",
        id: 0x13,
        kind: ArgumentKind::Entitlement,
    },
    FilterDef {
        name: "process-path",
        id: 0x14,
        kind: ArgumentKind::Path,
    },
];

/// Look up a filter by name.
pub fn by_name(name: &str) -> Option<&'static FilterDef> {
    FILTERS.iter().find(|f| f.name == name)
}

/// Look up a filter by its node-entry id.
pub fn by_id(id: u8) -> Option<&'static FilterDef> {
    FILTERS.iter().find(|f| f.id == id)
}

/// Filter names for error suggestions.
pub fn names() -> Vec<&'static str> {
    FILTERS.iter().map(|f| f.name).collect()
}
