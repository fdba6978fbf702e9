//! Operation node entries: the 8-byte cells of the decision graph.

use serde::Serialize;

use super::NODE_LEN;
use super::reader::le_u16;
use crate::sbpl::{Action, Modifiers};

/// The node tests a filter and continues to `on_match` or `on_unmatch`.
pub const OPCODE_FILTER: u8 = 0x00;
/// The node ends evaluation with a decision.
pub const OPCODE_TERMINAL: u8 = 0x01;

/// A raw node entry.
///
/// For filter nodes `argument` is a data-area offset, a regex table index or
/// an entitlement table index depending on the filter, and `on_match` /
/// `on_unmatch` are node indices. For terminal nodes `argument` holds the
/// action code and `on_match` the modifier bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct NodeEntry {
    pub opcode: u8,
    pub filter: u8,
    pub argument: u16,
    pub on_match: u16,
    pub on_unmatch: u16,
}

impl NodeEntry {
    pub fn terminal(action: Action, modifiers: Modifiers) -> Self {
        Self {
            opcode: OPCODE_TERMINAL,
            filter: 0,
            argument: action.code(),
            on_match: modifiers.bits(),
            on_unmatch: 0,
        }
    }

    pub fn filter(filter: u8, argument: u16, on_match: u16, on_unmatch: u16) -> Self {
        Self {
            opcode: OPCODE_FILTER,
            filter,
            argument,
            on_match,
            on_unmatch,
        }
    }

    /// Decode one entry; `bytes` must be [`NODE_LEN`] long.
    pub fn decode(bytes: &[u8]) -> Self {
        debug_assert_eq!(bytes.len(), NODE_LEN);
        Self {
            opcode: bytes[0],
            filter: bytes[1],
            argument: le_u16(bytes, 2),
            on_match: le_u16(bytes, 4),
            on_unmatch: le_u16(bytes, 6),
        }
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.opcode);
        out.push(self.filter);
        out.extend_from_slice(&self.argument.to_le_bytes());
        out.extend_from_slice(&self.on_match.to_le_bytes());
        out.extend_from_slice(&self.on_unmatch.to_le_bytes());
    }

    pub fn is_terminal(&self) -> bool {
        self.opcode == OPCODE_TERMINAL
    }

    /// The decision of a terminal node.
    pub fn decision(&self) -> Option<(Action, Modifiers)> {
        if !self.is_terminal() {
            return None;
        }
        let action = Action::from_code(self.argument)?;
        Some((action, Modifiers::from_bits_truncate(self.on_match)))
    }
}

impl std::fmt::Display for NodeEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.decision() {
            Some((action, modifiers)) if modifiers.is_empty() => write!(f, "{action}"),
            Some((action, modifiers)) => write!(f, "{action} (with {modifiers})"),
            None => {
                let name = crate::filters::by_id(self.filter)
                    .map(|def| def.name.to_string())
                    .unwrap_or_else(|| format!("filter#{:02x}", self.filter));
                write!(
                    f,
                    "{name} arg={:#06x} match->{} unmatch->{}",
                    self.argument, self.on_match, self.on_unmatch
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_eight_bytes() {
        let mut out = Vec::new();
        NodeEntry::filter(0x02, 0x0004, 1, 2).encode(&mut out);
        assert_eq!(out, vec![0x00, 0x02, 0x04, 0x00, 0x01, 0x00, 0x02, 0x00]);
        assert_eq!(NodeEntry::decode(&out), NodeEntry::filter(0x02, 4, 1, 2));
    }

    #[test]
    fn terminal_decisions() {
        let node = NodeEntry::terminal(Action::Deny, Modifiers::REPORT);
        assert_eq!(node.decision(), Some((Action::Deny, Modifiers::REPORT)));
        assert_eq!(node.to_string(), "deny (with report)");
        assert_eq!(NodeEntry::terminal(Action::Allow, Modifiers::empty()).to_string(), "allow");
        assert_eq!(NodeEntry::filter(0x02, 0, 1, 2).decision(), None);
    }

    #[test]
    fn filter_display_names_known_filters() {
        assert_eq!(
            NodeEntry::filter(0x02, 0x10, 3, 4).to_string(),
            "subpath arg=0x0010 match->3 unmatch->4"
        );
        assert!(NodeEntry::filter(0xee, 0, 0, 0).to_string().starts_with("filter#ee"));
    }
}
