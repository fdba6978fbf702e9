//! Hex dump rendering.

use std::fmt::Write;

/// Render `bytes` as lines of `width` bytes: offset, hex columns, ASCII.
///
/// ```text
/// 00000000  00 00 01 00 ba 00 00 00  00 00 00 00 00 00 00 00  |................|
/// ```
pub fn dump(bytes: &[u8], width: usize) -> String {
    let width = width.max(1);
    let mut out = String::new();
    for (row, chunk) in bytes.chunks(width).enumerate() {
        let _ = write!(out, "{:08x} ", row * width);
        for i in 0..width {
            if i % 8 == 0 {
                out.push(' ');
            }
            match chunk.get(i) {
                Some(b) => {
                    let _ = write!(out, "{b:02x} ");
                }
                None => out.push_str("   "),
            }
        }
        out.push_str(" |");
        out.extend(chunk.iter().map(|b| printable(*b)));
        out.push_str("|\n");
    }
    out
}

fn printable(b: u8) -> char {
    if b.is_ascii_graphic() || b == b' ' {
        b as char
    } else {
        '.'
    }
}
