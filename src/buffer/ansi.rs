//! ANSI escape sequence stripping

#[derive(Clone, Copy)]
enum State {
    Text,
    Escape,
    Csi,
    Osc,
    OscEscape,
    Charset,
}

/// Strip ANSI escape sequences (CSI, OSC, charset selection) from a byte slice.
///
/// Sequences split across two calls are not reassembled; PTY reads are large
/// enough that this only affects the rare chunk boundary.
pub fn strip_ansi(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut state = State::Text;

    for &byte in data {
        state = match (state, byte) {
            (State::Text, 0x1b) => State::Escape,
            (State::Text, b) => {
                out.push(b);
                State::Text
            }
            (State::Escape, b'[') => State::Csi,
            (State::Escape, b']') => State::Osc,
            (State::Escape, b'(' | b')') => State::Charset,
            (State::Escape, _) => State::Text,
            (State::Csi, b) if b.is_ascii_alphabetic() || b == b'~' => State::Text,
            (State::Csi, _) => State::Csi,
            (State::Osc, 0x07) => State::Text,
            (State::Osc, 0x1b) => State::OscEscape,
            (State::Osc, _) => State::Osc,
            (State::OscEscape, b'\\') => State::Text,
            (State::OscEscape, _) => State::Osc,
            (State::Charset, _) => State::Text,
        };
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_csi() {
        assert_eq!(
            strip_ansi(b"Hello \x1b[31mred\x1b[0m world"),
            b"Hello red world"
        );
    }

    #[test]
    fn test_strip_osc_bel_and_st() {
        assert_eq!(strip_ansi(b"\x1b]0;title\x07prompt$ "), b"prompt$ ");
        assert_eq!(strip_ansi(b"\x1b]0;title\x1b\\prompt$ "), b"prompt$ ");
    }

    #[test]
    fn test_strip_charset() {
        assert_eq!(strip_ansi(b"\x1b(Bplain"), b"plain");
    }

    #[test]
    fn test_plain_text_untouched() {
        assert_eq!(strip_ansi(b"Password: "), b"Password: ");
    }
}
