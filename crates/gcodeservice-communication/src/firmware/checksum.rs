//! Line numbering and checksums
//!
//! With checksums enabled every outgoing line is sent as
//! `N<seq> <payload>*<xor>`, where `<xor>` is the XOR of every byte of
//! `N<seq> <payload>`. The firmware rejects a line whose number is not the
//! one it expects next and answers with `Resend:<n>`.

/// Compute the XOR checksum of a line
pub fn checksum(line: &str) -> u8 {
    line.bytes().fold(0u8, |acc, b| acc ^ b)
}

/// Number and checksum a payload
pub fn frame_line(seq: u64, payload: &str) -> String {
    let numbered = format!("N{} {}", seq, payload);
    let sum = checksum(&numbered);
    format!("{}*{}", numbered, sum)
}

/// Split a framed line back into `(seq, payload)` if its checksum is valid
pub fn verify_line(line: &str) -> Option<(u64, &str)> {
    let (numbered, sum) = line.rsplit_once('*')?;
    let sum: u8 = sum.trim().parse().ok()?;
    if checksum(numbered) != sum {
        return None;
    }
    let rest = numbered.strip_prefix('N')?;
    let (seq, payload) = rest.split_once(' ')?;
    Some((seq.parse().ok()?, payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_checksum_known_value() {
        // N0 M110 N0
        let expected = b"N0 M110 N0".iter().fold(0u8, |a, b| a ^ b);
        assert_eq!(checksum("N0 M110 N0"), expected);
        assert_eq!(frame_line(0, "M110 N0"), format!("N0 M110 N0*{}", expected));
    }

    #[test]
    fn test_checksum_empty() {
        assert_eq!(checksum(""), 0);
    }

    #[test]
    fn test_verify_rejects_corruption() {
        let framed = frame_line(12, "G1 X10 Y20");
        let corrupted = framed.replace("X10", "X11");
        assert!(verify_line(&corrupted).is_none());
        assert!(verify_line("G1 X10").is_none());
    }

    proptest! {
        #[test]
        fn framed_lines_verify(seq in 0u64..10_000_000, payload in "[A-Z][0-9]{1,3}( [A-Z]-?[0-9]{1,4})*") {
            let framed = frame_line(seq, &payload);
            prop_assert_eq!(verify_line(&framed), Some((seq, payload.as_str())));
        }

        #[test]
        fn checksum_is_self_inverse(a in "[ -~]{0,40}") {
            let doubled = format!("{}{}", a, a);
            prop_assert_eq!(checksum(&doubled), 0);
        }
    }
}
