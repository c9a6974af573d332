/// Telnet "interpret as command" escape byte
const IAC: u8 = 255;
const SB: u8 = 250;
const SE: u8 = 240;
const WILL: u8 = 251;
const DONT: u8 = 254;

/// Validate a node name.
/// Allows alphanumeric, hyphens, dots, and underscores. Names end up inside
/// device CLI commands, so no whitespace or shell metacharacters.
pub fn is_valid_hostname(hostname: &str) -> bool {
    if hostname.is_empty() || hostname.len() > 63 {
        return false;
    }
    hostname.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_')
}

/// Truncate output to a maximum number of lines
pub fn truncate_lines(s: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = s.lines().collect();
    if lines.len() <= max_lines {
        s.to_string()
    } else {
        let truncated: Vec<&str> = lines[..max_lines].to_vec();
        format!("{}\n... ({} more lines)", truncated.join("\n"), lines.len() - max_lines)
    }
}

/// Remove telnet option negotiation from raw console bytes.
/// Handles IAC IAC (literal 0xff), 3-byte option commands and SB..SE blocks.
/// A sequence cut off at the end of the chunk is dropped.
pub fn strip_telnet_negotiation(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] != IAC {
            out.push(raw[i]);
            i += 1;
            continue;
        }
        match raw.get(i + 1) {
            Some(&IAC) => {
                out.push(IAC);
                i += 2;
            }
            Some(&SB) => {
                // skip to IAC SE
                let mut j = i + 2;
                while j + 1 < raw.len() && !(raw[j] == IAC && raw[j + 1] == SE) {
                    j += 1;
                }
                i = j + 2;
            }
            Some(cmd) if (WILL..=DONT).contains(cmd) => i += 3,
            Some(_) => i += 2,
            None => i += 1,
        }
    }
    out
}

/// Decode console bytes for transcripts: telnet negotiation removed, lossy UTF-8,
/// carriage returns dropped.
pub fn console_text(raw: &[u8]) -> String {
    String::from_utf8_lossy(&strip_telnet_negotiation(raw)).replace('\r', "")
}
