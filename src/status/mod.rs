use std::sync::OnceLock;
use std::time::Duration;

use regex_lite::Regex;

use crate::console::ConsoleSession;
use crate::models::Verdict;

/// Echo-reply lines: "64 bytes from ...", "84 bytes from ..."
fn reply_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)\b\d+ bytes\b").ok()).as_ref()
}

/// Classify a probe transcript. Heuristic only: `Unreachable` and
/// `Indeterminate` both mean "check by hand", never a hard failure.
pub fn classify(transcript: Option<&str>) -> Verdict {
    let text = match transcript.map(str::trim) {
        Some(t) if !t.is_empty() => t,
        _ => return Verdict::Indeterminate,
    };
    let lower = text.to_lowercase();
    // IOS prints "Success rate is 0 percent" when every echo timed out
    if lower.contains("success rate is 0 percent") {
        return Verdict::Unreachable;
    }
    let echoed = reply_pattern().map_or(lower.contains("64 bytes"), |re| re.is_match(text));
    if lower.contains("success") || echoed {
        Verdict::Reachable
    } else {
        Verdict::Unreachable
    }
}

/// Ping `destination` from the host behind `session`, wait `window` for the
/// replies, then classify what came back. Console errors give `Indeterminate`.
pub async fn probe(
    session: &mut ConsoleSession,
    destination: &str,
    window: Duration,
    quiet: Duration,
) -> (Verdict, Option<String>) {
    if let Err(e) = session.read_available(quiet).await {
        tracing::debug!("Probe console {} unusable: {}", session.endpoint(), e);
        return (Verdict::Indeterminate, None);
    }
    if let Err(e) = session.send_line(&format!("ping {}", destination), window).await {
        tracing::debug!("Probe to {} not sent: {}", destination, e);
        return (Verdict::Indeterminate, None);
    }
    match session.read_available(quiet).await {
        Ok(output) => {
            let verdict = classify(Some(&output));
            (verdict, Some(output))
        }
        Err(e) => {
            tracing::debug!("Probe output for {} lost: {}", destination, e);
            (Verdict::Indeterminate, None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::mock::MockConsoles;
    use crate::models::ConsoleEndpoint;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn test_classify_success_markers() {
        assert_eq!(classify(Some("64 bytes from 10.0.0.65: icmp_seq=1")), Verdict::Reachable);
        assert_eq!(
            classify(Some("84 bytes from 10.0.0.1 icmp_seq=1 ttl=63 time=2.1 ms")),
            Verdict::Reachable
        );
        assert_eq!(classify(Some("Success rate is 100 percent (5/5)")), Verdict::Reachable);
        assert_eq!(classify(Some("SUCCESS")), Verdict::Reachable);
    }

    #[test]
    fn test_classify_failures() {
        assert_eq!(classify(Some("host (10.0.0.65) not reachable")), Verdict::Unreachable);
        assert_eq!(classify(Some("Success rate is 0 percent (0/5)")), Verdict::Unreachable);
        assert_eq!(classify(Some("PING 10.0.0.1 (10.0.0.1) 56(84) bytes of data.")), Verdict::Unreachable);
        assert_eq!(classify(Some("10.0.0.65 icmp_seq=1 timeout")), Verdict::Unreachable);
    }

    #[test]
    fn test_classify_no_output() {
        assert_eq!(classify(None), Verdict::Indeterminate);
        assert_eq!(classify(Some("")), Verdict::Indeterminate);
        assert_eq!(classify(Some("  \n ")), Verdict::Indeterminate);
    }

    async fn session(consoles: &MockConsoles, port: u16) -> ConsoleSession {
        let mut session = ConsoleSession::new(ConsoleEndpoint::new("127.0.0.1", port), &CancellationToken::new());
        tokio_test::assert_ok!(session.open(consoles, Duration::from_secs(1)).await);
        session
    }

    #[tokio::test]
    async fn test_probe_verdicts() {
        let consoles = MockConsoles::new();
        consoles.device(5020, "PC1> ");
        consoles.reachable(5020, "10.0.0.62");

        let mut s = session(&consoles, 5020).await;
        let (verdict, transcript) = probe(&mut s, "10.0.0.62", Duration::from_millis(20), Duration::from_millis(50)).await;
        assert_eq!(verdict, Verdict::Reachable);
        assert!(transcript.unwrap().contains("84 bytes from 10.0.0.62"));

        let (verdict, _) = probe(&mut s, "10.0.0.65", Duration::from_millis(20), Duration::from_millis(50)).await;
        assert_eq!(verdict, Verdict::Unreachable);
        assert_eq!(consoles.lines(5020), ["ping 10.0.0.62", "ping 10.0.0.65"]);
    }

    #[tokio::test]
    async fn test_probe_on_dead_console() {
        let consoles = MockConsoles::new();
        consoles.device(5021, "PC2> ");
        let mut s = session(&consoles, 5021).await;
        s.close().await;
        let (verdict, transcript) = probe(&mut s, "10.0.0.1", Duration::ZERO, Duration::from_millis(10)).await;
        assert_eq!(verdict, Verdict::Indeterminate);
        assert!(transcript.is_none());
    }
}
