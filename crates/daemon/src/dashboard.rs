//! Terminal dashboard
//!
//! Formats an [`AggregateView`] into plain lines and repaints the terminal
//! with them. Formatting is pure so it can be tested without a terminal.

use std::io::{self, Write};

use crossterm::{cursor, execute, terminal};

use crate::snapshot::{AggregateView, DhtSearchView, PeerView, SessionView};

/// Longest dot trail drawn for a DHT search, in seconds.
const MAX_DHT_DOTS_SECS: u64 = 40;

/// Providers listed after a finished search.
const MAX_LISTED_PROVIDERS: usize = 5;

/// Rows kept free below the output.
const RESERVED_ROWS: usize = 4;

/// Fewest lines shown no matter how small the terminal is.
const MIN_VISIBLE_LINES: usize = 10;

/// Rows assumed when the terminal size cannot be read.
const FALLBACK_ROWS: u16 = 24;

/// Render the view into lines that fit in `rows` terminal rows.
pub fn render_lines(view: &AggregateView, rows: u16) -> Vec<String> {
    let mut lines = vec![format!("ID: {}", view.node_id)];
    for session in &view.sessions {
        session_lines(session, view.wantlist_size, &mut lines);
    }

    let budget = (rows as usize)
        .saturating_sub(RESERVED_ROWS + view.recent_errors.len())
        .max(MIN_VISIBLE_LINES);
    lines.truncate(budget);

    if !view.recent_errors.is_empty() {
        lines.push(String::new());
        lines.extend(view.recent_errors.iter().cloned());
    }
    if lines.is_empty() {
        lines.push("Waiting...".to_string());
    }
    lines
}

fn session_lines(session: &SessionView, wantlist_size: u64, lines: &mut Vec<String>) {
    lines.push(format!(
        "Session: {} {} Blocks: {} of {} {}{}",
        session.id,
        session.uuid,
        session.received,
        session.wanted,
        session.first_key.as_deref().unwrap_or("-"),
        if session.is_completed() { " -DONE-" } else { "" },
    ));
    lines.push(format!(
        "  Advertised wantlist {} times to {} unique incoming peers (current size {})",
        session.advertised_count, session.advertised_peers, wantlist_size
    ));
    for search in &session.dht_searches {
        lines.push(dht_line(search));
    }
    for peer in &session.peers {
        lines.push(format!(
            "    {} {}{}",
            peer.peer_id,
            if peer.dht { "DHT " } else { "--- " },
            peer_state(peer)
        ));
    }
}

fn dht_line(search: &DhtSearchView) -> String {
    let dots = (search.elapsed_ms / 1000).min(MAX_DHT_DOTS_SECS) as usize;
    let mut report = String::new();
    if search.settled {
        report = format!("{:.1}s", search.elapsed_ms as f64 / 1000.0);
        if !search.providers.is_empty() {
            let mut suffixes: Vec<&str> = search.providers.iter().map(|p| tail(p, 3)).collect();
            suffixes.sort_unstable();
            suffixes.truncate(MAX_LISTED_PROVIDERS);
            let mut found = suffixes.join(" ");
            if suffixes.len() < search.providers.len() {
                found.push_str("...");
            }
            report.push_str(&format!(" Found {} - {}", search.providers.len(), found));
        }
    }
    format!("  DHT: {} {} {}", search.key, ".".repeat(dots), report)
}

fn peer_state(peer: &PeerView) -> String {
    if peer.received == 0 && peer.dht_error {
        return "Connection error".to_string();
    }
    let mut state = format!("Blocks: {}", peer.received);
    if peer.duplicates > 0 {
        state.push_str(&format!(" + {} dup", peer.duplicates));
    }
    if let (Some(rate_in), Some(rate_out)) = (peer.rate_in, peer.rate_out) {
        state.push_str(&format!(
            ", In: {}ps / Out: {}ps",
            format_bytes(rate_in),
            format_bytes(rate_out)
        ));
    }
    state
}

/// Last `n` characters of `s`.
fn tail(s: &str, n: usize) -> &str {
    match s.char_indices().rev().nth(n.saturating_sub(1)) {
        Some((idx, _)) if n > 0 => &s[idx..],
        _ if n == 0 => "",
        _ => s,
    }
}

/// Format a byte count with decimal units (`kB` = 1000 bytes), three significant digits.
pub fn format_bytes(bytes: f64) -> String {
    const UNITS: [&str; 5] = ["kB", "MB", "GB", "TB", "PB"];
    // Anything that would round to 1000 moves up a unit.
    const ROLLOVER: f64 = 999.5;
    if !bytes.is_finite() || bytes < ROLLOVER {
        return format!("{} B", bytes.max(0.0).round() as u64);
    }
    let mut value = bytes;
    let mut unit = "B";
    for next in UNITS {
        if value < ROLLOVER {
            break;
        }
        value /= 1000.0;
        unit = next;
    }
    let digits = if value >= 100.0 {
        0
    } else if value >= 10.0 {
        1
    } else {
        2
    };
    let mut number = format!("{:.*}", digits, value);
    if number.contains('.') {
        number = number.trim_end_matches('0').trim_end_matches('.').to_string();
    }
    format!("{} {}", number, unit)
}

/// Current terminal height, or a fallback when not attached to a terminal.
pub fn terminal_rows() -> u16 {
    terminal::size().map(|(_, rows)| rows).unwrap_or(FALLBACK_ROWS)
}

/// Clear the screen and print `lines` from the top-left corner.
pub fn paint(lines: &[String]) -> io::Result<()> {
    let mut out = io::stdout().lock();
    execute!(
        out,
        terminal::Clear(terminal::ClearType::All),
        cursor::MoveTo(0, 0)
    )?;
    for line in lines {
        writeln!(out, "{}", line)?;
    }
    out.flush()
}
