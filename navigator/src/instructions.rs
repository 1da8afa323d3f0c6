//! Maneuver text normalization — what actually gets spoken.
//!
//! Raw provider instructions are never spoken verbatim. Slight/bear/keep
//! modifiers collapse to a generic "Continuez sur <rue>" because a spoken
//! "bear right" on a straight country road trains drivers to ignore the
//! voice. The exception is ramp-like maneuvers: missing a highway exit is
//! costly, so those keep their directional detail.
//!
//! Ramp detection is a keyword substring match over type + instruction +
//! street, mixed French/English, and stays a configurable set. A street
//! literally named "Rampe ..." will classify as ramp-like; that boundary is
//! inherited behavior, not something to silently tighten.

use nav_types::Maneuver;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Direction {
    Left,
    Right,
}

fn direction_of(modifier: &str) -> Option<Direction> {
    if modifier.contains("left") || modifier.contains("gauche") {
        Some(Direction::Left)
    } else if modifier.contains("right") || modifier.contains("droite") {
        Some(Direction::Right)
    } else {
        None
    }
}

fn direction_fr(d: Direction) -> &'static str {
    match d {
        Direction::Left => "à gauche",
        Direction::Right => "à droite",
    }
}

/// True when any ramp keyword appears in the maneuver's type, raw
/// instruction, or street name (case-insensitive).
pub fn is_ramp_like(m: &Maneuver, keywords: &[String]) -> bool {
    let haystack = format!(
        "{} {} {}",
        m.maneuver_type.to_lowercase(),
        m.instruction.to_lowercase(),
        m.street_name.to_lowercase()
    );
    keywords.iter().any(|k| haystack.contains(&k.to_lowercase()))
}

/// Rewrite a raw maneuver into the spoken French announcement.
pub fn normalize_instruction(m: &Maneuver, ramp_keywords: &[String]) -> String {
    let modifier = m.modifier.to_lowercase();
    let dir = direction_of(&modifier);
    let is_slight = modifier.contains("slight")
        || modifier.contains("bear")
        || modifier.contains("keep");
    let is_uturn = modifier.contains("uturn") || modifier.contains("u-turn");

    let phrase = if is_uturn {
        "Faites demi-tour".to_string()
    } else if is_slight {
        match (is_ramp_like(m, ramp_keywords), dir) {
            (true, Some(d)) => format!("Tournez légèrement {}", direction_fr(d)),
            _ => "Continuez".to_string(),
        }
    } else if let Some(d) = dir {
        format!("Tournez {}", direction_fr(d))
    } else {
        "Continuez".to_string()
    };

    // Append the street unless the raw instruction already names it.
    let street = m.street_name.trim();
    if !street.is_empty()
        && !m
            .instruction
            .to_lowercase()
            .contains(&street.to_lowercase())
    {
        format!("{phrase} sur {street}")
    } else {
        phrase
    }
}
