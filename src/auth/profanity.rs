//! Disallowed username detection.
//!
//! Names are split into segments on `_` and `-`, leetspeak digits and symbols
//! are folded back to letters, and each segment is matched whole against the
//! word list. Whole-segment matching keeps names like `classic_gamer` legal.

// WARNING: contains offensive words.
const BLOCKED_WORDS: &[&str] = &[
    "anal", "anus", "arse", "ass", "asshole", "bastard", "bitch", "bollocks", "boner", "boob",
    "boobs", "butt", "clit", "cock", "crap", "cum", "cunt", "dick", "dildo", "dyke", "fag",
    "faggot", "fuck", "fucker", "fucking", "jizz", "kike", "milf", "motherfucker", "nazi",
    "nigga", "nigger", "penis", "piss", "porn", "pussy", "rape", "retard", "scrotum", "sex",
    "shit", "slut", "spic", "tits", "twat", "vagina", "wank", "whore",
];

fn fold_leetspeak(c: char) -> char {
    match c {
        '0' => 'o',
        '1' | '!' => 'i',
        '3' => 'e',
        '4' | '@' => 'a',
        '5' | '$' => 's',
        '7' => 't',
        '8' => 'b',
        other => other.to_ascii_lowercase(),
    }
}

fn segments(name: &str) -> impl Iterator<Item = String> + '_ {
    name.split(['_', '-'])
        .filter(|segment| !segment.is_empty())
        .map(|segment| segment.chars().map(fold_leetspeak).collect())
}

fn is_blocked(segment: &str) -> bool {
    BLOCKED_WORDS.contains(&segment)
}

/// True if any segment of `name` is a blocked word.
#[must_use]
pub fn is_profane(name: &str) -> bool {
    segments(name).any(|segment| is_blocked(&segment))
}

/// Share of segments that are blocked words, in `[0, 1]`.
#[must_use]
pub fn profanity_score(name: &str) -> f64 {
    let (total, blocked) = segments(name).fold((0u32, 0u32), |(total, blocked), segment| {
        (total + 1, blocked + u32::from(is_blocked(&segment)))
    });
    if total == 0 {
        return 0.0;
    }
    f64::from(blocked) / f64::from(total)
}
