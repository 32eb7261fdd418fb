//! Break point detection for chunking

/// Priority levels for break points
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BreakPriority {
    /// Word boundary (lowest)
    Word = 1,
    /// Sentence boundary
    Sentence = 2,
    /// Line boundary
    Line = 3,
    /// Paragraph boundary (highest)
    Paragraph = 4,
}

/// A potential break point in text
#[derive(Debug, Clone)]
pub struct BreakPoint {
    /// Character position (a chunk may end here)
    pub position: usize,
    /// Priority of this break point
    pub priority: BreakPriority,
}

impl BreakPoint {
    pub fn new(position: usize, priority: BreakPriority) -> Self {
        Self { position, priority }
    }
}

/// Find break points in `chars`, sorted by position, one per position.
///
/// Positions are character indices just past the separator, so a chunk
/// `chars[start..position]` keeps its trailing separator.
pub fn find_break_points(chars: &[char]) -> Vec<BreakPoint> {
    let mut points: Vec<BreakPoint> = Vec::new();

    for (i, &c) in chars.iter().enumerate() {
        let next = chars.get(i + 1).copied();
        let priority = match c {
            '\n' if next == Some('\n') => Some(BreakPriority::Paragraph),
            '\n' => Some(BreakPriority::Line),
            '.' | '?' | '!' if next.map_or(false, char::is_whitespace) => {
                Some(BreakPriority::Sentence)
            }
            c if c.is_whitespace() => Some(BreakPriority::Word),
            _ => None,
        };

        if let Some(priority) = priority {
            let position = match priority {
                BreakPriority::Paragraph => i + 2,
                BreakPriority::Sentence => i + 2,
                _ => i + 1,
            };
            if position <= chars.len() {
                points.push(BreakPoint::new(position, priority));
            }
        }
    }

    // Keep the strongest break at each position
    points.sort_by(|a, b| a.position.cmp(&b.position).then(b.priority.cmp(&a.priority)));
    points.dedup_by_key(|p| p.position);
    points
}

/// Pick the end of a chunk starting at `start` that must not pass `limit`.
///
/// Prefers the highest-priority break in the back half of the window and the
/// latest one among equals; falls back to a hard cut at `limit`.
pub fn find_best_break(points: &[BreakPoint], start: usize, limit: usize) -> usize {
    let min_end = start + (limit - start) / 2;

    let best = points
        .iter()
        .filter(|p| p.position > min_end && p.position <= limit)
        .max_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.position.cmp(&b.position))
        });

    best.map(|p| p.position).unwrap_or(limit)
}
