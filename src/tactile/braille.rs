//! Six-dot braille cell encoding
//!
//! Dots are numbered 1-3 down the left column and 4-6 down the right;
//! channel `n` of a pattern drives dot `n + 1`.

/// Number of actuator channels in one cell
pub const CHANNELS: usize = 6;

/// Which actuator channels are raised for one symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct ActivationPattern([bool; CHANNELS]);

impl ActivationPattern {
    /// Build a pattern from a list of dot numbers (1-6)
    pub const fn from_dots(dots: &[u8]) -> Self {
        let mut cells = [false; CHANNELS];
        let mut i = 0;
        while i < dots.len() {
            let dot = dots[i] as usize;
            if dot >= 1 && dot <= CHANNELS {
                cells[dot - 1] = true;
            }
            i += 1;
        }
        ActivationPattern(cells)
    }

    /// State of one channel; channels past the cell width are never raised
    pub fn channel(&self, index: usize) -> bool {
        self.0.get(index).copied().unwrap_or(false)
    }

    /// Raised dot numbers in ascending order
    pub fn dots(&self) -> Vec<u8> {
        (0..CHANNELS)
            .filter(|&i| self.0[i])
            .map(|i| i as u8 + 1)
            .collect()
    }
}

/// Lower-case a symbol, keeping a single character
///
/// `İ` lowers to `i` plus a combining dot; only the base letter is kept.
pub fn fold(symbol: char) -> char {
    symbol.to_lowercase().next().unwrap_or(symbol)
}

/// Look up the pattern for a symbol (case-insensitive)
///
/// Whitespace and anything outside the table have no pattern.
pub fn lookup(symbol: char) -> Option<ActivationPattern> {
    let dots: &[u8] = match fold(symbol) {
        'a' | '1' => &[1],
        'b' | '2' => &[1, 2],
        'c' | '3' => &[1, 4],
        'd' | '4' => &[1, 4, 5],
        'e' | '5' => &[1, 5],
        'f' | '6' => &[1, 2, 4],
        'g' | '7' => &[1, 2, 4, 5],
        'h' | '8' => &[1, 2, 5],
        'i' | '9' => &[2, 4],
        'j' | '0' => &[2, 4, 5],
        'k' => &[1, 3],
        'l' => &[1, 2, 3],
        'm' => &[1, 3, 4],
        'n' => &[1, 3, 4, 5],
        'o' => &[1, 3, 5],
        'p' => &[1, 2, 3, 4],
        'q' => &[1, 2, 3, 4, 5],
        'r' => &[1, 2, 3, 5],
        's' => &[2, 3, 4],
        't' => &[2, 3, 4, 5],
        'u' => &[1, 3, 6],
        'v' => &[1, 2, 3, 6],
        'w' => &[2, 4, 5, 6],
        'x' => &[1, 3, 4, 6],
        'y' => &[1, 3, 4, 5, 6],
        'z' => &[1, 3, 5, 6],
        // Turkish letters
        'ç' => &[1, 6],
        'ğ' => &[1, 2, 6],
        'ı' => &[3, 5],
        'ö' => &[2, 4, 6],
        'ş' => &[1, 4, 6],
        'ü' => &[1, 2, 5, 6],
        '.' => &[2, 5, 6],
        ',' => &[2],
        ';' => &[2, 3],
        ':' => &[2, 5],
        '!' => &[2, 3, 5],
        '?' => &[2, 3, 6],
        '-' => &[3, 6],
        '\'' => &[3],
        _ => return None,
    };
    Some(ActivationPattern::from_dots(dots))
}
