//! CSS color parsing for the subtitle style props
//!
//! Style setters accept CSS-ish color strings and store them normalized to
//! `rgb(...)`/`rgba(...)` form. Parsing returns a typed result; callers keep
//! the previous value on failure.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unparsable color: {input:?}")]
pub struct ColorParseError {
    pub input: String,
}

/// An sRGB color with alpha
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: f32,
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    pub const fn rgba(r: u8, g: u8, b: u8, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Parse a hex (`#rgb`, `#rrggbb`, `#rrggbbaa`), functional
    /// (`rgb(...)`, `rgba(...)`) or named color
    pub fn parse(input: &str) -> Result<Self, ColorParseError> {
        let trimmed = input.trim();
        let error = || ColorParseError {
            input: input.to_string(),
        };

        if let Some(hex) = trimmed.strip_prefix('#') {
            return Self::parse_hex(hex).ok_or_else(error);
        }

        let lowered = trimmed.to_ascii_lowercase();
        if let Some(inner) = lowered
            .strip_prefix("rgba(")
            .or_else(|| lowered.strip_prefix("rgb("))
            .and_then(|rest| rest.strip_suffix(')'))
        {
            return Self::parse_components(inner).ok_or_else(error);
        }

        Self::named(&lowered).ok_or_else(error)
    }

    fn parse_hex(hex: &str) -> Option<Self> {
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }

        let nibble = |i: usize| u8::from_str_radix(&hex[i..i + 1], 16).ok();
        let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();

        match hex.len() {
            3 => Some(Self::rgb(
                nibble(0)? * 17,
                nibble(1)? * 17,
                nibble(2)? * 17,
            )),
            6 => Some(Self::rgb(byte(0)?, byte(2)?, byte(4)?)),
            8 => Some(Self::rgba(
                byte(0)?,
                byte(2)?,
                byte(4)?,
                byte(6)? as f32 / 255.0,
            )),
            _ => None,
        }
    }

    fn parse_components(inner: &str) -> Option<Self> {
        let parts: Vec<&str> = inner.split(',').map(str::trim).collect();
        match parts.as_slice() {
            [r, g, b] => Some(Self::rgb(r.parse().ok()?, g.parse().ok()?, b.parse().ok()?)),
            [r, g, b, a] => {
                let alpha: f32 = a.parse().ok()?;
                if !alpha.is_finite() {
                    return None;
                }
                Some(Self::rgba(
                    r.parse().ok()?,
                    g.parse().ok()?,
                    b.parse().ok()?,
                    alpha.clamp(0.0, 1.0),
                ))
            }
            _ => None,
        }
    }

    fn named(name: &str) -> Option<Self> {
        Some(match name {
            "white" => Self::rgb(255, 255, 255),
            "black" => Self::rgb(0, 0, 0),
            "red" => Self::rgb(255, 0, 0),
            "green" => Self::rgb(0, 128, 0),
            "blue" => Self::rgb(0, 0, 255),
            "yellow" => Self::rgb(255, 255, 0),
            "cyan" => Self::rgb(0, 255, 255),
            "magenta" => Self::rgb(255, 0, 255),
            "gray" | "grey" => Self::rgb(128, 128, 128),
            "transparent" => Self::rgba(0, 0, 0, 0.0),
            _ => return None,
        })
    }

    /// Normalized CSS string form
    pub fn to_css(&self) -> String {
        if (self.a - 1.0).abs() < f32::EPSILON {
            format!("rgb({}, {}, {})", self.r, self.g, self.b)
        } else {
            format!("rgba({}, {}, {}, {})", self.r, self.g, self.b, self.a)
        }
    }
}
