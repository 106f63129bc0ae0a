//! Text Command Surface
//!
//! Parses chat-style commands and renders their replies:
//!
//! - `/cvd <ticker> <minutes>`: summed CVD for one symbol
//! - `/topcvd [minutes]`: symbols ranked by absolute CVD

use rust_decimal::{Decimal, RoundingStrategy};

use super::query::{QueryError, QueryService, SymbolSum, TopCvd};

/// Usage hint for `/cvd`.
pub const CVD_USAGE: &str = "Usage: /cvd <ticker> <minutes>\nExample: /cvd btc 60";

/// Defaults applied when a command omits an argument.
#[derive(Debug, Clone, Copy)]
pub struct CommandDefaults {
    /// Look-back for `/topcvd` without an argument.
    pub top_minutes: u32,
    /// Number of symbols listed by `/topcvd`.
    pub top_limit: usize,
}

impl Default for CommandDefaults {
    fn default() -> Self {
        Self {
            top_minutes: 10,
            top_limit: 20,
        }
    }
}

/// A parsed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `/cvd <ticker> <minutes>`.
    SymbolCvd {
        /// Ticker as typed (normalized later).
        ticker: String,
        /// Look-back in minutes.
        minutes: u32,
    },
    /// `/topcvd [minutes]`.
    TopCvd {
        /// Look-back in minutes.
        minutes: u32,
    },
    /// `/cvd` with missing or malformed arguments.
    Usage(&'static str),
    /// Anything else.
    Unknown,
}

impl Command {
    /// Parse a command line.
    ///
    /// A `@botname` suffix on the command word is ignored. A missing or
    /// invalid minute count for `/topcvd` falls back to the default.
    #[must_use]
    pub fn parse(input: &str, defaults: CommandDefaults) -> Self {
        let mut parts = input.split_whitespace();
        let Some(head) = parts.next() else {
            return Self::Unknown;
        };
        let Some(name) = head.strip_prefix('/') else {
            return Self::Unknown;
        };
        let name = name.split('@').next().unwrap_or_default();
        let args: Vec<&str> = parts.collect();

        match name {
            "topcvd" => {
                let minutes = args
                    .first()
                    .and_then(|a| a.parse::<u32>().ok())
                    .filter(|m| *m > 0)
                    .unwrap_or(defaults.top_minutes);
                Self::TopCvd { minutes }
            }
            "cvd" => match args.as_slice() {
                [ticker, minutes] => match minutes.parse::<u32>() {
                    Ok(m) if m > 0 => Self::SymbolCvd {
                        ticker: (*ticker).to_string(),
                        minutes: m,
                    },
                    _ => Self::Usage("Invalid period. Give a positive number of minutes."),
                },
                _ => Self::Usage(CVD_USAGE),
            },
            _ => Self::Unknown,
        }
    }

    /// Run the command against the query service and render the reply.
    pub async fn execute(
        &self,
        queries: &QueryService,
        defaults: CommandDefaults,
        now_ms: i64,
    ) -> String {
        match self {
            Self::SymbolCvd { ticker, minutes } => {
                match queries.symbol_sum(ticker, *minutes, now_ms).await {
                    Ok(sum) => render_symbol_reply(&sum),
                    Err(QueryError::NoData) => format!(
                        "No CVD data for {} in the last {minutes} minutes",
                        queries.normalize_symbol(ticker)
                    ),
                    Err(e) => format!("Failed to fetch data: {e}"),
                }
            }
            Self::TopCvd { minutes } => {
                match queries.top(*minutes, defaults.top_limit, now_ms).await {
                    Ok(top) => render_top_reply(&top),
                    Err(QueryError::NoData) => "No CVD data stored yet".to_string(),
                    Err(e) => format!("Failed to fetch data: {e}"),
                }
            }
            Self::Usage(text) => (*text).to_string(),
            Self::Unknown => "Unknown command".to_string(),
        }
    }
}

/// Reply line for a single symbol.
#[must_use]
pub fn render_symbol_reply(sum: &SymbolSum) -> String {
    format!(
        "CVD over the last {} minutes for {}: {} $",
        sum.minutes,
        sum.symbol,
        format_signed(sum.value)
    )
}

/// Multi-line reply for a ranked list.
#[must_use]
pub fn render_top_reply(top: &TopCvd) -> String {
    let mut out = format!("📊 Top CVD over the last {} minutes:\n\n", top.minutes);
    for entry in &top.entries {
        out.push_str(&entry.symbol);
        out.push_str(", ");
        out.push_str(&format_signed(entry.value));
        out.push_str(" $\n");
    }
    out
}

/// Explicit sign followed by the rounded magnitude grouped in threes.
#[must_use]
pub fn format_signed(value: Decimal) -> String {
    let rounded = value.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    let sign = if rounded.is_sign_negative() && !rounded.is_zero() {
        '-'
    } else {
        '+'
    };
    format!("{sign}{}", group_thousands(rounded.abs()))
}

/// Separate thousands of a whole number with spaces.
fn group_thousands(value: Decimal) -> String {
    let digits = value.trunc().to_string();

    let len = digits.len();
    let mut out = String::with_capacity(len + len / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (len - i) % 3 == 0 {
            out.push(' ');
        }
        out.push(c);
    }
    out
}
