use serde::Deserialize;

/// Approximate cell size used to derive the pixel dimensions of the PTY.
const CELL_WIDTH_PX: u32 = 8;
const CELL_HEIGHT_PX: u32 = 16;

const DEFAULT_COLS: u32 = 80;
const DEFAULT_ROWS: u32 = 24;

/// Terminal dimensions in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalSize {
    pub cols: u32,
    pub rows: u32,
}

impl TerminalSize {
    /// Build from optional query values; zero or unparsable falls back to 80x24.
    pub fn from_query(cols: Option<&str>, rows: Option<&str>) -> Self {
        let parse = |raw: Option<&str>, default: u32| {
            raw.and_then(|v| v.trim().parse::<u32>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(default)
        };
        Self {
            cols: parse(cols, DEFAULT_COLS),
            rows: parse(rows, DEFAULT_ROWS),
        }
    }

    pub fn pixel_width(&self) -> u32 {
        self.cols.saturating_mul(CELL_WIDTH_PX)
    }

    pub fn pixel_height(&self) -> u32 {
        self.rows.saturating_mul(CELL_HEIGHT_PX)
    }
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self {
            cols: DEFAULT_COLS,
            rows: DEFAULT_ROWS,
        }
    }
}

/// How an inbound terminal frame is applied to the shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalInput {
    Resize(TerminalSize),
    /// Payload of a `{"data": "..."}` envelope.
    Write(String),
    /// Anything that is not a recognised envelope, written verbatim.
    Raw(Vec<u8>),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: Option<String>,
    cols: Option<u32>,
    rows: Option<u32>,
    data: Option<String>,
}

impl TerminalInput {
    pub fn parse(frame: &[u8]) -> Self {
        let Ok(envelope) = serde_json::from_slice::<Envelope>(frame) else {
            return Self::Raw(frame.to_vec());
        };
        if envelope.kind.as_deref() == Some("resize") {
            if let (Some(cols), Some(rows)) = (envelope.cols, envelope.rows) {
                if cols > 0 && rows > 0 {
                    return Self::Resize(TerminalSize { cols, rows });
                }
            }
            return Self::Raw(frame.to_vec());
        }
        match envelope.data {
            Some(data) => Self::Write(data),
            None => Self::Raw(frame.to_vec()),
        }
    }
}
