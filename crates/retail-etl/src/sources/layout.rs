//! Table rows recovered from positioned PDF text
//!
//! Page content is replayed far enough to know where each string is drawn: the graphics
//! matrix (`q`, `Q`, `cm`), the text and line matrices (`BT`, `Td`, `TD`, `Tm`, `T*`) and the
//! font size (`Tf`). Every shown string becomes a [`TextRun`] at its user-space origin.
//!
//! Runs on the same baseline form a row. Within a row, runs are ordered by x and merged into
//! one cell while the gap to the previous run is under [`CELL_GAP_EMS`]. Glyph widths are not
//! read from the fonts, so a run's extent is estimated from its length.

use lopdf::content::Operation;
use lopdf::Object;

/// Estimated glyph advance, as a fraction of the font size
pub const AVERAGE_GLYPH_WIDTH: f32 = 0.5;

/// Gap, in ems, under which neighbouring runs belong to the same cell
pub const CELL_GAP_EMS: f32 = 1.0;

/// Vertical distance, in ems, under which runs share a baseline
pub const BASELINE_TOLERANCE_EMS: f32 = 0.5;

/// `TJ` adjustment (thousandths of an em) read as a word space
const WORD_SPACE_ADJUSTMENT: f32 = -200.0;

type Matrix = [f32; 6];

const IDENTITY: Matrix = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];

/// `m × n` in PDF row-vector convention
fn multiply(m: &Matrix, n: &Matrix) -> Matrix {
    [
        m[0] * n[0] + m[1] * n[2],
        m[0] * n[1] + m[1] * n[3],
        m[2] * n[0] + m[3] * n[2],
        m[2] * n[1] + m[3] * n[3],
        m[4] * n[0] + m[5] * n[2] + n[4],
        m[4] * n[1] + m[5] * n[3] + n[5],
    ]
}

fn translation(tx: f32, ty: f32) -> Matrix {
    [1.0, 0.0, 0.0, 1.0, tx, ty]
}

/// A string drawn at one position
#[derive(Debug, Clone, PartialEq)]
pub struct TextRun {
    pub x: f32,
    pub y: f32,
    pub font_size: f32,
    pub text: String,
}

impl TextRun {
    fn end(&self) -> f32 {
        self.x + self.text.chars().count() as f32 * self.font_size * AVERAGE_GLYPH_WIDTH
    }
}

/// Decode a PDF string operand: UTF-16BE with a byte order mark, otherwise one byte per char
fn decode_string(bytes: &[u8]) -> String {
    match bytes {
        [0xFE, 0xFF, rest @ ..] => {
            let units = rest
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]));
            char::decode_utf16(units)
                .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
                .collect()
        },
        _ => bytes.iter().map(|&b| b as char).collect(),
    }
}

fn number(operands: &[Object], index: usize) -> Option<f32> {
    operands.get(index).and_then(|o| o.as_float().ok())
}

fn string(operands: &[Object], index: usize) -> Option<String> {
    match operands.get(index) {
        Some(Object::String(bytes, _)) => Some(decode_string(bytes)),
        _ => None,
    }
}

/// `TJ` array: strings joined, large negative adjustments read as spaces
fn show_array(operands: &[Object]) -> Option<String> {
    let items = operands.first()?.as_array().ok()?;
    let mut text = String::new();
    for item in items {
        match item {
            Object::String(bytes, _) => text.push_str(&decode_string(bytes)),
            other => {
                if other.as_float().is_ok_and(|n| n <= WORD_SPACE_ADJUSTMENT) && !text.ends_with(' ') {
                    text.push(' ');
                }
            },
        }
    }
    Some(text)
}

struct TextState {
    ctm: Matrix,
    saved: Vec<Matrix>,
    line: Matrix,
    text: Matrix,
    leading: f32,
    font_size: f32,
    /// Nothing repositioned the text since the last shown string
    continues: bool,
    runs: Vec<TextRun>,
}

impl TextState {
    fn new() -> Self {
        Self {
            ctm: IDENTITY,
            saved: Vec::new(),
            line: IDENTITY,
            text: IDENTITY,
            leading: 0.0,
            font_size: 0.0,
            continues: false,
            runs: Vec::new(),
        }
    }

    fn move_line(&mut self, tx: f32, ty: f32) {
        self.line = multiply(&translation(tx, ty), &self.line);
        self.text = self.line;
        self.continues = false;
    }

    fn show(&mut self, text: String) {
        if text.is_empty() {
            return;
        }
        if self.continues {
            if let Some(last) = self.runs.last_mut() {
                last.text.push_str(&text);
                return;
            }
        }

        let device = multiply(&self.text, &self.ctm);
        let scale = device[2].hypot(device[3]);
        self.runs.push(TextRun {
            x: device[4],
            y: device[5],
            font_size: (self.font_size * scale).abs(),
            text,
        });
        self.continues = true;
    }

    fn apply(&mut self, op: &Operation) {
        let operands = op.operands.as_slice();
        match op.operator.as_str() {
            "q" => self.saved.push(self.ctm),
            "Q" => {
                if let Some(ctm) = self.saved.pop() {
                    self.ctm = ctm;
                }
            },
            "cm" => {
                if let Some(m) = matrix(operands) {
                    self.ctm = multiply(&m, &self.ctm);
                }
            },
            "BT" => {
                self.line = IDENTITY;
                self.text = IDENTITY;
                self.continues = false;
            },
            "ET" => self.continues = false,
            "Tf" => {
                if let Some(size) = number(operands, 1) {
                    self.font_size = size;
                }
            },
            "TL" => {
                if let Some(leading) = number(operands, 0) {
                    self.leading = leading;
                }
            },
            "Td" | "TD" => {
                if let (Some(tx), Some(ty)) = (number(operands, 0), number(operands, 1)) {
                    if op.operator == "TD" {
                        self.leading = -ty;
                    }
                    self.move_line(tx, ty);
                }
            },
            "Tm" => {
                if let Some(m) = matrix(operands) {
                    self.line = m;
                    self.text = m;
                    self.continues = false;
                }
            },
            "T*" => self.move_line(0.0, -self.leading),
            "Tj" => {
                if let Some(text) = string(operands, 0) {
                    self.show(text);
                }
            },
            "'" => {
                self.move_line(0.0, -self.leading);
                if let Some(text) = string(operands, 0) {
                    self.show(text);
                }
            },
            "\"" => {
                self.move_line(0.0, -self.leading);
                if let Some(text) = string(operands, 2) {
                    self.show(text);
                }
            },
            "TJ" => {
                if let Some(text) = show_array(operands) {
                    self.show(text);
                }
            },
            _ => {},
        }
    }
}

fn matrix(operands: &[Object]) -> Option<Matrix> {
    let mut m = IDENTITY;
    for (i, slot) in m.iter_mut().enumerate() {
        *slot = number(operands, i)?;
    }
    Some(m)
}

/// Every string a content stream draws, in drawing order
pub fn text_runs(operations: &[Operation]) -> Vec<TextRun> {
    let mut state = TextState::new();
    for op in operations {
        state.apply(op);
    }
    state.runs
}

/// Group runs into rows (top of the page first) of cells (left to right)
pub fn rows_from_runs(mut runs: Vec<TextRun>) -> Vec<Vec<String>> {
    runs.retain(|run| !run.text.trim().is_empty());
    runs.sort_by(|a, b| b.y.total_cmp(&a.y).then(a.x.total_cmp(&b.x)));

    let mut lines: Vec<Vec<TextRun>> = Vec::new();
    for run in runs {
        let tolerance = run.font_size.max(1.0) * BASELINE_TOLERANCE_EMS;
        match lines.last_mut() {
            Some(line) if (line[0].y - run.y).abs() <= tolerance => line.push(run),
            _ => lines.push(vec![run]),
        }
    }

    lines
        .into_iter()
        .map(|mut line| {
            line.sort_by(|a, b| a.x.total_cmp(&b.x));
            cells(line)
        })
        .collect()
}

fn cells(line: Vec<TextRun>) -> Vec<String> {
    let mut cells: Vec<(String, f32)> = Vec::new();
    for run in line {
        let gap = run.font_size.max(1.0) * CELL_GAP_EMS;
        let end = run.end();
        let text = run.text.trim();
        match cells.last_mut() {
            Some((cell, cell_end)) if run.x - *cell_end < gap => {
                cell.push(' ');
                cell.push_str(text);
                *cell_end = cell_end.max(end);
            },
            _ => cells.push((text.to_string(), end)),
        }
    }
    cells.into_iter().map(|(cell, _)| cell).collect()
}
