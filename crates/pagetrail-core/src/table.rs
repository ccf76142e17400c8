//! Table detection from column-aligned text lines.
//!
//! PDF text layers flatten tables into lines whose cells are separated by
//! tabs, pipes or wide runs of spaces. A run of at least [`MIN_TABLE_ROWS`]
//! consecutive tabular lines is treated as one table; everything else is
//! prose. Tables serialize to CSV so the same page always yields the same
//! bytes.

/// Consecutive tabular lines needed before a run counts as a table.
pub const MIN_TABLE_ROWS: usize = 2;

/// Minimum cells a tabular line must split into.
const MIN_COLUMNS: usize = 2;

/// Shortest trimmed line considered for tabular detection.
const MIN_LINE_CHARS: usize = 5;

/// A table reconstructed from text, rows of cells in reading order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Most frequent row width; ties resolve to the wider layout.
    pub fn column_count(&self) -> usize {
        let mut counts: Vec<(usize, usize)> = Vec::new();
        for row in &self.rows {
            match counts.iter_mut().find(|(width, _)| *width == row.len()) {
                Some((_, n)) => *n += 1,
                None => counts.push((row.len(), 1)),
            }
        }
        counts
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)))
            .map(|(width, _)| width)
            .unwrap_or(0)
    }

    /// Fraction of rows whose width equals [`Table::column_count`].
    pub fn column_consistency(&self) -> f64 {
        if self.rows.is_empty() {
            return 0.0;
        }
        let width = self.column_count();
        let consistent = self.rows.iter().filter(|r| r.len() == width).count();
        consistent as f64 / self.rows.len() as f64
    }

    /// Fraction of cells that are empty.
    pub fn empty_cell_ratio(&self) -> f64 {
        let total: usize = self.rows.iter().map(|r| r.len()).sum();
        if total == 0 {
            return 1.0;
        }
        let empty = self
            .rows
            .iter()
            .flat_map(|r| r.iter())
            .filter(|c| c.trim().is_empty())
            .count();
        empty as f64 / total as f64
    }

    /// One CSV record per row, `\n` between rows, RFC 4180 quoting.
    pub fn to_csv(&self) -> String {
        self.rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|cell| escape_cell(cell))
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn escape_cell(cell: &str) -> String {
    if cell.contains(',') || cell.contains('"') || cell.contains('\n') {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}

/// Page text separated into tables and the remaining prose.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageLayout {
    pub tables: Vec<Table>,
    /// Non-tabular lines, original order, joined with `\n`.
    pub prose: String,
}

/// Heuristic: a line is tabular if it splits into at least two cells on
/// tabs, pipes, or aligned multi-space gaps.
///
/// - Tab-separated: `"Region\tQuarter\tRevenue"`
/// - Pipe-separated: `"Region | Quarter | Revenue"`
/// - Multi-space aligned: `"EMEA    Q3    4.2M"`
pub fn is_tabular_line(line: &str) -> bool {
    let trimmed = line.trim();
    if trimmed.chars().count() < MIN_LINE_CHARS {
        return false;
    }
    split_cells(trimmed).len() >= MIN_COLUMNS
}

/// Split a line into cells. Separator precedence: tab, pipe, 2+ spaces.
pub fn split_cells(line: &str) -> Vec<String> {
    let trimmed = line.trim();
    if trimmed.contains('\t') {
        return trimmed.split('\t').map(|c| c.trim().to_string()).collect();
    }
    if trimmed.matches('|').count() >= 2 {
        let inner = trimmed.trim_start_matches('|').trim_end_matches('|');
        return inner.split('|').map(|c| c.trim().to_string()).collect();
    }

    let mut cells = Vec::new();
    let mut current = String::new();
    let mut spaces = 0usize;
    for ch in trimmed.chars() {
        if ch == ' ' {
            spaces += 1;
            continue;
        }
        if spaces >= 2 {
            cells.push(std::mem::take(&mut current));
        } else if spaces == 1 {
            current.push(' ');
        }
        spaces = 0;
        current.push(ch);
    }
    if !current.is_empty() {
        cells.push(current);
    }
    cells
}

/// Fraction of non-blank lines that look tabular.
pub fn tabular_line_ratio(text: &str) -> f64 {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.is_empty() {
        return 0.0;
    }
    let tabular = lines.iter().filter(|l| is_tabular_line(l)).count();
    tabular as f64 / lines.len() as f64
}

fn close_run<'a>(run: &mut Vec<&'a str>, prose: &mut Vec<&'a str>, tables: &mut Vec<Table>) {
    if run.len() >= MIN_TABLE_ROWS {
        tables.push(Table {
            rows: run.iter().map(|l| split_cells(l)).collect(),
        });
    } else {
        prose.extend(run.iter().copied());
    }
    run.clear();
}

/// Split page text into tables and prose.
pub fn detect_tables(text: &str) -> PageLayout {
    let mut layout = PageLayout::default();
    let mut prose_lines: Vec<&str> = Vec::new();
    let mut run: Vec<&str> = Vec::new();

    for line in text.lines() {
        if is_tabular_line(line) {
            run.push(line);
        } else {
            close_run(&mut run, &mut prose_lines, &mut layout.tables);
            prose_lines.push(line);
        }
    }
    close_run(&mut run, &mut prose_lines, &mut layout.tables);

    layout.prose = prose_lines.join("\n").trim().to_string();
    layout
}
