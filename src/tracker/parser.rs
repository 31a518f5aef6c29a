use super::TrackerConfig;
use super::score::{Cell, Effect, NoteCommand, Row, TrackerScore};
use crate::error::{MidiError, Result};
use crate::events::{MAX_CHANNEL, MAX_DATA};

pub const MAX_LANES: usize = MAX_CHANNEL as usize + 1;

const COMMENT: char = '#';
const LANE_SEPARATOR: char = '|';
const FIELD_SEPARATOR: char = ':';

enum Directive {
    Title(String),
    Tempo(f64),
    RowsPerBeat(u32),
    Sustain(u32),
    Instrument { lane: u8, program: u8 },
}

pub(crate) fn parse_score(text: &str, config: &TrackerConfig) -> Result<TrackerScore> {
    let mut score = TrackerScore::from_config(config);
    // Set right after a `|Ch1|Ch2|` header so one `|----|` rule can follow.
    let mut after_header = false;

    for (index, raw) in text.lines().enumerate() {
        let line = index + 1;
        let content = raw.trim();
        if content.is_empty() || content.starts_with(COMMENT) {
            continue;
        }
        if std::mem::take(&mut after_header) && is_rule(content) {
            continue;
        }

        if let Some(directive) = parse_directive(content, line)? {
            if !score.rows.is_empty() {
                return Err(MidiError::parse(line, "header directive after the first row"));
            }
            match directive {
                Directive::Title(title) => score.title = title,
                Directive::Tempo(tempo) => score.tempo = tempo,
                Directive::RowsPerBeat(rows) => score.rows_per_beat = rows,
                Directive::Sustain(rows) => score.sustain_rows = Some(rows),
                Directive::Instrument { lane, program } => score.instruments.push((lane, program)),
            }
            continue;
        }

        let cells = split_cells(content);
        if score.rows.is_empty() && cells.iter().all(|cell| is_channel_label(cell)) {
            after_header = true;
            continue;
        }
        // `| Row 4 |     |` marks a position and holds no notes.
        if cells.first().is_some_and(|cell| is_row_label(cell))
            && cells[1..].iter().all(|cell| cell.is_empty())
        {
            continue;
        }

        score.rows.push(parse_row(&cells, line)?);
    }

    if !score.tempo.is_finite() || score.tempo <= 0.0 {
        return Err(MidiError::invalid("tempo", score.tempo, "a finite BPM > 0"));
    }
    if score.rows_per_beat == 0 {
        return Err(MidiError::invalid("rows_per_beat", 0, ">= 1"));
    }
    if score.sustain_rows == Some(0) {
        return Err(MidiError::invalid("sustain_rows", 0, ">= 1"));
    }
    Ok(score)
}

/// `None` when the line is not a directive and should be read as a row.
fn parse_directive(content: &str, line: usize) -> Result<Option<Directive>> {
    let Some((head, value)) = content.split_once(FIELD_SEPARATOR) else {
        return Ok(None);
    };
    let head = head.trim().to_ascii_uppercase();
    let value = value.trim();

    let directive = match head.as_str() {
        "TITLE" => Directive::Title(value.to_string()),
        "TEMPO" => {
            let tempo: f64 = value
                .parse()
                .map_err(|_| MidiError::parse(line, format!("invalid tempo '{value}'")))?;
            if !tempo.is_finite() || tempo <= 0.0 {
                return Err(MidiError::parse(line, format!("tempo must be > 0, got {value}")));
            }
            Directive::Tempo(tempo)
        }
        "ROWS_PER_BEAT" | "SPEED" => Directive::RowsPerBeat(parse_count(value, line)?),
        "SUSTAIN" => Directive::Sustain(parse_count(value, line)?),
        _ => match head.strip_prefix("INSTRUMENT") {
            // `INSTRUMENT 1:` and `INSTRUMENT1:` name the same lane.
            Some(lane) => {
                let lane = lane
                    .trim()
                    .parse::<u8>()
                    .ok()
                    .filter(|&lane| lane <= MAX_CHANNEL)
                    .ok_or_else(|| MidiError::parse(line, "INSTRUMENT needs a lane number 0-15"))?;
                Directive::Instrument {
                    lane,
                    program: parse_instrument_program(value, lane, line)?,
                }
            }
            None => return Ok(None),
        },
    };
    Ok(Some(directive))
}

/// `33 Fingered Bass` selects program 33. A bare label such as
/// `Acoustic Grand Piano` selects the program numbered like the lane.
fn parse_instrument_program(value: &str, lane: u8, line: usize) -> Result<u8> {
    match value.split_whitespace().next() {
        Some(first) if first.bytes().all(|b| b.is_ascii_digit()) => {
            parse_data(first, "program", line)?
                .ok_or_else(|| MidiError::parse(line, "INSTRUMENT needs a program number"))
        }
        Some(_) => Ok(lane),
        None => Err(MidiError::parse(line, "INSTRUMENT needs a program number or a name")),
    }
}

fn parse_count(value: &str, line: usize) -> Result<u32> {
    value
        .parse::<u32>()
        .ok()
        .filter(|&n| n > 0)
        .ok_or_else(|| MidiError::parse(line, format!("expected a positive whole number, got '{value}'")))
}

/// Cell texts of a row, without the optional outer `|` frame and without
/// a trailing `Row NN` annotation.
fn split_cells(content: &str) -> Vec<&str> {
    let body = content.strip_prefix(LANE_SEPARATOR).unwrap_or(content);
    let body = body.strip_suffix(LANE_SEPARATOR).unwrap_or(body);
    let mut cells: Vec<&str> = body.split(LANE_SEPARATOR).map(str::trim).collect();
    if cells.len() > 1 && cells.last().is_some_and(|cell| is_row_label(cell)) {
        cells.pop();
    }
    cells
}

fn parse_row(cells: &[&str], line: usize) -> Result<Row> {
    if cells.len() > MAX_LANES {
        return Err(MidiError::parse(
            line,
            format!("{} lanes, at most {MAX_LANES} are supported", cells.len()),
        ));
    }
    let cells = cells
        .iter()
        .map(|cell| parse_cell(cell, line))
        .collect::<Result<Vec<_>>>()?;
    Ok(Row { line, cells })
}

/// `Ch1`, `CH 2`, `Channel3`.
fn is_channel_label(cell: &str) -> bool {
    let upper = cell.to_ascii_uppercase();
    let number = upper
        .strip_prefix("CHANNEL")
        .or_else(|| upper.strip_prefix("CH"))
        .map(str::trim_start);
    number.is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

/// `Row 12`, `ROW07`.
fn is_row_label(cell: &str) -> bool {
    let upper = cell.to_ascii_uppercase();
    upper
        .strip_prefix("ROW")
        .map(str::trim_start)
        .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

/// `|------|------|` or `+----+----+`.
fn is_rule(content: &str) -> bool {
    content.contains('-') && content.chars().all(|c| matches!(c, '|' | '-' | '+' | ':' | '=' | ' '))
}

fn parse_cell(text: &str, line: usize) -> Result<Cell> {
    // `C-4:01:64` and `C-4 01 64` are both accepted.
    let fields: Vec<&str> = if text.contains(FIELD_SEPARATOR) {
        text.split(FIELD_SEPARATOR).map(str::trim).collect()
    } else {
        text.split_whitespace().collect()
    };
    if fields.len() > 4 {
        return Err(MidiError::parse(line, format!("too many fields in cell '{text}'")));
    }
    let field = |i: usize| fields.get(i).copied().unwrap_or("");

    Ok(Cell {
        note: parse_note(field(0), line)?,
        instrument: parse_data(field(1), "instrument", line)?,
        volume: parse_data(field(2), "volume", line)?,
        effect: parse_effect(field(3), line)?,
    })
}

fn is_placeholder(token: &str) -> bool {
    token.chars().all(|c| c == '.') || token.chars().all(|c| c == '-')
}

fn parse_note(token: &str, line: usize) -> Result<NoteCommand> {
    if is_placeholder(token) {
        return Ok(NoteCommand::Empty);
    }
    if token.eq_ignore_ascii_case("OFF") || token == "===" || token == "^^^" {
        return Ok(NoteCommand::Release);
    }
    let pitch = if token.bytes().all(|b| b.is_ascii_digit()) {
        token.parse::<u8>().ok().filter(|&p| p <= MAX_DATA)
    } else {
        pitch_from_name(token)
    };
    pitch
        .map(NoteCommand::Play)
        .ok_or_else(|| MidiError::parse(line, format!("invalid note '{token}'")))
}

/// `C-4`, `C4`, `C#4` and `Db4` all follow `(octave + 1) * 12 + class`.
fn pitch_from_name(token: &str) -> Option<u8> {
    let mut chars = token.chars();
    let class: i32 = match chars.next()?.to_ascii_uppercase() {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return None,
    };
    let rest = chars.as_str();
    let (accidental, rest) = if let Some(rest) = rest.strip_prefix('#') {
        (1, rest)
    } else if let Some(rest) = rest.strip_prefix('b') {
        (-1, rest)
    } else {
        (0, rest)
    };
    let digits = rest.strip_prefix(['-', '_']).unwrap_or(rest);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let octave: i32 = digits.parse().ok()?;
    let pitch = (octave + 1) * 12 + class + accidental;
    u8::try_from(pitch).ok().filter(|&p| p <= MAX_DATA)
}

fn parse_data(token: &str, field: &str, line: usize) -> Result<Option<u8>> {
    if token.is_empty() || is_placeholder(token) {
        return Ok(None);
    }
    token
        .parse::<u8>()
        .ok()
        .filter(|&v| v <= MAX_DATA)
        .map(Some)
        .ok_or_else(|| MidiError::parse(line, format!("{field} '{token}' is not in 0-127")))
}

fn parse_effect(token: &str, line: usize) -> Result<Option<Effect>> {
    if token.is_empty() || is_placeholder(token) {
        return Ok(None);
    }
    let mut chars = token.chars();
    let code = chars.next().filter(char::is_ascii_alphabetic);
    let argument = chars.as_str();
    match code {
        Some(code) if !argument.is_empty() && argument.len() <= 4 => {
            let argument = u16::from_str_radix(argument, 16)
                .map_err(|_| MidiError::parse(line, format!("invalid effect '{token}'")))?;
            Ok(Some(Effect {
                code: code.to_ascii_uppercase(),
                argument,
            }))
        }
        _ => Err(MidiError::parse(line, format!("invalid effect '{token}'"))),
    }
}
