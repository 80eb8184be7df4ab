//! JCAMP-DX reader for infrared reference spectra.
//!
//! Handles the subset the NIST WebBook and most instrument exports use:
//!
//! * labelled data records (`##LABEL=value`), labels compared with spaces,
//!   dashes, slashes and underscores removed as the standard requires
//! * `##XYDATA=(X++(Y..Y))` tables in AFFN, PAC, SQZ, DIF and DUP form, with
//!   the DIF y-check value at the start of each continuation line dropped
//! * `##PEAK TABLE=(XY..XY)` and `##XYPOINTS=(XY..XY)` pair lists
//!
//! Only the first block of a file is read.

use std::collections::BTreeMap;
use std::path::Path;

use log::{debug, warn};

use super::model::{LabelledSpectrum, MetadataValue, Spectrum};
use crate::error::{RamanError, Result};

/// A spectrum read from a JCAMP-DX file together with its identifying records.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceSpectrum {
    pub title: String,
    /// `##CAS REGISTRY NO=` as written in the file.
    pub cas: Option<String>,
    pub x_units: String,
    pub y_units: String,
    pub spectrum: Spectrum,
}

impl ReferenceSpectrum {
    pub fn is_transmittance(&self) -> bool {
        self.y_units.to_ascii_uppercase().contains("TRANSMITTANCE")
    }

    /// Convert transmittance ordinates to absorbance as `1 - T`.
    /// Spectra in any other unit are returned unchanged.
    pub fn to_absorbance(self) -> Result<Self> {
        if !self.is_transmittance() {
            return Ok(self);
        }
        let y = self.spectrum.y().iter().map(|t| 1.0 - t).collect();
        Ok(ReferenceSpectrum {
            spectrum: self.spectrum.with_intensities(y)?,
            y_units: "ABSORBANCE".to_string(),
            ..self
        })
    }

    pub fn into_labelled(self) -> LabelledSpectrum {
        let mut metadata = BTreeMap::new();
        if let Some(cas) = &self.cas {
            metadata.insert("cas".to_string(), MetadataValue::from(cas.as_str()));
        }
        metadata.insert("xunits".to_string(), MetadataValue::from(self.x_units.as_str()));
        metadata.insert("yunits".to_string(), MetadataValue::from(self.y_units.as_str()));
        LabelledSpectrum {
            title: self.title,
            spectrum: self.spectrum,
            metadata,
        }
    }
}

pub fn read_jcamp(path: &Path) -> Result<ReferenceSpectrum> {
    let text = std::fs::read_to_string(path)?;
    debug!("parsing JCAMP-DX file {}", path.display());
    parse_jcamp(&text)
}

// ---------------------------------------------------------------------------
// Labelled data records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
enum TableForm {
    /// `(X++(Y..Y))`: an abscissa followed by equally spaced ordinates.
    XyData,
    /// `(XY..XY)`: explicit x,y pairs.
    XyPairs,
}

impl TableForm {
    fn from_descriptor(value: &str) -> Result<Self> {
        let compact: String = value.chars().filter(|c| !c.is_whitespace()).collect();
        if compact.contains("X++(Y..Y)") {
            Ok(TableForm::XyData)
        } else if compact.contains("XY..XY") {
            Ok(TableForm::XyPairs)
        } else {
            Err(RamanError::parse(format!("unsupported table form '{value}'")))
        }
    }
}

fn normalize_label(label: &str) -> String {
    label
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '/' | '_'))
        .flat_map(char::to_uppercase)
        .collect()
}

fn strip_comment(line: &str) -> &str {
    line.split("$$").next().unwrap_or("")
}

/// Parse the text of a JCAMP-DX file.
pub fn parse_jcamp(text: &str) -> Result<ReferenceSpectrum> {
    let mut records: BTreeMap<String, String> = BTreeMap::new();
    let mut table: Option<(TableForm, Vec<&str>)> = None;
    let mut in_table = false;

    for raw in text.lines() {
        let line = strip_comment(raw).trim();
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix("##") {
            let (label, value) = rest.split_once('=').unwrap_or((rest, ""));
            let label = normalize_label(label);
            let value = value.trim();
            in_table = false;
            match label.as_str() {
                "END" => break,
                "XYDATA" | "PEAKTABLE" | "XYPOINTS" => {
                    if table.is_none() {
                        table = Some((TableForm::from_descriptor(value)?, Vec::new()));
                        in_table = true;
                    }
                }
                _ => {
                    records.entry(label).or_insert_with(|| value.to_string());
                }
            }
        } else if in_table {
            if let Some((_, lines)) = table.as_mut() {
                lines.push(line);
            }
        }
    }

    let (form, lines) = table.ok_or_else(|| RamanError::parse("no XYDATA or PEAK TABLE record"))?;
    let header = Header::from_records(&records)?;
    let (x, y) = match form {
        TableForm::XyData => decode_xydata(&lines, &header)?,
        TableForm::XyPairs => decode_pairs(&lines, &header)?,
    };
    if x.is_empty() {
        return Err(RamanError::parse("data table is empty"));
    }
    if let Some(n) = header.npoints {
        if n != x.len() {
            warn!("NPOINTS={n} but {} points were decoded", x.len());
        }
    }

    let text_record = |key: &str| records.get(key).cloned().unwrap_or_default();
    Ok(ReferenceSpectrum {
        title: text_record("TITLE"),
        cas: records.get("CASREGISTRYNO").filter(|s| !s.is_empty()).cloned(),
        x_units: text_record("XUNITS"),
        y_units: text_record("YUNITS"),
        spectrum: Spectrum::new(x, y)?,
    })
}

struct Header {
    xfactor: f64,
    yfactor: f64,
    firstx: Option<f64>,
    lastx: Option<f64>,
    npoints: Option<usize>,
}

impl Header {
    fn from_records(records: &BTreeMap<String, String>) -> Result<Self> {
        let number = |key: &str| -> Result<Option<f64>> {
            records
                .get(key)
                .map(|v| {
                    v.trim()
                        .parse::<f64>()
                        .map_err(|_| RamanError::parse(format!("##{key}= '{v}' is not a number")))
                })
                .transpose()
        };
        Ok(Header {
            xfactor: number("XFACTOR")?.unwrap_or(1.0),
            yfactor: number("YFACTOR")?.unwrap_or(1.0),
            firstx: number("FIRSTX")?,
            lastx: number("LASTX")?,
            npoints: number("NPOINTS")?.map(|n| n as usize),
        })
    }
}

// ---------------------------------------------------------------------------
// ASDF decoding
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Abs(f64),
    Dif(f64),
    Dup(usize),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Kind {
    Abs,
    Dif,
    Dup,
}

/// Pseudo-digit table: which token a character starts and its leading digit.
fn pseudo_digit(c: char) -> Option<(Kind, bool, u32)> {
    let offset = |base: char| c as u32 - base as u32 + 1;
    match c {
        '@' => Some((Kind::Abs, false, 0)),
        'A'..='I' => Some((Kind::Abs, false, offset('A'))),
        'a'..='i' => Some((Kind::Abs, true, offset('a'))),
        '%' => Some((Kind::Dif, false, 0)),
        'J'..='R' => Some((Kind::Dif, false, offset('J'))),
        'j'..='r' => Some((Kind::Dif, true, offset('j'))),
        'S'..='Z' => Some((Kind::Dup, false, offset('S'))),
        's' => Some((Kind::Dup, false, 9)),
        _ => None,
    }
}

/// A number being accumulated; `plain` when it started with a digit, sign or
/// point rather than a pseudo-digit.
struct Pending {
    kind: Kind,
    text: String,
    plain: bool,
}

/// Length of an exponent suffix (`E-3`, `e+05`, `E7`) at the start of `rest`,
/// if it continues the plain number in `pending`.
///
/// Exponents are only read on lines whose sole pseudo-digits are `E`/`e`. An
/// unsigned one is never attached to the leading abscissa, where `1000E5` is a
/// squeezed ordinate.
fn exponent_len(rest: &[char], pending: &Option<Pending>, leading: bool) -> Option<usize> {
    let number = pending.as_ref().filter(|p| p.plain && p.kind == Kind::Abs)?;
    let ends_in_mantissa = number
        .text
        .chars()
        .last()
        .is_some_and(|c| c.is_ascii_digit() || c == '.');
    if !ends_in_mantissa || number.text.contains(['e', 'E']) {
        return None;
    }
    let signed = matches!(rest.get(1).copied(), Some('+' | '-'));
    if !signed && leading {
        return None;
    }
    let start = 1 + usize::from(signed);
    let digits = rest
        .get(start..)
        .unwrap_or_default()
        .iter()
        .take_while(|c| c.is_ascii_digit())
        .count();
    (digits > 0).then_some(start + digits)
}

fn tokenize(line: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut pending: Option<Pending> = None;

    fn flush(pending: &mut Option<Pending>, tokens: &mut Vec<Token>) -> Result<()> {
        let Some(Pending { kind, text, .. }) = pending.take() else {
            return Ok(());
        };
        let bad = || RamanError::parse(format!("malformed number '{text}'"));
        let token = match kind {
            Kind::Dup => Token::Dup(text.parse().map_err(|_| bad())?),
            Kind::Abs => Token::Abs(text.parse().map_err(|_| bad())?),
            Kind::Dif => Token::Dif(text.parse().map_err(|_| bad())?),
        };
        tokens.push(token);
        Ok(())
    }

    let chars: Vec<char> = line.chars().collect();
    let plain_line = chars
        .iter()
        .all(|&c| matches!(c, 'E' | 'e') || pseudo_digit(c).is_none());

    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if plain_line && matches!(c, 'E' | 'e') {
            if let Some(len) = exponent_len(&chars[i..], &pending, tokens.is_empty()) {
                if let Some(number) = pending.as_mut() {
                    number.text.extend(&chars[i..i + len]);
                }
                i += len;
                continue;
            }
        }
        match c {
            '0'..='9' | '.' => pending
                .get_or_insert_with(|| Pending {
                    kind: Kind::Abs,
                    text: String::new(),
                    plain: true,
                })
                .text
                .push(c),
            '+' | '-' => {
                flush(&mut pending, &mut tokens)?;
                pending = Some(Pending {
                    kind: Kind::Abs,
                    text: c.to_string(),
                    plain: true,
                });
            }
            ' ' | '\t' | ',' | ';' => flush(&mut pending, &mut tokens)?,
            '?' => return Err(RamanError::parse("missing ordinates ('?') are not supported")),
            other => {
                let (kind, negative, digit) = pseudo_digit(other)
                    .ok_or_else(|| RamanError::parse(format!("unexpected character '{other}'")))?;
                flush(&mut pending, &mut tokens)?;
                let sign = if negative { "-" } else { "" };
                pending = Some(Pending {
                    kind,
                    text: format!("{sign}{digit}"),
                    plain: false,
                });
            }
        }
        i += 1;
    }
    flush(&mut pending, &mut tokens)?;
    Ok(tokens)
}

/// One decoded `(X++(Y..Y))` line in file units.
#[derive(Debug)]
struct XyLine {
    x: f64,
    ys: Vec<f64>,
    /// The last ordinate was DIF-encoded, so the next line opens with a check value.
    ends_in_dif: bool,
}

fn expand_line(line: &str) -> Result<XyLine> {
    let tokens = tokenize(line)?;
    let Some((Token::Abs(x), rest)) = tokens.split_first().map(|(f, r)| (*f, r)) else {
        return Err(RamanError::parse(format!("line does not start with an abscissa: '{line}'")));
    };

    let mut ys: Vec<f64> = Vec::with_capacity(rest.len());
    let mut last_value: Option<Token> = None;
    let mut ends_in_dif = false;
    for &token in rest {
        match token {
            Token::Abs(v) => {
                ys.push(v);
                last_value = Some(token);
                ends_in_dif = false;
            }
            Token::Dif(d) => {
                let prev = ys
                    .last()
                    .copied()
                    .ok_or_else(|| RamanError::parse("DIF value without a preceding ordinate"))?;
                ys.push(prev + d);
                last_value = Some(token);
                ends_in_dif = true;
            }
            Token::Dup(count) => {
                let repeated =
                    last_value.ok_or_else(|| RamanError::parse("DUP count without a value"))?;
                for _ in 1..count {
                    match repeated {
                        Token::Dif(d) => {
                            let prev = ys.last().copied().unwrap_or_default();
                            ys.push(prev + d);
                        }
                        Token::Abs(v) => ys.push(v),
                        Token::Dup(_) => {}
                    }
                }
            }
        }
    }
    Ok(XyLine { x, ys, ends_in_dif })
}

fn decode_xydata(lines: &[&str], header: &Header) -> Result<(Vec<f64>, Vec<f64>)> {
    let decoded = lines
        .iter()
        .map(|l| expand_line(l))
        .collect::<Result<Vec<_>>>()?;

    // Whether each line opens with a y-check value repeating the previous ordinate.
    let checks: Vec<bool> = (0..decoded.len())
        .map(|i| i > 0 && decoded[i - 1].ends_in_dif)
        .collect();

    let mut raw_y: Vec<f64> = Vec::new();
    for (i, line) in decoded.iter().enumerate() {
        let skip = usize::from(checks[i]);
        if checks[i] {
            if let (Some(check), Some(prev)) = (line.ys.first(), raw_y.last()) {
                if (check - prev).abs() > 1e-9 * prev.abs().max(1.0) {
                    warn!("DIF y-check mismatch at x={}: {check} vs {prev}", line.x);
                }
            }
        }
        raw_y.extend(line.ys.iter().skip(skip));
    }

    let x = match (header.firstx, header.lastx) {
        (Some(first), Some(last)) if raw_y.len() > 1 => {
            let step = (last - first) / (raw_y.len() - 1) as f64;
            (0..raw_y.len()).map(|i| first + step * i as f64).collect()
        }
        (Some(first), _) if raw_y.len() == 1 => vec![first],
        _ => abscissae_from_lines(&decoded, &checks, header.xfactor)?,
    };
    let y = raw_y.iter().map(|v| v * header.yfactor).collect();
    Ok((x, y))
}

/// Reconstruct abscissae from the line starts when FIRSTX/LASTX are absent.
fn abscissae_from_lines(lines: &[XyLine], checks: &[bool], xfactor: f64) -> Result<Vec<f64>> {
    let mut steps = Vec::with_capacity(lines.len());
    for i in 0..lines.len() {
        let step = if i + 1 < lines.len() {
            let intervals = lines[i].ys.len() - usize::from(checks[i + 1]);
            if intervals == 0 {
                return Err(RamanError::parse("cannot infer abscissa spacing"));
            }
            (lines[i + 1].x - lines[i].x) / intervals as f64
        } else {
            match steps.last() {
                Some(&s) => s,
                None if lines[i].ys.len() <= 1 => 0.0,
                None => return Err(RamanError::parse("FIRSTX/LASTX needed for a single-line table")),
            }
        };
        steps.push(step);
    }

    let mut x = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        let skip = usize::from(checks[i]);
        x.extend(
            (skip..line.ys.len()).map(|j| (line.x + steps[i] * j as f64) * xfactor),
        );
    }
    Ok(x)
}

fn decode_pairs(lines: &[&str], header: &Header) -> Result<(Vec<f64>, Vec<f64>)> {
    let numbers = lines
        .iter()
        .flat_map(|l| l.split(|c: char| c.is_whitespace() || c == ',' || c == ';'))
        .filter(|tok| !tok.is_empty())
        .map(|tok| {
            tok.parse::<f64>()
                .map_err(|_| RamanError::parse(format!("malformed number '{tok}'")))
        })
        .collect::<Result<Vec<f64>>>()?;
    if numbers.len() % 2 != 0 {
        return Err(RamanError::parse("odd number of values in an (XY..XY) table"));
    }
    Ok(numbers
        .chunks_exact(2)
        .map(|p| (p[0] * header.xfactor, p[1] * header.yfactor))
        .unzip())
}
