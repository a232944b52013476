//! Plain-text import and export.
//!
//! Timelines are read from one `start stop` pair per line, in seconds.
//! Records are read from `start stop x1 .. xD` lines, one record per line.
//! Blank lines and lines starting with `#` are skipped.

use std::cmp::Ordering;
use std::io::{self, BufRead, Write};

use crate::datatype::{Records, Values};
use crate::error::{Error, Result};
use crate::time::TimeRange;

fn parse_line(line: &str, number: usize, min_fields: usize) -> Result<Vec<f64>> {
    let fields = line
        .split_whitespace()
        .map(|f| {
            f.parse::<f64>().map_err(|_| Error::Parse {
                line: number,
                message: format!("not a number: {f:?}"),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    if fields.len() < min_fields {
        return Err(Error::Parse {
            line: number,
            message: format!("expected at least {min_fields} fields, found {}", fields.len()),
        });
    }
    Ok(fields)
}

fn content_lines<R: BufRead>(reader: R) -> impl Iterator<Item = (usize, io::Result<String>)> {
    reader
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line))
        .filter(|(_, line)| match line {
            Ok(text) => {
                let text = text.trim();
                !text.is_empty() && !text.starts_with('#')
            }
            Err(_) => true,
        })
}

/// Reads `start stop` lines as ranges at `scale` ticks per second.
pub fn read_timeline<R: BufRead>(reader: R, scale: i32) -> Result<Vec<TimeRange>> {
    let mut ranges = Vec::new();
    for (number, line) in content_lines(reader) {
        let fields = parse_line(&line?, number, 2)?;
        ranges.push(TimeRange::from_seconds(fields[0], fields[1], scale));
    }
    Ok(ranges)
}

/// Reads `start stop x1 .. xD` lines. Returns the ranges and one
/// `dimension`-wide double record per line.
pub fn read_records<R: BufRead>(
    reader: R,
    scale: i32,
    dimension: usize,
) -> Result<(Vec<TimeRange>, Records)> {
    let mut ranges = Vec::new();
    let mut values = Vec::new();
    for (number, line) in content_lines(reader) {
        let fields = parse_line(&line?, number, 2 + dimension)?;
        if fields.len() != 2 + dimension {
            return Err(Error::Parse {
                line: number,
                message: format!("expected {dimension} values, found {}", fields.len() - 2),
            });
        }
        ranges.push(TimeRange::from_seconds(fields[0], fields[1], scale));
        values.extend_from_slice(&fields[2..]);
    }
    Ok((ranges, Records::from_values(dimension, values)?))
}

/// Checks that parsed record lines line up one to one with `timeline`.
///
/// # Errors
///
/// Returns `ShapeMismatch` when the counts differ or when record `i` was
/// read for a range other than `timeline[i]`.
pub fn check_alignment(timeline: &[TimeRange], parsed: &[TimeRange]) -> Result<()> {
    if timeline.len() != parsed.len() {
        return Err(Error::ShapeMismatch {
            expected: format!("{} lines", timeline.len()),
            found: format!("{} lines", parsed.len()),
            context: "record import".to_string(),
        });
    }
    match timeline
        .iter()
        .zip(parsed)
        .position(|(a, b)| a.compare(b) != Ordering::Equal)
    {
        Some(index) => Err(Error::ShapeMismatch {
            expected: format_range(&timeline[index]),
            found: format_range(&parsed[index]),
            context: format!("range of record {index}"),
        }),
        None => Ok(()),
    }
}

fn format_range(range: &TimeRange) -> String {
    format!(
        "[{:.3}, {:.3})",
        range.start_time().seconds(),
        range.end_time().seconds()
    )
}

/// Writes one line per record: `start stop [labels] x1 .. xD`, labels
/// comma separated.
pub fn write_records<W: Write>(
    out: &mut W,
    range: &TimeRange,
    labels: Option<&[i32]>,
    records: &Records,
) -> io::Result<()> {
    let dimension = records.dimension();
    for index in 0..records.len() {
        write!(
            out,
            "{:.3} {:.3}",
            range.start_time().seconds(),
            range.end_time().seconds()
        )?;
        if let Some(labels) = labels {
            let joined: Vec<String> = labels.iter().map(i32::to_string).collect();
            write!(out, " {}", joined.join(","))?;
        }
        let scalars = index * dimension..(index + 1) * dimension;
        match records.values() {
            Values::Int(v) => v[scalars].iter().try_for_each(|x| write!(out, " {x}"))?,
            Values::Float(v) => v[scalars].iter().try_for_each(|x| write!(out, " {x}"))?,
            Values::Double(v) => v[scalars].iter().try_for_each(|x| write!(out, " {x}"))?,
            Values::Char(v) => v[scalars].iter().try_for_each(|x| write!(out, " {x}"))?,
        }
        writeln!(out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatype::BaseType;

    #[test]
    fn timeline_lines() {
        let text = "# turns\n0.0 1.5\n\n1.5 2.25\n";
        let ranges = read_timeline(text.as_bytes(), 1000).unwrap();
        assert_eq!(ranges, vec![TimeRange::new(0, 1500, 1000), TimeRange::new(1500, 750, 1000)]);

        let err = read_timeline("0.0 x\n".as_bytes(), 1000).unwrap_err();
        assert!(matches!(err, Error::Parse { line: 1, .. }));
        assert!(read_timeline("1.0\n".as_bytes(), 1000).is_err());
    }

    #[test]
    fn record_lines() {
        let text = "0 1 1.0 2.0\n1 2 3.0 4.0\n";
        let (ranges, records) = read_records(text.as_bytes(), 100, 2).unwrap();
        assert_eq!(ranges.len(), 2);
        assert_eq!(records.len(), 2);
        assert_eq!(records.values(), &Values::Double(vec![1.0, 2.0, 3.0, 4.0]));
        assert!(matches!(
            read_records("0 1 1.0\n".as_bytes(), 100, 2),
            Err(Error::Parse { line: 1, .. })
        ));
        assert!(read_records("0 1 1 2 3\n".as_bytes(), 100, 2).is_err());
    }

    #[test]
    fn alignment_with_existing_timeline() {
        let timeline = read_timeline("0 1\n1 2\n".as_bytes(), 1000).unwrap();
        let (same, _) = read_records("0 1 1.0\n1 2 2.0\n".as_bytes(), 1000, 1).unwrap();
        check_alignment(&timeline, &same).unwrap();

        let (longer, _) =
            read_records("5 6 1.0\n7 8 2.0\n9 10 3.0\n".as_bytes(), 1000, 1).unwrap();
        assert!(matches!(
            check_alignment(&timeline, &longer),
            Err(Error::ShapeMismatch { .. })
        ));
        assert!(check_alignment(&timeline, &longer[..1]).is_err());

        let (shifted, _) = read_records("0 1 1.0\n7 8 2.0\n".as_bytes(), 1000, 1).unwrap();
        let err = check_alignment(&timeline, &shifted).unwrap_err();
        assert!(err.to_string().contains("record 1"));
    }

    #[test]
    fn text_output() {
        let records = Records::from_values(2, vec![1.5f64, 2.0, 3.0, 4.0])
            .unwrap()
            .convert(BaseType::Int);
        let mut out = Vec::new();
        write_records(&mut out, &TimeRange::new(500, 250, 1000), Some(&[3, 7]), &records).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "0.500 0.750 3,7 1 2\n0.500 0.750 3,7 3 4\n"
        );
    }
}
