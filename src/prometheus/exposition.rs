//! Prometheus text exposition format decoder.
//!
//! Decodes the `text/plain; version=0.0.4` format block by block: every call
//! to [`SampleDecoder::decode`] yields the samples of one contiguous family
//! block, in document order, until the input is exhausted. [`decode_all`]
//! folds blocks that share a family name back into one vector.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use super::model::{
    Labelset, METRIC_NAME_LABEL, Sample, Vector, parse_sample_value, timestamp_from_millis,
};

/// Text format decode failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("text format parsing error in line {line}: {message}")]
pub struct DecodeError {
    /// 1-based line number.
    pub line: usize,
    pub message: String,
}

/// Declared metric family type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
    Summary,
    Untyped,
}

impl MetricKind {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "counter" => Some(Self::Counter),
            "gauge" => Some(Self::Gauge),
            "histogram" => Some(Self::Histogram),
            "summary" => Some(Self::Summary),
            "untyped" => Some(Self::Untyped),
            _ => None,
        }
    }

    /// Sample name suffixes that belong to the base family.
    fn suffixes(self) -> &'static [&'static str] {
        match self {
            Self::Histogram => &["_bucket", "_sum", "_count"],
            Self::Summary => &["_sum", "_count"],
            _ => &[],
        }
    }
}

/// Family currently being accumulated.
struct Family {
    name: String,
    kind: Option<MetricKind>,
    help: bool,
    samples: Vector,
}

impl Family {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: None,
            help: false,
            samples: Vec::new(),
        }
    }

    /// Whether a sample named `sample_name` belongs to this family.
    fn owns(&self, sample_name: &str) -> bool {
        if sample_name == self.name {
            return true;
        }
        let Some(kind) = self.kind else {
            return false;
        };
        kind.suffixes().iter().any(|suffix| {
            sample_name
                .strip_suffix(suffix)
                .is_some_and(|base| base == self.name)
        })
    }
}

/// Block-by-block decoder over a text exposition payload.
pub struct SampleDecoder<'a> {
    lines: Vec<&'a str>,
    pos: usize,
    current: Option<Family>,
    failed: bool,
}

impl<'a> SampleDecoder<'a> {
    /// Create a decoder over a complete payload.
    pub fn new(text: &'a str) -> Self {
        Self {
            lines: text.lines().collect(),
            pos: 0,
            current: None,
            failed: false,
        }
    }

    /// Decode the next family block.
    ///
    /// Returns `Ok(None)` at end of input. Families declared without any
    /// samples are skipped. A family whose samples are interleaved with
    /// another family's comes out as one block per contiguous run.
    pub fn decode(&mut self) -> Result<Option<Vector>, DecodeError> {
        Ok(self.next_family()?.map(|family| family.samples))
    }

    fn next_family(&mut self) -> Result<Option<Family>, DecodeError> {
        if self.failed {
            return Ok(None);
        }
        let result = self.decode_inner();
        if result.is_err() {
            self.failed = true;
        }
        result
    }

    fn decode_inner(&mut self) -> Result<Option<Family>, DecodeError> {
        while let Some(raw) = self.lines.get(self.pos).copied() {
            let lineno = self.pos + 1;
            let line = raw.trim();

            if line.is_empty() {
                self.pos += 1;
                continue;
            }

            if let Some(comment) = line.strip_prefix('#') {
                let Some(directive) = parse_directive(comment, lineno)? else {
                    self.pos += 1;
                    continue;
                };
                if let Some(done) = self.switch_family(directive.name()) {
                    return Ok(Some(done));
                }
                self.apply_directive(directive, lineno)?;
                self.pos += 1;
                continue;
            }

            let parsed = parse_sample_line(line, lineno)?;
            let owned = self
                .current
                .as_ref()
                .is_some_and(|family| family.owns(&parsed.name));
            if !owned {
                if let Some(done) = self.switch_family(&parsed.name) {
                    return Ok(Some(done));
                }
            }

            let family = self
                .current
                .get_or_insert_with(|| Family::new(&parsed.name));
            family.samples.push(parsed.into_sample(lineno)?);
            self.pos += 1;
        }

        Ok(self
            .current
            .take()
            .filter(|family| !family.samples.is_empty()))
    }

    /// Close the current family if `name` starts another one.
    ///
    /// Returns the finished family when it has samples; an empty family is
    /// dropped and decoding continues on the same line.
    fn switch_family(&mut self, name: &str) -> Option<Family> {
        let family = self.current.as_ref()?;
        if family.name == name {
            return None;
        }
        self.current
            .take()
            .filter(|family| !family.samples.is_empty())
    }

    fn apply_directive(&mut self, directive: Directive<'_>, line: usize) -> Result<(), DecodeError> {
        let family = self
            .current
            .get_or_insert_with(|| Family::new(directive.name()));

        match directive {
            Directive::Help { name } => {
                if family.help {
                    return Err(DecodeError {
                        line,
                        message: format!("second HELP line for metric name \"{}\"", name),
                    });
                }
                family.help = true;
            }
            Directive::Type { name, kind } => {
                if family.kind.is_some() || !family.samples.is_empty() {
                    return Err(DecodeError {
                        line,
                        message: format!(
                            "second TYPE line for metric name \"{}\", or TYPE reported after samples",
                            name
                        ),
                    });
                }
                family.kind = Some(kind);
            }
        }
        Ok(())
    }
}

impl Iterator for SampleDecoder<'_> {
    type Item = Result<Vector, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.decode().transpose()
    }
}

/// Decode a whole payload into one vector per metric family.
///
/// Blocks of the same family are merged, ordered by first appearance.
/// Any error discards everything decoded so far.
pub fn decode_all(text: &str) -> Result<Vec<Vector>, DecodeError> {
    let mut decoder = SampleDecoder::new(text);
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut vectors: Vec<Vector> = Vec::new();

    while let Some(family) = decoder.next_family()? {
        match index.get(&family.name) {
            Some(&at) => vectors[at].extend(family.samples),
            None => {
                index.insert(family.name, vectors.len());
                vectors.push(family.samples);
            }
        }
    }
    Ok(vectors)
}

// =============================================================================
// Line parsing
// =============================================================================

enum Directive<'a> {
    Help { name: &'a str },
    Type { name: &'a str, kind: MetricKind },
}

impl Directive<'_> {
    fn name(&self) -> &str {
        match self {
            Self::Help { name } | Self::Type { name, .. } => name,
        }
    }
}

/// Parse the body of a `#` line. Plain comments yield `None`.
fn parse_directive(comment: &str, line: usize) -> Result<Option<Directive<'_>>, DecodeError> {
    let mut tokens = comment.split_whitespace();
    let keyword = tokens.next();
    if keyword != Some("HELP") && keyword != Some("TYPE") {
        return Ok(None);
    }

    let name = tokens.next().ok_or_else(|| DecodeError {
        line,
        message: "missing metric name in comment directive".to_string(),
    })?;
    if !is_valid_metric_name(name) {
        return Err(DecodeError {
            line,
            message: format!("invalid metric name \"{}\"", name),
        });
    }

    if keyword == Some("HELP") {
        return Ok(Some(Directive::Help { name }));
    }

    let raw_kind = tokens.next().unwrap_or("");
    let kind = MetricKind::parse(raw_kind).ok_or_else(|| DecodeError {
        line,
        message: format!("unknown metric type \"{}\"", raw_kind),
    })?;
    Ok(Some(Directive::Type { name, kind }))
}

struct ParsedSample {
    name: String,
    labels: Labelset,
    value: f64,
    timestamp_ms: Option<i64>,
}

impl ParsedSample {
    fn into_sample(self, line: usize) -> Result<Sample, DecodeError> {
        let timestamp = match self.timestamp_ms {
            Some(ms) => Some(timestamp_from_millis(ms).ok_or_else(|| DecodeError {
                line,
                message: format!("timestamp {} out of range", ms),
            })?),
            None => None,
        };
        let mut metric = self.labels;
        metric.insert(METRIC_NAME_LABEL.to_string(), self.name);
        Ok(Sample {
            metric,
            timestamp,
            value: self.value,
        })
    }
}

fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

/// Cursor over one sample line.
struct Cursor<'a> {
    src: &'a str,
    pos: usize,
    line: usize,
}

impl<'a> Cursor<'a> {
    fn error(&self, message: impl Into<String>) -> DecodeError {
        DecodeError {
            line: self.line,
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_blank(&mut self) {
        while matches!(self.peek(), Some(' ' | '\t')) {
            self.pos += 1;
        }
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if !pred(c) {
                break;
            }
            self.pos += c.len_utf8();
        }
        &self.src[start..self.pos]
    }

    fn token(&mut self) -> &'a str {
        self.skip_blank();
        self.take_while(|c| c != ' ' && c != '\t')
    }

    fn label_value(&mut self) -> Result<String, DecodeError> {
        if self.bump() != Some('"') {
            return Err(self.error("expected '\"' at start of label value"));
        }
        let mut value = String::new();
        loop {
            match self.bump() {
                Some('"') => return Ok(value),
                Some('\\') => match self.bump() {
                    Some('\\') => value.push('\\'),
                    Some('"') => value.push('"'),
                    Some('n') => value.push('\n'),
                    Some(other) => {
                        return Err(self.error(format!("invalid escape sequence '\\{}'", other)));
                    }
                    None => return Err(self.error("unterminated label value")),
                },
                Some(c) => value.push(c),
                None => return Err(self.error("unterminated label value")),
            }
        }
    }

    fn labels(&mut self) -> Result<Labelset, DecodeError> {
        let mut labels = Labelset::new();
        // Opening brace already consumed.
        loop {
            self.skip_blank();
            if self.peek() == Some('}') {
                self.pos += 1;
                return Ok(labels);
            }

            let name = self.take_while(|c| c.is_ascii_alphanumeric() || c == '_');
            if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
                return Err(self.error("invalid label name"));
            }
            self.skip_blank();
            if self.bump() != Some('=') {
                return Err(self.error(format!("expected '=' after label name \"{}\"", name)));
            }
            self.skip_blank();
            let value = self.label_value()?;
            if name == METRIC_NAME_LABEL {
                return Err(self.error("label name \"__name__\" is reserved"));
            }
            if labels.insert(name.to_string(), value).is_some() {
                return Err(self.error(format!("duplicate label name \"{}\"", name)));
            }

            self.skip_blank();
            match self.bump() {
                Some(',') => continue,
                Some('}') => return Ok(labels),
                _ => return Err(self.error("expected ',' or '}' after label value")),
            }
        }
    }
}

fn parse_sample_line(line: &str, lineno: usize) -> Result<ParsedSample, DecodeError> {
    let mut cur = Cursor {
        src: line,
        pos: 0,
        line: lineno,
    };

    let name = cur.take_while(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':');
    if !is_valid_metric_name(name) {
        return Err(cur.error(format!("invalid metric name in line \"{}\"", line)));
    }

    cur.skip_blank();
    let labels = if cur.peek() == Some('{') {
        cur.pos += 1;
        cur.labels()?
    } else {
        Labelset::new()
    };

    let raw_value = cur.token();
    if raw_value.is_empty() {
        return Err(cur.error(format!("missing value for metric \"{}\"", name)));
    }
    let value = parse_sample_value(raw_value)
        .ok_or_else(|| cur.error(format!("expected float as value, got \"{}\"", raw_value)))?;

    let raw_ts = cur.token();
    let timestamp_ms = if raw_ts.is_empty() {
        None
    } else {
        Some(
            raw_ts
                .parse::<i64>()
                .map_err(|_| cur.error(format!("expected integer as timestamp, got \"{}\"", raw_ts)))?,
        )
    };

    if !cur.token().is_empty() {
        return Err(cur.error("unexpected trailing data after timestamp"));
    }

    Ok(ParsedSample {
        name: name.to_string(),
        labels,
        value,
        timestamp_ms,
    })
}

/// Names of all families in a payload, for diagnostics.
pub fn family_names(vectors: &[Vector]) -> Vec<String> {
    let mut seen = HashSet::new();
    vectors
        .iter()
        .filter_map(|v| v.first().and_then(Sample::metric_name))
        .filter(|name| seen.insert(name.to_string()))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_FAMILIES: &str = r#"
# HELP http_requests_total Total requests.
# TYPE http_requests_total counter
http_requests_total{method="get",code="200"} 1027 1395066363000
http_requests_total{method="post",code="400"} 3 1395066363000

# TYPE process_open_fds gauge
process_open_fds{job="x"} 12 1395066363000
process_open_fds{job="y"} 15 1395066363000
process_open_fds{job="z"} 9 1395066363000
"#;

    #[test]
    fn test_decode_blocks_per_family() {
        let vectors = decode_all(TWO_FAMILIES).unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0].len(), 2);
        assert_eq!(vectors[1].len(), 3);

        let first = &vectors[0][0];
        assert_eq!(first.metric_name(), Some("http_requests_total"));
        assert_eq!(first.metric.get("method").unwrap(), "get");
        assert_eq!(first.value, 1027.0);
        assert_eq!(
            first.timestamp.unwrap().timestamp_millis(),
            1_395_066_363_000
        );
        assert_eq!(vectors[1][2].metric.get("job").unwrap(), "z");
    }

    #[test]
    fn test_decoder_yields_then_ends() {
        let mut decoder = SampleDecoder::new(TWO_FAMILIES);
        assert_eq!(decoder.decode().unwrap().unwrap().len(), 2);
        assert_eq!(decoder.decode().unwrap().unwrap().len(), 3);
        assert!(decoder.decode().unwrap().is_none());
        assert!(decoder.decode().unwrap().is_none());
    }

    #[test]
    fn test_histogram_suffixes_stay_in_family() {
        let text = r#"
# TYPE rpc_duration_seconds histogram
rpc_duration_seconds_bucket{le="0.1"} 10
rpc_duration_seconds_bucket{le="+Inf"} 12
rpc_duration_seconds_sum 3.5
rpc_duration_seconds_count 12
# TYPE rpc_inflight gauge
rpc_inflight 2
"#;
        let vectors = decode_all(text).unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0].len(), 4);
        assert_eq!(vectors[0][0].metric_name(), Some("rpc_duration_seconds_bucket"));
        assert_eq!(vectors[0][1].metric.get("le").unwrap(), "+Inf");
        assert_eq!(vectors[0][3].metric_name(), Some("rpc_duration_seconds_count"));
        assert_eq!(vectors[1][0].metric_name(), Some("rpc_inflight"));
    }

    #[test]
    fn test_untyped_samples_split_on_name_change() {
        let text = "a 1\na{x=\"1\"} 2\nb 3\n";
        let vectors = decode_all(text).unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0].len(), 2);
        assert_eq!(vectors[1][0].metric_name(), Some("b"));
        assert!(vectors[1][0].timestamp.is_none());
    }

    #[test]
    fn test_interleaved_family_merged_by_name() {
        let text = "a 1\nb 2\na 3\n";
        let vectors = decode_all(text).unwrap();
        let sizes: Vec<usize> = vectors.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 1]);
        assert_eq!(vectors[0][1].metric_name(), Some("a"));
        assert_eq!(vectors[0][1].value, 3.0);

        // The streaming decoder still sees three blocks.
        let blocks = SampleDecoder::new(text).count();
        assert_eq!(blocks, 3);

        // Suffixed samples merge under their base family.
        let text = "# TYPE h histogram\nh_count 1\nother 5\n# TYPE h histogram\nh_sum 2\n";
        let vectors = decode_all(text).unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0][1].metric_name(), Some("h_sum"));
    }

    #[test]
    fn test_timestamp_out_of_range_rejected() {
        let err = decode_all("a 1 9223372036854775807\n").unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.message.contains("out of range"));

        let vectors = decode_all("a 1 -1000\n").unwrap();
        assert_eq!(vectors[0][0].timestamp.unwrap().timestamp_millis(), -1000);
    }

    #[test]
    fn test_empty_family_skipped() {
        let text = "# HELP lonely Declared but no samples.\n# TYPE lonely gauge\n# TYPE other gauge\nother 1\n";
        let vectors = decode_all(text).unwrap();
        assert_eq!(vectors.len(), 1);
        assert_eq!(vectors[0][0].metric_name(), Some("other"));

        assert!(decode_all("").unwrap().is_empty());
        assert!(decode_all("# just a comment\n\n").unwrap().is_empty());
    }

    #[test]
    fn test_label_escapes_and_special_values() {
        let text = r#"msg{text="say \"hi\"\nback\\slash",empty=""} NaN
msg{text="inf"} +Inf
msg{text="neg", } -Inf
"#;
        let vectors = decode_all(text).unwrap();
        let samples = &vectors[0];
        assert_eq!(samples[0].metric.get("text").unwrap(), "say \"hi\"\nback\\slash");
        assert_eq!(samples[0].metric.get("empty").unwrap(), "");
        assert!(samples[0].value.is_nan());
        assert_eq!(samples[1].value, f64::INFINITY);
        assert_eq!(samples[2].value, f64::NEG_INFINITY);
    }

    #[test]
    fn test_error_reports_line_number() {
        let text = "ok 1\nbroken{x=\"1\" 2\n";
        let err = decode_all(text).unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_error_discards_earlier_blocks() {
        let text = "first 1\n# TYPE second gauge\nsecond not-a-number\n";
        assert!(decode_all(text).is_err());

        let mut decoder = SampleDecoder::new(text);
        assert!(decoder.decode().unwrap().is_some());
        assert!(decoder.decode().is_err());
        // Fused after an error.
        assert!(decoder.decode().unwrap().is_none());
    }

    #[test]
    fn test_invalid_lines() {
        assert!(decode_all("metric{x=\"1\",x=\"2\"} 1\n").is_err());
        assert!(decode_all("metric 1 notatimestamp\n").is_err());
        assert!(decode_all("metric 1 100 extra\n").is_err());
        assert!(decode_all("metric\n").is_err());
        assert!(decode_all("9metric 1\n").is_err());
        assert!(decode_all("# TYPE metric bogus\n").is_err());
        assert!(decode_all("metric{x=\"\\q\"} 1\n").is_err());
    }

    #[test]
    fn test_type_after_samples_rejected() {
        let err = decode_all("metric 1\n# TYPE metric gauge\n").unwrap_err();
        assert!(err.message.contains("TYPE reported after samples"));

        let err = decode_all("# HELP m a\n# HELP m b\nm 1\n").unwrap_err();
        assert!(err.message.contains("second HELP"));
    }

    #[test]
    fn test_family_names() {
        let vectors = decode_all(TWO_FAMILIES).unwrap();
        assert_eq!(
            family_names(&vectors),
            vec!["http_requests_total".to_string(), "process_open_fds".to_string()]
        );
    }
}
