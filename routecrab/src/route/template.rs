use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    CatchAll(String),
}

/// A parsed mounted path such as `/billing/invoices/:id`
///
/// Parameters are written `:name` or `{name}`. The last segment may be a
/// catch-all, `*name` or `{*name}`, which captures the rest of the path
/// including slashes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl PathTemplate {
    pub fn parse(path: &str) -> Self {
        let segments = split(path)
            .map(|segment| {
                if let Some(name) = segment.strip_prefix(':') {
                    Segment::Param(name.to_string())
                } else if let Some(name) = segment.strip_prefix('*') {
                    Segment::CatchAll(name.to_string())
                } else if let Some(inner) = segment
                    .strip_prefix('{')
                    .and_then(|s| s.strip_suffix('}'))
                {
                    match inner.strip_prefix('*') {
                        Some(name) => Segment::CatchAll(name.to_string()),
                        None => Segment::Param(inner.to_string()),
                    }
                } else {
                    Segment::Literal(segment.to_string())
                }
            })
            .collect();

        PathTemplate {
            raw: path.to_string(),
            segments,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// True when the template has no parameters
    pub fn is_static(&self) -> bool {
        self.segments
            .iter()
            .all(|segment| matches!(segment, Segment::Literal(_)))
    }

    /// Number of literal segments, used to rank overlapping templates
    pub fn literal_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|segment| matches!(segment, Segment::Literal(_)))
            .count()
    }

    /// Match a concrete path, returning the captured parameters in template order
    pub fn matches(&self, path: &str) -> Option<Vec<(String, String)>> {
        let mut params = Vec::new();
        let mut rest = path.trim_start_matches('/');

        for (index, segment) in self.segments.iter().enumerate() {
            if let Segment::CatchAll(name) = segment {
                // Only valid in last position
                if index + 1 != self.segments.len() {
                    return None;
                }
                params.push((name.clone(), rest.to_string()));
                return Some(params);
            }

            if rest.is_empty() {
                return None;
            }
            let (head, tail) = match rest.find('/') {
                Some(pos) => (&rest[..pos], &rest[pos + 1..]),
                None => (rest, ""),
            };
            match segment {
                Segment::Literal(literal) if literal == head => {}
                Segment::Param(name) => params.push((name.clone(), head.to_string())),
                _ => return None,
            }
            rest = tail;
        }

        rest.trim_end_matches('/').is_empty().then_some(params)
    }
}

impl fmt::Display for PathTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn split(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|segment| !segment.is_empty())
}
