//! # Pattern Queries
//!
//! Basic graph patterns over the resource graph: a list of triple patterns
//! whose variables are joined left to right by backtracking.
//!
//! ## Slot syntax
//!
//! - `?name` - variable
//! - `"text"` - string literal (`\"` and `\\` escapes)
//! - `42`, `true` - integer and boolean literals
//! - `<file:///a>` or `nie:url` - URI
//!
//! A pattern line is three slots separated by whitespace:
//! `?file nie:url "file:///home/user/a.txt"`.

use super::ResourceGraph;
use crate::types::{GraphName, QuarryError, Term, Uri};
use crate::vocab::{self, MAX_QUERY_ROWS};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// One result row: variable name -> bound term.
pub type Row = BTreeMap<String, Term>;

// =============================================================================
// SLOTS
// =============================================================================

/// A position in a triple pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Slot {
    Var(String),
    Fixed(Term),
}

impl Slot {
    #[must_use]
    pub fn var(name: impl Into<String>) -> Self {
        Self::Var(name.into())
    }

    #[must_use]
    pub fn uri(uri: impl Into<String>) -> Self {
        Self::Fixed(Term::uri(uri))
    }

    #[must_use]
    pub fn term(term: Term) -> Self {
        Self::Fixed(term)
    }

    /// Parse a single slot.
    pub fn parse(token: &str) -> Result<Self, QuarryError> {
        let token = token.trim();
        if let Some(name) = token.strip_prefix('?') {
            if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                return Err(QuarryError::InvalidPattern(format!(
                    "bad variable name {:?}",
                    token
                )));
            }
            return Ok(Self::Var(name.to_string()));
        }
        if token.len() >= 2 && token.starts_with('"') && token.ends_with('"') {
            return Ok(Self::Fixed(Term::Literal(unescape(
                &token[1..token.len() - 1],
            ))));
        }
        if let Some(inner) = token.strip_prefix('<').and_then(|t| t.strip_suffix('>')) {
            if inner.is_empty() {
                return Err(QuarryError::InvalidPattern("empty URI".to_string()));
            }
            return Ok(Self::uri(inner));
        }
        match token {
            "true" => return Ok(Self::Fixed(Term::Boolean(true))),
            "false" => return Ok(Self::Fixed(Term::Boolean(false))),
            "a" => return Ok(Self::uri(vocab::RDF_TYPE)),
            _ => {}
        }
        if let Ok(i) = token.parse::<i64>() {
            return Ok(Self::Fixed(Term::Integer(i)));
        }
        if token.contains(':') && !token.chars().any(char::is_whitespace) {
            return Ok(Self::uri(token));
        }
        Err(QuarryError::InvalidPattern(format!(
            "cannot parse slot {:?}",
            token
        )))
    }
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Var(name) => write!(f, "?{}", name),
            Self::Fixed(Term::Literal(s)) => {
                write!(f, "\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
            }
            Self::Fixed(term) => write!(f, "{}", term),
        }
    }
}

impl TryFrom<String> for Slot {
    type Error = QuarryError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Slot> for String {
    fn from(slot: Slot) -> Self {
        slot.to_string()
    }
}

// =============================================================================
// TRIPLE PATTERNS
// =============================================================================

/// A triple whose positions may be variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TriplePattern {
    pub subject: Slot,
    pub predicate: Slot,
    pub object: Slot,
}

impl TriplePattern {
    #[must_use]
    pub fn new(subject: Slot, predicate: Slot, object: Slot) -> Self {
        Self {
            subject,
            predicate,
            object,
        }
    }

    /// Parse `subject predicate object`, honouring quoted literals.
    pub fn parse(line: &str) -> Result<Self, QuarryError> {
        let tokens = tokenize(line)?;
        let [subject, predicate, object] = tokens.as_slice() else {
            return Err(QuarryError::InvalidPattern(format!(
                "expected 3 slots, found {} in {:?}",
                tokens.len(),
                line
            )));
        };
        let pattern = Self::new(
            Slot::parse(subject)?,
            Slot::parse(predicate)?,
            Slot::parse(object)?,
        );
        pattern.validate()?;
        Ok(pattern)
    }

    fn validate(&self) -> Result<(), QuarryError> {
        for (slot, position) in [(&self.subject, "subject"), (&self.predicate, "predicate")] {
            if let Slot::Fixed(term) = slot {
                if term.as_uri().is_none() {
                    return Err(QuarryError::InvalidPattern(format!(
                        "{} must be a URI or variable",
                        position
                    )));
                }
            }
        }
        Ok(())
    }

    fn variables(&self) -> impl Iterator<Item = &str> {
        [&self.subject, &self.predicate, &self.object]
            .into_iter()
            .filter_map(|slot| match slot {
                Slot::Var(name) => Some(name.as_str()),
                Slot::Fixed(_) => None,
            })
    }
}

fn tokenize(line: &str) -> Result<Vec<String>, QuarryError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut in_angle = false;
    let mut escaped = false;

    for c in line.trim().chars() {
        if in_angle {
            current.push(c);
            if c == '>' {
                in_angle = false;
            }
        } else if in_quotes {
            current.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_quotes = false;
            }
        } else if c.is_whitespace() {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
        } else {
            if c == '"' {
                in_quotes = true;
            } else if c == '<' && current.is_empty() {
                in_angle = true;
            }
            current.push(c);
        }
    }
    if in_quotes || in_angle {
        return Err(QuarryError::InvalidPattern(format!(
            "unterminated literal or URI in {:?}",
            line
        )));
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    Ok(tokens)
}

impl fmt::Display for TriplePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.subject, self.predicate, self.object)
    }
}

impl TryFrom<String> for TriplePattern {
    type Error = QuarryError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<TriplePattern> for String {
    fn from(pattern: TriplePattern) -> Self {
        pattern.to_string()
    }
}

// =============================================================================
// QUERY
// =============================================================================

/// A SELECT-style query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    /// Restrict matching to one graph; `None` matches the union of all graphs.
    #[serde(default)]
    pub graph: Option<GraphName>,
    pub patterns: Vec<TriplePattern>,
    /// Variables to project; empty projects every variable.
    #[serde(default)]
    pub select: Vec<String>,
    #[serde(default)]
    pub distinct: bool,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl Query {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one pattern per line.
    pub fn parse(text: &str) -> Result<Self, QuarryError> {
        let patterns = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(|l| TriplePattern::parse(l.trim_end_matches('.').trim_end()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            patterns,
            ..Self::default()
        })
    }

    #[must_use]
    pub fn in_graph(mut self, graph: GraphName) -> Self {
        self.graph = Some(graph);
        self
    }

    #[must_use]
    pub fn pattern(mut self, pattern: TriplePattern) -> Self {
        self.patterns.push(pattern);
        self
    }

    #[must_use]
    pub fn select(mut self, vars: &[&str]) -> Self {
        self.select = vars.iter().map(|v| (*v).to_string()).collect();
        self
    }

    #[must_use]
    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn validate(&self) -> Result<(), QuarryError> {
        if self.patterns.is_empty() {
            return Err(QuarryError::InvalidPattern("no patterns".to_string()));
        }
        for pattern in &self.patterns {
            pattern.validate()?;
        }
        let vars: BTreeSet<&str> = self
            .patterns
            .iter()
            .flat_map(TriplePattern::variables)
            .collect();
        for name in &self.select {
            if !vars.contains(name.as_str()) {
                return Err(QuarryError::InvalidPattern(format!(
                    "selected variable ?{} is not bound by any pattern",
                    name
                )));
            }
        }
        Ok(())
    }
}

// =============================================================================
// EVALUATION
// =============================================================================

impl ResourceGraph {
    /// Evaluate a query and return its rows.
    pub fn query(&self, query: &Query) -> Result<Vec<Row>, QuarryError> {
        query.validate()?;
        let limit = query.limit.unwrap_or(MAX_QUERY_ROWS).min(MAX_QUERY_ROWS);
        let mut rows = Vec::new();
        if limit == 0 {
            return Ok(rows);
        }

        let mut seen = BTreeSet::new();
        let mut bindings = Row::new();
        self.solve(
            &query.patterns,
            query.graph.as_ref(),
            &mut bindings,
            &mut |row| {
                let projected: Row = if query.select.is_empty() {
                    row.clone()
                } else {
                    query
                        .select
                        .iter()
                        .filter_map(|v| row.get(v).map(|t| (v.clone(), t.clone())))
                        .collect()
                };
                if query.distinct && !seen.insert(projected.clone()) {
                    return true;
                }
                rows.push(projected);
                rows.len() < limit
            },
        );
        Ok(rows)
    }

    /// Whether the query has at least one solution.
    pub fn ask(&self, query: &Query) -> Result<bool, QuarryError> {
        let probe = Query {
            limit: Some(1),
            ..query.clone()
        };
        Ok(!self.query(&probe)?.is_empty())
    }

    /// Backtracking join. Returns `false` once `emit` asks to stop.
    fn solve(
        &self,
        patterns: &[TriplePattern],
        graph: Option<&GraphName>,
        bindings: &mut Row,
        emit: &mut dyn FnMut(&Row) -> bool,
    ) -> bool {
        let Some((first, rest)) = patterns.split_first() else {
            return emit(bindings);
        };

        for (subject, predicate, object) in self.match_pattern(first, graph, bindings) {
            let mut bound = Vec::new();
            let consistent = [
                (&first.subject, Term::Uri(subject)),
                (&first.predicate, Term::Uri(predicate)),
                (&first.object, object),
            ]
            .into_iter()
            .all(|(slot, value)| match slot {
                Slot::Fixed(_) => true,
                Slot::Var(name) => match bindings.get(name) {
                    Some(existing) => *existing == value,
                    None => {
                        bindings.insert(name.clone(), value);
                        bound.push(name.clone());
                        true
                    }
                },
            });

            let keep_going = !consistent || self.solve(rest, graph, bindings, emit);
            for name in bound {
                bindings.remove(&name);
            }
            if !keep_going {
                return false;
            }
        }
        true
    }

    /// Candidate triples for one pattern under the current bindings.
    fn match_pattern(
        &self,
        pattern: &TriplePattern,
        graph: Option<&GraphName>,
        bindings: &Row,
    ) -> BTreeSet<(Uri, Uri, Term)> {
        let resolve = |slot: &Slot| -> Option<Term> {
            match slot {
                Slot::Fixed(t) => Some(t.clone()),
                Slot::Var(name) => bindings.get(name).cloned(),
            }
        };
        let subject = resolve(&pattern.subject);
        let predicate = match resolve(&pattern.predicate) {
            Some(Term::Uri(p)) => Some(p),
            Some(_) => return BTreeSet::new(),
            None => None,
        };
        let object = resolve(&pattern.object);

        let graphs: Vec<&GraphName> = match graph {
            Some(g) => vec![g],
            None => self.idx.graphs.keys().collect(),
        };
        let mut out = BTreeSet::new();

        let scan_subject = |g: &GraphName, s: &Uri, out: &mut BTreeSet<(Uri, Uri, Term)>| {
            let Some(props) = self.properties(g, s) else {
                return;
            };
            for (p, values) in props {
                if predicate.as_ref().is_some_and(|want| want != p) {
                    continue;
                }
                for v in values {
                    if object.as_ref().is_none_or(|want| want == v) {
                        out.insert((s.clone(), p.clone(), v.clone()));
                    }
                }
            }
        };

        match (&subject, &object) {
            (Some(Term::Uri(s)), _) => {
                for g in graphs {
                    scan_subject(g, s, &mut out);
                }
            }
            (Some(_), _) => {}
            (None, Some(Term::Uri(target))) => {
                for (g, s, p) in self.idx.referrers.get(target).into_iter().flatten() {
                    if graph.is_some_and(|want| want != g) {
                        continue;
                    }
                    if predicate.as_ref().is_some_and(|want| want != p) {
                        continue;
                    }
                    out.insert((s.clone(), p.clone(), Term::Uri(target.clone())));
                }
            }
            (None, Some(value))
                if predicate
                    .as_ref()
                    .is_some_and(|p| vocab::is_unique(p.as_str())) =>
            {
                if let Some(p) = &predicate {
                    let key = (p.clone(), super::unique_key(value));
                    let holders: Vec<Uri> = self
                        .idx
                        .unique
                        .get(&key)
                        .map(|h| h.keys().cloned().collect())
                        .unwrap_or_default();
                    for s in holders {
                        for g in &graphs {
                            scan_subject(g, &s, &mut out);
                        }
                    }
                }
            }
            (None, _) => {
                for g in graphs {
                    if let Some(partition) = self.idx.graphs.get(g) {
                        for s in partition.keys() {
                            scan_subject(g, s, &mut out);
                        }
                    }
                }
            }
        }
        out
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Triple;
    use crate::vocab::*;

    fn sample() -> ResourceGraph {
        let mut graph = ResourceGraph::new();
        let fs = GraphName::new(GRAPH_FILESYSTEM);
        let t = |s: &str, p: &str, o: Term| Triple::new(Uri::new(s), p, o);
        graph
            .insert(
                fs,
                vec![
                    t("file:///a", RDF_TYPE, Term::uri(NFO_FILE_DATA_OBJECT)),
                    t("file:///a", NIE_URL, Term::literal("file:///a")),
                    t("file:///a", NFO_FILE_SIZE, Term::Integer(10)),
                    t("file:///b", RDF_TYPE, Term::uri(NFO_FILE_DATA_OBJECT)),
                    t("file:///b", NIE_URL, Term::literal("file:///b")),
                    t("file:///b", NFO_FILE_SIZE, Term::Integer(20)),
                ],
            )
            .expect("insert");
        graph
            .insert(
                GraphName::new(GRAPH_DOCUMENTS),
                vec![
                    t("urn:doc", RDF_TYPE, Term::uri(NFO_DOCUMENT)),
                    t("urn:doc", NIE_IS_STORED_AS, Term::uri("file:///a")),
                    t("urn:doc", NIE_TITLE, Term::literal("Hello \"world\"")),
                ],
            )
            .expect("insert");
        graph
    }

    #[test]
    fn parses_slots() {
        assert_eq!(Slot::parse("?x").expect("var"), Slot::var("x"));
        assert_eq!(Slot::parse("a").expect("a"), Slot::uri(RDF_TYPE));
        assert_eq!(
            Slot::parse("<file:///a b>").expect("uri"),
            Slot::uri("file:///a b")
        );
        assert_eq!(
            Slot::parse("-3").expect("int"),
            Slot::term(Term::Integer(-3))
        );
        assert!(Slot::parse("bare").is_err());
        assert!(Slot::parse("?").is_err());
    }

    #[test]
    fn quoted_literal_with_spaces_is_one_slot() {
        let p = TriplePattern::parse(r#"?d nie:title "Hello \"world\"""#).expect("parse");
        assert_eq!(p.object, Slot::term(Term::literal("Hello \"world\"")));
        let round = TriplePattern::parse(&p.to_string()).expect("reparse");
        assert_eq!(round, p);
    }

    #[test]
    fn bracketed_uri_may_contain_spaces() {
        let p = TriplePattern::parse("<file:///My Music/a.mp3> nie:url ?u").expect("parse");
        assert_eq!(p.subject, Slot::uri("file:///My Music/a.mp3"));
    }

    #[test]
    fn literal_subject_is_rejected() {
        assert!(TriplePattern::parse("\"x\" nie:url ?u").is_err());
    }

    #[test]
    fn join_across_graphs() {
        let graph = sample();
        let q = Query::parse(
            "?doc nie:isStoredAs ?file\n\
             ?file nfo:fileSize ?size",
        )
        .expect("parse")
        .select(&["doc", "size"]);
        let rows = graph.query(&q).expect("query");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["size"], Term::Integer(10));
        assert_eq!(rows[0]["doc"], Term::uri("urn:doc"));
    }

    #[test]
    fn graph_scope_limits_matches() {
        let graph = sample();
        let q = Query::parse("?s a ?type")
            .expect("parse")
            .in_graph(GraphName::new(GRAPH_DOCUMENTS));
        assert_eq!(graph.query(&q).expect("query").len(), 1);
    }

    #[test]
    fn lookup_by_unique_url() {
        let graph = sample();
        let q = Query::parse("?f nie:url \"file:///b\"").expect("parse");
        let rows = graph.query(&q).expect("query");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["f"], Term::uri("file:///b"));
    }

    #[test]
    fn distinct_and_limit() {
        let graph = sample();
        let q = Query::parse("?f a nfo:FileDataObject")
            .expect("parse")
            .limit(1);
        assert_eq!(graph.query(&q).expect("query").len(), 1);

        let q = Query::parse("?f ?p ?o")
            .expect("parse")
            .in_graph(GraphName::new(GRAPH_FILESYSTEM))
            .select(&["f"])
            .distinct();
        assert_eq!(graph.query(&q).expect("query").len(), 2);
    }

    #[test]
    fn ask_reports_presence() {
        let graph = sample();
        assert!(
            graph
                .ask(&Query::parse("<file:///a> a nfo:FileDataObject").expect("parse"))
                .expect("ask")
        );
        assert!(
            !graph
                .ask(&Query::parse("<file:///zzz> ?p ?o").expect("parse"))
                .expect("ask")
        );
    }

    #[test]
    fn repeated_variable_must_agree() {
        let graph = sample();
        let q = Query::parse("?x nie:url ?x").expect("parse");
        assert!(graph.query(&q).expect("query").is_empty());
    }

    #[test]
    fn unknown_select_variable_is_rejected() {
        let graph = sample();
        let q = Query::parse("?s ?p ?o").expect("parse").select(&["nope"]);
        assert!(graph.query(&q).is_err());
    }
}
