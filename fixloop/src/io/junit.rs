//! JUnit XML report parsing, plus a textual fallback for verbose runner output.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use regex::Regex;

use crate::core::types::{TestOutcome, TestResults};

/// Body of a `<failure>`, `<error>` or `<skipped>` marker.
#[derive(Debug, Default)]
struct Marker {
    message: String,
    text: String,
}

impl Marker {
    fn output(&self) -> String {
        if self.text.trim().is_empty() {
            self.message.clone()
        } else {
            self.text.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MarkerKind {
    Failure,
    Error,
    Skipped,
}

impl MarkerKind {
    fn from_tag(tag: &[u8]) -> Option<Self> {
        match tag {
            b"failure" => Some(Self::Failure),
            b"error" => Some(Self::Error),
            b"skipped" => Some(Self::Skipped),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct CaseBuilder {
    name: Option<String>,
    failure: Option<Marker>,
    error: Option<Marker>,
    skipped: Option<Marker>,
    open_marker: Option<MarkerKind>,
}

impl CaseBuilder {
    fn from_element(element: &BytesStart<'_>) -> Result<Self> {
        let mut classname = String::new();
        let mut name = String::new();
        for attr in element.attributes() {
            let attr = attr.context("read testcase attribute")?;
            let value = attr.unescape_value().context("unescape testcase attribute")?;
            match attr.key.as_ref() {
                b"classname" => classname = value.into_owned(),
                b"name" => name = value.into_owned(),
                _ => {}
            }
        }
        let name = match (classname.is_empty(), name.is_empty()) {
            (false, false) => Some(qualified_name(&classname, &name)),
            (true, false) => Some(name),
            _ => None,
        };
        Ok(Self {
            name,
            ..Self::default()
        })
    }

    fn marker_mut(&mut self, kind: MarkerKind) -> &mut Option<Marker> {
        match kind {
            MarkerKind::Failure => &mut self.failure,
            MarkerKind::Error => &mut self.error,
            MarkerKind::Skipped => &mut self.skipped,
        }
    }

    fn open(&mut self, kind: MarkerKind, element: &BytesStart<'_>) -> Result<()> {
        let mut message = String::new();
        for attr in element.attributes() {
            let attr = attr.context("read marker attribute")?;
            if attr.key.as_ref() == b"message" {
                message = attr
                    .unescape_value()
                    .context("unescape marker message")?
                    .into_owned();
            }
        }
        let slot = self.marker_mut(kind);
        if slot.is_none() {
            *slot = Some(Marker {
                message,
                text: String::new(),
            });
        }
        Ok(())
    }

    fn push_text(&mut self, text: &str) {
        let Some(kind) = self.open_marker else {
            return;
        };
        if let Some(marker) = self.marker_mut(kind) {
            marker.text.push_str(text);
        }
    }

    /// A test case passes iff it has no failure, error or skipped marker.
    fn finish(self) -> Option<TestOutcome> {
        let name = self.name?;
        if let Some(marker) = self.failure.as_ref().or(self.error.as_ref()) {
            return Some(TestOutcome::failing(name, marker.output()));
        }
        if let Some(marker) = &self.skipped {
            return Some(TestOutcome::skipped(name, marker.output()));
        }
        Some(TestOutcome::passing(name))
    }
}

/// Prefix pytest uses to collect test classes by default.
const TEST_CLASS_PREFIX: &str = "Test";

/// Join a JUnit `classname` and test `name` into `module::Class::test`.
///
/// pytest reports class-based tests with the class folded into the dotted
/// classname (`tests.test_calc.TestCalc`). Trailing segments that look like
/// test classes belong to the selector, not the module path.
fn qualified_name(classname: &str, name: &str) -> String {
    let mut segments: Vec<&str> = classname.split('.').collect();
    let mut classes = Vec::new();
    while segments.len() > 1
        && segments
            .last()
            .is_some_and(|segment| segment.starts_with(TEST_CLASS_PREFIX))
    {
        classes.extend(segments.pop());
    }
    classes.reverse();

    let mut qualified = segments.join(".");
    for class in classes {
        qualified.push_str("::");
        qualified.push_str(class);
    }
    qualified.push_str("::");
    qualified.push_str(name);
    qualified
}

/// Parse a JUnit XML report into outcomes keyed by `module::name`, with any
/// test class between the two (`module::Class::name`).
///
/// Malformed XML is an error; callers treat it as a failed discovery.
pub fn parse_junit_xml(xml: &str) -> Result<TestResults> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut results = TestResults::new();
    let mut current: Option<CaseBuilder> = None;

    loop {
        let event = reader
            .read_event()
            .with_context(|| format!("parse junit xml at byte {}", reader.buffer_position()))?;
        match event {
            Event::Start(element) => {
                let tag = element.name();
                if tag.as_ref() == b"testcase" {
                    current = Some(CaseBuilder::from_element(&element)?);
                } else if let (Some(case), Some(kind)) =
                    (current.as_mut(), MarkerKind::from_tag(tag.as_ref()))
                {
                    case.open(kind, &element)?;
                    case.open_marker = Some(kind);
                }
            }
            Event::Empty(element) => {
                let tag = element.name();
                if tag.as_ref() == b"testcase" {
                    if let Some(outcome) = CaseBuilder::from_element(&element)?.finish() {
                        results.insert(outcome.name.clone(), outcome);
                    }
                } else if let (Some(case), Some(kind)) =
                    (current.as_mut(), MarkerKind::from_tag(tag.as_ref()))
                {
                    case.open(kind, &element)?;
                }
            }
            Event::Text(text) => {
                if let Some(case) = current.as_mut() {
                    let text = text.unescape().context("unescape junit text")?;
                    case.push_text(&text);
                }
            }
            Event::CData(data) => {
                if let Some(case) = current.as_mut() {
                    case.push_text(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::End(element) => {
                let tag = element.name();
                if tag.as_ref() == b"testcase" {
                    if let Some(outcome) = current.take().and_then(CaseBuilder::finish) {
                        results.insert(outcome.name.clone(), outcome);
                    }
                } else if MarkerKind::from_tag(tag.as_ref()).is_some() {
                    if let Some(case) = current.as_mut() {
                        case.open_marker = None;
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(results)
}

static VERBOSE_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\S+::\S+)\s+(PASSED|FAILED|ERROR|SKIPPED|XFAIL|XPASS)\b")
        .expect("verbose line regex should be valid")
});

/// Best-effort parse of `pytest -v` output lines (`path::test PASSED`).
///
/// Only used when no structured report was written. Outcomes carry no
/// diagnostic text.
pub fn parse_verbose_output(output: &str) -> TestResults {
    let mut results = TestResults::new();
    for line in output.lines() {
        let Some(caps) = VERBOSE_LINE_RE.captures(line.trim()) else {
            continue;
        };
        let name = caps[1].to_string();
        let outcome = match &caps[2] {
            "PASSED" | "XPASS" => TestOutcome::passing(name),
            "FAILED" | "ERROR" => TestOutcome::failing(name, String::new()),
            _ => TestOutcome::skipped(name, String::new()),
        };
        results.insert(outcome.name.clone(), outcome);
    }
    results
}
