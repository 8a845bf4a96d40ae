//! JUnit XML report: one test case per phase.

use chrono::SecondsFormat;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use crate::error::{Error, Result};
use crate::result::RunResult;

const SUITE_NAME: &str = "phasegate";

/// Renders the report; a `<failure>` element appears iff the phase failed.
pub fn render(result: &RunResult) -> Result<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

    let tests = result.phases.len().to_string();
    let failures = result.failed_phases().count().to_string();
    let time = seconds(result.total_duration_ms());
    let timestamp = result
        .start_time
        .to_rfc3339_opts(SecondsFormat::Secs, true);

    emit(
        &mut writer,
        Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)),
    )?;

    let mut suites = BytesStart::new("testsuites");
    suites.push_attribute(("name", SUITE_NAME));
    suites.push_attribute(("tests", tests.as_str()));
    suites.push_attribute(("failures", failures.as_str()));
    suites.push_attribute(("time", time.as_str()));
    emit(&mut writer, Event::Start(suites))?;

    let mut suite = BytesStart::new("testsuite");
    suite.push_attribute(("name", SUITE_NAME));
    suite.push_attribute(("tests", tests.as_str()));
    suite.push_attribute(("failures", failures.as_str()));
    suite.push_attribute(("errors", "0"));
    suite.push_attribute(("skipped", "0"));
    suite.push_attribute(("time", time.as_str()));
    suite.push_attribute(("timestamp", timestamp.as_str()));
    emit(&mut writer, Event::Start(suite))?;

    for phase in &result.phases {
        let classname = format!("{}.{}", SUITE_NAME, phase.name);
        let time = seconds(phase.duration_ms);

        let mut case = BytesStart::new("testcase");
        case.push_attribute(("name", phase.name.as_str()));
        case.push_attribute(("classname", classname.as_str()));
        case.push_attribute(("time", time.as_str()));

        if phase.is_failed() {
            let message =
                sanitize_xml_text(phase.error_message.as_deref().unwrap_or("phase failed"));
            emit(&mut writer, Event::Start(case))?;

            let mut failure = BytesStart::new("failure");
            failure.push_attribute(("message", first_line(&message)));
            failure.push_attribute(("type", "PhaseExecutionError"));
            emit(&mut writer, Event::Start(failure))?;
            emit(&mut writer, Event::Text(BytesText::new(&message)))?;
            emit(&mut writer, Event::End(BytesEnd::new("failure")))?;

            emit(&mut writer, Event::End(BytesEnd::new("testcase")))?;
        } else {
            emit(&mut writer, Event::Empty(case))?;
        }
    }

    emit(&mut writer, Event::End(BytesEnd::new("testsuite")))?;
    emit(&mut writer, Event::End(BytesEnd::new("testsuites")))?;

    let mut xml = String::from_utf8(writer.into_inner()).map_err(xml_error)?;
    xml.push('\n');
    Ok(xml)
}

fn emit(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<()> {
    writer.write_event(event).map_err(xml_error)
}

fn xml_error(e: impl std::fmt::Display) -> Error {
    Error::ReportGeneration {
        artifact: "junit".to_string(),
        reason: e.to_string(),
    }
}

fn seconds(ms: u64) -> String {
    format!("{:.3}", ms as f64 / 1000.0)
}

fn first_line(message: &str) -> &str {
    message.lines().next().unwrap_or(message)
}

/// Drops ANSI escape sequences and any character XML 1.0 does not allow.
fn sanitize_xml_text(text: &str) -> String {
    let mut clean = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\u{1b}' {
            if chars.peek() == Some(&'[') {
                chars.next();
                // CSI parameters run until a final byte in @..~
                for c in chars.by_ref() {
                    if ('@'..='~').contains(&c) {
                        break;
                    }
                }
            }
            continue;
        }
        if is_xml_char(c) {
            clean.push(c);
        }
    }

    clean
}

fn is_xml_char(c: char) -> bool {
    matches!(c,
        '\t' | '\n' | '\r'
        | '\u{20}'..='\u{d7ff}'
        | '\u{e000}'..='\u{fffd}'
        | '\u{10000}'..='\u{10ffff}')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::fixtures;

    #[test]
    fn one_case_per_phase_with_failure_only_when_failed() {
        let xml = render(&fixtures::mixed_run()).unwrap();

        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert_eq!(xml.matches("<testcase ").count(), 3);
        assert_eq!(xml.matches("<failure ").count(), 1);
        assert!(xml.contains(r#"<testsuite name="phasegate" tests="3" failures="1""#));
        assert!(xml.contains(r#"<testcase name="lint" classname="phasegate.lint" time="1.200"/>"#));
        assert!(xml.contains(r#"timestamp="2026-03-01T12:00:00Z""#));
    }

    #[test]
    fn failure_text_is_escaped() {
        let xml = render(&fixtures::mixed_run()).unwrap();
        assert!(xml.contains("&lt;b&gt; &amp;"));
        assert!(!xml.contains("<b>"));
    }

    #[test]
    fn passing_run_has_no_failures() {
        let xml = render(&fixtures::clean_run()).unwrap();
        assert!(xml.contains(r#"failures="0""#));
        assert!(!xml.contains("<failure"));
    }

    #[test]
    fn control_characters_are_stripped() {
        assert_eq!(sanitize_xml_text("\u{1b}[31mFAIL\u{1b}[0m done"), "FAIL done");
        assert_eq!(sanitize_xml_text("a\u{8}b\u{0}c\u{fffe}\td\n"), "abc\td\n");
        assert_eq!(sanitize_xml_text("ünïcode ✓ 𝄞"), "ünïcode ✓ 𝄞");
    }

    #[test]
    fn colored_failure_output_stays_well_formed() {
        let mut result = fixtures::mixed_run();
        for phase in result.phases.iter_mut().filter(|p| p.is_failed()) {
            phase.error_message =
                Some("`npx jest` exited with code 1: \u{1b}[31mFAIL\u{1b}[0m src/app.test.ts\u{8}".to_string());
        }

        let xml = render(&result).unwrap();
        assert!(!xml.contains('\u{1b}'));
        assert!(!xml.contains('\u{8}'));

        let mut reader = quick_xml::Reader::from_str(&xml);
        let mut text = String::new();
        loop {
            match reader.read_event() {
                Ok(Event::Eof) => break,
                Ok(Event::Text(t)) => text.push_str(&t.unescape().unwrap()),
                Ok(_) => {}
                Err(e) => panic!("junit output is not well-formed: {}", e),
            }
        }
        assert!(text.contains("FAIL src/app.test.ts"));
    }

    #[test]
    fn rendering_is_deterministic() {
        let result = fixtures::mixed_run();
        assert_eq!(render(&result).unwrap(), render(&result).unwrap());
    }
}
