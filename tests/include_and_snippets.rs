//! INCLUDE splicing, embedded snippets and definition-file instruments.

mod common;

use common::{dispatcher, lines, registry, settings, Counters};
use daq_script::adapters::MockTransports;
use daq_script::script::LineNumber;
use daq_script::scripting::RhaiEngine;
use daq_script::{DispatchError, Dispatcher, HandlerRegistry, PassOutcome, Settings};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn project(files: &[(&str, &str)]) -> (TempDir, Settings) {
    let dir = tempfile::tempdir().unwrap();
    for (name, body) in files {
        fs::write(dir.path().join(name), body).unwrap();
    }
    let mut settings = settings();
    settings.paths.project_dir = Some(dir.path().to_path_buf());
    (dir, settings)
}

/// Four lines, so an INCLUDE appended to it sits on line 5.
const HEADER: &str = "MAKE a; Recorder; none
% comment

a touch
";

#[tokio::test]
async fn included_lines_report_the_including_line() {
    let (_dir, settings) = project(&[("warmup.dsc", "a touch\na check 12\na touch")]);
    let counters = Arc::new(Counters::default());
    let d = dispatcher(&counters, &MockTransports::new(), settings);

    let script = lines(&format!("{HEADER}INCLUDE warmup\na touch"));
    let failure = d.run(&script).await.unwrap_err();

    assert_eq!(failure.error.kind(), "RangeViolation");
    assert_eq!(failure.line, LineNumber::new(5).included(2));
    assert_eq!(failure.line.to_string(), "line 5 (included line 2)");
    assert_eq!(failure.text, "a check 12");
}

#[tokio::test]
async fn lines_after_an_include_keep_their_own_number() {
    let (_dir, settings) = project(&[("warmup.dsc", "a touch\na check 3")]);
    let counters = Arc::new(Counters::default());
    let d = dispatcher(&counters, &MockTransports::new(), settings);

    let script = lines(&format!("{HEADER}INCLUDE warmup\na check 99"));
    let failure = d.run(&script).await.unwrap_err();
    assert_eq!(failure.line, LineNumber::new(6));
    assert!(!failure.line.is_included());
}

#[tokio::test]
async fn last_included_line_keeps_its_sub_index() {
    let (_dir, settings) = project(&[("warmup.dsc", "a touch\na check 3\na bogus")]);
    let counters = Arc::new(Counters::default());
    let d = dispatcher(&counters, &MockTransports::new(), settings);

    let script = lines(&format!("{HEADER}INCLUDE warmup\na touch"));
    let failure = d.run(&script).await.unwrap_err();
    assert_eq!(failure.error.kind(), "UnknownCommand");
    assert_eq!(failure.line, LineNumber::new(5).included(3));
}

#[tokio::test]
async fn nested_includes_stack_sub_indices() {
    let (_dir, settings) = project(&[
        ("outer.dsc", "a touch\nINCLUDE \"inner.dsc\""),
        ("inner.dsc", "a check x"),
    ]);
    let counters = Arc::new(Counters::default());
    let d = dispatcher(&counters, &MockTransports::new(), settings);

    let failure = d
        .run(&lines("MAKE a; Recorder; none\nINCLUDE outer"))
        .await
        .unwrap_err();
    assert_eq!(failure.error.kind(), "TypeConversionFailure");
    assert_eq!(failure.line.to_string(), "line 2 (included line 2 > 1)");
}

#[tokio::test]
async fn included_lines_run_in_the_live_pass() {
    let (_dir, settings) = project(&[("warmup.dsc", "a touch\na touch")]);
    let counters = Arc::new(Counters::default());
    let d = dispatcher(&counters, &MockTransports::new(), settings);

    let outcome = d
        .execute(&lines("MAKE a; Recorder; none\nINCLUDE warmup\na touch"))
        .await
        .unwrap();
    assert_eq!(outcome, PassOutcome::Completed);
    assert_eq!(Counters::get(&counters.touched), 3);
}

#[tokio::test]
async fn missing_include_is_reported() {
    let (_dir, settings) = project(&[]);
    let counters = Arc::new(Counters::default());
    let d = dispatcher(&counters, &MockTransports::new(), settings);

    let failure = d.run(&lines("INCLUDE nowhere")).await.unwrap_err();
    assert!(
        matches!(&failure.error, DispatchError::FileNotFound(path) if path.ends_with("nowhere.dsc"))
    );
    assert_eq!(failure.line, LineNumber::new(1));
}

#[tokio::test]
async fn self_include_is_a_cycle() {
    let (_dir, settings) = project(&[("loop.dsc", "a touch\nINCLUDE loop")]);
    let counters = Arc::new(Counters::default());
    let d = dispatcher(&counters, &MockTransports::new(), settings);

    let script = lines("MAKE a; Recorder; none\nINCLUDE loop");
    let failure = tokio::time::timeout(Duration::from_secs(3), d.run(&script))
        .await
        .expect("include cycle must end the pass")
        .unwrap_err();
    assert!(
        matches!(&failure.error, DispatchError::IncludeCycle(path) if path.ends_with("loop.dsc"))
    );
    assert_eq!(failure.line, LineNumber::new(2).included(2));
}

#[tokio::test]
async fn indirect_include_cycle_is_reported() {
    let (_dir, settings) = project(&[
        ("first.dsc", "a touch\nINCLUDE second"),
        ("second.dsc", "INCLUDE first"),
    ]);
    let counters = Arc::new(Counters::default());
    let d = dispatcher(&counters, &MockTransports::new(), settings);

    let script = lines("MAKE a; Recorder; none\nINCLUDE first");
    let failure = tokio::time::timeout(Duration::from_secs(3), d.run(&script))
        .await
        .expect("include cycle must end the pass")
        .unwrap_err();
    assert_eq!(failure.error.kind(), "IncludeCycle");
    assert_eq!(failure.line.to_string(), "line 2 (included line 2 > 1)");
}

#[tokio::test]
async fn same_file_may_be_included_twice_in_sequence() {
    let (_dir, settings) = project(&[("warmup.dsc", "a touch")]);
    let counters = Arc::new(Counters::default());
    let d = dispatcher(&counters, &MockTransports::new(), settings);

    let outcome = d
        .execute(&lines("MAKE a; Recorder; none\nINCLUDE warmup\nINCLUDE warmup"))
        .await
        .unwrap();
    assert_eq!(outcome, PassOutcome::Completed);
    assert_eq!(Counters::get(&counters.touched), 2);
}

#[tokio::test]
async fn unreadable_include_is_an_include_error() {
    let (dir, settings) = project(&[]);
    fs::write(dir.path().join("binary.dsc"), [0xff, 0xfe, 0x00, 0xc3]).unwrap();
    let counters = Arc::new(Counters::default());
    let d = dispatcher(&counters, &MockTransports::new(), settings);

    let failure = d.run(&lines("INCLUDE binary")).await.unwrap_err();
    assert_eq!(failure.error.kind(), "IncludeReadFailure");
    assert!(
        matches!(&failure.error, DispatchError::IncludeRead { path, .. } if path.ends_with("binary.dsc"))
    );
}

fn snippet_dispatcher(counters: &Arc<Counters>, settings: Settings) -> (Dispatcher, Arc<RhaiEngine>) {
    let engine = Arc::new(RhaiEngine::default());
    let d = Dispatcher::new(
        registry(counters),
        Arc::new(MockTransports::new()),
        engine.clone(),
        Arc::new(settings),
    );
    (d, engine)
}

#[tokio::test]
async fn snippet_blocks_run_as_one_unit() {
    let counters = Arc::new(Counters::default());
    let (d, engine) = snippet_dispatcher(&counters, settings());

    let script = lines(
        "MAKE a; Recorder; none
         | let x = 2;
         | x += 3;
         a touch
         | let y = x * 10;",
    );
    assert_eq!(d.execute(&script).await.unwrap(), PassOutcome::Completed);
    assert_eq!(engine.variable("x").as_deref(), Some("5"));
    assert_eq!(engine.variable("y").as_deref(), Some("50"));
    assert_eq!(Counters::get(&counters.touched), 1);
}

#[tokio::test]
async fn snippet_errors_point_at_the_first_line_of_the_block() {
    let counters = Arc::new(Counters::default());
    let (d, _engine) = snippet_dispatcher(&counters, settings());

    let script = lines(
        "MAKE a; Recorder; none
         | let a = 1;
         | let = ;
         a touch",
    );
    let failure = d.run(&script).await.unwrap_err();
    assert_eq!(failure.error.kind(), "SnippetFailure");
    assert_eq!(failure.line, LineNumber::new(2));
}

#[tokio::test]
async fn snippet_files_are_executed_not_spliced() {
    let (_dir, settings) = project(&[("setup.rhai", "let gain = 4;\nlet offset = gain + 1;")]);
    let counters = Arc::new(Counters::default());
    let (d, engine) = snippet_dispatcher(&counters, settings);

    d.run(&lines("INCLUDE setup.rhai")).await.unwrap();
    assert_eq!(engine.variable("offset").as_deref(), Some("5"));
}

const KEITHLEY: &str = "% Keithley 2000 multimeter
getReading {Latest reading} | READ?
setRange | RANG %.1f | Range {V} [0,1000]
saveTrace | TRAC:DATA? | Extension
";

fn keithley_registry(dir: &Path) -> HandlerRegistry {
    fs::write(dir.join("Keithley 2000.gpibinstrument"), KEITHLEY).unwrap();
    let mut registry = HandlerRegistry::with_builtins().unwrap();
    let names = registry.scan(Some(dir)).unwrap();
    assert!(names["Keithley 2000"].starts_with("generic:"));
    registry
}

#[tokio::test]
async fn definition_file_instrument_runs_end_to_end() {
    let definitions = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let mut settings = settings();
    settings.paths.output_dir = output.path().to_path_buf();

    let mock = MockTransports::new()
        .with_reply("READ?", "+1.500E+00")
        .with_reply("TRAC:DATA?", "1,2,3");
    let d = Dispatcher::new(
        keithley_registry(definitions.path()),
        Arc::new(mock.clone()),
        Arc::new(RhaiEngine::default()),
        Arc::new(settings),
    );

    let script = lines(
        "MAKE dvm; Keithley 2000; GPIB 16
         dvm setRange 100
         dvm getReading
         dvm saveTrace .csv",
    );
    assert_eq!(d.execute(&script).await.unwrap(), PassOutcome::Completed);

    assert_eq!(
        mock.messages_to("GPIB#16"),
        vec!["*CLS", "RANG 100.0", "READ?", "TRAC:DATA?"]
    );
    let saved = fs::read_to_string(output.path().join("measurement.csv")).unwrap();
    assert_eq!(saved, "1,2,3");
    assert_eq!(mock.closed(), vec!["GPIB#16"]);
}

#[tokio::test]
async fn definition_file_ranges_are_checked_before_going_live() {
    let definitions = tempfile::tempdir().unwrap();
    let mock = MockTransports::new();
    let d = Dispatcher::new(
        keithley_registry(definitions.path()),
        Arc::new(mock.clone()),
        Arc::new(RhaiEngine::default()),
        Arc::new(settings()),
    );

    let failure = d
        .execute(&lines("MAKE dvm; Keithley 2000; GPIB 16\ndvm setRange 5000"))
        .await
        .unwrap_err();
    assert!(matches!(
        &failure.error,
        DispatchError::RangeViolation { parameter, .. } if parameter == "Range"
    ));
    assert_eq!(failure.line, LineNumber::new(2));
    assert!(mock.opened().is_empty());
    assert!(mock.sent().is_empty());
}

#[tokio::test]
async fn definition_instruments_refuse_other_transports() {
    let definitions = tempfile::tempdir().unwrap();
    let d = Dispatcher::new(
        keithley_registry(definitions.path()),
        Arc::new(MockTransports::new()),
        Arc::new(RhaiEngine::default()),
        Arc::new(settings()),
    );

    let failure = d
        .run(&lines("MAKE dvm; Keithley 2000; COM2, 9600, 8, 1, none"))
        .await
        .unwrap_err();
    assert_eq!(failure.error.kind(), "UnsupportedTransport");
}
