use std::sync::{Arc, Mutex};

use roffline::{Diagnostic, FontId, FormatError, GlyphMetrics, Node};
use roffline_format::{
    AdjustMode, DivertedItem, FormatConfig, NoTraps, OutputLine, PageCollector, Session,
    SinkEvent, TopLevel,
};

/// Every glyph and every space is 25 units wide.
struct QuarterMetrics;

impl GlyphMetrics for QuarterMetrics {
    fn char_width(&self, _ch: char, _font: FontId, _size: i32) -> Option<i32> {
        Some(25)
    }

    fn space_width(&self, _font: FontId, _size: i32, _space_size: i32) -> i32 {
        25
    }
}

fn session(line_length: i32, page_length: i32) -> Session<PageCollector> {
    let mut cfg = FormatConfig::for_page(line_length, page_length);
    cfg.page_offset = 0;
    Session::new(cfg, PageCollector::new()).expect("default font is valid")
}

fn diagnostics_of(s: &mut Session<PageCollector>) -> Arc<Mutex<Vec<Diagnostic>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    s.set_diagnostic_sink(move |d| sink.lock().unwrap().push(d));
    seen
}

fn line(vertical_spacing: i32) -> OutputLine {
    OutputLine {
        nodes: Vec::new(),
        width: 0,
        vertical_spacing,
        post_vertical_spacing: 0,
        retain_size: false,
    }
}

#[test]
fn pending_width_tracks_units_at_every_step() {
    let mut s = session(900, 100_000);
    let text = "The quick brown fox jumps over the lazy dog.  Again, and again";
    for ch in text.chars() {
        match ch {
            ' ' => s.word_space(&mut NoTraps).unwrap(),
            other => s.add_character(other),
        }
        let env = s.env();
        let sum: i32 = env.line().iter().map(Node::width).sum();
        assert_eq!(env.width_total(), sum, "after {:?}", ch);
    }
}

#[test]
fn filled_lines_never_exceed_the_line_length_when_a_fit_exists() {
    let mut s = session(1200, 100_000);
    let seen = diagnostics_of(&mut s);
    let words = ["alpha", "be", "gamma", "delta", "epsilon", "zeta", "eta", "theta"];
    for idx in 0..120 {
        s.add_text(words[idx % words.len()], &mut NoTraps).unwrap();
        s.word_space(&mut NoTraps).unwrap();
    }
    s.finish(&mut NoTraps).unwrap();

    let page = &s.sink().pages()[0];
    assert!(page.lines.len() > 10);
    let (last, body) = page.lines.split_last().unwrap();
    for l in body {
        assert_eq!(l.width, 1200, "justified line {:?}", l.text);
    }
    assert!(last.width <= 1200);
    assert!(!seen
        .lock()
        .unwrap()
        .iter()
        .any(|d| matches!(d, Diagnostic::CannotBreakLine { .. })));
}

#[test]
fn overlong_word_goes_out_with_a_warning() {
    let mut s = session(300, 100_000);
    let seen = diagnostics_of(&mut s);
    s.add_text("supercalifragilistic tail ", &mut NoTraps).unwrap();
    s.finish(&mut NoTraps).unwrap();
    assert_eq!(s.sink().text_lines(), vec!["supercalifragilistic", "tail"]);
    assert!(seen
        .lock()
        .unwrap()
        .iter()
        .any(|d| matches!(d, Diagnostic::CannotBreakLine { .. })));
}

#[test]
fn consecutive_hyphenated_lines_respect_the_limit() {
    let mut cfg = FormatConfig::for_page(1000, 100_000);
    cfg.hyphenation.line_max = 1;
    let mut s = Session::new(cfg, PageCollector::new()).unwrap();
    s.add_exceptions("hy-phen-ation");
    for _ in 0..10 {
        s.add_text("hyphenation ", &mut NoTraps).unwrap();
        assert!(s.registers().hyphenated_line_count <= 1);
    }
    s.finish(&mut NoTraps).unwrap();

    let lines = s.sink().text_lines();
    let hyphenated: Vec<bool> = lines.iter().map(|l| l.ends_with('-')).collect();
    assert_eq!(lines[0], "hyphenation hyphen-");
    assert!(hyphenated.iter().any(|h| *h));
    assert!(!hyphenated.windows(2).any(|w| w[0] && w[1]), "{:?}", lines);
    assert_eq!(s.registers().hyphenated_line_count, 0);
}

#[test]
fn hyphen_limit_holds_inside_a_single_long_word() {
    let mut cfg = FormatConfig::for_page(400, 100_000);
    cfg.hyphenation.line_max = 1;
    let mut s = Session::new(cfg, PageCollector::new()).unwrap();
    let seen = diagnostics_of(&mut s);
    s.add_exceptions("aaaaaa-bbbbbb-cccccc-dddddd");
    s.add_text("aaaaaabbbbbbccccccdddddd ", &mut NoTraps).unwrap();
    assert!(s.registers().hyphenated_line_count <= 1);
    s.add_text("x ", &mut NoTraps).unwrap();
    s.finish(&mut NoTraps).unwrap();

    let lines = s.sink().text_lines();
    assert_eq!(lines[0], "aaaaaa-");
    assert!(
        !lines.windows(2).any(|w| w[0].ends_with('-') && w[1].ends_with('-')),
        "{:?}",
        lines
    );
    assert!(seen
        .lock()
        .unwrap()
        .iter()
        .any(|d| matches!(d, Diagnostic::CannotBreakLine { .. })));
}

#[test]
fn both_adjustment_warns_when_a_line_has_no_stretchable_space() {
    let mut cfg = FormatConfig::for_page(500, 100_000);
    cfg.adjust = AdjustMode::Both;
    let mut s = Session::new(cfg, PageCollector::new()).unwrap();
    let seen = diagnostics_of(&mut s);
    s.add_text("short supercalifragilisticexpialidocious ", &mut NoTraps)
        .unwrap();
    s.finish(&mut NoTraps).unwrap();

    assert_eq!(s.sink().text_lines()[0], "short");
    assert!(seen.lock().unwrap().iter().any(|d| matches!(
        d,
        Diagnostic::CannotAdjustLine {
            width: 250,
            target: 500
        }
    )));
}

#[test]
fn copy_file_through_reaches_the_device_at_top_level() {
    let mut s = session(1000, 100_000);
    s.copy_file_through("cover.ps", &mut NoTraps).unwrap();
    s.set_fill(false, &mut NoTraps).unwrap();
    s.add_text("hello\n", &mut NoTraps).unwrap();
    s.copy_file_through("logo.ps", &mut NoTraps).unwrap();
    s.finish(&mut NoTraps).unwrap();

    let events = s.sink().events();
    assert!(matches!(events[0], SinkEvent::BeginPage { .. }));
    assert_eq!(
        events[1],
        SinkEvent::CopyFile {
            y: 0,
            path: "cover.ps".to_string()
        }
    );
    assert!(matches!(&events[2], SinkEvent::Line { text, .. } if text == "hello"));
    assert_eq!(
        events[3],
        SinkEvent::CopyFile {
            y: 120,
            path: "logo.ps".to_string()
        }
    );
}

#[test]
fn copy_file_through_is_captured_and_replayed() {
    let mut s = session(1000, 100_000);
    s.set_fill(false, &mut NoTraps).unwrap();
    s.divert("fig", false);
    s.add_text("caption\n", &mut NoTraps).unwrap();
    s.copy_file_through("figure.eps", &mut NoTraps).unwrap();
    s.close_diversion();

    let items = s.macro_content("fig").unwrap().items();
    assert_eq!(items.len(), 2);
    assert!(matches!(items[0], DivertedItem::Line { .. }));
    assert_eq!(items[1], DivertedItem::CopyFile("figure.eps".to_string()));
    assert!(!s
        .sink()
        .events()
        .iter()
        .any(|e| matches!(e, SinkEvent::CopyFile { .. })));

    s.output_captured("fig", &mut NoTraps).unwrap();
    s.finish(&mut NoTraps).unwrap();
    let events = s.sink().events();
    let line_at = events
        .iter()
        .position(|e| matches!(e, SinkEvent::Line { text, .. } if text == "caption"))
        .unwrap();
    assert!(events[line_at + 1..].iter().any(
        |e| matches!(e, SinkEvent::CopyFile { path, .. } if path == "figure.eps")
    ));
}

#[test]
fn top_level_position_advances_by_requested_amounts() {
    let mut top = TopLevel::new(10_000, 0);
    let mut sink = PageCollector::new();
    assert!(top.begin_page(0, true, &mut sink).is_none());

    let mut expected = 0;
    for (idx, amount) in [120, 40, 0, 240, 360].into_iter().enumerate() {
        if idx % 2 == 0 {
            top.space(amount, false, true).unwrap();
        } else {
            top.output(&line(amount), true, &mut sink).unwrap();
        }
        expected += amount;
        assert_eq!(top.vertical_position(), expected);
        assert!(top.high_water_mark() <= expected);
    }
    top.space(-100_000, false, true).unwrap();
    assert_eq!(top.vertical_position(), 0);
}

#[test]
fn page_trap_fires_once_per_crossing() {
    let mut s = session(1000, 2400);
    s.top_level_mut().plant_trap("mid", 500);
    let mut springs = Vec::new();
    let mut handler = |name: &str, s: &mut Session<PageCollector>| -> Result<(), FormatError> {
        springs.push((name.to_string(), s.top_level().page_number()));
        Ok(())
    };
    s.set_fill(false, &mut handler).unwrap();
    for _ in 0..8 {
        s.add_text("line\n", &mut handler).unwrap();
    }
    s.begin_new_page(None, &mut handler).unwrap();
    for _ in 0..8 {
        s.add_text("line\n", &mut handler).unwrap();
    }
    assert_eq!(
        springs,
        vec![("mid".to_string(), 1), ("mid".to_string(), 2)]
    );
}

#[test]
fn both_adjustment_spreads_deficit_without_hyphenating() {
    let cfg = FormatConfig::for_page(700, 100_000);
    let mut s = Session::with_metrics(cfg, Arc::new(QuarterMetrics), PageCollector::new()).unwrap();
    s.divert("out", false);
    // 300 + two-slot space (50) + 300 + 25 + 75 puts 750 on the line.
    s.add_text("aaaaaaaaaaaa  bbbbbbbbbbbb ccc ", &mut NoTraps).unwrap();
    s.do_break(false, &mut NoTraps).unwrap();
    s.close_diversion();

    let captured = s.macro_content("out").unwrap();
    assert_eq!(
        captured.text_lines(),
        vec!["aaaaaaaaaaaa bbbbbbbbbbbb".to_string(), "ccc".to_string()]
    );
    let DivertedItem::Line { nodes, width } = &captured.items()[0] else {
        panic!("first item is not a line");
    };
    assert_eq!(*width, 700);
    let spaces: Vec<_> = nodes
        .iter()
        .filter_map(|n| match n {
            Node::Space(space) => Some((space.width, space.slots)),
            _ => None,
        })
        .collect();
    assert_eq!(spaces, vec![(100, 2)]);
    assert_eq!(s.registers().hyphenated_line_count, 0);
}

#[test]
fn appending_to_undefined_diversion_starts_empty() {
    let mut s = session(1000, 100_000);
    s.set_fill(false, &mut NoTraps).unwrap();
    assert!(s.macro_content("x").is_none());

    s.divert("x", true);
    s.add_text("one\ntwo\n", &mut NoTraps).unwrap();
    s.close_diversion();
    assert_eq!(
        s.macro_content("x").unwrap().text_lines(),
        vec!["one".to_string(), "two".to_string()]
    );

    s.divert("x", true);
    s.add_text("three\n", &mut NoTraps).unwrap();
    s.close_diversion();
    assert_eq!(
        s.macro_content("x").unwrap().text_lines(),
        vec!["one".to_string(), "two".to_string(), "three".to_string()]
    );
    assert!(s.sink().text_lines().is_empty());
}

#[test]
fn diversion_trap_springs_inside_the_buffer() {
    let mut s = session(1000, 100_000);
    s.set_fill(false, &mut NoTraps).unwrap();
    s.divert("d", false);
    s.set_diversion_trap(Some(("dt", 300)));
    let mut fired = Vec::new();
    let mut handler = |name: &str, s: &mut Session<PageCollector>| -> Result<(), FormatError> {
        fired.push((name.to_string(), s.registers().vertical_position));
        Ok(())
    };
    for _ in 0..4 {
        s.add_text("row\n", &mut handler).unwrap();
    }
    s.close_diversion();
    assert_eq!(fired, vec![("dt".to_string(), 360)]);
    assert_eq!(s.registers().diversion_height, 480);
}

#[test]
fn config_round_trips_through_json() {
    let mut cfg = FormatConfig::for_page(3000, 6000);
    cfg.end_macro = Some("em".to_string());
    cfg.hyphenation.line_max = 2;
    let json = serde_json::to_string(&cfg).unwrap();
    let back: FormatConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(back, cfg);

    let partial: FormatConfig = serde_json::from_str(r#"{"line_length": 500, "adjust": "center"}"#).unwrap();
    assert_eq!(partial.line_length, 500);
    assert_eq!(partial.page_length, FormatConfig::default().page_length);
    assert_eq!(partial.adjust, roffline_format::AdjustMode::Center);
}

#[test]
fn sink_events_serialize_for_snapshots() {
    let mut s = session(1000, 100_000);
    s.set_fill(false, &mut NoTraps).unwrap();
    s.add_text("hello\n", &mut NoTraps).unwrap();
    s.finish(&mut NoTraps).unwrap();
    let json = serde_json::to_value(s.sink().events()).unwrap();
    assert_eq!(json[0]["event"], "begin_page");
    assert_eq!(json[1]["event"], "line");
    assert_eq!(json[1]["text"], "hello");
    assert_eq!(json[2]["event"], "trailer");
}
