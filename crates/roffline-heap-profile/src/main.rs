//! DHAT heap profiler for roffline.
//!
//! Profiles allocation patterns of the formatter:
//! patterns -> fill -> paginate -> divert.
//!
//! Usage:
//!   cargo run -p roffline-heap-profile --release -- [OPTIONS] [TEXT_FILES...]
//!
//! Outputs dhat-<phase>.json files in the output directory (default: target/memory).
//! Open in https://nnethercote.github.io/dh_view/dh_view.html

#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

use std::path::{Path, PathBuf};

use roffline::FormatError;
use roffline_format::{FormatConfig, NoTraps, PageCollector, Session};

const PATTERNS: &str = r"
\patterns{
.hy1p 1he h1en 2ph .tran4s 1tion 1ment a1tion 4ing n1g
ex1am am1p 1ple 1ter 1ing 2ati 1na 1ti on1 1co 1pu
}
";

const FALLBACK_WORDS: &[&str] = &[
    "the", "formatter", "accumulates", "content", "into", "lines", "and", "chooses",
    "breakpoints", "justification", "stretches", "interword", "spaces", "hyphenation",
    "transformation", "computation", "diversion", "captures", "output", "traps",
];

#[derive(Clone, Copy, PartialEq, Eq)]
enum Phase {
    Patterns,
    Fill,
    Paginate,
    Divert,
}

impl Phase {
    fn from_str(s: &str) -> Option<Self> {
        match s {
            "patterns" => Some(Self::Patterns),
            "fill" => Some(Self::Fill),
            "paginate" => Some(Self::Paginate),
            "divert" => Some(Self::Divert),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Patterns => "patterns",
            Self::Fill => "fill",
            Self::Paginate => "paginate",
            Self::Divert => "divert",
        }
    }
}

fn fallback_text() -> String {
    let mut text = String::with_capacity(64 * 1024);
    for idx in 0..8_000usize {
        text.push_str(FALLBACK_WORDS[(idx * 7 + idx / 3) % FALLBACK_WORDS.len()]);
        text.push(if idx % 12 == 11 { '\n' } else { ' ' });
    }
    text
}

fn session() -> Session<PageCollector> {
    let mut session = Session::new(FormatConfig::for_page(4680, 7920), PageCollector::new())
        .unwrap_or_else(|e| panic!("session: {}", e));
    session.load_patterns(PATTERNS, false);
    session.top_level_mut().plant_trap("fo", -720);
    session
}

fn footer(_name: &str, s: &mut Session<PageCollector>) -> Result<(), FormatError> {
    s.begin_new_page(None, &mut NoTraps)
}

fn profile_text(label: &str, text: &str, phase: Phase) {
    match phase {
        Phase::Patterns => {
            let mut s = session();
            for _ in 0..20 {
                s.load_patterns(PATTERNS, false);
            }
        }
        Phase::Fill => {
            let mut s = session();
            s.set_traps_enabled(false);
            s.add_text(text, &mut NoTraps)
                .unwrap_or_else(|e| panic!("fill {}: {}", label, e));
            s.finish(&mut NoTraps)
                .unwrap_or_else(|e| panic!("finish {}: {}", label, e));
        }
        Phase::Paginate => {
            let mut s = session();
            let mut handler = footer;
            s.add_text(text, &mut handler)
                .unwrap_or_else(|e| panic!("paginate {}: {}", label, e));
            s.finish(&mut handler)
                .unwrap_or_else(|e| panic!("finish {}: {}", label, e));
            if s.sink().pages().is_empty() {
                panic!("paginate {} produced zero pages", label);
            }
        }
        Phase::Divert => {
            let mut s = session();
            let mut handler = footer;
            s.divert("body", false);
            s.add_text(text, &mut handler)
                .unwrap_or_else(|e| panic!("divert {}: {}", label, e));
            s.close_diversion();
            s.output_captured("body", &mut handler)
                .unwrap_or_else(|e| panic!("replay {}: {}", label, e));
            s.finish(&mut handler)
                .unwrap_or_else(|e| panic!("finish {}: {}", label, e));
        }
    }
}

/// Extract a short name from a file path for use in output filenames.
fn short_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unknown".to_string())
}

fn usage() {
    eprintln!("Usage: heap-profile [OPTIONS] [TEXT_FILES...]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --phase <patterns|fill|paginate|divert>  Formatter phase to profile (default: paginate)");
    eprintln!("  --out-dir <DIR>                          Output directory for dhat JSON (default: target/memory)");
    eprintln!();
    eprintln!("If no text files are given, profiles a generated corpus.");
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut phase = Phase::Paginate;
    let mut out_dir = PathBuf::from("target/memory");
    let mut files: Vec<PathBuf> = Vec::with_capacity(8);
    let mut i = 0;

    while i < args.len() {
        match args[i].as_str() {
            "--phase" => {
                i += 1;
                let Some(value) = args.get(i) else {
                    usage();
                    std::process::exit(1);
                };
                phase = Phase::from_str(value).unwrap_or_else(|| {
                    eprintln!("Unknown phase: {}", value);
                    usage();
                    std::process::exit(1);
                });
            }
            "--out-dir" => {
                i += 1;
                let Some(value) = args.get(i) else {
                    usage();
                    std::process::exit(1);
                };
                out_dir = PathBuf::from(value);
            }
            "--help" | "-h" => {
                usage();
                std::process::exit(0);
            }
            other => files.push(PathBuf::from(other)),
        }
        i += 1;
    }

    std::fs::create_dir_all(&out_dir).unwrap_or_else(|e| {
        eprintln!("Failed to create output dir {}: {}", out_dir.display(), e);
        std::process::exit(1);
    });

    let phase_name = phase.name();
    let json_path = out_dir.join(format!("dhat-{phase_name}.json"));
    eprintln!(
        "heap-profile: phase={}, files={}, out={}",
        phase_name,
        files.len(),
        out_dir.display()
    );

    let _profiler = dhat::Profiler::builder()
        .file_name(json_path.clone())
        .build();

    if files.is_empty() {
        profile_text("generated", &fallback_text(), phase);
    }
    for file in &files {
        let text = std::fs::read_to_string(file).unwrap_or_else(|e| {
            eprintln!("Failed to read {}: {}", file.display(), e);
            std::process::exit(1);
        });
        eprintln!("  profiling: {}", file.display());
        profile_text(&short_name(file), &text, phase);
    }

    eprintln!(
        "Done. Open {} in https://nnethercote.github.io/dh_view/dh_view.html",
        json_path.display()
    );
}
