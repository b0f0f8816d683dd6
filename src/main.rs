//! The `sap` command-line driver.
//!
//! Thin glue around the library: map the input, run the interpreter,
//! shape the content with the selected font, and write the PDF. All
//! diagnostics are rendered with a caret view of the offending line.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use pdf_writer::{Finish, Name, Rect};

use sap::error::{ErrorMessage, SapError};
use sap::font::handle::{generic_typeface_name, FontHandle, FontProperties};
use sap::font::layout::SubstitutionMaps;
use sap::font::{FontFile, ShapingFeatures};
use sap::interp::{ContentPiece, Interpreter};
use sap::pdf::text::{Command, TextEncoding, TextStream};
use sap::pdf::{font as pdf_font, RefAllocator};

const HELP: &str = "\
sap - a typesetting engine

USAGE:
    sap [OPTIONS] <input.sap>

OPTIONS:
    -o, --output <path>    Output PDF path (default: input with .pdf)
    -f, --font <path>      Font file to typeset with
        --typeface <name>  Typeface name to search for (or serif/sans-serif/...)
        --utf8-text        Use UTF-8 text operators instead of two-byte CIDs
    -h, --help             Show this help
";

struct Args {
    input: PathBuf,
    output: PathBuf,
    font: Option<PathBuf>,
    typeface: Option<String>,
    utf8_text: bool,
}

fn parse_args() -> Result<Args, pico_args::Error> {
    let mut args = pico_args::Arguments::from_env();
    if args.contains(["-h", "--help"]) {
        print!("{}", HELP);
        std::process::exit(0);
    }

    let output = args.opt_value_from_str(["-o", "--output"])?;
    let font = args.opt_value_from_str(["-f", "--font"])?;
    let typeface = args.opt_value_from_str("--typeface")?;
    let utf8_text = args.contains("--utf8-text");
    let input: PathBuf = args.free_from_str()?;

    Ok(Args {
        output: output.unwrap_or_else(|| input.with_extension("pdf")),
        input,
        font,
        typeface,
        utf8_text,
    })
}

fn main() -> ExitCode {
    env_logger::init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("error: {}", e);
            eprint!("{}", HELP);
            return ExitCode::FAILURE;
        }
    };

    let source = match std::fs::read_to_string(&args.input) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("error: cannot read '{}': {}", args.input.display(), e);
            return ExitCode::FAILURE;
        }
    };

    match run(&args, &source) {
        Ok(()) => ExitCode::SUCCESS,
        Err(SapError::Diagnostic(message)) => {
            print_diagnostic(&message, &args.input, &source);
            ExitCode::FAILURE
        }
        Err(other) => {
            eprintln!("error: {}", other);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args, source: &str) -> Result<(), SapError> {
    let mut interpreter = Interpreter::new();
    if let Some(parent) = args.input.parent() {
        interpreter.add_search_path(parent);
    }
    if let Ok(lib) = std::env::var("SAP_LIBRARY_PATH") {
        interpreter.add_search_path(lib);
    }

    let filename = args.input.display().to_string();
    let output = interpreter.run_document(&filename, source)?;

    let font_path = match &args.font {
        Some(path) => path.clone(),
        None => discover_font(args.typeface.as_deref())?,
    };

    let font_file = std::fs::File::open(&font_path)?;
    // The mapping owns the bytes; every span below borrows from it.
    let mapping = unsafe { memmap2::Mmap::map(&font_file)? };
    let font = FontFile::parse(&mapping, None)?;

    let pdf = typeset(&output.content, &font, args.utf8_text)?;
    std::fs::write(&args.output, pdf)?;
    Ok(())
}

// The system font search: scan the usual directories into handles, then
// apply the CSS-style matching.
fn discover_font(typeface: Option<&str>) -> Result<PathBuf, SapError> {
    let wanted = typeface
        .map(|name| generic_typeface_name(name).unwrap_or(name).to_string());

    let mut handles = Vec::new();
    let dirs = [
        "/usr/share/fonts",
        "/usr/local/share/fonts",
        "/System/Library/Fonts",
        "C:\\Windows\\Fonts",
    ];
    for dir in dirs {
        collect_fonts(Path::new(dir), &mut handles, 0);
    }

    if let Some(wanted) = &wanted {
        let matching: Vec<FontHandle> = handles
            .iter()
            .filter(|h| h.display_name.to_lowercase().contains(&wanted.to_lowercase()))
            .cloned()
            .collect();
        if let Some(best) =
            sap::font::handle::best_match(&FontProperties::default(), &matching)
        {
            return Ok(best.path.clone());
        }
    }

    handles
        .into_iter()
        .next()
        .map(|h| h.path)
        .ok_or_else(|| SapError::FontNotFound(wanted.unwrap_or_else(|| "any".to_string())))
}

fn collect_fonts(dir: &Path, handles: &mut Vec<FontHandle>, depth: usize) {
    if depth > 3 {
        return;
    }
    let Ok(entries) = std::fs::read_dir(dir) else { return };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_fonts(&path, handles, depth + 1);
            continue;
        }

        let is_font = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| matches!(e.to_lowercase().as_str(), "ttf" | "otf"));
        if !is_font {
            continue;
        }

        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        let lower = stem.to_lowercase();
        handles.push(FontHandle {
            display_name: stem.clone(),
            postscript_name: stem,
            properties: FontProperties {
                style: if lower.contains("italic") || lower.contains("oblique") {
                    sap::font::handle::FontStyle::Italic
                } else {
                    sap::font::handle::FontStyle::Normal
                },
                weight: if lower.contains("bold") { 700 } else { 400 },
                stretch: 5,
            },
            path,
        });
    }
}

// A single-page, single-font typesetting pass: paragraph per line. Real
// line breaking is outside this driver.
fn typeset(content: &[ContentPiece], font: &FontFile, utf8_text: bool) -> Result<Vec<u8>, SapError> {
    const FONT_SIZE: f32 = 11.0;
    const MARGIN: f32 = 72.0;
    const PAGE: (f32, f32) = (595.0, 842.0); // A4 in points

    let features = ShapingFeatures::default();
    let encoding = if utf8_text {
        TextEncoding::Utf8
    } else {
        TextEncoding::TwoByteCid
    };

    // Paragraph texts, shaped as single runs.
    let mut paragraphs: Vec<String> = vec![String::new()];
    for piece in content {
        match piece {
            ContentPiece::Word(word) => {
                let current = paragraphs.last_mut().unwrap();
                if !current.is_empty() {
                    current.push(' ');
                }
                current.push_str(word);
            }
            ContentPiece::ParagraphBreak => {
                if !paragraphs.last().is_some_and(|p| p.is_empty()) {
                    paragraphs.push(String::new());
                }
            }
        }
    }

    let mut maps = SubstitutionMaps::default();
    let mut runs = Vec::new();
    for paragraph in paragraphs.iter().filter(|p| !p.is_empty()) {
        let codepoints: Vec<u32> = paragraph.chars().map(|c| c as u32).collect();
        let run = font.shape(&codepoints, &features);

        // Merge the side maps for the ToUnicode CMap.
        maps.replacements.extend(run.maps.replacements.clone());
        maps.contractions.extend(run.maps.contractions.clone());
        maps.extra_glyphs.extend(run.maps.extra_glyphs.iter().copied());
        runs.push(run);
    }

    // The font must be embedded before the text codes are known: text
    // operators address glyphs by CID, not GID.
    let mut alloc = RefAllocator::new();
    let catalog_ref = alloc.bump();
    let pages_ref = alloc.bump();
    let page_ref = alloc.bump();
    let content_ref = alloc.bump();

    let mut pdf = pdf_writer::Pdf::new();
    let embedded = pdf_font::write_font(&mut pdf, &mut alloc, font, &maps, utf8_text)?;

    let line_step = font
        .metrics
        .to_pdf_units(f64::from(font.metrics.default_line_spacing)) as f32
        * FONT_SIZE
        / 1000.0;

    let mut stream = TextStream::new();
    stream.begin_group(vec![
        Command::SetFont {
            resource: "F0".to_string(),
            size: FONT_SIZE,
        },
        Command::Move {
            dx: MARGIN,
            dy: PAGE.1 - MARGIN,
        },
    ]);

    let mut first = true;
    for run in &runs {
        if !first {
            stream.begin_group(vec![Command::Move {
                dx: 0.0,
                dy: -line_step,
            }]);
        }
        first = false;

        for (i, glyph) in run.glyphs.iter().enumerate() {
            let code = match encoding {
                TextEncoding::TwoByteCid => u32::from(embedded.cid(glyph.gid)),
                TextEncoding::Utf8 => glyph.codepoints.first().copied().unwrap_or(0xFFFD),
            };
            stream.show_glyphs(encoding, &[code]);

            if let Some(adjustment) = run.adjustments.get(&i) {
                let shift = font.metrics.to_pdf_units(f64::from(adjustment.horz_advance));
                stream.shift(shift as f32);
            }
        }
    }

    pdf.catalog(catalog_ref).pages(pages_ref);
    pdf.pages(pages_ref).kids([page_ref]).count(1);

    let mut page = pdf.page(page_ref);
    page.parent(pages_ref)
        .media_box(Rect::new(0.0, 0.0, PAGE.0, PAGE.1))
        .contents(content_ref);
    page.resources()
        .fonts()
        .pair(Name(b"F0"), embedded.type0_ref);
    page.finish();

    pdf.stream(content_ref, &stream.emit());
    Ok(pdf.finish())
}

fn print_diagnostic(message: &ErrorMessage, input: &Path, source: &str) {
    let render = |loc: &sap::error::Location| {
        // Only the main file's text is at hand; imported files fall back
        // to a bare location line.
        if loc.file.as_ref() == input.display().to_string() {
            Some(ErrorMessage::render_snippet(loc, source))
        } else {
            std::fs::read_to_string(loc.file.as_ref())
                .ok()
                .map(|text| ErrorMessage::render_snippet(loc, &text))
        }
    };

    eprintln!("error: {}", message);
    if let Some(snippet) = render(&message.location) {
        eprintln!("{}", snippet);
    }
    for info in &message.infos {
        eprintln!("note: {}: {}", info.location, info.message);
        if let Some(snippet) = render(&info.location) {
            eprintln!("{}", snippet);
        }
    }
}
