use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use clap::error::ErrorKind;
use log::{debug, info};
use lopdf::Document;

mod content;
mod error;
mod invert_params;
mod model;
mod process_pages;

use invert_params::{DegenerateBoxPolicy, InvertOptions};
use process_pages::InvertReport;

/// Invert the colours of every page in a PDF (white becomes black)
#[derive(Parser, Debug)]
#[command(name = "invert_pdf", version, about = "Invert the colours of every page in a PDF")]
struct Args {
    /// PDF to read
    input: PathBuf,
    /// Where to write the inverted PDF
    output: PathBuf,
    /// Compress all streams before writing
    #[arg(long, default_value_t = false)]
    compress: bool,
    /// Fail instead of dropping a content stream that cannot be read
    #[arg(long, default_value_t = false)]
    strict: bool,
    /// Handling of pages whose MediaBox has zero or negative area
    #[arg(long, value_enum, default_value_t = DegenerateBoxPolicy::Reject)]
    degenerate: DegenerateBoxPolicy,
    /// Log every page as it is processed
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

impl Args {
    fn options(&self) -> InvertOptions {
        InvertOptions {
            compress: self.compress,
            strict: self.strict,
            degenerate: self.degenerate,
        }
    }
}

fn init_logger(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };
    // a second init (tests call `run` repeatedly) keeps the first logger
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .try_init();
}

/// Load `input`, invert every page and save the result to `output`.
fn invert_file(input: &Path, output: &Path, options: &InvertOptions) -> anyhow::Result<InvertReport> {
    debug!(
        "options: compress={} strict={} degenerate={}",
        options.compress,
        options.strict,
        options.degenerate.as_str()
    );
    let mut doc = Document::load(input)
        .with_context(|| format!("failed to open {}", input.display()))?;
    info!("loaded {} ({} pages)", input.display(), doc.get_pages().len());

    let report = process_pages::invert_document(&mut doc, options)
        .with_context(|| format!("failed to invert {}", input.display()))?;
    debug!(
        "{} page(s) share blend state {:?}",
        report.inverted.len(),
        report.inversion_state
    );

    if options.compress {
        doc.compress();
    }
    doc.save(output)
        .with_context(|| format!("failed to write {}", output.display()))?;
    Ok(report)
}

/// Parse `argv`, run the inversion and report on `out`.
///
/// Usage errors print to `out` and give exit code 1, as does any failure
/// while inverting (logged on stderr).
fn run<I, T>(argv: I, out: &mut impl Write) -> ExitCode
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let args = match Args::try_parse_from(argv) {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = write!(out, "{e}");
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            let _ = write!(out, "{e}");
            return ExitCode::from(1);
        }
    };
    init_logger(args.verbose);

    let report = match invert_file(&args.input, &args.output, &args.options()) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::from(1);
        }
    };

    let _ = writeln!(out, "✓ Wrote: {}", args.output.display());
    let _ = writeln!(
        out,
        "{} page(s) inverted, {} skipped, {} unreadable content stream(s)",
        report.inverted.len(),
        report.skipped.len(),
        report.warnings.len()
    );
    ExitCode::SUCCESS
}

fn main() -> ExitCode {
    run(std::env::args_os(), &mut std::io::stdout())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::inverted_page_content;
    use crate::process_pages::tests::{doc_with_pages, page_id};
    use lopdf::{Object, ObjectId};
    use pretty_assertions::assert_eq;

    const RED_SQUARE: &str = "1 0 0 rg 100 100 50 50 re f";

    fn write_fixture(dir: &Path, name: &str, mut doc: Document) -> PathBuf {
        let path = dir.join(name);
        doc.save(&path).unwrap();
        path
    }

    fn contents_of(doc: &Document, page_no: u32) -> Vec<ObjectId> {
        let page = doc.get_object(page_id(doc, page_no)).unwrap().as_dict().unwrap();
        page.get(b"Contents")
            .unwrap()
            .as_array()
            .unwrap()
            .iter()
            .map(|o| o.as_reference().unwrap())
            .collect()
    }

    fn fm0_of(doc: &Document, page_no: u32) -> ObjectId {
        let page = doc.get_object(page_id(doc, page_no)).unwrap().as_dict().unwrap();
        let res = page.get(b"Resources").unwrap().as_reference().unwrap();
        doc.get_object(res)
            .unwrap()
            .as_dict()
            .unwrap()
            .get(b"XObject")
            .unwrap()
            .as_dict()
            .unwrap()
            .get(b"Fm0")
            .unwrap()
            .as_reference()
            .unwrap()
    }

    fn stream_bytes(doc: &Document, id: ObjectId) -> Vec<u8> {
        let stream = doc.get_object(id).unwrap().as_stream().unwrap();
        if stream.dict.get(b"Filter").is_ok() {
            stream.decompressed_content().unwrap()
        } else {
            stream.content.clone()
        }
    }

    #[test]
    fn red_square_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_fixture(
            dir.path(),
            "in.pdf",
            doc_with_pages(&[(Some([0, 0, 612, 792]), RED_SQUARE)]),
        );
        let output = dir.path().join("out.pdf");

        let report = invert_file(&input, &output, &InvertOptions::default()).unwrap();
        assert_eq!(report.inverted, vec![1]);
        assert!(report.warnings.is_empty());

        let doc = Document::load(&output).unwrap();
        let expected = inverted_page_content(612.0, 792.0);
        let streams: Vec<Vec<u8>> = contents_of(&doc, 1)
            .into_iter()
            .map(|id| stream_bytes(&doc, id))
            .collect();
        assert_eq!(
            streams,
            vec![expected.background, expected.form_invocation, expected.overlay]
        );
        assert_eq!(stream_bytes(&doc, fm0_of(&doc, 1)), RED_SQUARE.as_bytes());
    }

    #[test]
    fn compressed_output_still_carries_the_form() {
        let body = RED_SQUARE.repeat(20);
        let dir = tempfile::tempdir().unwrap();
        let input = write_fixture(
            dir.path(),
            "in.pdf",
            doc_with_pages(&[(Some([0, 0, 612, 792]), body.as_str())]),
        );
        let output = dir.path().join("out.pdf");
        let options = InvertOptions {
            compress: true,
            ..Default::default()
        };

        invert_file(&input, &output, &options).unwrap();
        let doc = Document::load(&output).unwrap();
        assert_eq!(contents_of(&doc, 1).len(), 3);
        assert_eq!(stream_bytes(&doc, fm0_of(&doc, 1)), body.into_bytes());
    }

    #[test]
    fn inverting_twice_nests_instead_of_restoring() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_fixture(
            dir.path(),
            "in.pdf",
            doc_with_pages(&[(Some([0, 0, 612, 792]), RED_SQUARE)]),
        );
        let once = dir.path().join("once.pdf");
        let twice = dir.path().join("twice.pdf");

        invert_file(&input, &once, &InvertOptions::default()).unwrap();
        invert_file(&once, &twice, &InvertOptions::default()).unwrap();

        let doc = Document::load(&twice).unwrap();
        let form = stream_bytes(&doc, fm0_of(&doc, 1));
        assert_ne!(form, RED_SQUARE.as_bytes());

        // the second form wraps the first run's three streams
        let first = inverted_page_content(612.0, 792.0);
        let nested = [first.background, first.form_invocation, first.overlay].join(&b'\n');
        assert_eq!(form, nested);
        assert_eq!(contents_of(&doc, 1).len(), 3);

        let blends = doc
            .objects
            .values()
            .filter(|o| matches!(o.as_dict().and_then(|d| d.get(b"BM")), Ok(Object::Name(n)) if n == b"Difference"))
            .count();
        assert_eq!(blends, 2);
    }

    #[test]
    fn missing_input_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.pdf");
        let err = invert_file(&dir.path().join("nope.pdf"), &output, &InvertOptions::default())
            .unwrap_err();
        assert!(err.to_string().starts_with("failed to open"));
        assert!(!output.exists());
    }

    #[test]
    fn garbage_input_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("garbage.pdf");
        std::fs::write(&input, b"this is not a pdf").unwrap();
        let output = dir.path().join("out.pdf");
        assert!(invert_file(&input, &output, &InvertOptions::default()).is_err());
        assert!(!output.exists());
    }

    #[test]
    fn unwritable_output_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_fixture(
            dir.path(),
            "in.pdf",
            doc_with_pages(&[(Some([0, 0, 612, 792]), RED_SQUARE)]),
        );
        let output = dir.path().join("missing-dir").join("out.pdf");
        let err = invert_file(&input, &output, &InvertOptions::default()).unwrap_err();
        assert!(err.to_string().starts_with("failed to write"));
    }

    #[test]
    fn args_require_two_paths() {
        assert!(Args::try_parse_from(["invert_pdf", "in.pdf"]).is_err());
        assert!(Args::try_parse_from(["invert_pdf", "a.pdf", "b.pdf", "c.pdf"]).is_err());

        let args = Args::try_parse_from(["invert_pdf", "a.pdf", "b.pdf", "--degenerate", "proceed"])
            .unwrap();
        assert_eq!(args.input, PathBuf::from("a.pdf"));
        assert_eq!(args.options().degenerate, DegenerateBoxPolicy::Proceed);
        assert!(!args.options().strict);
    }

    #[test]
    fn run_with_one_path_prints_usage_and_exits_1() {
        let mut out = Vec::new();
        let code = run(["invert_pdf", "in.pdf"], &mut out);
        assert_eq!(code, ExitCode::from(1));
        let stdout = String::from_utf8(out).unwrap();
        assert!(stdout.contains("Usage:"), "{stdout}");
    }

    #[test]
    fn run_with_three_paths_exits_1() {
        let mut out = Vec::new();
        let code = run(["invert_pdf", "a.pdf", "b.pdf", "c.pdf"], &mut out);
        assert_eq!(code, ExitCode::from(1));
        assert!(String::from_utf8(out).unwrap().contains("Usage:"));
    }

    #[test]
    fn run_success_confirms_output_path() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_fixture(
            dir.path(),
            "in.pdf",
            doc_with_pages(&[(Some([0, 0, 612, 792]), RED_SQUARE)]),
        );
        let output = dir.path().join("out.pdf");

        let mut out = Vec::new();
        let code = run(
            [OsString::from("invert_pdf"), input.into_os_string(), output.clone().into_os_string()],
            &mut out,
        );
        assert_eq!(code, ExitCode::SUCCESS);
        let stdout = String::from_utf8(out).unwrap();
        assert!(stdout.starts_with(&format!("✓ Wrote: {}\n", output.display())), "{stdout}");
        assert!(stdout.contains("1 page(s) inverted, 0 skipped"));
        assert!(output.exists());
    }

    #[test]
    fn run_failure_exits_1_without_confirmation() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("missing.pdf");
        let output = dir.path().join("out.pdf");

        let mut out = Vec::new();
        let code = run(
            [OsString::from("invert_pdf"), input.into_os_string(), output.clone().into_os_string()],
            &mut out,
        );
        assert_eq!(code, ExitCode::from(1));
        assert!(out.is_empty());
        assert!(!output.exists());
    }
}
