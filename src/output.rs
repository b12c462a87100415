//! Terminal output for the `signit` binary
//!
//! All termcolor writes use `let _ =`: colored output is decorative, and a
//! closed or redirected stream must not abort signing.

use std::io::{self, Write};
use termcolor::{BufferWriter, Color, ColorChoice, ColorSpec, WriteColor};

pub use termcolor;

use crate::identity::Identity;
use crate::signer::{BatchSummary, ERROR_PREFIX};

/// Print a yellow warning to stderr.
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {{
        use std::io::Write as _;
        use $crate::output::termcolor::WriteColor as _;
        let bufwtr = $crate::output::termcolor::BufferWriter::stderr($crate::output::termcolor::ColorChoice::Auto);
        let mut buffer = bufwtr.buffer();
        let _ = buffer.set_color($crate::output::termcolor::ColorSpec::new().set_fg(Some($crate::output::termcolor::Color::Yellow)));
        let _ = write!(&mut buffer, "⚠️  ");
        let _ = buffer.reset();
        let _ = writeln!(&mut buffer, $($arg)*);
        let _ = bufwtr.print(&buffer);
    }};
}

/// Print a red error to stderr.
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {{
        use std::io::Write as _;
        use $crate::output::termcolor::WriteColor as _;
        let bufwtr = $crate::output::termcolor::BufferWriter::stderr($crate::output::termcolor::ColorChoice::Auto);
        let mut buffer = bufwtr.buffer();
        let _ = buffer.set_color($crate::output::termcolor::ColorSpec::new().set_fg(Some($crate::output::termcolor::Color::Red)));
        let _ = write!(&mut buffer, "❌ ");
        let _ = buffer.reset();
        let _ = writeln!(&mut buffer, $($arg)*);
        let _ = bufwtr.print(&buffer);
    }};
}

/// Print a green success line to stdout.
#[macro_export]
macro_rules! success {
    ($($arg:tt)*) => {{
        use std::io::Write as _;
        use $crate::output::termcolor::WriteColor as _;
        let bufwtr = $crate::output::termcolor::BufferWriter::stdout($crate::output::termcolor::ColorChoice::Auto);
        let mut buffer = bufwtr.buffer();
        let _ = buffer.set_color($crate::output::termcolor::ColorSpec::new().set_fg(Some($crate::output::termcolor::Color::Green)));
        let _ = write!(&mut buffer, "✓ ");
        let _ = buffer.reset();
        let _ = writeln!(&mut buffer, $($arg)*);
        let _ = bufwtr.print(&buffer);
    }};
}

/// How a batch log line should be rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStyle {
    Error,
    Success,
    Header,
    Dim,
    Plain,
}

/// Pick a style from the content of a batch log line.
#[must_use]
pub fn classify_line(line: &str) -> LineStyle {
    if line.starts_with(ERROR_PREFIX) || line.contains("-> FAILED") {
        LineStyle::Error
    } else if line.contains("-> Signed successfully") || line.to_lowercase().contains("successfully") {
        LineStyle::Success
    } else if line.contains("] Signing: ") {
        LineStyle::Header
    } else if line.starts_with("Command: ") {
        LineStyle::Dim
    } else {
        LineStyle::Plain
    }
}

fn style_spec(style: LineStyle) -> Option<ColorSpec> {
    let mut spec = ColorSpec::new();
    match style {
        LineStyle::Error => spec.set_fg(Some(Color::Red)),
        LineStyle::Success => spec.set_fg(Some(Color::Green)),
        LineStyle::Header => spec.set_fg(Some(Color::Cyan)).set_bold(true),
        LineStyle::Dim => spec.set_dimmed(true),
        LineStyle::Plain => return None,
    };
    Some(spec)
}

/// Print one batch log line, colored by [`classify_line`].
pub fn print_log_line(line: &str) {
    let style = classify_line(line);
    let bufwtr = if style == LineStyle::Error {
        BufferWriter::stderr(ColorChoice::Auto)
    } else {
        BufferWriter::stdout(ColorChoice::Auto)
    };
    let mut buffer = bufwtr.buffer();
    if style == LineStyle::Header {
        let _ = writeln!(&mut buffer);
    }
    if let Some(spec) = style_spec(style) {
        let _ = buffer.set_color(&spec);
    }
    let _ = write!(&mut buffer, "{line}");
    let _ = buffer.reset();
    let _ = writeln!(&mut buffer);
    let _ = bufwtr.print(&buffer);
}

/// Print discovered identities as a numbered list.
pub fn print_identities(identities: &[Identity]) {
    let bufwtr = BufferWriter::stdout(ColorChoice::Auto);
    let mut buffer = bufwtr.buffer();

    if identities.is_empty() {
        let _ = buffer.set_color(ColorSpec::new().set_fg(Some(Color::Yellow)));
        let _ = writeln!(&mut buffer, "⚠️  No code signing certificates with a private key found");
        let _ = buffer.reset();
        let _ = writeln!(&mut buffer, "   Import one with: certutil -user -importpfx cert.pfx");
        let _ = bufwtr.print(&buffer);
        return;
    }

    for (i, identity) in identities.iter().enumerate() {
        let _ = buffer.set_color(ColorSpec::new().set_bold(true));
        let _ = writeln!(&mut buffer, "{:>2}) {}", i + 1, identity.subject);
        let _ = buffer.reset();
        let _ = writeln!(&mut buffer, "    Issuer:     {}", identity.issuer);
        let _ = writeln!(&mut buffer, "    Thumbprint: {}", identity.fingerprint);
        let _ = writeln!(&mut buffer, "    Expires:    {}", identity.expiry_display());
    }
    let _ = bufwtr.print(&buffer);
}

/// Print the banner shown before a batch starts.
pub fn print_batch_header(identity: &Identity, timestamp_url: &str, file_count: usize) {
    let bufwtr = BufferWriter::stdout(ColorChoice::Auto);
    let mut buffer = bufwtr.buffer();
    let rule = "=".repeat(60);

    let _ = buffer.set_color(ColorSpec::new().set_bold(true));
    let _ = writeln!(&mut buffer, "{rule}");
    let _ = writeln!(&mut buffer, "SIGNING STARTED");
    let _ = buffer.reset();
    let _ = writeln!(&mut buffer, "Certificate: {}", identity.subject);
    let _ = writeln!(&mut buffer, "Thumbprint:  {}", identity.fingerprint);
    let _ = writeln!(&mut buffer, "Timestamp:   {timestamp_url}");
    let _ = writeln!(&mut buffer, "Files:       {file_count}");
    let _ = buffer.set_color(ColorSpec::new().set_bold(true));
    let _ = writeln!(&mut buffer, "{rule}");
    let _ = buffer.reset();
    let _ = bufwtr.print(&buffer);
}

/// Print totals and the failed files of a finished batch.
pub fn print_summary(summary: &BatchSummary) {
    let bufwtr = BufferWriter::stdout(ColorChoice::Auto);
    let mut buffer = bufwtr.buffer();
    let rule = "=".repeat(60);

    let _ = writeln!(&mut buffer, "\n{rule}");
    if summary.all_succeeded() {
        let _ = buffer.set_color(ColorSpec::new().set_fg(Some(Color::Green)));
        let _ = writeln!(
            &mut buffer,
            "RESULT: {}/{} signed successfully",
            summary.succeeded, summary.total
        );
    } else {
        let color = if summary.succeeded == 0 { Color::Red } else { Color::Yellow };
        let _ = buffer.set_color(ColorSpec::new().set_fg(Some(color)));
        let _ = writeln!(
            &mut buffer,
            "RESULT: {} succeeded, {} failed",
            summary.succeeded, summary.failed
        );
        let _ = buffer.set_color(ColorSpec::new().set_fg(Some(Color::Red)));
        for failure in &summary.failures {
            let _ = writeln!(&mut buffer, "  FAILED: {} - {}", failure.file_name, failure.error);
        }
    }
    let _ = buffer.reset();
    let _ = writeln!(&mut buffer, "{rule}");
    let _ = bufwtr.print(&buffer);
}

/// Ask a yes/no question on stdin, looping until the answer is valid.
///
/// EOF counts as "no".
pub fn prompt_yes_no(question: &str) -> io::Result<bool> {
    loop {
        print!("{question} (y/n): ");
        io::stdout().flush()?;

        let mut response = String::new();
        if io::stdin().read_line(&mut response)? == 0 {
            println!();
            return Ok(false);
        }

        match response.trim().to_lowercase().as_str() {
            "y" | "yes" => return Ok(true),
            "n" | "no" => return Ok(false),
            other => {
                eprintln!("⚠️  Invalid input: '{other}'. Please enter 'y' or 'n'.");
            }
        }
    }
}
