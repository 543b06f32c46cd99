//! Coloured terminal output for resolution results and diagnostics
//!
//! All termcolor operations use `let _ =` to deliberately ignore errors.
//! Colored output is decorative: on a broken pipe or detached TTY the program
//! carries on without it.

use crate::engine::Resolution;
use crate::error::ResolveError;
use crate::group::{Ambiguity, Trace};
use crate::identity::{CertificateListing, IdentityStore};
use std::io::Write;
use termcolor::{Buffer, BufferWriter, Color, ColorChoice, ColorSpec, WriteColor};

/// Kind of one-line status message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    Warning,
    Failure,
}

impl Status {
    fn color(self) -> Color {
        match self {
            Self::Success => Color::Green,
            Self::Warning => Color::Yellow,
            Self::Failure => Color::Red,
        }
    }

    fn marker(self) -> &'static str {
        match self {
            Self::Success => "✓ ",
            Self::Warning => "⚠️  ",
            Self::Failure => "❌ ",
        }
    }
}

/// Print a coloured status line; warnings and failures go to stderr.
pub fn status_line(status: Status, message: std::fmt::Arguments<'_>) {
    let bufwtr = match status {
        Status::Success => BufferWriter::stdout(ColorChoice::Auto),
        Status::Warning | Status::Failure => BufferWriter::stderr(ColorChoice::Auto),
    };
    let mut buffer = bufwtr.buffer();
    let _ = buffer.set_color(ColorSpec::new().set_fg(Some(status.color())));
    let _ = write!(&mut buffer, "{}", status.marker());
    let _ = buffer.reset();
    let _ = writeln!(&mut buffer, "{message}");
    let _ = bufwtr.print(&buffer);
}

/// Yellow warning line on stderr
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        $crate::output::status_line($crate::output::Status::Warning, format_args!($($arg)*))
    };
}

/// Green success line on stdout
#[macro_export]
macro_rules! success {
    ($($arg:tt)*) => {
        $crate::output::status_line($crate::output::Status::Success, format_args!($($arg)*))
    };
}

fn heading(buffer: &mut Buffer, text: &str) {
    let _ = buffer.set_color(ColorSpec::new().set_bold(true));
    let _ = writeln!(buffer, "{text}");
    let _ = buffer.reset();
}

fn dimmed(buffer: &mut Buffer, text: &str) {
    let _ = buffer.set_color(ColorSpec::new().set_fg(Some(Color::Ansi256(8))));
    let _ = writeln!(buffer, "{text}");
    let _ = buffer.reset();
}

fn write_trace(buffer: &mut Buffer, trace: &Trace) {
    heading(buffer, "Filter stages:");
    for report in trace.iter() {
        if !report.applied {
            dimmed(
                buffer,
                &format!("  {:<28} skipped ({} groups)", report.stage, report.groups_before),
            );
            continue;
        }
        let color = if report.groups_after == 0 {
            Color::Red
        } else if report.removed_groups() > 0 {
            Color::Yellow
        } else {
            Color::Green
        };
        let _ = write!(buffer, "  {:<28} ", report.stage);
        let _ = buffer.set_color(ColorSpec::new().set_fg(Some(color)));
        let _ = write!(
            buffer,
            "{} -> {} groups",
            report.groups_before, report.groups_after
        );
        let _ = buffer.reset();
        let _ = writeln!(
            buffer,
            " ({} -> {} candidates)",
            report.candidates_before, report.candidates_after
        );
    }
}

/// Print the per-stage group and candidate counts.
pub fn print_trace(trace: &Trace) {
    let bufwtr = BufferWriter::stderr(ColorChoice::Auto);
    let mut buffer = bufwtr.buffer();
    write_trace(&mut buffer, trace);
    let _ = bufwtr.print(&buffer);
}

pub fn print_ambiguity(ambiguity: &Ambiguity) {
    match &ambiguity.chosen_installer_certificate {
        Some(installer) => warn!(
            "{} signing groups matched; using '{}' with installer '{}'",
            ambiguity.candidates, ambiguity.chosen_certificate, installer
        ),
        None => warn!(
            "{} signing groups matched; using '{}'",
            ambiguity.candidates, ambiguity.chosen_certificate
        ),
    }
}

/// Print the chosen signing group.
pub fn print_resolution(resolution: &Resolution) {
    let group = &resolution.group;
    success!("Resolved {} signing group", group.method);

    let bufwtr = BufferWriter::stdout(ColorChoice::Auto);
    let mut buffer = bufwtr.buffer();
    let _ = writeln!(&mut buffer, "   Certificate: {}", group.certificate);
    if let Some(installer) = &group.installer_certificate {
        let _ = writeln!(&mut buffer, "   Installer:   {installer}");
    }
    for (bundle_id, profile) in &group.profiles {
        let _ = writeln!(&mut buffer, "   {bundle_id}");
        let _ = writeln!(&mut buffer, "      profile: {profile}");
    }
    let _ = bufwtr.print(&buffer);
}

/// Print a failed resolution with whatever trace it carries.
pub fn print_failure(err: &ResolveError) {
    status_line(Status::Failure, format_args!("{err}"));
    if let Some(trace) = err.trace() {
        print_trace(trace);
    }
}

fn write_listing(buffer: &mut Buffer, title: &str, listing: &CertificateListing<'_>) {
    heading(buffer, title);
    if listing.valid.is_empty() && listing.duplicated.is_empty() && listing.invalid.is_empty() {
        dimmed(buffer, "  (none)");
        return;
    }
    for certificate in &listing.valid {
        let _ = buffer.set_color(ColorSpec::new().set_fg(Some(Color::Green)));
        let _ = write!(buffer, "  ✓ ");
        let _ = buffer.reset();
        let _ = writeln!(buffer, "{certificate}");
    }
    for certificate in &listing.duplicated {
        let _ = buffer.set_color(ColorSpec::new().set_fg(Some(Color::Yellow)));
        let _ = write!(buffer, "  = ");
        let _ = buffer.reset();
        let _ = writeln!(buffer, "{certificate} (older duplicate)");
    }
    for invalid in &listing.invalid {
        let _ = buffer.set_color(ColorSpec::new().set_fg(Some(Color::Red)));
        let _ = write!(buffer, "  ✗ ");
        let _ = buffer.reset();
        let _ = writeln!(buffer, "{} ({})", invalid.certificate, invalid.reason);
    }
}

/// Print installed certificates, installer certificates and profiles.
pub fn print_listing(store: &IdentityStore) {
    let bufwtr = BufferWriter::stdout(ColorChoice::Auto);
    let mut buffer = bufwtr.buffer();

    write_listing(&mut buffer, "Signing certificates:", &store.certificate_listing());
    let _ = writeln!(&mut buffer);
    write_listing(
        &mut buffer,
        "Installer certificates:",
        &store.installer_certificate_listing(),
    );
    let _ = writeln!(&mut buffer);

    heading(&mut buffer, "Provisioning profiles:");
    for profile in store.profiles() {
        let _ = writeln!(&mut buffer, "  {profile}");
    }
    for profile in store.expired_profiles() {
        dimmed(&mut buffer, &format!("  {profile} (expired)"));
    }
    if store.profiles().is_empty() && store.expired_profiles().is_empty() {
        dimmed(&mut buffer, "  (none)");
    }

    let _ = bufwtr.print(&buffer);
}
