// CLI entrypoint for asm386.

use clap::Parser;
use serde_json::json;

use asm386::assembler::{self, Cli, OutputFormat};
use asm386::error::{Diagnostic, Severity};

fn severity_to_str(severity: Severity) -> &'static str {
    match severity {
        Severity::Warning => "warning",
        Severity::Error => "error",
    }
}

fn format_diagnostic_line(
    diag: &Diagnostic,
    source_lines: Option<&[String]>,
    use_color: bool,
    format: OutputFormat,
) -> String {
    if format == OutputFormat::Json {
        json!({
            "severity": severity_to_str(diag.severity()),
            "message": diag.message(),
            "file": diag.file(),
            "line": diag.line(),
            "column": diag.column(),
        })
        .to_string()
    } else {
        diag.format_with_context(source_lines, use_color)
    }
}

fn main() {
    let cli = Cli::parse();
    let use_color = std::env::var("NO_COLOR").is_err();

    match assembler::run(&cli) {
        Ok(report) => {
            for diag in report.diagnostics() {
                eprintln!(
                    "{}",
                    format_diagnostic_line(
                        diag,
                        Some(report.source_lines()),
                        use_color,
                        cli.format
                    )
                );
            }
            if report.has_errors() {
                eprintln!("Errors detected in source; no output file created");
                std::process::exit(1);
            }
            if !cli.quiet {
                println!("assembled {} bytes", report.bytes());
            }
        }
        Err(err) => {
            for diag in err.diagnostics() {
                eprintln!(
                    "{}",
                    format_diagnostic_line(diag, Some(err.source_lines()), use_color, cli.format)
                );
            }
            eprintln!("{err}");
            std::process::exit(1);
        }
    }
}
