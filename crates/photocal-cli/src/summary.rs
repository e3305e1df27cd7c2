use console::Style;
use photocal_core::batch::{DateReport, DateStatus};

struct Styles {
    title: Style,
    label: Style,
    value: Style,
    ok: Style,
    skipped: Style,
    failed: Style,
    path: Style,
}

impl Styles {
    fn new() -> Self {
        Self {
            title: Style::new().cyan().bold(),
            label: Style::new().dim(),
            value: Style::new().bold().white(),
            ok: Style::new().green(),
            skipped: Style::new().dim().yellow(),
            failed: Style::new().red(),
            path: Style::new().underlined(),
        }
    }
}

pub fn print_run_summary(reports: &[DateReport]) {
    let s = Styles::new();

    println!();
    println!("  {}", s.title.apply_to("Calibration Summary"));
    println!(
        "  {}",
        s.title.apply_to("\u{2550}".repeat("Calibration Summary".len()))
    );
    println!();

    for report in reports {
        let status = match report.status {
            DateStatus::Done => s.ok.apply_to(report.status.to_string()),
            DateStatus::SkipAlreadyDone => s.skipped.apply_to(report.status.to_string()),
            DateStatus::PartialFailure | DateStatus::FatalError => {
                s.failed.apply_to(report.status.to_string())
            }
        };
        println!("  {:<14}{}", s.label.apply_to(&report.date), status);

        if !report.outputs.is_empty() {
            println!(
                "    {:<12}{}",
                s.label.apply_to("Calibrated"),
                s.value.apply_to(report.outputs.len())
            );
        }
        for failure in &report.failures {
            println!(
                "    {:<12}{}: {}",
                s.failed.apply_to("Failed"),
                s.path.apply_to(failure.path.display()),
                failure.reason
            );
        }
        if !report.excluded.is_empty() {
            println!(
                "    {:<12}{} file(s) dropped during scan",
                s.label.apply_to("Excluded"),
                s.skipped.apply_to(report.excluded.len())
            );
            for excluded in &report.excluded {
                println!(
                    "      {}: {}",
                    s.path.apply_to(excluded.path.display()),
                    excluded.reason
                );
            }
        }
        if let Some(ref fatal) = report.fatal {
            println!("    {:<12}{}", s.failed.apply_to("Fatal"), fatal);
        }
    }

    let done = count(reports, DateStatus::Done);
    let skipped = count(reports, DateStatus::SkipAlreadyDone);
    let partial = count(reports, DateStatus::PartialFailure);
    let fatal = count(reports, DateStatus::FatalError);

    println!();
    println!(
        "  {} done, {} skipped, {} partial, {} fatal",
        s.ok.apply_to(done),
        s.skipped.apply_to(skipped),
        s.failed.apply_to(partial),
        s.failed.apply_to(fatal)
    );
    println!();
}

fn count(reports: &[DateReport], status: DateStatus) -> usize {
    reports.iter().filter(|r| r.status == status).count()
}
