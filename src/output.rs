//! Terminal output for the playbook execution engine (§10.4): colored
//! state-transition and phase-result lines, not Ansible's per-host recap.

use colored::Colorize;

/// Prints the banner shown once at the start of a run.
pub fn banner(playbook_name: &str) {
    let header = format!("PLAYBOOK [{playbook_name}]");
    let stars = "*".repeat(80_usize.saturating_sub(header.len()));
    println!("{} {}", header.bright_white().bold(), stars.bright_black());
}

/// Prints an orchestrator state transition (START, PARSE, PROVISION, ...).
pub fn state(name: &str) {
    println!("{} {}", "==>".blue().bold(), name.bright_white().bold());
}

/// Prints a phase header (packages / ansible / scripts).
pub fn phase(name: &str) {
    println!("\n{} {}", "PHASE".bright_white().bold(), name.cyan());
}

/// Prints a successful step result.
pub fn ok(step: &str) {
    println!("  {} {}", "ok".green(), step);
}

/// Prints a failed step result.
pub fn failed(step: &str, message: &str) {
    println!("  {} {} => {}", "failed".red().bold(), step, message);
}

/// Prints a skipped step result (a `when:`/`condition:` evaluated false).
pub fn skipped(step: &str) {
    println!("  {} {}", "skipping".cyan(), step);
}

pub fn info(message: &str) {
    println!("{message}");
}

pub fn warning(message: &str) {
    eprintln!("{} {}", "warning:".yellow().bold(), message);
}

pub fn error(message: &str) {
    eprintln!("{} {}", "error:".red().bold(), message);
}

/// Prints the final run summary.
pub fn summary(message: &str, success: bool, errors: &[String]) {
    println!();
    if success {
        println!("{} {}", "DONE".green().bold(), message);
    } else {
        println!("{} {}", "FAILED".red().bold(), message);
        for e in errors {
            println!("  - {e}");
        }
    }
}
