use colored::Colorize;
use provisioner::{DiffSummary, ResourceDiff};

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

// ============================================================================
// Diffs
// ============================================================================

/// Marker for a diff: `+` create, `-/+` recreate, `~` update, `=` unchanged
pub fn diff_marker(diff: &ResourceDiff) -> &'static str {
    if diff.is_missing() {
        "+"
    } else if diff.needs_recreate() {
        "-/+"
    } else if diff.has_changes() {
        "~"
    } else {
        "="
    }
}

/// Print one diff line
pub fn diff(diff: &ResourceDiff) {
    let marker = diff_marker(diff);
    let id = diff.resource.id().to_string();
    let attributes = diff.changed_attributes().join(", ");

    match marker {
        "+" => println!("  {} {}", marker.green().bold(), id),
        "-/+" => println!("  {} {} {}", marker.red().bold(), id, format!("({attributes})").dimmed()),
        "~" => println!("  {} {} {}", marker.yellow().bold(), id, format!("({attributes})").dimmed()),
        _ => println!("  {} {}", marker.dimmed(), id.dimmed()),
    }
}

/// Print diff totals
pub fn summary(summary: &DiffSummary) {
    println!(
        "  {} to create, {} to recreate, {} to update, {} unchanged",
        summary.missing.to_string().green(),
        summary.recreate.to_string().red(),
        summary.changed.to_string().yellow(),
        summary.unchanged
    );
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use provisioner::mock::MockResource;
    use provisioner::{ResourceDiffItem, ResourceRef};
    use std::sync::Arc;

    fn resource() -> ResourceRef {
        Arc::new(MockResource::new("a"))
    }

    #[test]
    fn test_diff_marker() {
        assert_eq!(diff_marker(&ResourceDiff::missing(resource())), "+");
        assert_eq!(diff_marker(&ResourceDiff::unchanged(resource())), "=");
        assert_eq!(
            diff_marker(&ResourceDiff::with_changes(
                resource(),
                vec![ResourceDiffItem::recreate("type")]
            )),
            "-/+"
        );
        assert_eq!(diff_marker(&ResourceDiff::parent_changed(resource())), "~");
    }
}
