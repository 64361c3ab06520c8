use std::fs;
use std::path::{Path, PathBuf};

const ALLOWED_SUBMIT_CALLERS: &[&str] = &["src/engine/mod.rs"];

fn collect_rust_files(root: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(root) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_rust_files(&path, out);
            continue;
        }
        if path.extension().and_then(|s| s.to_str()) == Some("rs") {
            out.push(path);
        }
    }
}

fn offenders(patterns: &[&str], allowed: &[&str]) -> Vec<String> {
    let repo_root = Path::new(env!("CARGO_MANIFEST_DIR"));
    let mut files = Vec::new();
    collect_rust_files(&repo_root.join("src"), &mut files);

    let mut found = Vec::new();
    for file in files {
        let rel = file
            .strip_prefix(repo_root)
            .unwrap_or(&file)
            .to_string_lossy()
            .replace('\\', "/");
        if allowed.iter().any(|a| *a == rel) {
            continue;
        }
        let content = fs::read_to_string(&file).unwrap_or_default();
        for (idx, line) in content.lines().enumerate() {
            let trimmed = line.trim();
            if patterns.iter().any(|p| trimmed.contains(p)) {
                found.push(format!("{rel}:{}: {}", idx + 1, trimmed));
            }
        }
    }
    found
}

#[test]
fn execution_venue_is_only_reached_through_the_engine() {
    let found = offenders(&["execution.submit(", ".submit(decision"], ALLOWED_SUBMIT_CALLERS);
    assert!(
        found.is_empty(),
        "order submission outside the governance engine:\n{}",
        found.join("\n")
    );
}

#[test]
fn approval_requests_only_come_from_the_engine() {
    let found = offenders(&["approvals.request_approval("], ALLOWED_SUBMIT_CALLERS);
    assert!(
        found.is_empty(),
        "approval request outside the governance engine:\n{}",
        found.join("\n")
    );
}
