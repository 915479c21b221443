use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tempfile::TempDir;

fn kbchat_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("kbchat");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let kb_dir = root.join("kb");
    fs::create_dir_all(&kb_dir).unwrap();
    fs::write(
        kb_dir.join("alpha.md"),
        "# Alpha Document\n\nThis is the alpha document about Rust programming.\n\nIt covers cargo and crates.",
    )
    .unwrap();
    fs::write(
        kb_dir.join("gamma.txt"),
        "Gamma notes about deployment.\n\nKubernetes and Docker are used for deployment.",
    )
    .unwrap();
    // not matched by the include globs
    fs::write(kb_dir.join("image.png"), [0x89, 0x50, 0x4e, 0x47]).unwrap();

    let config_content = format!(
        r#"[api]
endpoint = "http://127.0.0.1:9/v1/chat/completions"

[knowledge_base]
dir = "{root}/kb"
include_globs = ["**/*.md", "**/*.txt"]

[retrieval]
max_results = 3

[settings]
path = "{root}/settings.json"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("kbchat.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn kbchat(config_path: &Path) -> Command {
    let mut cmd = Command::new(kbchat_binary());
    cmd.arg("--config")
        .arg(config_path.to_str().unwrap())
        .env_remove("KBCHAT_API_KEY")
        .env_remove("RUST_LOG");
    cmd
}

fn run_kbchat(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let output = kbchat(config_path)
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run kbchat at {:?}: {}", kbchat_binary(), e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_kb_list() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_kbchat(&config_path, &["kb", "list"]);
    assert!(success, "list failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("alpha.md"));
    assert!(stdout.contains("gamma.txt"));
    assert!(!stdout.contains("image.png"));
    assert!(stdout.contains("2 documents"));
}

#[test]
fn test_kb_list_empty_dir_is_created() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("kbchat.toml");
    fs::write(
        &config_path,
        format!(
            "[knowledge_base]\ndir = \"{}/fresh\"\n",
            tmp.path().display()
        ),
    )
    .unwrap();

    let (stdout, _, success) = run_kbchat(&config_path, &["kb", "list"]);
    assert!(success);
    assert!(stdout.contains("No documents"));
    assert!(tmp.path().join("fresh").is_dir());
}

#[test]
fn test_kb_add_appends_txt_extension() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_kbchat(
        &config_path,
        &["kb", "add", "ops", "--text", "Rollbacks use blue green deployment."],
    );
    assert!(success, "add failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Added ops.txt"));

    let on_disk = fs::read_to_string(tmp.path().join("kb/ops.txt")).unwrap();
    assert_eq!(on_disk, "Rollbacks use blue green deployment.");

    let (stdout, _, _) = run_kbchat(&config_path, &["kb", "list"]);
    assert!(stdout.contains("ops.txt"));
}

#[test]
fn test_kb_add_reads_stdin() {
    let (tmp, config_path) = setup_test_env();

    let mut child = kbchat(&config_path)
        .args(["kb", "add", "piped.md"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child
        .stdin
        .take()
        .unwrap()
        .write_all(b"# Piped\n\nfrom stdin")
        .unwrap();
    let output = child.wait_with_output().unwrap();
    assert!(output.status.success());

    let on_disk = fs::read_to_string(tmp.path().join("kb/piped.md")).unwrap();
    assert_eq!(on_disk, "# Piped\n\nfrom stdin");
}

#[test]
fn test_kb_add_rejects_path_names() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) =
        run_kbchat(&config_path, &["kb", "add", "../escape.txt", "--text", "x"]);
    assert!(!success);
    assert!(stderr.contains("invalid document name"));
}

#[test]
fn test_kb_search_ranks_by_occurrences() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_kbchat(&config_path, &["kb", "search", "deployment"]);
    assert!(success, "search failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("1. gamma.txt (relevance: 2)"));
    assert!(!stdout.contains("alpha.md"));
}

#[test]
fn test_kb_search_no_results() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_kbchat(&config_path, &["kb", "search", "zzzznotfound"]);
    assert!(success);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_kb_search_limit() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_kbchat(&config_path, &["kb", "search", "a", "--limit", "1"]);
    assert!(success);
    assert!(stdout.contains("1. "));
    assert!(!stdout.contains("2. "));
}

#[test]
fn test_kb_import_text_and_unsupported() {
    let (tmp, config_path) = setup_test_env();
    let outside = tmp.path().join("handbook.md");
    fs::write(&outside, "On-call rotates weekly.").unwrap();

    let (stdout, stderr, success) =
        run_kbchat(&config_path, &["kb", "import", outside.to_str().unwrap()]);
    assert!(success, "import failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Imported handbook.md"));
    assert!(tmp.path().join("kb/handbook.md").exists());

    let odd = tmp.path().join("data.xlsx");
    fs::write(&odd, "x").unwrap();
    let (_, stderr, success) = run_kbchat(&config_path, &["kb", "import", odd.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("unsupported document format"));
}

#[test]
fn test_settings_set_and_show_masks_key() {
    let (tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_kbchat(
        &config_path,
        &["settings", "set", "api_key", "sk-or-secret-9876"],
    );
    assert!(success, "set failed: {}", stderr);
    let (_, _, success) = run_kbchat(&config_path, &["settings", "set", "ai_name", "Helper"]);
    assert!(success);

    let raw = fs::read_to_string(tmp.path().join("settings.json")).unwrap();
    assert!(raw.contains("sk-or-secret-9876"));

    let (stdout, _, success) = run_kbchat(&config_path, &["settings", "show"]);
    assert!(success);
    assert!(stdout.contains("****9876"));
    assert!(!stdout.contains("sk-or-secret"));
    assert!(stdout.contains("\"ai_name\": \"Helper\""));
}

#[test]
fn test_settings_set_rejects_bad_values() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) =
        run_kbchat(&config_path, &["settings", "set", "background_opacity", "2"]);
    assert!(!success);
    assert!(stderr.contains("background_opacity"));

    let (_, stderr, success) = run_kbchat(&config_path, &["settings", "set", "colour", "red"]);
    assert!(!success);
    assert!(stderr.contains("Unknown settings key"));
}

#[test]
fn test_ask_without_api_key_fails_before_sending() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_kbchat(&config_path, &["ask", "hello"]);
    assert!(!success);
    assert!(stderr.contains("no API key configured"));
}

#[test]
fn test_invalid_config_is_an_error() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("kbchat.toml");
    fs::write(&config_path, "[api]\nmax_tokens = 0\n").unwrap();

    let (_, stderr, success) = run_kbchat(&config_path, &["kb", "list"]);
    assert!(!success);
    assert!(stderr.contains("max_tokens"));
}
