use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn bridge_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("persona-bridge");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let corpus_dir = root.join("corpus");
    fs::create_dir_all(corpus_dir.join("nested")).unwrap();
    fs::write(
        corpus_dir.join("ansiedad.md"),
        "Cuando alguien dice que tiene ansiedad, primero escucho.",
    )
    .unwrap();
    fs::write(
        corpus_dir.join("nested/trabajo.txt"),
        "El trabajo no define quién eres.",
    )
    .unwrap();
    fs::write(corpus_dir.join("ignored.json"), "{}").unwrap();

    let humor_dir = root.join("humor");
    fs::create_dir_all(&humor_dir).unwrap();
    fs::write(
        humor_dir.join("bromas.md"),
        "El universo no lee tus correos.\n\nLa energía no se manifiesta sola.\n\nLo absurdo también cuenta.",
    )
    .unwrap();

    fs::write(root.join("persona.txt"), "Eres Sergio.\n\n{personality_context}").unwrap();

    let config_content = format!(
        r#"[server]
host = "127.0.0.1"
port = 7339

[persona]
path = "{root}/persona.txt"

[rag]
db_path = "{root}/data/collections.sqlite"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("persona-bridge.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_bridge(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = bridge_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run persona-bridge at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn doc_count(stdout: &str, key: &str) -> i64 {
    let line = stdout
        .lines()
        .find(|l| l.split_whitespace().next() == Some(key))
        .unwrap_or_else(|| panic!("no row for {} in:\n{}", key, stdout));
    line.split_whitespace().nth(4).unwrap().parse().unwrap()
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_bridge(&config_path, &["init"]);
    assert!(success, "init failed: {}", stderr);
    assert!(stdout.contains("Database initialized successfully."));
    assert!(tmp.path().join("data/collections.sqlite").exists());

    let (_, stderr, success) = run_bridge(&config_path, &["init"]);
    assert!(success, "second init failed: {}", stderr);
}

#[test]
fn test_load_and_list_collections() {
    let (tmp, config_path) = setup_test_env();
    let root = tmp.path();

    let (_, stderr, success) = run_bridge(&config_path, &["init"]);
    assert!(success, "init failed: {}", stderr);

    let corpus = root.join("corpus");
    let (stdout, stderr, success) =
        run_bridge(&config_path, &["load", "corpus", corpus.to_str().unwrap()]);
    assert!(success, "load failed: {}", stderr);
    assert!(stdout.contains("load sergio_corpus"));
    assert!(stdout.contains("documents found: 2"));
    assert!(stdout.contains("ok"));

    let humor = root.join("humor");
    let (stdout, stderr, success) = run_bridge(
        &config_path,
        &["load", "humor", humor.to_str().unwrap(), "--split-paragraphs"],
    );
    assert!(success, "load failed: {}", stderr);
    assert!(stdout.contains("documents found: 3"));

    let (stdout, stderr, success) = run_bridge(&config_path, &["collections"]);
    assert!(success, "collections failed: {}", stderr);
    assert!(stdout.contains("available: true"));
    assert_eq!(doc_count(&stdout, "corpus"), 2);
    assert_eq!(doc_count(&stdout, "humor"), 3);
    assert_eq!(doc_count(&stdout, "personality"), 0);
}

#[test]
fn test_reload_replaces_documents() {
    let (tmp, config_path) = setup_test_env();
    let corpus = tmp.path().join("corpus");

    run_bridge(&config_path, &["init"]);
    run_bridge(&config_path, &["load", "corpus", corpus.to_str().unwrap()]);
    fs::write(corpus.join("ansiedad.md"), "Texto nuevo sobre la calma.").unwrap();
    let (_, stderr, success) =
        run_bridge(&config_path, &["load", "corpus", corpus.to_str().unwrap()]);
    assert!(success, "reload failed: {}", stderr);

    let (stdout, _, _) = run_bridge(&config_path, &["collections"]);
    assert_eq!(doc_count(&stdout, "corpus"), 2);
}

#[test]
fn test_load_missing_directory_fails() {
    let (tmp, config_path) = setup_test_env();
    let missing = tmp.path().join("nope");
    let (_, stderr, success) =
        run_bridge(&config_path, &["load", "corpus", missing.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("does not exist"), "{}", stderr);
}

#[test]
fn test_prompt_includes_retrieved_context() {
    let (tmp, config_path) = setup_test_env();
    let corpus = tmp.path().join("corpus");

    run_bridge(&config_path, &["init"]);
    run_bridge(&config_path, &["load", "corpus", corpus.to_str().unwrap()]);

    let (stdout, stderr, success) =
        run_bridge(&config_path, &["prompt", "tengo mucha ansiedad"]);
    assert!(success, "prompt failed: {}", stderr);
    assert!(stdout.starts_with("System: Eres Sergio."), "{}", stdout);
    assert!(stdout.contains("CONVERSATION EXAMPLES FROM SERGIO:"));
    assert!(stdout.contains("primero escucho"));
    assert!(!stdout.contains("HUMOR PATTERNS TO DEPLOY:"));
    assert!(stdout.trim_end().ends_with("Human: tengo mucha ansiedad"));
}

#[test]
fn test_prompt_without_database_uses_sentinel() {
    let (_tmp, config_path) = setup_test_env();
    let (stdout, stderr, success) = run_bridge(&config_path, &["prompt", "hola"]);
    assert!(success, "prompt failed: {}", stderr);
    assert!(stdout.contains("No additional context retrieved."));
}
