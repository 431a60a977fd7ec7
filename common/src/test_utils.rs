use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Returns the workspace root directory (parent of the calling crate).
fn workspace_root() -> PathBuf {
    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    PathBuf::from(manifest_dir)
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from(manifest_dir))
}

/// Returns the path to a test output file, creating `test_output/`.
pub fn test_output_path(name: &str) -> PathBuf {
    let dir = workspace_root().join("test_output");
    std::fs::create_dir_all(&dir).expect("Failed to create test_output directory");
    dir.join(name)
}

/// Returns a fresh, empty directory under `test_output/`.
///
/// The process id and a counter keep parallel tests apart.
pub fn unique_test_dir(prefix: &str) -> PathBuf {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let n = COUNTER.fetch_add(1, Ordering::SeqCst);
    let dir = test_output_path(&format!("{prefix}_{}_{n}", std::process::id()));
    if dir.exists() {
        std::fs::remove_dir_all(&dir).expect("Failed to clear test directory");
    }
    std::fs::create_dir_all(&dir).expect("Failed to create test directory");
    dir
}
