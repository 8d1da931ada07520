use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// 一時ディレクトリ上のテスト用プロジェクト
pub struct TestProject {
    pub root: TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        Self { root }
    }

    /// ship.kdl を書き込んでそのパスを返す
    pub fn write_ship_kdl(&self, content: &str) -> PathBuf {
        self.write("ship.kdl", content)
    }

    pub fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.root.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    #[allow(dead_code)]
    pub fn create_dir(&self, name: &str) -> PathBuf {
        let path = self.root.path().join(name);
        fs::create_dir_all(&path).unwrap();
        path
    }

    pub fn path(&self) -> PathBuf {
        self.root.path().to_path_buf()
    }
}
