use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// setoption で送る名前と値の組。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineOption {
    pub name: String,
    pub value: String,
}

/// エンジンプロセス起動時の設定。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub name: String,
    pub path: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub options: Vec<EngineOption>,
    #[serde(default)]
    pub ponder: bool,
}

impl EngineConfig {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            args: Vec::new(),
            options: Vec::new(),
            ponder: false,
        }
    }
}

/// 設定済みエンジンの一覧。プロセス全体の暗黙状態にせず、
/// 明示的に構築してファクトリへ参照で渡す。
#[derive(Clone, Debug, Default, Deserialize)]
pub struct EngineRegistry {
    #[serde(default)]
    pub engines: Vec<EngineConfig>,
}

impl EngineRegistry {
    /// TOML 設定ファイルから読み込む。
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn add(&mut self, cfg: EngineConfig) {
        self.engines.push(cfg);
    }

    pub fn get(&self, name: &str) -> Option<&EngineConfig> {
        self.engines.iter().find(|e| e.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn registry_loads_toml_definitions() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[[engines]]
name = "stockfish"
path = "/usr/bin/stockfish"
args = []
ponder = true

[[engines.options]]
name = "Hash"
value = "256"

[[engines]]
name = "weak"
path = "/opt/weak-engine"
"#
        )
        .unwrap();

        let registry = EngineRegistry::load(file.path()).unwrap();
        assert_eq!(registry.engines.len(), 2);
        let sf = registry.get("stockfish").unwrap();
        assert!(sf.ponder);
        assert_eq!(sf.options[0].name, "Hash");
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn registry_rejects_bad_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "engines = 42").unwrap();
        assert!(EngineRegistry::load(file.path()).is_err());
    }
}
