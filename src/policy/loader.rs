//! 策略包加载与原子替换
//!
//! 来源：内置 trauma_informed_v1（编译期嵌入）+ 配置目录下的 *.toml。
//! PolicyStore 以 Arc 快照持有整组策略包，reload 时整体替换，求值方只会看到旧集合或新集合。

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::RwLock;

use crate::config::PolicySection;
use crate::policy::types::{PolicyBundle, RuleEffect};

const BUILTIN_TRAUMA_INFORMED: &str = include_str!("../../config/policies/trauma_informed_v1.toml");

#[derive(Error, Debug)]
pub enum PolicyLoadError {
    #[error("Failed to read policy file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse policy bundle {origin}: {message}")]
    Parse { origin: String, message: String },

    #[error("Duplicate policy bundle: {0}")]
    DuplicateBundle(String),

    #[error("Duplicate rule {rule} in bundle {bundle}")]
    DuplicateRule { bundle: String, rule: String },

    #[error("Invalid action '{action}' on rule {rule} in bundle {bundle}")]
    InvalidAction {
        bundle: String,
        rule: String,
        action: String,
    },

    #[error("Unknown policy bundle: {0}")]
    UnknownBundle(String),
}

/// 解析单个 TOML 策略包并校验规则 id 唯一、action 合法
pub fn parse_bundle(source: &str, origin: &str) -> Result<PolicyBundle, PolicyLoadError> {
    let bundle: PolicyBundle = toml::from_str(source).map_err(|e| PolicyLoadError::Parse {
        origin: origin.to_string(),
        message: e.to_string(),
    })?;
    validate_bundle(&bundle)?;
    Ok(bundle)
}

fn validate_bundle(bundle: &PolicyBundle) -> Result<(), PolicyLoadError> {
    let mut seen = HashSet::new();
    for rule in &bundle.rules {
        if !seen.insert(rule.id.as_str()) {
            return Err(PolicyLoadError::DuplicateRule {
                bundle: bundle.name.clone(),
                rule: rule.id.clone(),
            });
        }
        if RuleEffect::from_action(&rule.action).is_none() {
            return Err(PolicyLoadError::InvalidAction {
                bundle: bundle.name.clone(),
                rule: rule.id.clone(),
                action: rule.action.clone(),
            });
        }
    }
    Ok(())
}

pub fn builtin_bundles() -> Result<Vec<PolicyBundle>, PolicyLoadError> {
    Ok(vec![parse_bundle(BUILTIN_TRAUMA_INFORMED, "builtin:trauma_informed_v1")?])
}

pub fn load_bundle_file(path: &Path) -> Result<PolicyBundle, PolicyLoadError> {
    let source = std::fs::read_to_string(path).map_err(|source| PolicyLoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_bundle(&source, &path.display().to_string())
}

/// 读取目录下所有 *.toml（按文件名排序）
pub fn load_bundle_dir(dir: &Path) -> Result<Vec<PolicyBundle>, PolicyLoadError> {
    let entries = std::fs::read_dir(dir).map_err(|source| PolicyLoadError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| PolicyLoadError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "toml") {
            paths.push(path);
        }
    }
    paths.sort();

    paths.iter().map(|p| load_bundle_file(p)).collect()
}

/// 按配置加载：内置包在前，目录包在后；同名包报错
pub fn load_bundles(section: &PolicySection) -> Result<Vec<PolicyBundle>, PolicyLoadError> {
    let mut bundles = Vec::new();
    if section.include_builtin {
        bundles.extend(builtin_bundles()?);
    }
    if let Some(dir) = &section.bundle_dir {
        bundles.extend(load_bundle_dir(dir)?);
    }

    let mut names = HashSet::new();
    for bundle in &bundles {
        if !names.insert(bundle.name.clone()) {
            return Err(PolicyLoadError::DuplicateBundle(bundle.name.clone()));
        }
    }

    for active in &section.active_bundles {
        if !names.contains(active) {
            return Err(PolicyLoadError::UnknownBundle(active.clone()));
        }
    }

    tracing::info!("Loaded {} policy bundles", bundles.len());
    Ok(bundles)
}

/// 当前生效的策略包集合
pub struct PolicyStore {
    bundles: RwLock<Arc<Vec<PolicyBundle>>>,
}

impl PolicyStore {
    pub fn new(bundles: Vec<PolicyBundle>) -> Self {
        Self {
            bundles: RwLock::new(Arc::new(bundles)),
        }
    }

    pub fn from_config(section: &PolicySection) -> Result<Self, PolicyLoadError> {
        Ok(Self::new(load_bundles(section)?))
    }

    pub async fn snapshot(&self) -> Arc<Vec<PolicyBundle>> {
        Arc::clone(&*self.bundles.read().await)
    }

    /// 整体替换；已取得旧快照的求值不受影响
    pub async fn replace(&self, bundles: Vec<PolicyBundle>) {
        *self.bundles.write().await = Arc::new(bundles);
    }

    /// 重新加载；失败时保留旧集合
    pub async fn reload(&self, section: &PolicySection) -> Result<usize, PolicyLoadError> {
        let bundles = load_bundles(section)?;
        let count = bundles.len();
        self.replace(bundles).await;
        tracing::info!("Policy bundles reloaded ({})", count);
        Ok(count)
    }
}

/// 从快照中选出本轮适用的策略包：指定名称时按给定顺序，否则全部。
/// 任一名称不存在即报错，不会静默跳过。
pub fn select<'a>(bundles: &'a [PolicyBundle], names: &[String]) -> Result<Vec<&'a PolicyBundle>, PolicyLoadError> {
    if names.is_empty() {
        return Ok(bundles.iter().collect());
    }
    names
        .iter()
        .map(|name| {
            bundles
                .iter()
                .find(|b| &b.name == name)
                .ok_or_else(|| PolicyLoadError::UnknownBundle(name.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const EXTRA: &str = r#"
name = "org_extra"

[[rules]]
id = "no-admin-sms"
action = "deny"
when = { all = [ { capability_prefix = "admin." }, { channel = "sms" } ] }
"#;

    #[test]
    fn test_builtin_bundle_parses() {
        let bundles = builtin_bundles().unwrap();
        assert_eq!(bundles.len(), 1);
        assert_eq!(bundles[0].name, "trauma_informed_v1");
        assert!(bundles[0].rules.iter().any(|r| r.action == "route:crisis"));
    }

    #[test]
    fn test_duplicate_rule_rejected() {
        let source = r#"
name = "dup"
[[rules]]
id = "a"
action = "deny"
when = "always"
[[rules]]
id = "a"
action = "log:x"
when = "never"
"#;
        assert!(matches!(
            parse_bundle(source, "test"),
            Err(PolicyLoadError::DuplicateRule { .. })
        ));
    }

    #[test]
    fn test_invalid_route_rejected() {
        let source = r#"
name = "bad"
[[rules]]
id = "a"
action = "route:billing"
when = "always"
"#;
        assert!(matches!(
            parse_bundle(source, "test"),
            Err(PolicyLoadError::InvalidAction { .. })
        ));
    }

    #[test]
    fn test_load_dir_and_select() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join("extra.toml")).unwrap();
        file.write_all(EXTRA.as_bytes()).unwrap();
        std::fs::write(dir.path().join("README.md"), "ignored").unwrap();

        let section = PolicySection {
            bundle_dir: Some(dir.path().to_path_buf()),
            active_bundles: vec!["org_extra".to_string()],
            include_builtin: true,
        };
        let bundles = load_bundles(&section).unwrap();
        assert_eq!(bundles.len(), 2);

        let selected = select(&bundles, &section.active_bundles).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].name, "org_extra");
        assert_eq!(select(&bundles, &[]).unwrap().len(), 2);
    }

    #[test]
    fn test_select_unknown_name_is_error() {
        let bundles = builtin_bundles().unwrap();
        let names = vec!["trauma_informed_v1".to_string(), "trauma_informed_v2".to_string()];
        assert!(matches!(
            select(&bundles, &names),
            Err(PolicyLoadError::UnknownBundle(name)) if name == "trauma_informed_v2"
        ));
    }

    #[test]
    fn test_unknown_active_bundle() {
        let section = PolicySection {
            bundle_dir: None,
            active_bundles: vec!["missing".to_string()],
            include_builtin: true,
        };
        assert!(matches!(
            load_bundles(&section),
            Err(PolicyLoadError::UnknownBundle(name)) if name == "missing"
        ));
    }

    #[tokio::test]
    async fn test_reload_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("extra.toml");
        std::fs::write(&path, EXTRA).unwrap();
        let section = PolicySection {
            bundle_dir: Some(dir.path().to_path_buf()),
            active_bundles: Vec::new(),
            include_builtin: false,
        };
        let store = PolicyStore::from_config(&section).unwrap();
        let before = store.snapshot().await;

        std::fs::write(&path, EXTRA.replace("no-admin-sms", "no-admin-anywhere")).unwrap();
        assert_eq!(store.reload(&section).await.unwrap(), 1);
        let after = store.snapshot().await;
        assert_eq!(before[0].rules[0].id, "no-admin-sms");
        assert_eq!(after[0].rules[0].id, "no-admin-anywhere");

        // 解析失败时保留当前集合
        std::fs::write(&path, "name = ").unwrap();
        assert!(matches!(store.reload(&section).await, Err(PolicyLoadError::Parse { .. })));
        assert_eq!(store.snapshot().await[0].rules[0].id, "no-admin-anywhere");
    }

    #[tokio::test]
    async fn test_replace_keeps_old_snapshot_intact() {
        let store = PolicyStore::new(builtin_bundles().unwrap());
        let before = store.snapshot().await;
        store.replace(vec![parse_bundle(EXTRA, "extra").unwrap()]).await;
        let after = store.snapshot().await;
        assert_eq!(before[0].name, "trauma_informed_v1");
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].name, "org_extra");
    }
}
