//! 规则加载器
//!
//! 从规则源获取全部文档并编译为 `event_name -> RuleSet` 映射。
//! 任一文档出错都会中止整次加载，避免发布只更新了一半的规则表。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, instrument};

use crate::compiler::RuleCompiler;
use crate::error::{Result, RuleError};
use crate::models::{RuleDocument, RuleSet};

/// 默认规则文件后缀
pub const DEFAULT_FILE_SUFFIX: &str = "-rules.json";

/// 规则源中取出的一份文档
#[derive(Debug, Clone)]
pub struct SourceDocument {
    /// 文档来源（文件路径等），仅用于日志
    pub origin: String,
    pub document: RuleDocument,
}

/// 规则源抽象
///
/// 加载器只关心文档列表，与存储介质无关。
#[cfg_attr(test, mockall::automock)]
pub trait RuleSource: Send + Sync {
    fn fetch(&self) -> Result<Vec<SourceDocument>>;
}

// ---------------------------------------------------------------------------
// DirectoryRuleSource
// ---------------------------------------------------------------------------

/// 基于目录的规则源
///
/// 读取目录下所有以指定后缀结尾的普通文件，按文件名排序保证加载顺序稳定。
#[derive(Debug, Clone)]
pub struct DirectoryRuleSource {
    dir: PathBuf,
    suffix: String,
}

impl DirectoryRuleSource {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self::with_suffix(dir, DEFAULT_FILE_SUFFIX)
    }

    pub fn with_suffix(dir: impl AsRef<Path>, suffix: impl Into<String>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            suffix: suffix.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn io_error(path: &Path, source: std::io::Error) -> RuleError {
        RuleError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// 列出匹配后缀的规则文件
    fn rule_files(&self) -> Result<Vec<PathBuf>> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| Self::io_error(&self.dir, e))?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Self::io_error(&self.dir, e))?;
            let path = entry.path();
            let file_type = entry.file_type().map_err(|e| Self::io_error(&path, e))?;
            let matches_suffix = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(&self.suffix));

            if file_type.is_file() && matches_suffix {
                files.push(path);
            }
        }

        files.sort();
        Ok(files)
    }
}

impl RuleSource for DirectoryRuleSource {
    fn fetch(&self) -> Result<Vec<SourceDocument>> {
        self.rule_files()?
            .into_iter()
            .map(|path| {
                let text =
                    std::fs::read_to_string(&path).map_err(|e| Self::io_error(&path, e))?;
                let origin = path.display().to_string();
                let document =
                    serde_json::from_str(&text).map_err(|source| RuleError::Json {
                        origin: origin.clone(),
                        source,
                    })?;
                Ok(SourceDocument { origin, document })
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// StaticRuleSource
// ---------------------------------------------------------------------------

/// 内存中的固定规则源，用于嵌入和测试
#[derive(Debug, Clone, Default)]
pub struct StaticRuleSource {
    documents: Vec<RuleDocument>,
}

impl StaticRuleSource {
    pub fn new(documents: Vec<RuleDocument>) -> Self {
        Self { documents }
    }
}

impl RuleSource for StaticRuleSource {
    fn fetch(&self) -> Result<Vec<SourceDocument>> {
        Ok(self
            .documents
            .iter()
            .enumerate()
            .map(|(i, document)| SourceDocument {
                origin: format!("static[{}]", i),
                document: document.clone(),
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// RuleLoader
// ---------------------------------------------------------------------------

/// 规则加载器
#[derive(Clone)]
pub struct RuleLoader {
    source: Arc<dyn RuleSource>,
    compiler: RuleCompiler,
}

impl RuleLoader {
    pub fn new(source: Arc<dyn RuleSource>) -> Self {
        Self {
            source,
            compiler: RuleCompiler::new(),
        }
    }

    /// 加载并编译全部规则文档
    #[instrument(skip(self))]
    pub fn load_all(&self) -> Result<HashMap<String, RuleSet>> {
        let documents = self.source.fetch().inspect_err(|e| {
            error!(error = %e, "读取规则源失败");
        })?;

        let mut rule_sets = HashMap::with_capacity(documents.len());
        for SourceDocument { origin, document } in documents {
            let rule_set = self.compiler.compile(document).inspect_err(|e| {
                error!(origin = %origin, error = %e, code = e.code(), "规则文档编译失败");
            })?;

            debug!(
                origin = %origin,
                event_name = %rule_set.event_name,
                rules = rule_set.len(),
                "规则文档已编译"
            );

            if rule_sets.contains_key(&rule_set.event_name) {
                error!(origin = %origin, event_name = %rule_set.event_name, "事件规则重复定义");
                return Err(RuleError::DuplicateEvent {
                    event_name: rule_set.event_name,
                });
            }
            rule_sets.insert(rule_set.event_name.clone(), rule_set);
        }

        info!(rule_sets = rule_sets.len(), "规则加载完成");
        Ok(rule_sets)
    }
}
