// 该文件是 Chongshi （虫识） 项目的一部分。
// src/labels.rs - 类别标签表
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::{
  collections::HashMap,
  path::{Path, PathBuf},
  sync::{Arc, Mutex, OnceLock},
};

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const UNKNOWN_LABEL: &str = "Unknown";
pub const DEFAULT_MANIFEST_FIELD: &str = "idx_to_class";

#[derive(Error, Debug)]
pub enum LabelLoadError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 解析错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("清单缺少对象字段: {0}")]
  MissingField(String),
  #[error("清单缺少索引 {0}")]
  MissingIndex(usize),
  #[error("索引 {0} 对应的类别名不是字符串或数字")]
  NotAString(usize),
  #[error("清单中没有任何类别")]
  Empty,
}

/// 输出索引到类别名的有序映射，加载后只读
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelTable {
  labels: Box<[String]>,
  fallback: bool,
}

impl LabelTable {
  /// 加载失败时使用的单元素表 `["Unknown"]`
  pub fn unknown() -> Self {
    Self {
      labels: vec![UNKNOWN_LABEL.to_string()].into_boxed_slice(),
      fallback: true,
    }
  }

  pub fn from_labels<I, S>(labels: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let labels: Vec<String> = labels.into_iter().map(Into::into).collect();
    if labels.is_empty() {
      return Self::unknown();
    }
    Self {
      labels: labels.into_boxed_slice(),
      fallback: false,
    }
  }

  /// 从默认字段 `idx_to_class` 加载，失败时退化为 `["Unknown"]`
  pub fn load(path: impl AsRef<Path>) -> Self {
    LabelManifest::new(path.as_ref()).load()
  }

  /// 解析清单文本，键为 `"0"`, `"1"`, ... 的字符串索引
  pub fn parse(json: &str, field: &str) -> Result<Self, LabelLoadError> {
    let value: Value = serde_json::from_str(json)?;
    let entries = value
      .get(field)
      .and_then(Value::as_object)
      .ok_or_else(|| LabelLoadError::MissingField(field.to_string()))?;

    if entries.is_empty() {
      return Err(LabelLoadError::Empty);
    }

    let mut labels = Vec::with_capacity(entries.len());
    for index in 0..entries.len() {
      // 数字与布尔值按其 JSON 文本作为类别名
      let name = match entries
        .get(&index.to_string())
        .ok_or(LabelLoadError::MissingIndex(index))?
      {
        Value::String(name) => name.clone(),
        scalar @ (Value::Number(_) | Value::Bool(_)) => scalar.to_string(),
        _ => return Err(LabelLoadError::NotAString(index)),
      };
      labels.push(name);
    }

    Ok(Self {
      labels: labels.into_boxed_slice(),
      fallback: false,
    })
  }

  /// 按索引取类别名，越界时返回 `"Unknown"`
  pub fn get(&self, index: usize) -> &str {
    self
      .labels
      .get(index)
      .map(String::as_str)
      .unwrap_or(UNKNOWN_LABEL)
  }

  pub fn len(&self) -> usize {
    self.labels.len()
  }

  pub fn is_empty(&self) -> bool {
    self.labels.is_empty()
  }

  pub fn is_fallback(&self) -> bool {
    self.fallback
  }

  /// 标签数量是否恰好覆盖模型输出长度
  pub fn covers(&self, num_classes: usize) -> bool {
    self.labels.len() == num_classes
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.labels.iter().map(String::as_str)
  }
}

impl Default for LabelTable {
  fn default() -> Self {
    Self::unknown()
  }
}

/// 打包在应用中的标签清单
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LabelManifest {
  path: PathBuf,
  field: String,
}

type SharedTables = Mutex<HashMap<LabelManifest, Arc<LabelTable>>>;

fn shared_tables() -> &'static SharedTables {
  static TABLES: OnceLock<SharedTables> = OnceLock::new();
  TABLES.get_or_init(|| Mutex::new(HashMap::new()))
}

impl LabelManifest {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      field: DEFAULT_MANIFEST_FIELD.to_string(),
    }
  }

  pub fn with_field(mut self, field: impl Into<String>) -> Self {
    self.field = field.into();
    self
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn try_load(&self) -> Result<LabelTable, LabelLoadError> {
    let json = std::fs::read_to_string(&self.path)?;
    LabelTable::parse(&json, &self.field)
  }

  pub fn load(&self) -> LabelTable {
    match self.try_load() {
      Ok(table) => {
        info!("加载标签清单 {}: {} 个类别", self.path.display(), table.len());
        table
      }
      Err(e) => {
        warn!(
          "标签清单 {} 加载失败, 使用 \"{}\": {}",
          self.path.display(),
          UNKNOWN_LABEL,
          e
        );
        LabelTable::unknown()
      }
    }
  }

  /// 进程级缓存：每个清单只在首次使用时加载一次，之后一直复用
  pub fn shared(&self) -> Arc<LabelTable> {
    let mut tables = shared_tables()
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(table) = tables.get(self) {
      debug!("复用已缓存的标签表: {}", self.path.display());
      return table.clone();
    }
    let table = Arc::new(self.load());
    tables.insert(self.clone(), table.clone());
    table
  }
}

impl From<&str> for LabelManifest {
  fn from(path: &str) -> Self {
    LabelManifest::new(path)
  }
}

impl From<PathBuf> for LabelManifest {
  fn from(path: PathBuf) -> Self {
    LabelManifest::new(path)
  }
}

impl From<&Path> for LabelManifest {
  fn from(path: &Path) -> Self {
    LabelManifest::new(path)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_indices_in_order() {
    let json = r#"{"idx_to_class": {"1": "Blight", "0": "Healthy", "2": "Aphid"}}"#;
    let table = LabelTable::parse(json, DEFAULT_MANIFEST_FIELD).unwrap();
    assert_eq!(table.iter().collect::<Vec<_>>(), ["Healthy", "Blight", "Aphid"]);
    assert!(!table.is_fallback());
    assert!(table.covers(3));
  }

  #[test]
  fn gap_in_indices_is_an_error() {
    let json = r#"{"idx_to_class": {"0": "Healthy", "2": "Blight"}}"#;
    assert!(matches!(
      LabelTable::parse(json, DEFAULT_MANIFEST_FIELD),
      Err(LabelLoadError::MissingIndex(1))
    ));
  }

  #[test]
  fn missing_field_is_an_error() {
    let json = r#"{"classes": {"0": "Healthy"}}"#;
    assert!(matches!(
      LabelTable::parse(json, DEFAULT_MANIFEST_FIELD),
      Err(LabelLoadError::MissingField(_))
    ));
  }

  #[test]
  fn scalar_names_are_kept_as_text() {
    let json = r#"{"idx_to_class": {"0": 7, "1": "Blight", "2": true, "3": 1.5}}"#;
    let table = LabelTable::parse(json, DEFAULT_MANIFEST_FIELD).unwrap();
    assert_eq!(table.iter().collect::<Vec<_>>(), ["7", "Blight", "true", "1.5"]);
  }

  #[test]
  fn structured_name_is_an_error() {
    for name in ["null", "[\"Healthy\"]", "{\"name\": \"Healthy\"}"] {
      let json = format!(r#"{{"idx_to_class": {{"0": "Aphid", "1": {}}}}}"#, name);
      assert!(matches!(
        LabelTable::parse(&json, DEFAULT_MANIFEST_FIELD),
        Err(LabelLoadError::NotAString(1))
      ));
    }
  }

  #[test]
  fn custom_field_name() {
    let json = r#"{"classes": {"0": "Rust"}}"#;
    let table = LabelTable::parse(json, "classes").unwrap();
    assert_eq!(table.get(0), "Rust");
  }

  fn write_manifest(path: &Path, json: &str) {
    std::fs::write(path, json).unwrap();
  }

  #[test]
  fn custom_field_is_read_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("class_info.json");
    write_manifest(
      &path,
      r#"{"idx_to_class": {"0": "Ignored"}, "classes": {"0": "Healthy", "1": "Leaf Rust"}}"#,
    );

    let table = LabelManifest::new(&path).with_field("classes").load();
    assert!(!table.is_fallback());
    assert_eq!(table.iter().collect::<Vec<_>>(), ["Healthy", "Leaf Rust"]);

    // 字段不存在时退化为 Unknown
    let table = LabelManifest::new(&path).with_field("labels").load();
    assert!(table.is_fallback());
  }

  #[test]
  fn shared_table_is_loaded_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("class_info.json");
    write_manifest(&path, r#"{"idx_to_class": {"0": "Healthy", "1": "Blight"}}"#);

    let manifest = LabelManifest::new(&path);
    let first = manifest.shared();
    assert_eq!(first.iter().collect::<Vec<_>>(), ["Healthy", "Blight"]);

    write_manifest(&path, r#"{"idx_to_class": {"0": "Aphid"}}"#);
    let second = manifest.shared();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(second.iter().collect::<Vec<_>>(), ["Healthy", "Blight"]);

    // 直接加载会读到新内容，另一个字段也是独立的缓存项
    assert_eq!(manifest.load().iter().collect::<Vec<_>>(), ["Aphid"]);
    let other = manifest.clone().with_field("classes").shared();
    assert!(!Arc::ptr_eq(&first, &other));
    assert!(other.is_fallback());
  }

  #[test]
  fn out_of_range_lookup_is_unknown() {
    let table = LabelTable::from_labels(["Healthy"]);
    assert_eq!(table.get(5), UNKNOWN_LABEL);
  }

  #[test]
  fn missing_file_falls_back_to_unknown() {
    let table = LabelTable::load("/nonexistent/class_info.json");
    assert_eq!(table, LabelTable::unknown());
    assert_eq!(table.len(), 1);
    assert_eq!(table.get(0), UNKNOWN_LABEL);
  }

  #[test]
  fn empty_label_list_is_unknown() {
    assert!(LabelTable::from_labels(Vec::<String>::new()).is_fallback());
  }
}
