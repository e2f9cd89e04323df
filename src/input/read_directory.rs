// 该文件是 Chongshi （虫识） 项目的一部分。
// src/input/read_directory.rs - 目录图像批量输入
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
  collections::VecDeque,
  path::{Path, PathBuf},
};

use image::{ImageFormat, RgbImage};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use super::read_image_file::decode_rgb;
use crate::{FromUrl, FromUrlWithScheme, url_path};

#[derive(Error, Debug)]
pub enum DirectoryInputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("目录中没有图像文件: {0}")]
  NoImages(PathBuf),
}

/// 按文件名顺序逐张读取目录中的图像
///
/// 无法解码的文件会被跳过并记录警告。
pub struct DirectoryInput {
  pending: VecDeque<PathBuf>,
}

impl FromUrlWithScheme for DirectoryInput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryInput {
  type Error = DirectoryInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(DirectoryInputError::SchemeMismatch(url.scheme().to_string()));
    }
    Self::open(url_path(url))
  }
}

fn is_image_file(path: &Path) -> bool {
  path.is_file() && ImageFormat::from_path(path).is_ok()
}

impl DirectoryInput {
  pub fn open(directory: impl AsRef<Path>) -> Result<Self, DirectoryInputError> {
    let directory = directory.as_ref();
    let mut files = std::fs::read_dir(directory)?
      .filter_map(|entry| entry.ok().map(|e| e.path()))
      .filter(|path| is_image_file(path))
      .collect::<Vec<_>>();

    if files.is_empty() {
      return Err(DirectoryInputError::NoImages(directory.to_path_buf()));
    }
    files.sort();

    info!("目录 {} 中共有 {} 张图像", directory.display(), files.len());
    Ok(Self {
      pending: files.into(),
    })
  }

  pub fn remaining(&self) -> usize {
    self.pending.len()
  }
}

impl Iterator for DirectoryInput {
  type Item = RgbImage;

  fn next(&mut self) -> Option<Self::Item> {
    while let Some(path) = self.pending.pop_front() {
      match decode_rgb(&path) {
        Ok(image) => {
          debug!("读取图像: {}", path.display());
          return Some(image);
        }
        Err(e) => warn!("跳过无法读取的图像 {}: {}", path.display(), e),
      }
    }
    None
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn write_png(dir: &Path, name: &str, value: u8) {
    RgbImage::from_pixel(2, 2, image::Rgb([value, 0, 0]))
      .save(dir.join(name))
      .unwrap();
  }

  #[test]
  fn images_are_read_in_name_order() {
    let dir = tempfile::tempdir().unwrap();
    write_png(dir.path(), "b.png", 2);
    write_png(dir.path(), "a.png", 1);
    write_png(dir.path(), "c.png", 3);
    std::fs::write(dir.path().join("notes.txt"), "not an image").unwrap();

    let input = DirectoryInput::open(dir.path()).unwrap();
    assert_eq!(input.remaining(), 3);
    let reds = input.map(|image| image.get_pixel(0, 0).0[0]).collect::<Vec<_>>();
    assert_eq!(reds, [1, 2, 3]);
  }

  #[test]
  fn corrupt_image_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.png"), b"garbage").unwrap();
    write_png(dir.path(), "b.png", 9);

    let images = DirectoryInput::open(dir.path()).unwrap().collect::<Vec<_>>();
    assert_eq!(images.len(), 1);
    assert_eq!(images[0].get_pixel(0, 0).0[0], 9);
  }

  #[test]
  fn empty_directory_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
      DirectoryInput::open(dir.path()),
      Err(DirectoryInputError::NoImages(_))
    ));
  }
}
