//! Gallery construction from a directory of per-identity folders.
//!
//! ```text
//! dataset/
//!   alice/  front.jpg  side.jpg
//!   bob/    bob1.png
//! ```
//!
//! Each folder name is a label; each file inside contributes at most one
//! entry (its first encoding). Files with no detectable face, or that the
//! encoder cannot read, are skipped.

use crate::encoder::FaceEncoder;
use crate::types::Gallery;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("gallery root {path} is not readable: {source}")]
    RootUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("gallery root {0} is not a directory")]
    NotADirectory(PathBuf),
}

/// Scan `root` and encode every reference photo.
///
/// Label folders and the files inside them are visited in file-name order so
/// the resulting gallery is identical across runs over the same tree.
pub fn build_gallery<E>(root: &Path, encoder: &mut E) -> Result<Gallery, GalleryError>
where
    E: FaceEncoder + ?Sized,
{
    let metadata = fs::metadata(root).map_err(|source| GalleryError::RootUnreadable {
        path: root.to_path_buf(),
        source,
    })?;
    if !metadata.is_dir() {
        return Err(GalleryError::NotADirectory(root.to_path_buf()));
    }

    let label_dirs = sorted_entries(root)
        .map_err(|source| GalleryError::RootUnreadable {
            path: root.to_path_buf(),
            source,
        })?
        .into_iter()
        .filter(|path| path.is_dir());

    let mut gallery = Gallery::new();

    for dir in label_dirs {
        let Some(label) = dir.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };

        let files = match sorted_entries(&dir) {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!(label = %label, error = %e, "cannot read label folder; skipping");
                continue;
            }
        };

        let before = gallery.len();
        let mut model = None;
        for file in files.into_iter().filter(|p| p.is_file()) {
            match encoder.encode(&file) {
                Ok(encodings) => match encodings.into_iter().next() {
                    Some(encoding) => {
                        model = model.or_else(|| encoding.model_version.clone());
                        gallery.push(label.clone(), encoding)
                    }
                    None => {
                        tracing::debug!(path = %file.display(), "no face in reference photo; skipping")
                    }
                },
                Err(e) => {
                    tracing::warn!(path = %file.display(), error = %e, "cannot encode reference photo; skipping")
                }
            }
        }

        tracing::info!(
            label = %label,
            faces = gallery.len() - before,
            model = model.as_deref().unwrap_or("unknown"),
            "loaded identity"
        );
    }

    if gallery.is_empty() {
        tracing::warn!(root = %root.display(), "gallery is empty; every visitor will be reported as unknown");
    }

    Ok(gallery)
}

fn sorted_entries(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut paths = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::EncodeError;
    use crate::types::Embedding;

    /// Encodes a file from its text content: "none" → no face, "bad" → error,
    /// otherwise a comma-separated vector (a second line adds a second face).
    struct TextEncoder {
        calls: Vec<PathBuf>,
    }

    impl FaceEncoder for TextEncoder {
        fn encode(&mut self, image_path: &Path) -> Result<Vec<Embedding>, EncodeError> {
            self.calls.push(image_path.to_path_buf());
            let text = fs::read_to_string(image_path).unwrap();
            match text.trim() {
                "none" => Ok(vec![]),
                "bad" => Err(EncodeError::Image {
                    path: image_path.to_path_buf(),
                    source: image::ImageError::IoError(std::io::Error::other("corrupt")),
                }),
                body => Ok(body
                    .lines()
                    .map(|line| {
                        Embedding::new(line.split(',').map(|v| v.trim().parse().unwrap()).collect())
                    })
                    .collect()),
            }
        }
    }

    fn encoder() -> TextEncoder {
        TextEncoder { calls: Vec::new() }
    }

    fn write(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    #[test]
    fn test_builds_entries_in_scan_order() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "bob/2.jpg", "0.0,2.0");
        write(dir.path(), "alice/b.jpg", "1.0,1.0");
        write(dir.path(), "alice/a.jpg", "1.0,0.0");

        let gallery = build_gallery(dir.path(), &mut encoder()).unwrap();
        let summary: Vec<(&str, &[f32])> = gallery
            .iter()
            .map(|e| (e.label.as_str(), e.encoding.values.as_slice()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("alice", &[1.0f32, 0.0][..]),
                ("alice", &[1.0f32, 1.0][..]),
                ("bob", &[0.0f32, 2.0][..]),
            ]
        );
    }

    #[test]
    fn test_repeated_builds_are_identical() {
        let dir = tempfile::tempdir().unwrap();
        for (i, label) in ["carol", "alice", "bob", "dave"].iter().enumerate() {
            for j in 0..3 {
                write(dir.path(), &format!("{label}/{j}.jpg"), &format!("{i}.0,{j}.0"));
            }
        }

        let first = build_gallery(dir.path(), &mut encoder()).unwrap();
        let second = build_gallery(dir.path(), &mut encoder()).unwrap();
        assert_eq!(first.len(), 12);
        assert_eq!(first, second);
    }

    #[test]
    fn test_faceless_photo_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "alice/a.jpg", "none");
        write(dir.path(), "alice/b.jpg", "1.0,0.0");

        let mut enc = encoder();
        let gallery = build_gallery(dir.path(), &mut enc).unwrap();
        assert_eq!(gallery.len(), 1);
        assert_eq!(enc.calls.len(), 2, "scan continues past the faceless photo");
    }

    #[test]
    fn test_unreadable_photo_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "alice/a.jpg", "bad");
        write(dir.path(), "bob/b.jpg", "0.0,1.0");

        let gallery = build_gallery(dir.path(), &mut encoder()).unwrap();
        assert_eq!(gallery.labels(), vec!["bob"]);
    }

    #[test]
    fn test_only_first_face_per_photo() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "alice/group.jpg", "1.0,0.0\n0.0,1.0");

        let gallery = build_gallery(dir.path(), &mut encoder()).unwrap();
        assert_eq!(gallery.len(), 1);
        assert_eq!(gallery.entries()[0].encoding.values, vec![1.0, 0.0]);
    }

    #[test]
    fn test_root_files_and_nested_dirs_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "README.txt", "1.0,0.0");
        write(dir.path(), "alice/nested/deep.jpg", "1.0,0.0");
        write(dir.path(), "alice/a.jpg", "0.0,1.0");

        let mut enc = encoder();
        let gallery = build_gallery(dir.path(), &mut enc).unwrap();
        assert_eq!(gallery.len(), 1);
        assert_eq!(enc.calls, vec![dir.path().join("alice/a.jpg")]);
    }

    #[test]
    fn test_missing_root_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let result = build_gallery(&dir.path().join("missing"), &mut encoder());
        assert!(matches!(result, Err(GalleryError::RootUnreadable { .. })));
    }

    #[test]
    fn test_file_root_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "dataset", "not a dir");
        let result = build_gallery(&dir.path().join("dataset"), &mut encoder());
        assert!(matches!(result, Err(GalleryError::NotADirectory(_))));
    }

    #[test]
    fn test_empty_root_gives_empty_gallery() {
        let dir = tempfile::tempdir().unwrap();
        let gallery = build_gallery(dir.path(), &mut encoder()).unwrap();
        assert!(gallery.is_empty());
    }
}
