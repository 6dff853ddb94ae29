//! On-disk page cache: `<cache>/document-<id>/` holding zero-padded page
//! files so lexicographic order equals page order, per §4.1.
//!
//! Grounded on `elevatelaw-prompt-scaler/src/page_iter.rs`'s
//! zero-padded-filename-implies-order convention.

use crate::ocr::page_source::SourcePage;
use crate::prelude::*;

pub struct PageCache {
    dir: PathBuf,
}

impl PageCache {
    pub fn new(cache_root: &Path, document_id: i64) -> Self {
        Self {
            dir: cache_root.join(format!("document-{document_id}")),
        }
    }

    /// Does a complete cache matching `expected_pages` already exist?
    pub async fn is_complete(&self, expected_pages: usize) -> bool {
        let Ok(mut entries) = tokio::fs::read_dir(&self.dir).await else {
            return false;
        };
        let mut count = 0;
        while let Ok(Some(_)) = entries.next_entry().await {
            count += 1;
        }
        count == expected_pages && expected_pages > 0
    }

    pub async fn load(&self, page_count: usize) -> Result<Vec<SourcePage>> {
        let mut paths = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("failed to read cache dir {:?}", self.dir.display()))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .context("failed to read cache entry")?
        {
            paths.push(entry.path());
        }
        paths.sort();
        paths.truncate(page_count);

        let mut pages = Vec::with_capacity(paths.len());
        for path in paths {
            let mime_type = mime_guess::from_path(&path)
                .first_or_octet_stream()
                .to_string();
            let data = tokio::fs::read(&path)
                .await
                .with_context(|| format!("failed to read cached page {:?}", path.display()))?;
            pages.push(SourcePage { mime_type, data });
        }
        Ok(pages)
    }

    /// Load a single cached page by index, for targeted re-OCR of one page.
    pub async fn load_one(&self, index: usize) -> Result<SourcePage> {
        let mut paths = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("failed to read cache dir {:?}", self.dir.display()))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .context("failed to read cache entry")?
        {
            paths.push(entry.path());
        }
        paths.sort();
        let path = paths
            .get(index)
            .ok_or_else(|| anyhow!("no cached page at index {index}"))?;
        let mime_type = mime_guess::from_path(path).first_or_octet_stream().to_string();
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read cached page {:?}", path.display()))?;
        Ok(SourcePage { mime_type, data })
    }

    pub async fn store(&self, pages: &[SourcePage]) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create cache dir {:?}", self.dir.display()))?;
        for (index, page) in pages.iter().enumerate() {
            let path = self.page_path_with_extension(index, &page.mime_type);
            tokio::fs::write(&path, &page.data)
                .await
                .with_context(|| format!("failed to write cache file {:?}", path.display()))?;
        }
        Ok(())
    }

    /// Remove the cache directory, ignoring a missing directory.
    pub async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => {
                Err(error).with_context(|| format!("failed to clear cache {:?}", self.dir.display()))
            }
        }
    }

    fn page_path_with_extension(&self, index: usize, mime_type: &str) -> PathBuf {
        let ext = match mime_type {
            "image/jpeg" => "jpg",
            "image/png" => "png",
            "application/pdf" => "pdf",
            _ => "bin",
        };
        self.dir.join(format!("{index:08}.{ext}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stores_and_reloads_pages_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = PageCache::new(tmp.path(), 42);
        let pages = vec![
            SourcePage {
                mime_type: "image/jpeg".to_string(),
                data: vec![1, 2, 3],
            },
            SourcePage {
                mime_type: "image/jpeg".to_string(),
                data: vec![4, 5, 6],
            },
        ];
        cache.store(&pages).await.unwrap();
        assert!(cache.is_complete(2).await);
        assert!(!cache.is_complete(3).await);
        let loaded = cache.load(2).await.unwrap();
        assert_eq!(loaded[0].data, vec![1, 2, 3]);
        assert_eq!(loaded[1].data, vec![4, 5, 6]);
    }
}
