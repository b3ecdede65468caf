// Paginated documents. The storefront ships ebooks as page archives: a zip
// container holding one entry per page, ordered by entry name.

use std::io::{Cursor, Read};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, bail};
use bytes::Bytes;

use crate::session::surface::RasterBuffer;

pub trait PagedDocument: Send + Sync {
    /// Known once the document has been fully parsed.
    fn page_count(&self) -> u32;
    /// Decode one page (1-based).
    fn decode_page(&self, page: u32) -> anyhow::Result<RasterBuffer>;
}

pub trait DocumentLoader: Send + Sync {
    fn load(&self, body: Bytes) -> anyhow::Result<Box<dyn PagedDocument>>;
}

pub struct PageArchive {
    archive: Mutex<zip::ZipArchive<Cursor<Bytes>>>,
    /// Archive indices of the page entries, in reading order.
    pages: Vec<usize>,
}

impl PageArchive {
    pub fn parse(body: Bytes) -> anyhow::Result<Self> {
        let mut archive =
            zip::ZipArchive::new(Cursor::new(body)).context("document is not a page archive")?;
        let mut named: Vec<(String, usize)> = Vec::with_capacity(archive.len());
        for index in 0..archive.len() {
            let entry = archive
                .by_index(index)
                .with_context(|| format!("unreadable archive entry {}", index))?;
            if entry.is_dir() {
                continue;
            }
            named.push((entry.name().to_string(), index));
        }
        if named.is_empty() {
            bail!("page archive contains no pages");
        }
        named.sort();
        Ok(PageArchive {
            archive: Mutex::new(archive),
            pages: named.into_iter().map(|(_, index)| index).collect(),
        })
    }
}

impl PagedDocument for PageArchive {
    fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    fn decode_page(&self, page: u32) -> anyhow::Result<RasterBuffer> {
        let index = page
            .checked_sub(1)
            .and_then(|i| self.pages.get(i as usize))
            .copied()
            .with_context(|| format!("page {} out of range 1..={}", page, self.pages.len()))?;
        let mut archive = self.archive.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entry = archive
            .by_index(index)
            .with_context(|| format!("page {} missing from archive", page))?;
        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut bytes)
            .with_context(|| format!("failed to inflate page {}", page))?;
        Ok(RasterBuffer::new(bytes))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PageArchiveLoader;

impl DocumentLoader for PageArchiveLoader {
    fn load(&self, body: Bytes) -> anyhow::Result<Box<dyn PagedDocument>> {
        Ok(Box::new(PageArchive::parse(body)?))
    }
}

/// Build an in-memory page archive; pages are named so they sort in order.
#[cfg(test)]
pub(crate) fn archive_with_pages(pages: &[&[u8]]) -> Bytes {
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    writer.add_directory("pages/", options).unwrap();
    for (i, page) in pages.iter().enumerate() {
        writer
            .start_file(format!("pages/{:04}.png", i + 1), options)
            .unwrap();
        writer.write_all(page).unwrap();
    }
    Bytes::from(writer.finish().unwrap().into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_in_name_order() {
        let body = archive_with_pages(&[b"one", b"two", b"three"]);
        let doc = PageArchiveLoader.load(body).unwrap();
        assert_eq!(doc.page_count(), 3);
        assert_eq!(doc.decode_page(1).unwrap().bytes, b"one");
        assert_eq!(doc.decode_page(3).unwrap().bytes, b"three");
    }

    #[test]
    fn out_of_range_pages_fail() {
        let doc = PageArchive::parse(archive_with_pages(&[b"only"])).unwrap();
        assert!(doc.decode_page(0).is_err());
        assert!(doc.decode_page(2).is_err());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(PageArchive::parse(Bytes::from_static(b"%PDF-1.7 not a zip")).is_err());
    }
}
