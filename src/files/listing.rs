//! Generated directory listing pages.
//!
//! Entries are collected and sorted up front, then rendered one line at a
//! time as the writer pulls bytes, so the page is never held in memory whole
//! and is sent with chunked framing.

use std::io;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::fs;
use tokio::io::{AsyncRead, ReadBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub kind: EntryKind,
}

impl Entry {
    fn href(&self) -> String {
        let mut href = urlencoding::encode(&self.name).into_owned();
        if self.kind == EntryKind::Directory {
            href.push('/');
        }
        href
    }

    fn display_name(&self) -> String {
        let mut name = escape_html(&self.name);
        match self.kind {
            EntryKind::Directory => name.push('/'),
            EntryKind::Symlink => name.push('@'),
            EntryKind::File => {}
        }
        name
    }
}

/// Reads the entries of `dir`, ordered by name (case-insensitive, ties by exact bytes).
pub async fn read_entries(dir: &Path) -> io::Result<Vec<Entry>> {
    let mut read_dir = fs::read_dir(dir).await?;
    let mut entries = Vec::new();

    while let Some(entry) = read_dir.next_entry().await? {
        let file_type = entry.file_type().await?;
        let kind = if file_type.is_symlink() {
            EntryKind::Symlink
        } else if file_type.is_dir() {
            EntryKind::Directory
        } else {
            EntryKind::File
        };
        entries.push(Entry {
            name: entry.file_name().to_string_lossy().into_owned(),
            kind,
        });
    }

    entries.sort_by(|a, b| {
        a.name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.name.cmp(&b.name))
    });
    Ok(entries)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Header,
    Entries,
    Footer,
    Done,
}

/// HTML listing page rendered lazily as an [`AsyncRead`].
#[derive(Debug)]
pub struct ListingBody {
    title: String,
    entries: std::vec::IntoIter<Entry>,
    section: Section,
    pending: Vec<u8>,
    offset: usize,
}

impl ListingBody {
    /// `request_path` is the decoded path the listing is shown for.
    pub fn new(request_path: &str, entries: Vec<Entry>) -> Self {
        Self {
            title: format!("Directory listing for {}", escape_html(request_path)),
            entries: entries.into_iter(),
            section: Section::Header,
            pending: Vec::new(),
            offset: 0,
        }
    }

    /// Renders the next piece of the page into `pending`. False once finished.
    fn refill(&mut self) -> bool {
        self.pending.clear();
        self.offset = 0;

        match self.section {
            Section::Header => {
                self.pending.extend_from_slice(
                    format!(
                        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
                         <title>{0}</title>\n</head>\n<body>\n<h1>{0}</h1>\n<hr>\n<ul>\n",
                        self.title
                    )
                    .as_bytes(),
                );
                self.section = Section::Entries;
            }
            Section::Entries => match self.entries.next() {
                Some(entry) => {
                    self.pending.extend_from_slice(
                        format!(
                            "<li><a href=\"{}\">{}</a></li>\n",
                            entry.href(),
                            entry.display_name()
                        )
                        .as_bytes(),
                    );
                }
                None => {
                    self.section = Section::Footer;
                    return self.refill();
                }
            },
            Section::Footer => {
                self.pending
                    .extend_from_slice(b"</ul>\n<hr>\n</body>\n</html>\n");
                self.section = Section::Done;
            }
            Section::Done => return false,
        }
        true
    }
}

impl AsyncRead for ListingBody {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        while this.offset == this.pending.len() {
            if !this.refill() {
                return Poll::Ready(Ok(()));
            }
        }

        let available = &this.pending[this.offset..];
        let n = available.len().min(buf.remaining());
        buf.put_slice(&available[..n]);
        this.offset += n;
        Poll::Ready(Ok(()))
    }
}

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}
