//! The archive format cached for a generation action: the generated files it
//! produced, with their contents.
//!
//! An archive is a version byte `1` followed by entries, each
//! `<path>|<size>|<size bytes of content>`.  Paths are relative to the
//! package directory and may not contain `|`.  An empty file is an archive
//! with no entries.

use anyhow::{anyhow, bail};
use std::io::{BufRead, Read, Write};
use std::path::{Path, PathBuf};

const VERSION: u8 = b'1';

pub struct ArchiveWriter<W: Write> {
    w: W,
    base: PathBuf,
    count: usize,
}

impl<W: Write> ArchiveWriter<W> {
    pub fn new(mut w: W, base: &Path) -> anyhow::Result<Self> {
        w.write_all(&[VERSION])?;
        Ok(ArchiveWriter {
            w,
            base: base.to_path_buf(),
            count: 0,
        })
    }

    /// Append the file at path, which is stored relative to the base.
    pub fn add_file(&mut self, path: &Path) -> anyhow::Result<()> {
        let rel = crate::hash::relative_to(path, &self.base);
        let rel = rel
            .to_str()
            .ok_or_else(|| anyhow!("non-UTF-8 path {}", path.display()))?;
        if rel.contains('|') {
            bail!("cannot archive {}: path contains '|'", path.display());
        }
        let data = std::fs::read(path).map_err(|err| anyhow!("read {}: {}", path.display(), err))?;
        write!(self.w, "{}|{}|", rel, data.len())?;
        self.w.write_all(&data)?;
        self.count += 1;
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn finish(mut self) -> anyhow::Result<W> {
        self.w.flush()?;
        Ok(self.w)
    }
}

pub struct ArchiveReader<R: BufRead> {
    r: R,
    base: PathBuf,
    started: bool,
}

impl<R: BufRead> ArchiveReader<R> {
    pub fn new(r: R, base: &Path) -> Self {
        ArchiveReader {
            r,
            base: base.to_path_buf(),
            started: false,
        }
    }

    fn read_field(&mut self) -> anyhow::Result<Option<String>> {
        let mut buf = Vec::new();
        self.r.read_until(b'|', &mut buf)?;
        if buf.is_empty() {
            return Ok(None);
        }
        if buf.pop() != Some(b'|') {
            bail!("truncated archive entry");
        }
        Ok(Some(String::from_utf8(buf).map_err(|_| anyhow!("bad archive entry"))?))
    }

    /// Write out the next file of the archive, creating its directory as
    /// needed.  Returns the path written, or None at the end.
    pub fn extract_file(&mut self) -> anyhow::Result<Option<PathBuf>> {
        if !self.started {
            self.started = true;
            let mut version = [0u8; 1];
            match self.r.read(&mut version)? {
                0 => return Ok(None),
                _ if version[0] != VERSION => {
                    bail!("unknown archive version {:?}", version[0] as char)
                }
                _ => {}
            }
        }
        let rel = match self.read_field()? {
            Some(rel) => rel,
            None => return Ok(None),
        };
        let size: u64 = match self.read_field()? {
            Some(size) => size
                .parse()
                .map_err(|_| anyhow!("bad size {:?} for archived {}", size, rel))?,
            None => bail!("truncated archive entry for {}", rel),
        };
        let path = self.base.join(&rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut f = std::fs::File::create(&path)
            .map_err(|err| anyhow!("create {}: {}", path.display(), err))?;
        let copied = std::io::copy(&mut (&mut self.r).take(size), &mut f)?;
        if copied != size {
            bail!("truncated archive: {} has {} of {} bytes", rel, copied, size);
        }
        Ok(Some(path))
    }
}
