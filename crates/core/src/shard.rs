//! Binary shards of packed token segments.
//!
//! Each shard is `{prefix}_{counter:010}.bin`: the `LITPKDS` magic, a format
//! version (u64 LE), a dtype code (u8), the chunk size in tokens (u64 LE),
//! then exactly `chunk_size` little-endian tokens. Unused slots hold the
//! separator token.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{PrepError, Result};

const MAGIC: &[u8; 7] = b"LITPKDS";
const VERSION: u64 = 1;

/// Receives fixed-length token arrays and persists them.
pub trait ShardWriter {
    fn add_array(&mut self, tokens: &[u32]) -> Result<()>;

    /// Write out the current, possibly partial, chunk.
    fn flush(&mut self) -> Result<()>;
}

/// Writer that drops everything, used when only counting segments.
#[derive(Debug, Default)]
pub struct NullShardWriter;

impl ShardWriter for NullShardWriter {
    fn add_array(&mut self, _tokens: &[u32]) -> Result<()> {
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// On-disk token width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardDtype {
    U16,
    I32,
}

impl ShardDtype {
    pub fn for_vocab(vocab_size: usize) -> Self {
        if vocab_size < 65500 {
            ShardDtype::U16
        } else {
            ShardDtype::I32
        }
    }

    pub fn code(self) -> u8 {
        match self {
            ShardDtype::I32 => 4,
            ShardDtype::U16 => 8,
        }
    }
}

/// Packs arrays back to back into `chunk_size`-token shard files.
pub struct PackedShardWriter {
    outdir: PathBuf,
    prefix: String,
    chunk_size: usize,
    sep_token: u32,
    dtype: ShardDtype,
    buffer: Vec<u32>,
    idx: usize,
    counter: usize,
    filenames: Vec<PathBuf>,
}

impl PackedShardWriter {
    pub fn new(
        outdir: &Path,
        prefix: &str,
        chunk_size: usize,
        sep_token: u32,
        dtype: ShardDtype,
    ) -> Result<Self> {
        if chunk_size == 0 {
            return Err(PrepError::Config("shard chunk size must be positive".to_string()));
        }
        Ok(Self {
            outdir: outdir.to_path_buf(),
            prefix: prefix.to_string(),
            chunk_size,
            sep_token,
            dtype,
            buffer: vec![sep_token; chunk_size],
            idx: 0,
            counter: 0,
            filenames: Vec::new(),
        })
    }

    /// Files written so far, in order.
    pub fn filenames(&self) -> &[PathBuf] {
        &self.filenames
    }

    fn write_chunk(&mut self) -> Result<()> {
        let path = self
            .outdir
            .join(format!("{}_{:010}.bin", self.prefix, self.counter));
        let mut out = BufWriter::new(File::create(&path)?);
        out.write_all(MAGIC)?;
        out.write_all(&VERSION.to_le_bytes())?;
        out.write_all(&[self.dtype.code()])?;
        out.write_all(&(self.chunk_size as u64).to_le_bytes())?;
        for &token in &self.buffer {
            match self.dtype {
                ShardDtype::U16 => {
                    let token = u16::try_from(token).map_err(|_| {
                        PrepError::Config(format!("token id {token} does not fit in a u16 shard"))
                    })?;
                    out.write_all(&token.to_le_bytes())?;
                }
                ShardDtype::I32 => out.write_all(&token.to_le_bytes())?,
            }
        }
        out.flush()?;
        debug!(path = %path.display(), "wrote shard");

        self.filenames.push(path);
        self.counter += 1;
        self.buffer.fill(self.sep_token);
        self.idx = 0;
        Ok(())
    }
}

impl ShardWriter for PackedShardWriter {
    fn add_array(&mut self, tokens: &[u32]) -> Result<()> {
        let mut rest = tokens;
        while self.idx + rest.len() > self.chunk_size {
            let part = self.chunk_size - self.idx;
            self.buffer[self.idx..].copy_from_slice(&rest[..part]);
            self.idx = self.chunk_size;
            self.write_chunk()?;
            rest = &rest[part..];
        }
        self.buffer[self.idx..self.idx + rest.len()].copy_from_slice(rest);
        self.idx += rest.len();
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.write_chunk()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Parse a shard back into its dtype code and tokens.
    pub(crate) fn read_shard(path: &Path) -> (u8, Vec<u32>) {
        let bytes = std::fs::read(path).unwrap();
        assert_eq!(&bytes[..7], MAGIC);
        assert_eq!(u64::from_le_bytes(bytes[7..15].try_into().unwrap()), VERSION);
        let code = bytes[15];
        let chunk_size = u64::from_le_bytes(bytes[16..24].try_into().unwrap()) as usize;
        let data = &bytes[24..];
        let tokens: Vec<u32> = match code {
            8 => data
                .chunks_exact(2)
                .map(|b| u32::from(u16::from_le_bytes([b[0], b[1]])))
                .collect(),
            4 => data
                .chunks_exact(4)
                .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
            other => panic!("unexpected dtype code {other}"),
        };
        assert_eq!(tokens.len(), chunk_size);
        (code, tokens)
    }

    #[test]
    fn test_dtype_for_vocab() {
        assert_eq!(ShardDtype::for_vocab(32000), ShardDtype::U16);
        assert_eq!(ShardDtype::for_vocab(65500), ShardDtype::I32);
        assert_eq!(ShardDtype::for_vocab(128_256).code(), 4);
    }

    #[test]
    fn test_arrays_spill_across_shards() {
        let dir = TempDir::new().unwrap();
        let mut writer = PackedShardWriter::new(dir.path(), "a--b", 6, 0, ShardDtype::U16).unwrap();
        writer.add_array(&[1, 2, 3, 4]).unwrap();
        writer.add_array(&[5, 6, 7, 8]).unwrap();
        writer.flush().unwrap();

        let names: Vec<String> = writer
            .filenames()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a--b_0000000000.bin", "a--b_0000000001.bin"]);

        assert_eq!(read_shard(&writer.filenames()[0]), (8, vec![1, 2, 3, 4, 5, 6]));
        assert_eq!(read_shard(&writer.filenames()[1]), (8, vec![7, 8, 0, 0, 0, 0]));
    }

    #[test]
    fn test_wide_vocab_uses_i32() {
        let dir = TempDir::new().unwrap();
        let mut writer = PackedShardWriter::new(dir.path(), "wide", 3, 2, ShardDtype::I32).unwrap();
        writer.add_array(&[100_000, 7]).unwrap();
        writer.flush().unwrap();
        assert_eq!(read_shard(&writer.filenames()[0]), (4, vec![100_000, 7, 2]));
    }

    #[test]
    fn test_u16_overflow_is_an_error() {
        let dir = TempDir::new().unwrap();
        let mut writer = PackedShardWriter::new(dir.path(), "narrow", 2, 0, ShardDtype::U16).unwrap();
        writer.add_array(&[70_000]).unwrap();
        assert!(matches!(writer.flush(), Err(PrepError::Config(_))));
    }
}
