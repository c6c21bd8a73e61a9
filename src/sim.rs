//! Host-side collaborators
//!
//! [`SimFlash`] and [`MemStorage`] keep everything in memory and can be told to
//! fail at a given call; [`DirStorage`] serves files from a directory on disk.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;

use crate::{Geometry, Nvm, Storage};

/// Flash operation recorded by [`SimFlash`]
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum FlashOp {
    Erase(u32),
    Write(u32),
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum SimFlashError {
    /// Access outside the device
    OutOfBounds(u32),
    /// Erase not on a row boundary, or write not on a page boundary
    Misaligned(u32),
    /// Write not exactly one page long
    BadLength(usize),
    /// Failure requested with `fail_erase_on` / `fail_write_on`
    Injected,
}

/// NOR flash simulated in memory
///
/// Erase sets a row to `0xFF`, programming can only clear bits, like the real thing.
#[derive(Clone, Debug)]
pub struct SimFlash {
    geometry: Geometry,
    memory: Vec<u8>,
    ops: Vec<FlashOp>,
    erase_calls: usize,
    write_calls: usize,
    fail_erase: Option<usize>,
    fail_write: Option<usize>,
}

impl SimFlash {
    /// Create a fully erased device
    pub fn new(geometry: Geometry) -> Self {
        let size = (geometry.pages * geometry.page_size) as usize;
        SimFlash {
            geometry,
            memory: vec![0xFF; size],
            ops: Vec::new(),
            erase_calls: 0,
            write_calls: 0,
            fail_erase: None,
            fail_write: None,
        }
    }

    /// Fail the `call`-th erase (counting from 0)
    pub fn fail_erase_on(mut self, call: usize) -> Self {
        self.fail_erase = Some(call);
        self
    }

    /// Fail the `call`-th page write (counting from 0)
    pub fn fail_write_on(mut self, call: usize) -> Self {
        self.fail_write = Some(call);
        self
    }

    /// Fill flash contents from a dump, e.g. one written by [`save`](SimFlash::save).
    /// A short dump leaves the remainder erased.
    pub fn load<R: Read>(&mut self, read: &mut R) -> io::Result<()> {
        let mut dump = Vec::new();
        read.read_to_end(&mut dump)?;
        let len = dump.len().min(self.memory.len());
        self.memory[..len].copy_from_slice(&dump[..len]);
        Ok(())
    }

    /// Write the whole flash contents out
    pub fn save<W: Write>(&self, write: &mut W) -> io::Result<()> {
        write.write_all(&self.memory)
    }

    /// Overwrite flash contents directly, bypassing erase/program rules
    pub fn poke(&mut self, address: u32, data: &[u8]) {
        let start = address as usize;
        self.memory[start..start + data.len()].copy_from_slice(data);
    }

    pub fn contents(&self) -> &[u8] {
        &self.memory
    }

    /// Every erase and write attempted, in order
    pub fn ops(&self) -> &[FlashOp] {
        &self.ops
    }

    pub fn erased_rows(&self) -> impl Iterator<Item = u32> + '_ {
        self.ops.iter().filter_map(|op| match op {
            FlashOp::Erase(address) => Some(*address),
            FlashOp::Write(_) => None,
        })
    }

    pub fn written_pages(&self) -> impl Iterator<Item = u32> + '_ {
        self.ops.iter().filter_map(|op| match op {
            FlashOp::Write(address) => Some(*address),
            FlashOp::Erase(_) => None,
        })
    }

    fn range(&self, address: u32, len: usize) -> Result<std::ops::Range<usize>, SimFlashError> {
        let start = address as usize;
        match start.checked_add(len) {
            Some(end) if end <= self.memory.len() => Ok(start..end),
            _ => Err(SimFlashError::OutOfBounds(address)),
        }
    }
}

impl Nvm for SimFlash {
    type Error = SimFlashError;

    fn geometry(&mut self) -> Result<Geometry, Self::Error> {
        Ok(self.geometry)
    }

    fn erase_row(&mut self, address: u32) -> Result<(), Self::Error> {
        self.ops.push(FlashOp::Erase(address));
        let call = self.erase_calls;
        self.erase_calls += 1;
        if self.fail_erase == Some(call) {
            return Err(SimFlashError::Injected);
        }
        let row_size = self.geometry.row_size();
        if address % row_size != 0 {
            return Err(SimFlashError::Misaligned(address));
        }
        let range = self.range(address, row_size as usize)?;
        self.memory[range].fill(0xFF);
        Ok(())
    }

    fn write_page(&mut self, address: u32, data: &[u8]) -> Result<(), Self::Error> {
        self.ops.push(FlashOp::Write(address));
        let call = self.write_calls;
        self.write_calls += 1;
        if self.fail_write == Some(call) {
            return Err(SimFlashError::Injected);
        }
        if address % self.geometry.page_size != 0 {
            return Err(SimFlashError::Misaligned(address));
        }
        if data.len() != self.geometry.page_size as usize {
            return Err(SimFlashError::BadLength(data.len()));
        }
        let range = self.range(address, data.len())?;
        for (cell, byte) in self.memory[range].iter_mut().zip(data) {
            *cell &= *byte;
        }
        Ok(())
    }

    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), Self::Error> {
        let range = self.range(address, buf.len())?;
        buf.copy_from_slice(&self.memory[range]);
        Ok(())
    }
}

#[derive(Clone, Eq, PartialEq, Debug)]
pub enum MemStorageError {
    NotFound(String),
    /// Failure requested with `fail_read_on` / `fail_delete`
    Injected,
}

/// Open file of a [`MemStorage`]
#[derive(Debug)]
pub struct MemFile {
    name: String,
    position: usize,
}

/// In-memory filesystem
#[derive(Clone, Debug, Default)]
pub struct MemStorage {
    files: BTreeMap<String, Vec<u8>>,
    /// Largest number of bytes handed out by one read
    read_limit: Option<usize>,
    read_calls: usize,
    fail_read: Option<usize>,
    fail_delete: bool,
    open_files: usize,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, name: &str, content: &[u8]) -> Self {
        self.files.insert(name.to_owned(), content.to_vec());
        self
    }

    /// Hand out at most `limit` bytes per read, like a filesystem crossing sectors
    pub fn read_limit(mut self, limit: usize) -> Self {
        self.read_limit = Some(limit);
        self
    }

    /// Fail the `call`-th read (counting from 0)
    pub fn fail_read_on(mut self, call: usize) -> Self {
        self.fail_read = Some(call);
        self
    }

    /// Fail every delete, leaving the file in place
    pub fn fail_delete(mut self) -> Self {
        self.fail_delete = true;
        self
    }

    pub fn exists(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }

    /// Files opened and not closed yet
    pub fn open_files(&self) -> usize {
        self.open_files
    }
}

impl Storage for MemStorage {
    type Error = MemStorageError;
    type File = MemFile;

    fn open(&mut self, name: &str) -> Result<Self::File, Self::Error> {
        if !self.files.contains_key(name) {
            return Err(MemStorageError::NotFound(name.to_owned()));
        }
        self.open_files += 1;
        Ok(MemFile {
            name: name.to_owned(),
            position: 0,
        })
    }

    fn read(&mut self, file: &mut Self::File, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let call = self.read_calls;
        self.read_calls += 1;
        if self.fail_read == Some(call) {
            return Err(MemStorageError::Injected);
        }
        let content = self
            .files
            .get(&file.name)
            .ok_or_else(|| MemStorageError::NotFound(file.name.clone()))?;
        let remaining = &content[file.position.min(content.len())..];
        let len = remaining
            .len()
            .min(buf.len())
            .min(self.read_limit.unwrap_or(usize::MAX));
        buf[..len].copy_from_slice(&remaining[..len]);
        file.position += len;
        Ok(len)
    }

    fn close(&mut self, _file: Self::File) -> Result<(), Self::Error> {
        self.open_files -= 1;
        Ok(())
    }

    fn delete(&mut self, name: &str) -> Result<(), Self::Error> {
        if self.fail_delete {
            return Err(MemStorageError::Injected);
        }
        self.files
            .remove(name)
            .map(drop)
            .ok_or_else(|| MemStorageError::NotFound(name.to_owned()))
    }
}

/// Files served from a directory, standing in for a mounted card
#[derive(Clone, Debug)]
pub struct DirStorage {
    root: PathBuf,
}

impl DirStorage {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        DirStorage { root: root.into() }
    }
}

impl Storage for DirStorage {
    type Error = io::Error;
    type File = fs::File;

    fn open(&mut self, name: &str) -> Result<Self::File, Self::Error> {
        fs::File::open(self.root.join(name))
    }

    fn read(&mut self, file: &mut Self::File, buf: &mut [u8]) -> Result<usize, Self::Error> {
        file.read(buf)
    }

    fn close(&mut self, file: Self::File) -> Result<(), Self::Error> {
        drop(file);
        Ok(())
    }

    fn delete(&mut self, name: &str) -> Result<(), Self::Error> {
        fs::remove_file(self.root.join(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flash() -> SimFlash {
        SimFlash::new(Geometry {
            page_size: 64,
            pages: 16,
            pages_per_row: 4,
        })
    }

    #[test]
    fn programming_only_clears_bits() {
        let mut flash = flash();
        flash.write_page(0x40, &[0x0F; 64]).unwrap();
        flash.write_page(0x40, &[0xF3; 64]).unwrap();
        assert!(flash.contents()[0x40..0x80].iter().all(|&b| b == 0x03));

        flash.erase_row(0).unwrap();
        assert!(flash.contents()[..0x100].iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn rejects_bad_accesses() {
        let mut flash = flash();
        assert_eq!(flash.erase_row(0x40), Err(SimFlashError::Misaligned(0x40)));
        assert_eq!(flash.write_page(0x41, &[0; 64]), Err(SimFlashError::Misaligned(0x41)));
        assert_eq!(flash.write_page(0x40, &[0; 32]), Err(SimFlashError::BadLength(32)));
        assert_eq!(flash.erase_row(0x400), Err(SimFlashError::OutOfBounds(0x400)));
        assert_eq!(
            flash.read(0x3F8, &mut [0; 16]),
            Err(SimFlashError::OutOfBounds(0x3F8))
        );
        assert_eq!(flash.ops().len(), 4);
    }

    #[test]
    fn dump_survives_save_and_load() {
        let mut flash = flash();
        flash.poke(0x100, b"vector");
        let mut dump = Vec::new();
        flash.save(&mut dump).unwrap();

        let mut restored = self::flash();
        restored.load(&mut &dump[..]).unwrap();
        assert_eq!(restored.contents(), flash.contents());
        assert!(restored.ops().is_empty());
    }

    #[test]
    fn mem_storage_reads_in_limited_chunks() {
        let mut storage = MemStorage::new()
            .with_file("fw.bin", &[1, 2, 3, 4, 5])
            .read_limit(2);
        let mut file = storage.open("fw.bin").unwrap();
        let mut buf = [0; 8];
        assert_eq!(storage.read(&mut file, &mut buf), Ok(2));
        assert_eq!(storage.read(&mut file, &mut buf[2..]), Ok(2));
        assert_eq!(storage.read(&mut file, &mut buf[4..]), Ok(1));
        assert_eq!(storage.read(&mut file, &mut buf[5..]), Ok(0));
        assert_eq!(&buf[..5], &[1, 2, 3, 4, 5]);
        assert_eq!(storage.open_files(), 1);
        storage.close(file).unwrap();
        assert_eq!(storage.open_files(), 0);
    }

    #[test]
    fn dir_storage_serves_and_deletes_files() {
        let root = std::env::temp_dir().join(format!("cardboot-sim-{}", std::process::id()));
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("update.txt"), b"").unwrap();
        fs::write(root.join("fw.bin"), b"image").unwrap();
        let mut storage = DirStorage::new(&root);

        let mut file = storage.open("fw.bin").unwrap();
        let mut buf = [0; 16];
        assert_eq!(storage.read(&mut file, &mut buf).unwrap(), 5);
        storage.close(file).unwrap();

        storage.delete("update.txt").unwrap();
        assert!(storage.open("update.txt").is_err());
        assert!(storage.delete("update.txt").is_err());

        fs::remove_dir_all(&root).unwrap();
    }
}
