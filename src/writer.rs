//! Binary output of flushed pulse sums.
//!
//! Sums are appended as raw little-endian complex float32 pairs, one record
//! per flushed sum, so downstream tooling can mmap the file directly. When
//! rotation is enabled the files are `<save_loc>.0`, `<save_loc>.1`, ... and
//! a sum is never split across two files. The `[OPEN FILE]` and
//! `[CLOSE FILE]` markers are part of the run-log contract.

use byteorder::{LittleEndian, WriteBytesExt};
use failure::{format_err, Error};
use num::complex::Complex;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::console;

pub struct SumWriter {
    base: PathBuf,
    max_chirps_per_file: i64,
    file: BufWriter<File>,
    current_path: PathBuf,
    save_file_index: i64,
}

impl SumWriter {
    pub fn create(save_loc: &Path, max_chirps_per_file: i64) -> Result<SumWriter, Error> {
        let current_path = if max_chirps_per_file > 0 {
            suffixed(save_loc, 0)
        } else {
            save_loc.to_path_buf()
        };
        let file = open_output(&current_path)?;
        console::emit(format!("[OPEN FILE] {}", current_path.display()));
        Ok(SumWriter {
            base: save_loc.to_path_buf(),
            max_chirps_per_file,
            file,
            current_path,
            save_file_index: 0,
        })
    }

    /// Append one completed sum. Failure here is fatal to the run.
    pub fn write_sum(&mut self, sum: &[Complex<f32>]) -> Result<(), Error> {
        for s in sum {
            self.file.write_f32::<LittleEndian>(s.re)?;
            self.file.write_f32::<LittleEndian>(s.im)?;
        }
        self.file.flush()?;
        Ok(())
    }

    /// Rotate once the written-pulse watermark crosses the per-file
    /// threshold. Called between sums, so records never straddle files.
    pub fn rotate_if_due(&mut self, last_pulse_num_written: i64) -> Result<(), Error> {
        if self.max_chirps_per_file <= 0 {
            return Ok(());
        }
        if last_pulse_num_written / self.max_chirps_per_file <= self.save_file_index {
            return Ok(());
        }

        self.file.flush()?;
        console::emit(format!("[CLOSE FILE] {}", self.current_path.display()));

        self.save_file_index += 1;
        self.current_path = suffixed(&self.base, self.save_file_index);
        self.file = open_output(&self.current_path)?;
        console::emit(format!("[OPEN FILE] {}", self.current_path.display()));
        Ok(())
    }

    pub fn close(mut self) -> Result<(), Error> {
        self.file.flush()?;
        console::emit(format!("[CLOSE FILE] {}", self.current_path.display()));
        Ok(())
    }
}

fn suffixed(base: &Path, index: i64) -> PathBuf {
    PathBuf::from(format!("{}.{}", base.display(), index))
}

fn open_output(path: &Path) -> Result<BufWriter<File>, Error> {
    let file = File::create(path)
        .map_err(|e| format_err!("cannot open output file {}: {}", path.display(), e))?;
    Ok(BufWriter::new(file))
}
