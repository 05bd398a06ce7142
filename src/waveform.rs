//! Loading of the pre-generated chirp waveform.
//!
//! The waveform generator writes the chirp as raw little-endian complex
//! float32 pairs; the scheduler keeps a private copy in memory for the whole
//! run. A missing or truncated file is fatal.

use byteorder::{LittleEndian, ReadBytesExt};
use failure::{format_err, Error};
use num::complex::Complex;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Read exactly `num_samps` complex samples from `path`.
pub fn load(path: &Path, num_samps: usize) -> Result<Vec<Complex<f32>>, Error> {
    let file = File::open(path)
        .map_err(|e| format_err!("failed to open chirp file {}: {}", path.display(), e))?;
    let mut reader = BufReader::new(file);
    let mut samps = Vec::with_capacity(num_samps);
    for _ in 0..num_samps {
        let re = reader
            .read_f32::<LittleEndian>()
            .map_err(|e| format_err!("chirp file {} ended early: {}", path.display(), e))?;
        let im = reader
            .read_f32::<LittleEndian>()
            .map_err(|e| format_err!("chirp file {} ended early: {}", path.display(), e))?;
        samps.push(Complex::new(re, im));
    }
    Ok(samps)
}
