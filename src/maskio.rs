// Reading and writing [T, Y, X] label volumes as .npy files.

use anyhow::Context;
use ndarray::Array3;
use ndarray_npy::{ReadNpyError, ReadNpyExt, WriteNpyExt};
use std::fs::File;
use std::io::{BufReader, BufWriter};

use celltrack::tracking::MaskVolume;

fn open(path: &str) -> anyhow::Result<BufReader<File>> {
    let file = File::open(path).with_context(|| format!("opening mask {}", path))?;
    Ok(BufReader::new(file))
}

// u32 volumes are read as is; u16 and u8 volumes are widened.
pub fn read_mask(path: &str) -> anyhow::Result<MaskVolume> {
    match MaskVolume::read_npy(open(path)?) {
        Ok(mask) => return Ok(mask),
        Err(ReadNpyError::WrongDescriptor(_)) => {}
        Err(err) => return Err(err).with_context(|| format!("reading mask {}", path)),
    }

    if let Ok(mask) = Array3::<u16>::read_npy(open(path)?) {
        return Ok(mask.mapv(u32::from));
    }

    let mask = Array3::<u8>::read_npy(open(path)?)
        .with_context(|| format!("{} is not a 3D u32, u16 or u8 array", path))?;
    Ok(mask.mapv(u32::from))
}

pub fn write_mask(path: &str, mask: &MaskVolume) -> anyhow::Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path))?;
    mask.write_npy(BufWriter::new(file))
        .with_context(|| format!("writing mask {}", path))?;
    Ok(())
}
