//! Uncompressed on-disk array files (`.vsf`).
//!
//! Layout, all little-endian: magic `VSF1`, u32 format version, u32 dtype tag
//! (0 = f32, 1 = i64), u32 rank, rank x u64 dims, then the raw payload.
//! No compression; loading a saved array reproduces it bit for bit.

use crate::types::{VolDatasetError, VolDatasetResult, Volume};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

pub const MAGIC: [u8; 4] = *b"VSF1";
pub const VERSION: u32 = 1;

const DTYPE_F32: u32 = 0;
const DTYPE_I64: u32 = 1;

#[derive(Debug, Clone, PartialEq)]
pub enum VolData {
    F32(Vec<f32>),
    I64(Vec<i64>),
}

impl VolData {
    pub fn len(&self) -> usize {
        match self {
            VolData::F32(v) => v.len(),
            VolData::I64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An n-dimensional array as stored on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct VolArray {
    pub dims: Vec<u64>,
    pub data: VolData,
}

impl VolArray {
    pub fn from_f32(dims: Vec<u64>, data: Vec<f32>) -> VolDatasetResult<Self> {
        check_elems(&dims, data.len())?;
        Ok(Self {
            dims,
            data: VolData::F32(data),
        })
    }

    pub fn from_i64(dims: Vec<u64>, data: Vec<i64>) -> VolDatasetResult<Self> {
        check_elems(&dims, data.len())?;
        Ok(Self {
            dims,
            data: VolData::I64(data),
        })
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match &self.data {
            VolData::F32(v) => Some(v),
            VolData::I64(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<&[i64]> {
        match &self.data {
            VolData::I64(v) => Some(v),
            VolData::F32(_) => None,
        }
    }
}

fn check_elems(dims: &[u64], len: usize) -> VolDatasetResult<()> {
    let mut expected = 1u64;
    for d in dims {
        expected = expected
            .checked_mul(*d)
            .ok_or_else(|| VolDatasetError::Shape {
                msg: format!("element count overflow for dims {dims:?}"),
            })?;
    }
    if expected != len as u64 {
        return Err(VolDatasetError::Shape {
            msg: format!("buffer holds {len} elements but dims {dims:?} need {expected}"),
        });
    }
    Ok(())
}

pub fn save(path: &Path, array: &VolArray) -> VolDatasetResult<()> {
    let io_err = |e| VolDatasetError::Io {
        path: path.to_path_buf(),
        source: e,
    };
    let file = fs::File::create(path).map_err(io_err)?;
    let mut out = BufWriter::new(file);

    out.write_all(&MAGIC).map_err(io_err)?;
    out.write_all(&VERSION.to_le_bytes()).map_err(io_err)?;
    let dtype = match &array.data {
        VolData::F32(_) => DTYPE_F32,
        VolData::I64(_) => DTYPE_I64,
    };
    out.write_all(&dtype.to_le_bytes()).map_err(io_err)?;
    out.write_all(&(array.dims.len() as u32).to_le_bytes())
        .map_err(io_err)?;
    for d in &array.dims {
        out.write_all(&d.to_le_bytes()).map_err(io_err)?;
    }
    match &array.data {
        VolData::F32(values) => {
            for v in values {
                out.write_all(&v.to_le_bytes()).map_err(io_err)?;
            }
        }
        VolData::I64(values) => {
            for v in values {
                out.write_all(&v.to_le_bytes()).map_err(io_err)?;
            }
        }
    }
    out.flush().map_err(io_err)
}

pub fn load(path: &Path) -> VolDatasetResult<VolArray> {
    let raw = fs::read(path).map_err(|e| VolDatasetError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let format_err = |msg: String| VolDatasetError::Format {
        path: path.to_path_buf(),
        msg,
    };

    if raw.len() < 16 {
        return Err(format_err(format!("truncated header ({} bytes)", raw.len())));
    }
    if raw[0..4] != MAGIC {
        return Err(format_err(format!("bad magic {:?}", &raw[0..4])));
    }
    let version = u32::from_le_bytes(raw[4..8].try_into().unwrap_or_default());
    if version != VERSION {
        return Err(format_err(format!("unsupported version {version}")));
    }
    let dtype = u32::from_le_bytes(raw[8..12].try_into().unwrap_or_default());
    let rank = u32::from_le_bytes(raw[12..16].try_into().unwrap_or_default()) as usize;

    let dims_end = 16 + rank * 8;
    if raw.len() < dims_end {
        return Err(format_err(format!("truncated dims (rank {rank})")));
    }
    let mut dims = Vec::with_capacity(rank);
    let mut elems = 1u64;
    for chunk in raw[16..dims_end].chunks_exact(8) {
        let mut arr = [0u8; 8];
        arr.copy_from_slice(chunk);
        let d = u64::from_le_bytes(arr);
        elems = elems
            .checked_mul(d)
            .ok_or_else(|| format_err("element count overflow".to_string()))?;
        dims.push(d);
    }

    let payload = &raw[dims_end..];
    match dtype {
        DTYPE_F32 => {
            if payload.len() != elems as usize * 4 {
                return Err(format_err(format!(
                    "payload is {} bytes, expected {} f32 elements",
                    payload.len(),
                    elems
                )));
            }
            let mut data = Vec::with_capacity(elems as usize);
            for chunk in payload.chunks_exact(4) {
                let mut arr = [0u8; 4];
                arr.copy_from_slice(chunk);
                data.push(f32::from_le_bytes(arr));
            }
            Ok(VolArray {
                dims,
                data: VolData::F32(data),
            })
        }
        DTYPE_I64 => {
            if payload.len() != elems as usize * 8 {
                return Err(format_err(format!(
                    "payload is {} bytes, expected {} i64 elements",
                    payload.len(),
                    elems
                )));
            }
            let mut data = Vec::with_capacity(elems as usize);
            for chunk in payload.chunks_exact(8) {
                let mut arr = [0u8; 8];
                arr.copy_from_slice(chunk);
                data.push(i64::from_le_bytes(arr));
            }
            Ok(VolArray {
                dims,
                data: VolData::I64(data),
            })
        }
        other => Err(format_err(format!("unknown dtype tag {other}"))),
    }
}

/// Save a 3D volume as an f32 array file.
pub fn save_volume(path: &Path, vol: &Volume) -> VolDatasetResult<()> {
    let dims = vol.shape.iter().map(|d| *d as u64).collect();
    save(path, &VolArray::from_f32(dims, vol.data.clone())?)
}

/// Load a rank-3 array file as a `Volume`.
///
/// Label files may carry i64 payloads; those are cast to f32, which is exact
/// for the small integer class ids labels hold.
pub fn load_volume(path: &Path) -> VolDatasetResult<Volume> {
    let array = load(path)?;
    if array.dims.len() != 3 {
        return Err(VolDatasetError::Format {
            path: path.to_path_buf(),
            msg: format!("expected rank 3, got rank {}", array.dims.len()),
        });
    }
    let shape = [
        array.dims[0] as usize,
        array.dims[1] as usize,
        array.dims[2] as usize,
    ];
    let data = match array.data {
        VolData::F32(v) => v,
        VolData::I64(v) => v.into_iter().map(|x| x as f32).collect(),
    };
    Volume::new(data, shape)
}
