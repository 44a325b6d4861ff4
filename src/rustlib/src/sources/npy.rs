//! Minimal reader/writer for 1-D little-endian NumPy `.npy` arrays.

use super::mmap_file;
use crate::error::{Result, SpikeError};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

const MAGIC: &[u8] = b"\x93NUMPY";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NpyHeader {
    pub descr: String,
    pub shape: Vec<usize>,
    pub data_offset: usize,
}

impl NpyHeader {
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn invalid(path_hint: &str, message: &str) -> SpikeError {
    SpikeError::InvalidRecording(format!("{}: {}", path_hint, message))
}

pub fn parse_header(bytes: &[u8]) -> Result<NpyHeader> {
    if bytes.len() < 10 || &bytes[..6] != MAGIC {
        return Err(invalid("npy", "missing magic string"));
    }
    let major = bytes[6];
    let (header_len, header_start) = match major {
        1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
        2 | 3 => {
            if bytes.len() < 12 {
                return Err(invalid("npy", "truncated header"));
            }
            (
                u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize,
                12,
            )
        }
        v => return Err(invalid("npy", &format!("unsupported version {}", v))),
    };

    let data_offset = header_start + header_len;
    let header = bytes
        .get(header_start..data_offset)
        .ok_or_else(|| invalid("npy", "truncated header"))?;
    let header = String::from_utf8_lossy(header);

    let descr = dict_value(&header, "descr")
        .and_then(|v| v.split('\'').nth(1).map(str::to_string))
        .ok_or_else(|| invalid("npy", "header has no descr"))?;

    if dict_value(&header, "fortran_order").is_some_and(|v| v.starts_with("True")) {
        return Err(invalid("npy", "fortran order arrays are not supported"));
    }

    let shape_text = dict_value(&header, "shape").ok_or_else(|| invalid("npy", "header has no shape"))?;
    let open = shape_text.find('(').ok_or_else(|| invalid("npy", "malformed shape"))?;
    let close = shape_text.find(')').ok_or_else(|| invalid("npy", "malformed shape"))?;
    let shape = shape_text[open + 1..close]
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<usize>().map_err(|_| invalid("npy", "malformed shape")))
        .collect::<Result<Vec<_>>>()?;

    Ok(NpyHeader {
        descr,
        shape,
        data_offset,
    })
}

fn dict_value<'a>(header: &'a str, key: &str) -> Option<&'a str> {
    let pattern = format!("'{}':", key);
    let start = header.find(&pattern)? + pattern.len();
    Some(header[start..].trim_start())
}

fn read_values<T, const N: usize>(
    path: &Path,
    descrs: &[&str],
    decode: fn([u8; N]) -> T,
) -> Result<Vec<T>> {
    let hint = path.display().to_string();
    let mmap = mmap_file(path)?;
    let header = parse_header(&mmap).map_err(|e| invalid(&hint, &e.to_string()))?;
    if !descrs.contains(&header.descr.as_str()) {
        return Err(invalid(
            &hint,
            &format!("expected one of {:?}, found '{}'", descrs, header.descr),
        ));
    }

    let data = &mmap[header.data_offset..];
    let count = header.len();
    if data.len() < count * N {
        return Err(invalid(&hint, "data shorter than declared shape"));
    }

    Ok(data[..count * N]
        .chunks_exact(N)
        .map(|chunk| {
            let mut raw = [0u8; N];
            raw.copy_from_slice(chunk);
            decode(raw)
        })
        .collect())
}

pub fn read_i64(path: &Path) -> Result<Vec<i64>> {
    read_values(path, &["<i8"], i64::from_le_bytes)
}

pub fn read_i16(path: &Path) -> Result<Vec<i16>> {
    read_values(path, &["<i2"], i16::from_le_bytes)
}

fn write_values(path: &Path, descr: &str, count: usize, data: &[u8]) -> Result<()> {
    let mut header = format!(
        "{{'descr': '{}', 'fortran_order': False, 'shape': ({},), }}",
        descr, count
    );
    // magic + version + length field, padded so data starts on a 64 byte boundary
    let unpadded = MAGIC.len() + 4 + header.len() + 1;
    header.push_str(&" ".repeat((64 - unpadded % 64) % 64));
    header.push('\n');

    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(MAGIC)?;
    writer.write_all(&[1, 0])?;
    writer.write_all(&(header.len() as u16).to_le_bytes())?;
    writer.write_all(header.as_bytes())?;
    writer.write_all(data)?;
    writer.flush()?;
    Ok(())
}

pub fn write_i64(path: &Path, values: &[i64]) -> Result<()> {
    let data: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    write_values(path, "<i8", values.len(), &data)
}

pub fn write_i16(path: &Path, values: &[i16]) -> Result<()> {
    let data: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    write_values(path, "<i2", values.len(), &data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_alignment_and_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("timestamps.npy");
        write_i64(&path, &[123456789, -4, 0]).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let header = parse_header(&bytes).unwrap();
        assert_eq!(header.data_offset % 64, 0);
        assert_eq!(header.descr, "<i8");
        assert_eq!(header.shape, vec![3]);

        assert_eq!(read_i64(&path).unwrap(), vec![123456789, -4, 0]);
    }

    #[test]
    fn test_dtype_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("states.npy");
        write_i16(&path, &[1, -1, 2]).unwrap();

        assert_eq!(read_i16(&path).unwrap(), vec![1, -1, 2]);
        assert!(read_i64(&path).is_err());
    }

    #[test]
    fn test_parse_header_rejects_garbage() {
        assert!(parse_header(b"not a numpy file").is_err());
    }
}
