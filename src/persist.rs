//! Saving and loading the value table as a NumPy `.npy` array of little-endian `f64`

use std::{
    fs,
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use log::info;

use crate::{algo::QTable, error::PersistError};

const MAGIC: &[u8] = b"\x93NUMPY";
const HEADER_ALIGN: usize = 64;
const PREAMBLE_LEN: usize = MAGIC.len() + 2 + 2;

fn header(shape: (usize, usize)) -> Vec<u8> {
    let mut dict = format!(
        "{{'descr': '<f8', 'fortran_order': False, 'shape': ({}, {}), }}",
        shape.0, shape.1
    );
    // header ends in a newline and the data starts on an aligned offset
    let unpadded = PREAMBLE_LEN + dict.len() + 1;
    let padding = (HEADER_ALIGN - unpadded % HEADER_ALIGN) % HEADER_ALIGN;
    dict.extend(std::iter::repeat(' ').take(padding));
    dict.push('\n');
    dict.into_bytes()
}

/// Encode `table` in `.npy` format
pub fn encode(table: &QTable) -> Vec<u8> {
    let header = header(table.shape());
    let mut buf = Vec::with_capacity(PREAMBLE_LEN + header.len() + table.values().len() * 8);
    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&[1, 0]);
    buf.extend_from_slice(&(header.len() as u16).to_le_bytes());
    buf.extend_from_slice(&header);
    for value in table.values() {
        buf.extend_from_slice(&value.to_le_bytes());
    }
    buf
}

/// Decode a `.npy` file holding a 2-D C-ordered `<f8` array
pub fn decode(bytes: &[u8], path: &Path) -> Result<QTable, PersistError> {
    let format_err = |reason: &str| PersistError::Format {
        path: path.to_owned(),
        reason: reason.to_owned(),
    };

    if bytes.len() < PREAMBLE_LEN || !bytes.starts_with(MAGIC) {
        return Err(format_err("missing .npy magic"));
    }
    let (major, header_len, header_start) = match bytes[MAGIC.len()] {
        1 => (
            1,
            u16::from_le_bytes([bytes[8], bytes[9]]) as usize,
            PREAMBLE_LEN,
        ),
        2 | 3 if bytes.len() >= PREAMBLE_LEN + 2 => (
            bytes[MAGIC.len()],
            u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize,
            PREAMBLE_LEN + 2,
        ),
        _ => return Err(format_err("unsupported .npy version")),
    };
    let data_start = header_start + header_len;
    let header = bytes
        .get(header_start..data_start)
        .ok_or_else(|| format_err("truncated header"))?;
    let header = std::str::from_utf8(header).map_err(|_| format_err("header is not text"))?;

    if dict_value(header, "descr") != Some("'<f8'") {
        return Err(format_err("array is not little-endian f64"));
    }
    if dict_value(header, "fortran_order") != Some("False") {
        return Err(format_err("array is not in C order"));
    }
    let shape = dict_value(header, "shape")
        .and_then(parse_shape)
        .ok_or_else(|| format_err("array is not two dimensional"))?;

    let data = &bytes[data_start..];
    if data.len() != shape.0 * shape.1 * 8 {
        return Err(format_err(&format!(
            "{} data bytes for shape {shape:?} (format v{major})",
            data.len()
        )));
    }
    let values = data
        .chunks_exact(8)
        .map(|chunk| {
            let mut raw = [0; 8];
            raw.copy_from_slice(chunk);
            f64::from_le_bytes(raw)
        })
        .collect();
    QTable::from_values(shape.0, shape.1, values).ok_or_else(|| format_err("empty table"))
}

/// The raw text of `key`'s value in a Python dict literal
fn dict_value<'h>(header: &'h str, key: &str) -> Option<&'h str> {
    let needle = format!("'{key}':");
    let rest = header[header.find(&needle)? + needle.len()..].trim_start();
    let end = if rest.starts_with('(') {
        rest.find(')')? + 1
    } else {
        rest.find(|c: char| c == ',' || c == '}')?
    };
    Some(rest[..end].trim())
}

fn parse_shape(shape: &str) -> Option<(usize, usize)> {
    let dims = shape
        .strip_prefix('(')?
        .strip_suffix(')')?
        .split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::parse)
        .collect::<Result<Vec<usize>, _>>()
        .ok()?;
    match dims[..] {
        [rows, cols] => Some((rows, cols)),
        _ => None,
    }
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> PersistError {
    let path = path.to_owned();
    move |source| PersistError::Io { path, source }
}

/// Write `table` to `path`, replacing it atomically
pub fn save(path: &Path, table: &QTable) -> Result<(), PersistError> {
    let mut tmp = PathBuf::from(path);
    tmp.as_mut_os_string().push(".tmp");

    let file = fs::File::create(&tmp).map_err(io_error(&tmp))?;
    let mut writer = BufWriter::new(file);
    writer.write_all(&encode(table)).map_err(io_error(&tmp))?;
    writer
        .into_inner()
        .map_err(|e| e.into_error())
        .and_then(|file| file.sync_all())
        .map_err(io_error(&tmp))?;
    fs::rename(&tmp, path).map_err(io_error(path))?;

    info!(
        "saved {}x{} value table to {}",
        table.num_states(),
        table.num_actions(),
        path.display()
    );
    Ok(())
}

/// Read a table from `path`, requiring the given shape
pub fn load(path: &Path, expected: (usize, usize)) -> Result<QTable, PersistError> {
    let bytes = fs::read(path).map_err(io_error(path))?;
    let table = decode(&bytes, path)?;
    if table.shape() != expected {
        return Err(PersistError::Shape {
            expected,
            found: table.shape(),
        });
    }
    Ok(table)
}
