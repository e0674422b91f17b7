//! Vertical reassembly of PNG fragments.
//!
//! Fragments are folded one at a time into an accumulator file: both IDAT
//! streams are inflated, the accumulator's rows are followed by the next
//! fragment's rows, and the result is deflated into a new accumulator with a
//! corrected IHDR height and fresh CRCs.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::downloader::fragment_path;
use crate::error::{Error, Result};
use crate::png::codec::{self, Compression};
use crate::png::{ImageHeader, PngError, SimplePng};

/// Fold `next` under `accumulator` and write the stacked image to `output`.
///
/// `output` may be the same path as `accumulator`.
pub fn fold(accumulator: &Path, next: &Path, output: &Path) -> Result<ImageHeader> {
    let acc = SimplePng::read(accumulator)?;
    let frag = SimplePng::read(next)?;

    acc.header
        .check_stackable(&frag.header)
        .map_err(|e| Error::png(next, e))?;

    let mut raw = acc
        .decode_scanlines()
        .map_err(|e| Error::png(accumulator, e))?;
    let tail = frag.decode_scanlines().map_err(|e| Error::png(next, e))?;
    raw.extend_from_slice(&tail);

    let height = acc
        .header
        .height
        .checked_add(frag.header.height)
        .ok_or_else(|| Error::png(next, PngError::Overflow))?;
    let header = ImageHeader {
        height,
        ..acc.header
    };

    let idat = codec::deflate(&raw, Compression::default()).map_err(|e| Error::png(output, e))?;
    let merged = SimplePng::with_trailer(header, idat, acc.iend.clone());
    write_png(&merged, output)?;

    debug!(
        accumulator = %accumulator.display(),
        next = %next.display(),
        height,
        "folded fragment"
    );
    Ok(header)
}

/// Write through a sibling temp file and rename over `path`.
pub fn write_png(png: &SimplePng, path: &Path) -> Result<()> {
    let tmp = part_path(path);
    {
        let mut w = BufWriter::new(File::create(&tmp)?);
        png.write_to(&mut w)?;
        w.flush()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    path.with_file_name(name)
}

/// The accumulator is rewritten after every fold, so `output` may only alias
/// the first input.
fn check_output_not_later_input(rest: &[PathBuf], output: &Path) -> Result<()> {
    let Ok(out) = fs::canonicalize(output) else {
        return Ok(());
    };
    for input in rest {
        if fs::canonicalize(input).is_ok_and(|p| p == out) {
            return Err(Error::Config(format!(
                "output {} is also a later input",
                output.display()
            )));
        }
    }
    Ok(())
}

/// Stack `inputs` top to bottom into `output`.
///
/// With `consume`, each input is deleted once it has been folded in.
pub fn paste(inputs: &[PathBuf], output: &Path, consume: bool) -> Result<ImageHeader> {
    let Some((first, rest)) = inputs.split_first() else {
        return Err(Error::Config("nothing to paste".into()));
    };
    check_output_not_later_input(rest, output)?;

    if rest.is_empty() {
        // Re-encode so the output is normalised the same way a fold would.
        let png = SimplePng::read(first)?;
        let raw = png.decode_scanlines().map_err(|e| Error::png(first, e))?;
        let out = SimplePng::encode(png.header, &raw).map_err(|e| Error::png(output, e))?;
        write_png(&out, output)?;
        if consume && first.as_path() != output {
            fs::remove_file(first)?;
        }
        return Ok(out.header);
    }

    let mut header = crate::png::read_header(first)?;
    let mut accumulator = first.as_path();
    for next in rest {
        header = fold(accumulator, next, output)?;
        if consume {
            if accumulator != output {
                fs::remove_file(accumulator)?;
            }
            fs::remove_file(next)?;
        }
        accumulator = output;
    }

    info!(
        fragments = inputs.len(),
        width = header.width,
        height = header.height,
        output = %output.display(),
        "image reassembled"
    );
    Ok(header)
}

/// Reassemble `<dir>/0.png .. <dir>/<total-1>.png`, deleting them as they are consumed.
pub fn paste_fragments(dir: &Path, total: usize, output: &Path) -> Result<ImageHeader> {
    let inputs: Vec<PathBuf> = (0..total).map(|i| fragment_path(dir, i)).collect();
    paste(&inputs, output, true)
}
