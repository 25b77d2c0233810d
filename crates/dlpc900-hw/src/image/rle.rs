//! Enhanced run-length encoding of composite images.
//!
//! Bitmap layout:
//! - 48-byte header: signature `Spld`, width, height, total byte length,
//!   eight `0xFF`, black-curtain color, compression marker `0x02`
//! - row-major body built from four primitives:
//!   - `00 01 n`: copy `n` pixels from the row above
//!   - `n rgb`: repeat one pixel `n` times (`n == 1` is a single literal)
//!   - `00 n rgb...`: `n` literal pixels (`n >= 2`)
//!   - `00 00`: end of row, `00 01 00`: end of image
//! - zero padding to a multiple of four bytes
//!
//! Counts below 128 take one byte; larger counts take two, low seven bits
//! first with the continuation bit set.

use super::composite::Composite;
use crate::bits::pack;
use crate::{Error, Result, DMD_HEIGHT, DMD_WIDTH};
use tracing::debug;

/// Size of the bitmap header.
pub const HEADER_SIZE: usize = 48;

/// Bitmap signature (`Spld`).
pub const SIGNATURE: [u8; 4] = [0x53, 0x70, 0x6C, 0x64];

/// Compression marker for Enhanced RLE.
pub const ENHANCED_RLE: u8 = 0x02;

/// Offset of the 32-bit total length field.
const LENGTH_OFFSET: usize = 8;

/// Offset of the compression marker.
const COMPRESSION_OFFSET: usize = 25;

const VERTICAL_REPEAT: [u8; 2] = [0x00, 0x01];
const END_OF_ROW: [u8; 2] = [0x00, 0x00];
const END_OF_IMAGE: [u8; 3] = [0x00, 0x01, 0x00];
const SINGLE_LITERAL: u8 = 0x01;
const LITERAL_RUN: u8 = 0x00;

/// A compressed composite, ready for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedBitmap {
    bytes: Vec<u8>,
}

impl EncodedBitmap {
    /// Wraps previously encoded bytes after checking the header.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let length = header_length(&bytes)?;
        if length as usize != bytes.len() {
            return Err(Error::InvalidBitmap(format!(
                "header length {} does not match {} bytes",
                length,
                bytes.len()
            )));
        }
        if bytes.len() % 4 != 0 {
            return Err(Error::InvalidBitmap(format!(
                "length {} is not a multiple of 4",
                bytes.len()
            )));
        }
        Ok(Self { bytes })
    }

    /// Returns the encoded bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Returns the encoded length in bytes.
    pub fn byte_count(&self) -> u32 {
        self.bytes.len() as u32
    }

    /// Consumes the bitmap, returning its bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Reads the total length field from a bitmap header.
pub fn header_length(bytes: &[u8]) -> Result<u32> {
    if bytes.len() < HEADER_SIZE {
        return Err(Error::InvalidBitmap(format!(
            "{} bytes is shorter than the header",
            bytes.len()
        )));
    }
    if bytes[..4] != SIGNATURE {
        return Err(Error::InvalidBitmap(format!(
            "bad signature {:02X?}",
            &bytes[..4]
        )));
    }
    let field = &bytes[LENGTH_OFFSET..LENGTH_OFFSET + 4];
    Ok(u32::from_le_bytes([field[0], field[1], field[2], field[3]]))
}

fn header() -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(HEADER_SIZE);
    out.extend_from_slice(&SIGNATURE);
    out.extend(pack(DMD_WIDTH as u64, 16)?);
    out.extend(pack(DMD_HEIGHT as u64, 16)?);
    out.extend(pack(0, 32)?);
    out.extend_from_slice(&[0xFF; 8]);
    // Black curtain color
    out.extend_from_slice(&[0x00; 4]);
    out.push(0x00);
    out.push(ENHANCED_RLE);
    out.push(0x01);
    out.extend_from_slice(&[0x00; 21]);
    debug_assert_eq!(out.len(), HEADER_SIZE);
    Ok(out)
}

fn push_count(out: &mut Vec<u8>, n: usize) {
    debug_assert!(n < 1 << 15);
    if n < 128 {
        out.push(n as u8);
    } else {
        out.push(((n & 0x7F) | 0x80) as u8);
        out.push((n >> 7) as u8);
    }
}

/// Compresses a composite image.
pub fn encode(image: &Composite) -> Result<EncodedBitmap> {
    let mut out = header()?;

    for row in 0..DMD_HEIGHT as usize {
        let mut col = 0;
        while col < DMD_WIDTH as usize {
            let next = encode_step(image, row, col, &mut out);
            if next <= col {
                return Err(Error::CodecStall { row, column: col });
            }
            col = next;
        }
        out.extend_from_slice(&END_OF_ROW);
    }
    out.extend_from_slice(&END_OF_IMAGE);

    while out.len() % 4 != 0 {
        out.push(0x00);
    }

    let length = pack(out.len() as u64, 32)?;
    out[LENGTH_OFFSET..LENGTH_OFFSET + 4].copy_from_slice(&length);

    debug!("Encoded composite into {} bytes", out.len());
    Ok(EncodedBitmap { bytes: out })
}

/// Emits one primitive starting at `col` and returns the column after it.
fn encode_step(image: &Composite, row: usize, col: usize, out: &mut Vec<u8>) -> usize {
    let width = DMD_WIDTH as usize;
    let px = image.pixel(col, row);

    if row > 0 && px == image.pixel(col, row - 1) {
        let mut end = col + 1;
        while end < width && image.pixel(end, row) == image.pixel(end, row - 1) {
            end += 1;
        }
        out.extend_from_slice(&VERTICAL_REPEAT);
        push_count(out, end - col);
        return end;
    }

    if col + 1 < width && px == image.pixel(col + 1, row) {
        let mut end = col + 2;
        while end < width && image.pixel(end, row) == px {
            end += 1;
        }
        push_count(out, end - col);
        out.extend_from_slice(&px);
        return end;
    }

    // A literal run needs at least two differing pixels ahead, otherwise the
    // pixel goes out alone and the next one starts a repeat.
    let single = col + 2 >= width
        || image.pixel(col + 1, row) == image.pixel(col + 2, row)
        || (row > 0 && image.pixel(col + 1, row) == image.pixel(col + 1, row - 1));
    if single {
        out.push(SINGLE_LITERAL);
        out.extend_from_slice(&px);
        return col + 1;
    }

    let mut end = col + 1;
    while end + 1 < width && image.pixel(end, row) != image.pixel(end + 1, row) {
        end += 1;
    }
    out.push(LITERAL_RUN);
    push_count(out, end - col);
    for x in col..end {
        out.extend_from_slice(&image.pixel(x, row));
    }
    end
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn byte(&mut self) -> Result<u8> {
        let b = *self.bytes.get(self.pos).ok_or_else(|| {
            Error::InvalidBitmap(format!("stream truncated at byte {}", self.pos))
        })?;
        self.pos += 1;
        Ok(b)
    }

    fn count_from(&mut self, first: u8) -> Result<usize> {
        if first & 0x80 == 0 {
            Ok(first as usize)
        } else {
            let second = self.byte()?;
            Ok((first & 0x7F) as usize | (second as usize) << 7)
        }
    }

    fn count(&mut self) -> Result<usize> {
        let first = self.byte()?;
        self.count_from(first)
    }

    fn pixel(&mut self) -> Result<[u8; 3]> {
        Ok([self.byte()?, self.byte()?, self.byte()?])
    }
}

/// Reconstructs a composite from an encoded bitmap.
pub fn decode(bytes: &[u8]) -> Result<Composite> {
    let length = header_length(bytes)?;
    if length as usize != bytes.len() {
        return Err(Error::InvalidBitmap(format!(
            "header length {} does not match {} bytes",
            length,
            bytes.len()
        )));
    }
    let width = u16::from_le_bytes([bytes[4], bytes[5]]);
    let height = u16::from_le_bytes([bytes[6], bytes[7]]);
    if (width, height) != (DMD_WIDTH, DMD_HEIGHT) {
        return Err(Error::InvalidBitmap(format!(
            "unsupported dimensions {}x{}",
            width, height
        )));
    }
    if bytes[COMPRESSION_OFFSET] != ENHANCED_RLE {
        return Err(Error::InvalidBitmap(format!(
            "unsupported compression 0x{:02X}",
            bytes[COMPRESSION_OFFSET]
        )));
    }

    let width = width as usize;
    let height = height as usize;
    let mut image = Composite::new();
    let mut reader = Reader {
        bytes,
        pos: HEADER_SIZE,
    };
    let (mut row, mut col) = (0usize, 0usize);

    let span = |row: usize, col: usize, n: usize| -> Result<()> {
        if row >= height || n == 0 || col + n > width {
            return Err(Error::InvalidBitmap(format!(
                "run of {} at row {}, column {} exceeds the image",
                n, row, col
            )));
        }
        Ok(())
    };

    loop {
        let control = reader.byte()?;
        if control != 0x00 {
            let n = reader.count_from(control)?;
            let px = reader.pixel()?;
            span(row, col, n)?;
            for x in col..col + n {
                image.set_pixel(x, row, px);
            }
            col += n;
            continue;
        }

        match reader.byte()? {
            0x00 => {
                if col != width {
                    return Err(Error::InvalidBitmap(format!(
                        "row {} ended at column {}",
                        row, col
                    )));
                }
                row += 1;
                col = 0;
            }
            0x01 => {
                let n = reader.count()?;
                if n == 0 {
                    break;
                }
                if row == 0 {
                    return Err(Error::InvalidBitmap("vertical copy on first row".into()));
                }
                span(row, col, n)?;
                for x in col..col + n {
                    let above = image.pixel(x, row - 1);
                    image.set_pixel(x, row, above);
                }
                col += n;
            }
            first => {
                let n = reader.count_from(first)?;
                span(row, col, n)?;
                for x in col..col + n {
                    let px = reader.pixel()?;
                    image.set_pixel(x, row, px);
                }
                col += n;
            }
        }
    }

    if row != height || col != 0 {
        return Err(Error::InvalidBitmap(format!(
            "image ended after {} of {} rows",
            row, height
        )));
    }
    if bytes[reader.pos..].iter().any(|&b| b != 0) {
        return Err(Error::InvalidBitmap("trailing data after end of image".into()));
    }

    Ok(image)
}
