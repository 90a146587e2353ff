//! Optional compression, layered on top of the flag-tagged value encoding
//! (the other half of component B).

use crate::{
    error::Error,
    value::{COMPRESSION_THRESHOLD, FLAG_COMPRESSED},
};

/// A pluggable compressor for values above [`COMPRESSION_THRESHOLD`] bytes.
///
/// `level` follows the call-site convention: `-1` picks the implementation's
/// default quality, `0` disables compression for that call regardless of
/// size, and `1..=9` requests a specific quality level.
pub trait Compressor: Clone + Send + Sync + 'static {
    fn compress(&self, bytes: &[u8], level: i32) -> Result<Vec<u8>, Error>;
    fn decompress(&self, bytes: &[u8]) -> Result<Vec<u8>, Error>;
}

/// A [`Compressor`] that never compresses. Useful when compression is
/// undesired outright rather than merely disabled for one call.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCompressor;

impl Compressor for NoCompressor {
    fn compress(&self, bytes: &[u8], _level: i32) -> Result<Vec<u8>, Error> {
        Ok(bytes.to_vec())
    }

    fn decompress(&self, bytes: &[u8]) -> Result<Vec<u8>, Error> {
        Ok(bytes.to_vec())
    }
}

/// Apply `compressor` to `(flags, bytes)` if the payload clears
/// [`COMPRESSION_THRESHOLD`] and `compress_level != 0`. Returns the
/// (possibly unmodified) flags and bytes.
pub(crate) fn maybe_compress<C: Compressor>(
    compressor: &C,
    flags: u32,
    bytes: Vec<u8>,
    compress_level: i32,
) -> Result<(u32, Vec<u8>), Error> {
    if compress_level == 0 || bytes.len() <= COMPRESSION_THRESHOLD {
        return Ok((flags, bytes));
    }
    let compressed = compressor.compress(&bytes, compress_level)?;
    Ok((flags | FLAG_COMPRESSED, compressed))
}

/// Undo [`maybe_compress`]: if `FLAG_COMPRESSED` is set, decompress first
/// and clear the bit, so every later flag check sees the plain payload.
pub(crate) fn maybe_decompress<C: Compressor>(
    compressor: &C,
    flags: u32,
    bytes: Vec<u8>,
) -> Result<(u32, Vec<u8>), Error> {
    if flags & FLAG_COMPRESSED == 0 {
        return Ok((flags, bytes));
    }
    let plain = compressor.decompress(&bytes)?;
    Ok((flags & !FLAG_COMPRESSED, plain))
}

#[cfg(feature = "zlib")]
mod deflate {
    use super::*;
    use flate2::{
        write::{ZlibDecoder, ZlibEncoder},
        Compression,
    };
    use std::io::Write;

    /// The default [`Compressor`]: zlib/deflate, matching the reference
    /// client's default.
    #[derive(Debug, Clone, Copy)]
    pub struct DeflateCompressor {
        default_level: Compression,
    }

    impl DeflateCompressor {
        pub fn new(default_level: Compression) -> Self {
            DeflateCompressor { default_level }
        }
    }

    impl Default for DeflateCompressor {
        fn default() -> Self {
            DeflateCompressor::new(Compression::default())
        }
    }

    impl Compressor for DeflateCompressor {
        fn compress(&self, bytes: &[u8], level: i32) -> Result<Vec<u8>, Error> {
            let level = match level {
                -1 => self.default_level,
                0..=9 => Compression::new(level as u32),
                _ => self.default_level,
            };
            let mut out = vec![];
            let mut enc = ZlibEncoder::new(&mut out, level);
            enc.write_all(bytes)?;
            enc.finish()?;
            Ok(out)
        }

        fn decompress(&self, bytes: &[u8]) -> Result<Vec<u8>, Error> {
            let mut out = vec![];
            let mut dec = ZlibDecoder::new(&mut out);
            dec.write_all(bytes)?;
            dec.finish()?;
            Ok(out)
        }
    }
}

#[cfg(feature = "zlib")]
pub use deflate::DeflateCompressor;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_compressor_is_identity() {
        let c = NoCompressor;
        let (flags, bytes) = maybe_compress(&c, 0, vec![0_u8; 1000], -1).unwrap();
        assert_eq!(flags, 0);
        assert_eq!(bytes.len(), 1000);
    }

    #[test]
    fn test_threshold_not_crossed() {
        let c = NoCompressor;
        let small = vec![1_u8; COMPRESSION_THRESHOLD];
        let (flags, bytes) = maybe_compress(&c, 0, small.clone(), -1).unwrap();
        assert_eq!(flags, 0);
        assert_eq!(bytes, small);
    }

    #[cfg(feature = "zlib")]
    #[test]
    fn test_deflate_round_trip() {
        use deflate::DeflateCompressor;
        let c = DeflateCompressor::default();
        let original = vec![b'x'; 5000];
        let (flags, compressed) = maybe_compress(&c, 0, original.clone(), -1).unwrap();
        assert_eq!(flags & FLAG_COMPRESSED, FLAG_COMPRESSED);
        assert!(compressed.len() < original.len());
        let (flags, restored) = maybe_decompress(&c, flags, compressed).unwrap();
        assert_eq!(flags & FLAG_COMPRESSED, 0);
        assert_eq!(restored, original);
    }

    #[cfg(feature = "zlib")]
    #[test]
    fn test_compress_level_zero_disables() {
        use deflate::DeflateCompressor;
        let c = DeflateCompressor::default();
        let original = vec![b'x'; 5000];
        let (flags, bytes) = maybe_compress(&c, 0, original.clone(), 0).unwrap();
        assert_eq!(flags, 0);
        assert_eq!(bytes, original);
    }
}
