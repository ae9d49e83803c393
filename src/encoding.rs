//! Point wire codec
//!
//! Ceremony artifacts are exchanged in the encoding used by the upstream
//! powers-of-tau tooling, not in Arkworks' canonical form, so this module
//! carries its own codec over the Arkworks types.
//!
//! # Layout
//!
//! ```text
//! G1 compressed   [flags|x (32 B, big-endian)]                     32 B
//! G1 raw          [x (32 B)][y (32 B)]                             64 B
//! G2 compressed   [flags|x.c1 (32 B)][x.c0 (32 B)]                 64 B
//! G2 raw          [x.c1][x.c0][y.c1][y.c0]                        128 B
//! ```
//!
//! The two most significant bits of byte 0 are flags:
//!
//! | bits | meaning                                  |
//! |------|------------------------------------------|
//! | `00` | uncompressed (raw); all-zero is infinity |
//! | `10` | compressed, lexicographically smallest y |
//! | `11` | compressed, lexicographically largest y  |
//! | `01` | compressed point at infinity             |
//!
//! Point sequences carry a big-endian `u32` length prefix; integers are
//! big-endian. Decoding validates canonical coordinates, curve membership and
//! subgroup membership, and reports failures as
//! [`SetupError::FormatMismatch`] at the absolute offset of the point.

#![forbid(unsafe_code)]

use ark_bn254::{g1, g2, Fq, Fq2, G1Affine, G2Affine};
use ark_ec::{
    short_weierstrass::{Affine, SWCurveConfig},
    AffineRepr,
};
use ark_ff::{BigInt, BigInteger, Field, PrimeField, Zero};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};

use crate::SetupError;

const MASK: u8 = 0b11 << 6;
const UNCOMPRESSED: u8 = 0b00 << 6;
const COMPRESSED_SMALLEST: u8 = 0b10 << 6;
const COMPRESSED_LARGEST: u8 = 0b11 << 6;
const COMPRESSED_INFINITY: u8 = 0b01 << 6;

/// Size in bytes of one base-field element.
pub const FQ_BYTES: usize = 32;

/// Which of the two point encodings an [`Encoder`] emits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PointEncoding {
    /// x-coordinate plus a sign flag (default).
    Compressed,
    /// Both coordinates, no decompression needed on read.
    Raw,
}

/// A curve point with a fixed-size wire form.
pub trait WirePoint: AffineRepr {
    /// Bytes of the compressed form.
    const COMPRESSED_SIZE: usize;
    /// Bytes of the raw form.
    const RAW_SIZE: usize;

    /// Append the encoded point to `out`.
    fn encode_into(&self, encoding: PointEncoding, out: &mut Vec<u8>);

    /// Decode a compressed point (`bytes.len() == COMPRESSED_SIZE`).
    fn decode_compressed(bytes: &[u8]) -> Result<Self, &'static str>;

    /// Decode a raw point (`bytes.len() == RAW_SIZE`).
    fn decode_raw(bytes: &[u8]) -> Result<Self, &'static str>;

    /// Encoded size under `encoding`.
    fn encoded_size(encoding: PointEncoding) -> usize {
        match encoding {
            PointEncoding::Compressed => Self::COMPRESSED_SIZE,
            PointEncoding::Raw => Self::RAW_SIZE,
        }
    }
}

// ----------------------------------------------------------------------------
// Field helpers
// ----------------------------------------------------------------------------

fn fq_to_be(x: &Fq) -> [u8; FQ_BYTES] {
    let mut out = [0u8; FQ_BYTES];
    out.copy_from_slice(&x.into_bigint().to_bytes_be());
    out
}

/// Parse a canonical (< p) big-endian base-field element.
fn fq_from_be(bytes: &[u8]) -> Option<Fq> {
    if bytes.len() != FQ_BYTES {
        return None;
    }
    let mut limbs = [0u64; 4];
    for (limb, chunk) in limbs.iter_mut().zip(bytes.rchunks_exact(8)) {
        let mut word = [0u8; 8];
        word.copy_from_slice(chunk);
        *limb = u64::from_be_bytes(word);
    }
    Fq::from_bigint(BigInt(limbs))
}

#[inline]
fn fq_lexicographically_largest(y: &Fq) -> bool {
    y.into_bigint() > Fq::MODULUS_MINUS_ONE_DIV_TWO
}

#[inline]
fn fq2_lexicographically_largest(y: &Fq2) -> bool {
    if y.c1.is_zero() {
        fq_lexicographically_largest(&y.c0)
    } else {
        fq_lexicographically_largest(&y.c1)
    }
}

#[inline]
fn is_compressed(first: u8) -> bool {
    first & MASK != UNCOMPRESSED
}

fn strip_flags<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut buf = [0u8; N];
    buf.copy_from_slice(&bytes[..N]);
    buf[0] &= !MASK;
    buf
}

fn checked<P: SWCurveConfig>(
    p: ark_ec::short_weierstrass::Affine<P>,
) -> Result<ark_ec::short_weierstrass::Affine<P>, &'static str> {
    if !p.is_on_curve() {
        return Err("point is not on the curve");
    }
    if !p.is_in_correct_subgroup_assuming_on_curve() {
        return Err("point is not in the prime-order subgroup");
    }
    Ok(p)
}

// ----------------------------------------------------------------------------
// G1
// ----------------------------------------------------------------------------

impl WirePoint for Affine<g1::Config> {
    const COMPRESSED_SIZE: usize = FQ_BYTES;
    const RAW_SIZE: usize = 2 * FQ_BYTES;

    fn encode_into(&self, encoding: PointEncoding, out: &mut Vec<u8>) {
        match encoding {
            PointEncoding::Compressed => {
                if self.is_zero() {
                    let mut buf = [0u8; FQ_BYTES];
                    buf[0] = COMPRESSED_INFINITY;
                    out.extend_from_slice(&buf);
                    return;
                }
                let mut buf = fq_to_be(&self.x);
                buf[0] |= if fq_lexicographically_largest(&self.y) {
                    COMPRESSED_LARGEST
                } else {
                    COMPRESSED_SMALLEST
                };
                out.extend_from_slice(&buf);
            }
            PointEncoding::Raw => {
                if self.is_zero() {
                    out.extend_from_slice(&[0u8; 2 * FQ_BYTES]);
                    return;
                }
                out.extend_from_slice(&fq_to_be(&self.x));
                out.extend_from_slice(&fq_to_be(&self.y));
            }
        }
    }

    fn decode_compressed(bytes: &[u8]) -> Result<Self, &'static str> {
        let flag = bytes[0] & MASK;
        let buf: [u8; FQ_BYTES] = strip_flags(bytes);
        match flag {
            COMPRESSED_INFINITY => {
                if buf.iter().all(|b| *b == 0) {
                    Ok(G1Affine::zero())
                } else {
                    Err("infinity flag with non-zero coordinate bytes")
                }
            }
            COMPRESSED_SMALLEST | COMPRESSED_LARGEST => {
                let x = fq_from_be(&buf).ok_or("x coordinate is not canonical")?;
                let rhs = x.square() * x + g1::Config::COEFF_B;
                let mut y = rhs.sqrt().ok_or("x is not the abscissa of a curve point")?;
                if fq_lexicographically_largest(&y) != (flag == COMPRESSED_LARGEST) {
                    y = -y;
                }
                checked(G1Affine::new_unchecked(x, y))
            }
            _ => Err("expected a compressed point"),
        }
    }

    fn decode_raw(bytes: &[u8]) -> Result<Self, &'static str> {
        if bytes[0] & MASK != UNCOMPRESSED {
            return Err("expected an uncompressed point");
        }
        if bytes.iter().all(|b| *b == 0) {
            return Ok(G1Affine::zero());
        }
        let x = fq_from_be(&bytes[..FQ_BYTES]).ok_or("x coordinate is not canonical")?;
        let y = fq_from_be(&bytes[FQ_BYTES..]).ok_or("y coordinate is not canonical")?;
        checked(G1Affine::new_unchecked(x, y))
    }
}

// ----------------------------------------------------------------------------
// G2
// ----------------------------------------------------------------------------

fn fq2_to_be(v: &Fq2, out: &mut Vec<u8>) {
    out.extend_from_slice(&fq_to_be(&v.c1));
    out.extend_from_slice(&fq_to_be(&v.c0));
}

fn fq2_from_be(bytes: &[u8]) -> Option<Fq2> {
    let c1 = fq_from_be(&bytes[..FQ_BYTES])?;
    let c0 = fq_from_be(&bytes[FQ_BYTES..2 * FQ_BYTES])?;
    Some(Fq2::new(c0, c1))
}

impl WirePoint for Affine<g2::Config> {
    const COMPRESSED_SIZE: usize = 2 * FQ_BYTES;
    const RAW_SIZE: usize = 4 * FQ_BYTES;

    fn encode_into(&self, encoding: PointEncoding, out: &mut Vec<u8>) {
        let start = out.len();
        match encoding {
            PointEncoding::Compressed => {
                if self.is_zero() {
                    out.extend_from_slice(&[0u8; 2 * FQ_BYTES]);
                    out[start] = COMPRESSED_INFINITY;
                    return;
                }
                fq2_to_be(&self.x, out);
                out[start] |= if fq2_lexicographically_largest(&self.y) {
                    COMPRESSED_LARGEST
                } else {
                    COMPRESSED_SMALLEST
                };
            }
            PointEncoding::Raw => {
                if self.is_zero() {
                    out.extend_from_slice(&[0u8; 4 * FQ_BYTES]);
                    return;
                }
                fq2_to_be(&self.x, out);
                fq2_to_be(&self.y, out);
            }
        }
    }

    fn decode_compressed(bytes: &[u8]) -> Result<Self, &'static str> {
        let flag = bytes[0] & MASK;
        let buf: [u8; 2 * FQ_BYTES] = strip_flags(bytes);
        match flag {
            COMPRESSED_INFINITY => {
                if buf.iter().all(|b| *b == 0) {
                    Ok(G2Affine::zero())
                } else {
                    Err("infinity flag with non-zero coordinate bytes")
                }
            }
            COMPRESSED_SMALLEST | COMPRESSED_LARGEST => {
                let x = fq2_from_be(&buf).ok_or("x coordinate is not canonical")?;
                let rhs = x.square() * x + g2::Config::COEFF_B;
                let mut y = rhs.sqrt().ok_or("x is not the abscissa of a curve point")?;
                if fq2_lexicographically_largest(&y) != (flag == COMPRESSED_LARGEST) {
                    y = -y;
                }
                checked(G2Affine::new_unchecked(x, y))
            }
            _ => Err("expected a compressed point"),
        }
    }

    fn decode_raw(bytes: &[u8]) -> Result<Self, &'static str> {
        if bytes[0] & MASK != UNCOMPRESSED {
            return Err("expected an uncompressed point");
        }
        if bytes.iter().all(|b| *b == 0) {
            return Ok(G2Affine::zero());
        }
        let x = fq2_from_be(&bytes[..2 * FQ_BYTES]).ok_or("x coordinate is not canonical")?;
        let y = fq2_from_be(&bytes[2 * FQ_BYTES..]).ok_or("y coordinate is not canonical")?;
        checked(G2Affine::new_unchecked(x, y))
    }
}

// ----------------------------------------------------------------------------
// Stream encoder / decoder
// ----------------------------------------------------------------------------

/// Writes points and integers in wire form, counting bytes.
pub struct Encoder<W: Write> {
    w: W,
    encoding: PointEncoding,
    written: u64,
    scratch: Vec<u8>,
}

impl<W: Write> Encoder<W> {
    /// Compressed-point encoder.
    pub fn new(w: W) -> Self {
        Self::with_encoding(w, PointEncoding::Compressed)
    }

    /// Encoder with an explicit point encoding.
    pub fn with_encoding(w: W, encoding: PointEncoding) -> Self {
        Self { w, encoding, written: 0, scratch: Vec::with_capacity(128) }
    }

    /// Total bytes written so far.
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Point encoding in use.
    pub fn encoding(&self) -> PointEncoding {
        self.encoding
    }

    /// Mutable access to the sink (e.g. to flush it).
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.w
    }

    /// Give back the sink.
    pub fn into_inner(self) -> W {
        self.w
    }

    /// Write raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), SetupError> {
        self.w.write_all(bytes)?;
        self.written += bytes.len() as u64;
        Ok(())
    }

    /// Write a big-endian `u32`.
    pub fn write_u32(&mut self, v: u32) -> Result<(), SetupError> {
        self.write_bytes(&v.to_be_bytes())
    }

    /// Write a single point.
    pub fn write_point<P: WirePoint>(&mut self, p: &P) -> Result<(), SetupError> {
        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.clear();
        p.encode_into(self.encoding, &mut scratch);
        let res = self.write_bytes(&scratch);
        self.scratch = scratch;
        res
    }

    /// Write a `u32` length prefix followed by the points.
    pub fn write_points<P: WirePoint>(&mut self, points: &[P]) -> Result<(), SetupError> {
        let len = u32::try_from(points.len()).map_err(|_| {
            SetupError::format(self.written, format!("{} points exceed a u32 length prefix", points.len()))
        })?;
        self.write_u32(len)?;
        for p in points {
            self.write_point(p)?;
        }
        Ok(())
    }
}

/// Reads points and integers in wire form, tracking the absolute offset.
pub struct Decoder<R: Read> {
    r: R,
    offset: u64,
}

impl<R: Read> Decoder<R> {
    /// Decoder whose offsets start at zero.
    pub fn new(r: R) -> Self {
        Self::at(r, 0)
    }

    /// Decoder over a reader already positioned at `offset`.
    pub fn at(r: R, offset: u64) -> Self {
        Self { r, offset }
    }

    /// Absolute offset of the next byte.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Give back the reader.
    pub fn into_inner(self) -> R {
        self.r
    }

    fn fill(&mut self, buf: &mut [u8], what: &str) -> Result<(), SetupError> {
        self.r.read_exact(buf).map_err(|e| {
            if e.kind() == ErrorKind::UnexpectedEof {
                SetupError::format(self.offset, format!("unexpected end of input while reading {what}"))
            } else {
                SetupError::Io(e)
            }
        })?;
        self.offset += buf.len() as u64;
        Ok(())
    }

    /// Read exactly `N` bytes.
    pub fn read_array<const N: usize>(&mut self, what: &str) -> Result<[u8; N], SetupError> {
        let mut buf = [0u8; N];
        self.fill(&mut buf, what)?;
        Ok(buf)
    }

    /// Read a byte.
    pub fn read_u8(&mut self) -> Result<u8, SetupError> {
        Ok(self.read_array::<1>("u8")?[0])
    }

    /// Read a big-endian `u16`.
    pub fn read_u16(&mut self) -> Result<u16, SetupError> {
        Ok(u16::from_be_bytes(self.read_array("u16")?))
    }

    /// Read a big-endian `u32`.
    pub fn read_u32(&mut self) -> Result<u32, SetupError> {
        Ok(u32::from_be_bytes(self.read_array("u32")?))
    }

    /// Read one point, detecting compressed vs raw from its flag bits.
    pub fn read_point<P: WirePoint>(&mut self) -> Result<P, SetupError> {
        let start = self.offset;
        let mut buf = [0u8; 4 * FQ_BYTES];
        self.fill(&mut buf[..P::COMPRESSED_SIZE], "point")?;
        let decoded = if is_compressed(buf[0]) {
            P::decode_compressed(&buf[..P::COMPRESSED_SIZE])
        } else {
            self.fill(&mut buf[P::COMPRESSED_SIZE..P::RAW_SIZE], "point")?;
            P::decode_raw(&buf[..P::RAW_SIZE])
        };
        decoded.map_err(|reason| SetupError::format(start, reason))
    }

    /// Read a length prefix and return it.
    pub fn read_len(&mut self) -> Result<usize, SetupError> {
        Ok(self.read_u32()? as usize)
    }

    /// Read a `u32` length prefix followed by that many points.
    pub fn read_points<P: WirePoint>(&mut self) -> Result<Vec<P>, SetupError> {
        let len = self.read_len()?;
        // Capacity is bounded so a corrupt prefix cannot force a huge allocation.
        let mut out = Vec::with_capacity(len.min(1 << 16));
        for _ in 0..len {
            out.push(self.read_point()?);
        }
        Ok(out)
    }

    /// Read exactly `count` points with no length prefix.
    pub fn read_points_exact<P: WirePoint>(&mut self, count: usize) -> Result<Vec<P>, SetupError> {
        let mut out = Vec::with_capacity(count.min(1 << 16));
        for _ in 0..count {
            out.push(self.read_point()?);
        }
        Ok(out)
    }
}

impl<R: Read + Seek> Decoder<R> {
    /// Reposition the underlying reader at absolute `offset`.
    pub fn seek_to(&mut self, offset: u64) -> Result<(), SetupError> {
        self.r.seek(SeekFrom::Start(offset))?;
        self.offset = offset;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_ec::{CurveGroup, Group};
    use ark_ff::UniformRand;
    use rand::{rngs::StdRng, SeedableRng};

    fn roundtrip<P: WirePoint>(p: P, encoding: PointEncoding) -> P {
        let mut enc = Encoder::with_encoding(Vec::new(), encoding);
        enc.write_point(&p).unwrap();
        assert_eq!(enc.bytes_written() as usize, P::encoded_size(encoding));
        let bytes = enc.into_inner();
        let mut dec = Decoder::new(bytes.as_slice());
        let q = dec.read_point::<P>().unwrap();
        assert_eq!(dec.offset() as usize, bytes.len());
        q
    }

    #[test]
    fn g1_generator_has_known_compressed_form() {
        // (1, 2): x = 1, y = 2 is the smaller root.
        let mut out = Vec::new();
        G1Affine::generator().encode_into(PointEncoding::Compressed, &mut out);
        let mut expect = [0u8; 32];
        expect[0] = 0x80;
        expect[31] = 0x01;
        assert_eq!(out, expect);

        // The negation flips only the sign flag.
        out.clear();
        (-G1Affine::generator()).encode_into(PointEncoding::Compressed, &mut out);
        expect[0] = 0xC0;
        assert_eq!(out, expect);
    }

    #[test]
    fn random_points_survive_both_encodings() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..8 {
            let p1 = ark_bn254::G1Projective::rand(&mut rng).into_affine();
            let p2 = ark_bn254::G2Projective::rand(&mut rng).into_affine();
            for encoding in [PointEncoding::Compressed, PointEncoding::Raw] {
                assert_eq!(roundtrip(p1, encoding), p1);
                assert_eq!(roundtrip(p2, encoding), p2);
            }
        }
    }

    #[test]
    fn infinity_roundtrips() {
        for encoding in [PointEncoding::Compressed, PointEncoding::Raw] {
            assert!(roundtrip(G1Affine::zero(), encoding).is_zero());
            assert!(roundtrip(G2Affine::zero(), encoding).is_zero());
        }
    }

    #[test]
    fn g2_generator_roundtrips() {
        let g = ark_bn254::G2Projective::generator().into_affine();
        assert_eq!(roundtrip(g, PointEncoding::Compressed), g);
    }

    #[test]
    fn rejects_non_canonical_x() {
        // x = p (all ones masked into 254 bits is > p as well).
        let mut bytes = [0xFFu8; 32];
        bytes[0] = COMPRESSED_SMALLEST | 0x3F;
        let mut dec = Decoder::at(&bytes[..], 100);
        match dec.read_point::<G1Affine>() {
            Err(SetupError::FormatMismatch { offset, .. }) => assert_eq!(offset, 100),
            other => panic!("expected format mismatch, got {other:?}"),
        }
    }

    #[test]
    fn rejects_truncated_vector() {
        let pts = vec![G1Affine::generator(); 3];
        let mut enc = Encoder::new(Vec::new());
        enc.write_points(&pts).unwrap();
        let mut bytes = enc.into_inner();
        bytes.truncate(bytes.len() - 1);
        let err = Decoder::new(bytes.as_slice()).read_points::<G1Affine>().unwrap_err();
        assert!(err.to_string().contains("unexpected end of input"));
    }

    #[test]
    fn length_prefixed_vector_roundtrips() {
        let mut rng = StdRng::seed_from_u64(11);
        let pts: Vec<G1Affine> =
            (0..5).map(|_| ark_bn254::G1Projective::rand(&mut rng).into_affine()).collect();
        let mut enc = Encoder::new(Vec::new());
        enc.write_points(&pts).unwrap();
        assert_eq!(enc.bytes_written(), 4 + 5 * 32);
        let bytes = enc.into_inner();
        let back: Vec<G1Affine> = Decoder::new(bytes.as_slice()).read_points().unwrap();
        assert_eq!(back, pts);
    }
}
